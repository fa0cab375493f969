use super::*;
use crate::cni::CniCommand;
use crate::network::InterfaceBuilder;
use crate::store::InterfaceStore;
use crate::switch::PortConnector;
use crate::testing::{
    single_vif_descriptor, CallLog, FakeBridge, FakeBuilder, FakeDescriptors, FakeFlows,
};
use serde_json::Value;

const HOST_IFNAME: &str = "tap0123456789a";
const POD_MAC: &str = "aa:bb:cc:dd:ee:ff";

struct Harness {
    log: CallLog,
    bridge: Arc<FakeBridge>,
    flows: Arc<FakeFlows>,
    builder: Arc<FakeBuilder>,
    descriptors: Arc<FakeDescriptors>,
    store: Arc<InterfaceStore>,
    server: Arc<CniServer>,
    _ready: Option<ReadySignal>,
}

impl Harness {
    fn new() -> Self {
        Self::with(ServerOptions::default(), true)
    }

    fn with(options: ServerOptions, ready: bool) -> Self {
        let log = CallLog::default();
        let bridge = Arc::new(FakeBridge::new(log.clone()));
        let flows = Arc::new(FakeFlows::new(log.clone()));
        let builder = Arc::new(FakeBuilder::new(log.clone()));
        let descriptors = Arc::new(FakeDescriptors::default());
        let store = Arc::new(InterfaceStore::new());

        descriptors.insert(
            "default",
            "p1",
            single_vif_descriptor("eth0", "0123456789abcdef", POD_MAC, "10.0.0.0/24", "10.0.0.5", "10.0.0.1"),
        );

        let (signal, waiter) = network_readiness();
        let signal = if ready {
            signal.mark_ready();
            None
        } else {
            Some(signal)
        };

        let configurator = Arc::new(PodConfigurator::new(
            builder.clone(),
            PortConnector::new(bridge.clone(), flows.clone()),
            store.clone(),
        ));
        let server = Arc::new(CniServer::new(
            options,
            Arc::new(ContainerArbitrator::new()),
            waiter,
            descriptors.clone(),
            configurator,
        ));

        Self {
            log,
            bridge,
            flows,
            builder,
            descriptors,
            store,
            server,
            _ready: signal,
        }
    }

    async fn send(&self, command: CniCommand, args: CniCmdArgs) -> CniCmdResponse {
        self.server.handle(CniRequest::new(command, args)).await
    }
}

fn cni_args(container_id: &str, pod: &str, version: &str) -> CniCmdArgs {
    CniCmdArgs {
        container_id: container_id.to_string(),
        netns: format!("/var/run/netns/{}", container_id),
        ifname: "eth0".to_string(),
        args: format!("IgnoreUnknown=1;K8S_POD_NAMESPACE=default;K8S_POD_NAME={}", pod),
        path: "/opt/cni/bin".to_string(),
        network_configuration: format!(
            r#"{{"cniVersion":"{}","name":"ovs","type":"ovs-cni"}}"#,
            version
        )
        .into_bytes(),
    }
}

fn add_args() -> CniCmdArgs {
    cni_args("c1", "p1", "0.4.0")
}

fn result_json(response: &CniCmdResponse) -> Value {
    serde_json::from_slice(&response.cni_result).unwrap()
}

#[tokio::test]
async fn test_add_returns_result_for_single_vif() {
    let h = Harness::new();

    let response = h.send(CniCommand::Add, add_args()).await;

    assert!(response.is_ok(), "{:?}", response.error);
    let result = result_json(&response);
    assert_eq!(result["cniVersion"], "0.4.0");
    assert_eq!(result["ips"].as_array().unwrap().len(), 1);
    assert_eq!(result["ips"][0]["address"], "10.0.0.5/24");
    assert_eq!(result["ips"][0]["gateway"], "10.0.0.1");
    assert_eq!(result["interfaces"][0]["name"], HOST_IFNAME);
    assert_eq!(result["interfaces"][1]["name"], "eth0");
    assert_eq!(result["interfaces"][1]["mac"], POD_MAC);
    assert_eq!(result["interfaces"][1]["sandbox"], "/var/run/netns/c1");
    assert_eq!(result["routes"][0]["dst"], "0.0.0.0/0");

    let recorded = h.store.get_container_interface("c1").unwrap();
    assert_eq!(recorded.interface_name, HOST_IFNAME);
    assert_eq!(recorded.pod_key(), "default/p1");
    assert_eq!(h.flows.installed().get(HOST_IFNAME), h.bridge.ofport_of(HOST_IFNAME).as_ref());
    assert_eq!(
        h.bridge.external_ids_of(HOST_IFNAME).unwrap()["ip-address"],
        "10.0.0.5"
    );
    assert!(!h.server.arbitrator().is_busy("c1"));
}

#[tokio::test]
async fn test_add_installs_flows_only_after_ofport_is_known() {
    let h = Harness::new();
    h.send(CniCommand::Add, add_args()).await;

    let build = h.log.position(&format!("build_pair {}", HOST_IFNAME));
    let create = h.log.position(&format!("create_port {}", HOST_IFNAME));
    let ofport = h.log.position(&format!("get_ofport {}", HOST_IFNAME));
    let flows = h.log.position(&format!("install_flows {}", HOST_IFNAME));
    assert!(build < create && create < ofport && ofport < flows);
}

#[tokio::test]
async fn test_legacy_version_result() {
    let h = Harness::new();
    let response = h.send(CniCommand::Add, cni_args("c1", "p1", "0.2.0")).await;
    let result = result_json(&response);
    assert_eq!(result["ip4"]["ip"], "10.0.0.5/24");
    assert!(result.get("interfaces").is_none());
}

#[tokio::test]
async fn test_unsupported_version_takes_no_lock() {
    let h = Harness::new();

    for command in [CniCommand::Add, CniCommand::Del, CniCommand::Check] {
        let response = h.send(command, cni_args("c1", "p1", "99.0.0")).await;
        assert_eq!(response.error_code(), Some(ErrorCode::IncompatibleCniVersion));
        assert!(response.error.unwrap().message.contains("99.0.0"));
    }

    assert_eq!(h.server.arbitrator().acquisitions(), 0);
    assert!(h.log.calls().is_empty());
}

#[tokio::test]
async fn test_undecodable_config_takes_no_lock() {
    let h = Harness::new();
    let mut args = add_args();
    args.network_configuration = b"{not json".to_vec();

    let response = h.send(CniCommand::Add, args).await;

    assert_eq!(response.error_code(), Some(ErrorCode::DecodingFailure));
    assert_eq!(
        response.error.unwrap().message,
        "Failed to decode network config"
    );
    assert_eq!(h.server.arbitrator().acquisitions(), 0);
}

#[tokio::test]
async fn test_add_waits_for_network_ready() {
    let options = ServerOptions {
        network_ready_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let h = Harness::with(options, false);

    let response = h.send(CniCommand::Add, add_args()).await;
    assert_eq!(response.error_code(), Some(ErrorCode::TryAgainLater));
    assert_eq!(h.server.arbitrator().acquisitions(), 0);
    assert!(h.log.calls().is_empty());

    // Only Add is gated
    let response = h.send(CniCommand::Del, add_args()).await;
    assert!(response.is_ok());
}

#[tokio::test]
async fn test_missing_descriptor_is_retryable() {
    let h = Harness::new();
    let response = h.send(CniCommand::Add, cni_args("c2", "unknown", "0.4.0")).await;

    assert_eq!(response.error_code(), Some(ErrorCode::TryAgainLater));
    assert!(h.log.calls().is_empty());
    assert!(!h.server.arbitrator().is_busy("c2"));
}

#[tokio::test]
async fn test_no_vif_for_requested_interface() {
    let h = Harness::new();
    let mut args = add_args();
    args.ifname = "net1".to_string();

    let response = h.send(CniCommand::Add, args).await;

    assert_eq!(response.error_code(), Some(ErrorCode::InvalidNetworkConfig));
    assert!(h.log.calls().is_empty());
}

#[tokio::test]
async fn test_flow_failure_rolls_back_everything() {
    let h = Harness::new();
    h.flows.fail_install(true);

    let response = h.send(CniCommand::Add, add_args()).await;

    assert_eq!(response.error_code(), Some(ErrorCode::ConfigInterfaceFailure));
    assert!(h.bridge.port_names().is_empty());
    assert!(h.builder.pairs().is_empty());
    assert!(h.store.is_empty());
    assert_eq!(h.log.count("delete_port"), 1);
    assert_eq!(h.log.count("teardown"), 1);
    assert!(!h.server.arbitrator().is_busy("c1"));
}

#[tokio::test]
async fn test_port_left_by_failed_add_is_removed_by_del() {
    let h = Harness::new();
    h.flows.fail_install(true);
    h.flows.fail_uninstall(true);

    let response = h.send(CniCommand::Add, add_args()).await;

    assert_eq!(response.error_code(), Some(ErrorCode::ConfigInterfaceFailure));
    assert_eq!(h.log.count("delete_port"), 0);
    assert_eq!(h.bridge.port_names(), vec![HOST_IFNAME.to_string()]);
    let recorded = h.store.get_container_interface("c1").unwrap();
    assert_eq!(
        recorded.ovs_port.map(|p| p.port_uuid),
        Some(format!("uuid-{}", HOST_IFNAME))
    );

    h.flows.fail_install(false);
    h.flows.fail_uninstall(false);
    h.log.clear();
    let response = h.send(CniCommand::Del, add_args()).await;

    assert!(response.is_ok(), "{:?}", response.error);
    assert!(h.bridge.port_names().is_empty());
    assert!(h.builder.pairs().is_empty());
    assert!(h.store.is_empty());
    assert!(
        h.log.position(&format!("uninstall_flows {}", HOST_IFNAME))
            < h.log.position(&format!("delete_port {}", HOST_IFNAME))
    );
}

#[tokio::test]
async fn test_build_failure_never_touches_the_switch() {
    let h = Harness::new();
    h.builder.fail_build();

    let response = h.send(CniCommand::Add, add_args()).await;

    assert_eq!(response.error_code(), Some(ErrorCode::ConfigInterfaceFailure));
    assert_eq!(h.log.count("create_port"), 0);
    assert!(h.builder.pairs().is_empty());
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_port_failure_removes_pair() {
    let h = Harness::new();
    h.bridge.fail_create();

    let response = h.send(CniCommand::Add, add_args()).await;

    assert_eq!(response.error_code(), Some(ErrorCode::ConfigInterfaceFailure));
    assert_eq!(h.log.count("install_flows"), 0);
    assert_eq!(h.log.count("delete_port"), 0);
    assert!(h.builder.pairs().is_empty());
}

#[tokio::test]
async fn test_del_without_interface_is_noop() {
    let h = Harness::new();
    let response = h.send(CniCommand::Del, cni_args("c9", "gone", "0.4.0")).await;
    assert!(response.is_ok());
    assert!(h.log.calls().is_empty());
}

#[tokio::test]
async fn test_del_twice_matches_del_once() {
    let h = Harness::new();
    h.send(CniCommand::Add, add_args()).await;

    let first = h.send(CniCommand::Del, add_args()).await;
    assert!(first.is_ok());
    assert!(
        h.log.position(&format!("uninstall_flows {}", HOST_IFNAME))
            < h.log.position(&format!("delete_port {}", HOST_IFNAME))
    );
    let after_first = (h.bridge.port_names(), h.builder.pairs(), h.store.len());

    let second = h.send(CniCommand::Del, add_args()).await;
    assert!(second.is_ok());
    assert_eq!(after_first, (h.bridge.port_names(), h.builder.pairs(), h.store.len()));
    assert_eq!(after_first, (vec![], vec![], 0));
}

#[tokio::test]
async fn test_late_del_of_old_sandbox_keeps_new_one() {
    let h = Harness::new();
    h.send(CniCommand::Add, cni_args("c1", "p1", "0.4.0")).await;
    // The old sandbox dies without a Del; its replacement reuses the VIF
    h.builder.teardown("c1", HOST_IFNAME).await.unwrap();
    let response = h.send(CniCommand::Add, cni_args("c2", "p1", "0.4.0")).await;
    assert!(response.is_ok(), "{:?}", response.error);

    let response = h.send(CniCommand::Del, cni_args("c1", "p1", "0.4.0")).await;

    assert!(response.is_ok());
    assert_eq!(h.store.get_container_interface("c2").unwrap().container_id, "c2");
    assert!(h.store.get_container_interface("c1").is_none());
    assert_eq!(h.bridge.port_names(), vec![HOST_IFNAME.to_string()]);
    assert!(h.flows.installed().contains_key(HOST_IFNAME));
    assert_eq!(h.builder.pairs(), vec![HOST_IFNAME.to_string()]);
}

#[tokio::test]
async fn test_failed_del_can_be_retried() {
    let h = Harness::new();
    h.send(CniCommand::Add, add_args()).await;
    h.bridge.fail_delete(true);

    let response = h.send(CniCommand::Del, add_args()).await;
    assert_eq!(response.error_code(), Some(ErrorCode::ConfigInterfaceFailure));
    assert!(h.store.get_container_interface("c1").is_some());

    h.bridge.fail_delete(false);
    let response = h.send(CniCommand::Del, add_args()).await;
    assert!(response.is_ok());
    assert!(h.store.is_empty());
    assert!(h.bridge.port_names().is_empty());
}

#[tokio::test]
async fn test_check() {
    let h = Harness::new();

    let response = h.send(CniCommand::Check, add_args()).await;
    assert_eq!(response.error_code(), Some(ErrorCode::UnknownContainer));

    h.send(CniCommand::Add, add_args()).await;
    let response = h.send(CniCommand::Check, add_args()).await;
    assert!(response.is_ok(), "{:?}", response.error);
    assert!(response.cni_result.is_empty());

    h.builder.teardown("c1", HOST_IFNAME).await.unwrap();
    let response = h.send(CniCommand::Check, add_args()).await;
    assert_eq!(response.error_code(), Some(ErrorCode::CheckInterfaceFailure));
}

#[tokio::test]
async fn test_check_compares_prev_result_mac() {
    let h = Harness::new();
    h.send(CniCommand::Add, add_args()).await;

    let mut args = add_args();
    args.network_configuration = br#"{"cniVersion":"0.4.0","name":"ovs","type":"ovs-cni",
        "prevResult":{"cniVersion":"0.4.0","interfaces":[{"name":"eth0","mac":"11:22:33:44:55:66"}]}}"#
        .to_vec();
    let response = h.send(CniCommand::Check, args).await;
    assert_eq!(response.error_code(), Some(ErrorCode::CheckInterfaceFailure));
}

#[tokio::test]
async fn test_repeated_add_does_not_rebuild() {
    let h = Harness::new();
    let first = h.send(CniCommand::Add, add_args()).await;
    let second = h.send(CniCommand::Add, add_args()).await;

    assert!(second.is_ok());
    assert_eq!(h.log.count("build_pair"), 1);
    assert_eq!(h.log.count("create_port"), 1);
    assert_eq!(result_json(&first)["ips"], result_json(&second)["ips"]);
    assert_eq!(result_json(&second)["interfaces"][0]["name"], HOST_IFNAME);
}

#[tokio::test]
async fn test_workload_container_builds_nothing() {
    let h = Harness::new();
    h.send(CniCommand::Add, add_args()).await;
    h.log.clear();

    let mut args = cni_args("w1", "p1", "0.4.0");
    args.netns = "container:c1".to_string();
    let response = h.send(CniCommand::Add, args.clone()).await;

    assert!(response.is_ok());
    assert!(h.log.calls().is_empty());
    assert_eq!(result_json(&response)["interfaces"][0]["name"], HOST_IFNAME);

    let response = h.send(CniCommand::Del, args).await;
    assert!(response.is_ok());
    assert!(h.store.get_container_interface("c1").is_some());
}

#[tokio::test]
async fn test_concurrent_adds_for_same_container_are_serialized() {
    let h = Harness::new();
    h.builder.set_build_delay(Duration::from_millis(50));

    let first = {
        let server = Arc::clone(&h.server);
        tokio::spawn(async move { server.handle(CniRequest::new(CniCommand::Add, add_args())).await })
    };
    let second = {
        let server = Arc::clone(&h.server);
        tokio::spawn(async move { server.handle(CniRequest::new(CniCommand::Add, add_args())).await })
    };

    assert!(first.await.unwrap().is_ok());
    assert!(second.await.unwrap().is_ok());
    assert_eq!(h.builder.max_running(), 1);
    assert_eq!(h.log.count("build_pair"), 1);
    assert_eq!(h.server.arbitrator().acquisitions(), 2);
}

#[tokio::test]
async fn test_different_containers_run_in_parallel() {
    let h = Harness::new();
    h.descriptors.insert(
        "default",
        "p2",
        single_vif_descriptor("eth0", "fedcba9876543210", "aa:bb:cc:dd:ee:01", "10.0.0.0/24", "10.0.0.6", "10.0.0.1"),
    );
    h.builder.set_build_delay(Duration::from_millis(100));

    let (a, b) = tokio::join!(
        h.send(CniCommand::Add, cni_args("c1", "p1", "0.4.0")),
        h.send(CniCommand::Add, cni_args("c2", "p2", "0.4.0")),
    );

    assert!(a.is_ok() && b.is_ok());
    assert_eq!(h.builder.max_running(), 2);
    assert_eq!(h.store.len(), 2);
}

#[tokio::test]
async fn test_lock_timeout_returns_try_again_later() {
    let options = ServerOptions {
        lock_timeout: Some(Duration::from_millis(50)),
        ..Default::default()
    };
    let h = Harness::with(options, true);
    let held = h.server.arbitrator().lock("c1").await;

    let response = h.send(CniCommand::Add, add_args()).await;

    assert_eq!(response.error_code(), Some(ErrorCode::TryAgainLater));
    assert!(h.log.calls().is_empty());
    drop(held);

    let response = h.send(CniCommand::Add, add_args()).await;
    assert!(response.is_ok());
}
