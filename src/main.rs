use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ovs_cni_agent::config::cli::{print_default_config, CliArgs};
use ovs_cni_agent::config::{load_config, AgentConfig, LogFormat};
use ovs_cni_agent::error::AppError;
use ovs_cni_agent::network::NetlinkInterfaceBuilder;
use ovs_cni_agent::reconcile::Reconciler;
use ovs_cni_agent::server::{
    network_readiness, CniListener, CniServer, ContainerArbitrator, PodConfigurator,
};
use ovs_cni_agent::store::{FileDescriptorStore, InterfaceStore};
use ovs_cni_agent::switch::ofctl::OvsOfctlClient;
use ovs_cni_agent::switch::vsctl::OvsVsctlClient;
use ovs_cni_agent::switch::{BridgeClient, PortConnector};

fn init_logging(config: &AgentConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    match config.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = CliArgs::parse();

    if cli.print_default_config {
        print_default_config();
        return Ok(());
    }

    let config = load_config(&cli)?;
    if cli.validate_config {
        println!("Configuration is valid");
        return Ok(());
    }

    init_logging(&config);
    info!("Starting OVS CNI Agent on bridge {}", config.ovs_bridge);

    let bridge = Arc::new(OvsVsctlClient::new(
        config.ovs_bridge.clone(),
        config.ovs_command_timeout,
        config.ofport_wait,
    ));
    let flows = Arc::new(OvsOfctlClient::new(
        config.ovs_bridge.clone(),
        config.ovs_command_timeout,
    ));

    let ports = bridge.list_ports().await?;
    let store = Arc::new(InterfaceStore::from_ports(&ports));
    info!("Found {} container interfaces on {}", store.len(), config.ovs_bridge);

    let builder = Arc::new(NetlinkInterfaceBuilder::connect()?);
    let configurator = Arc::new(PodConfigurator::new(
        builder,
        PortConnector::new(bridge, flows),
        store,
    ));
    let descriptors = Arc::new(FileDescriptorStore::new(config.descriptor_dir.clone()));
    let arbitrator = Arc::new(ContainerArbitrator::new());
    let (ready_signal, ready_waiter) = network_readiness();

    let server = Arc::new(CniServer::new(
        config.server_options(),
        Arc::clone(&arbitrator),
        ready_waiter,
        descriptors.clone(),
        Arc::clone(&configurator),
    ));

    // Serve right away; Adds wait for readiness while reconciliation runs
    let listener = CniListener::new(config.cni_socket.clone(), server);
    let bound = listener.bind()?;
    let serving = tokio::spawn(async move {
        listener
            .serve(bound, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
            })
            .await
    });

    let reconciler = Reconciler::new(descriptors, configurator, arbitrator);
    match reconciler.reconcile().await {
        Ok(report) if !report.failed.is_empty() => {
            warn!("Interfaces left for the next restart: {:?}", report.failed)
        }
        Ok(_) => {}
        Err(e) => error!("Startup reconciliation failed: {}", e),
    }
    ready_signal.mark_ready();
    info!("OVS CNI Agent started successfully");

    match serving.await {
        Ok(result) => result?,
        Err(e) => error!("CNI server task failed: {}", e),
    }

    info!("Shutting down OVS CNI Agent");
    Ok(())
}
