//! CNI plugin executed by the container runtime. Forwards the call to the
//! node agent over its socket and prints what the agent answers.

use ovs_cni_agent::cni::client::AgentClient;
use ovs_cni_agent::cni::config::NetworkConfig;
use ovs_cni_agent::cni::{CniCmdArgs, CniCommand, CniRequest, ErrorCode, SUPPORTED_CNI_VERSIONS};
use ovs_cni_agent::config::AgentConfig;
use ovs_cni_agent::error::CniError;
use serde_json::json;
use std::io::Write;
use std::process::ExitCode;
use tokio::io::AsyncReadExt;
use tracing::debug;

const SOCKET_ENV: &str = "OVS_CNI_AGENT_CNI_SOCKET";
const FALLBACK_CNI_VERSION: &str = "0.4.0";

#[derive(Debug, PartialEq, Eq)]
enum Invocation {
    Version,
    Request(CniRequest),
}

fn required(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String, CniError> {
    match lookup(name) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(CniError::new(
            ErrorCode::InvalidEnvironmentVariables,
            format!("required env variable {} missing", name),
        )),
    }
}

/// Turns the runtime's environment and stdin into an agent request.
fn parse_invocation(
    lookup: impl Fn(&str) -> Option<String>,
    stdin: Vec<u8>,
) -> Result<Invocation, CniError> {
    let command = match required(&lookup, "CNI_COMMAND")?.as_str() {
        "VERSION" => return Ok(Invocation::Version),
        "ADD" => CniCommand::Add,
        "DEL" => CniCommand::Del,
        "CHECK" => CniCommand::Check,
        other => {
            return Err(CniError::new(
                ErrorCode::InvalidEnvironmentVariables,
                format!("unknown CNI_COMMAND: {}", other),
            ))
        }
    };

    let container_id = required(&lookup, "CNI_CONTAINERID")?;
    let ifname = required(&lookup, "CNI_IFNAME")?;
    // Del may arrive after the sandbox is gone
    let netns = match command {
        CniCommand::Del => lookup("CNI_NETNS").unwrap_or_default(),
        _ => required(&lookup, "CNI_NETNS")?,
    };

    Ok(Invocation::Request(CniRequest::new(
        command,
        CniCmdArgs {
            container_id,
            netns,
            ifname,
            args: lookup("CNI_ARGS").unwrap_or_default(),
            path: lookup("CNI_PATH").unwrap_or_default(),
            network_configuration: stdin,
        },
    )))
}

fn cni_version(stdin: &[u8]) -> String {
    NetworkConfig::from_bytes(stdin)
        .ok()
        .map(|config| config.cni_version)
        .filter(|version| !version.is_empty())
        .unwrap_or_else(|| FALLBACK_CNI_VERSION.to_string())
}

fn version_output(cni_version: &str) -> String {
    json!({
        "cniVersion": cni_version,
        "supportedVersions": SUPPORTED_CNI_VERSIONS,
    })
    .to_string()
}

fn error_output(cni_version: &str, err: &CniError) -> String {
    json!({
        "cniVersion": cni_version,
        "code": i32::from(err.code),
        "msg": err.message,
    })
    .to_string()
}

async fn run(request: CniRequest, socket: String) -> Result<Vec<u8>, CniError> {
    debug!("Sending {} to {}", request.command(), socket);

    let response = AgentClient::new(socket)
        .send(&request)
        .await
        .map_err(|e| CniError::new(ErrorCode::UnknownRpcError, e.to_string()))?;
    match response.error {
        Some(error) => Err(CniError::new(error.code, error.message)),
        None => Ok(response.cni_result),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // stdout belongs to the runtime
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let mut stdin = Vec::new();
    let lookup = |name: &str| std::env::var(name).ok();
    let invocation = match lookup("CNI_COMMAND").as_deref() {
        Some("VERSION") => Ok(Invocation::Version),
        _ => match tokio::io::stdin().read_to_end(&mut stdin).await {
            Ok(_) => parse_invocation(lookup, stdin.clone()),
            Err(e) => Err(CniError::new(
                ErrorCode::IoFailure,
                format!("failed to read network configuration: {}", e),
            )),
        },
    };
    let version = cni_version(&stdin);

    let socket = lookup(SOCKET_ENV).unwrap_or_else(|| AgentConfig::default().cni_socket);
    let outcome = match invocation {
        Ok(Invocation::Version) => Ok(version_output(&version).into_bytes()),
        Ok(Invocation::Request(request)) => run(request, socket).await,
        Err(e) => Err(e),
    };

    let mut stdout = std::io::stdout();
    match outcome {
        Ok(bytes) => {
            if !bytes.is_empty() && stdout.write_all(&bytes).is_err() {
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            let _ = writeln!(stdout, "{}", error_output(&version, &e));
            ExitCode::FAILURE
        }
    }
}
