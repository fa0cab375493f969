//! Bridge client backed by `ovs-vsctl`

use crate::error::SwitchError;
use crate::switch::{command, BridgeClient, PortData};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const OVS_VSCTL: &str = "ovs-vsctl";
const OFPORT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Port operations on one bridge
#[derive(Debug, Clone)]
pub struct OvsVsctlClient {
    bridge: String,
    command_timeout: Duration,
    ofport_wait: Duration,
}

impl OvsVsctlClient {
    pub fn new(bridge: impl Into<String>, command_timeout: Duration, ofport_wait: Duration) -> Self {
        Self {
            bridge: bridge.into(),
            command_timeout,
            ofport_wait,
        }
    }

    async fn vsctl(&self, args: Vec<String>) -> Result<String, SwitchError> {
        let mut full = vec![format!("--timeout={}", self.command_timeout.as_secs().max(1))];
        full.extend(args);
        command::run(OVS_VSCTL, &full, None, self.command_timeout + Duration::from_secs(1)).await
    }

    async fn query_ofport(&self, name: &str) -> Result<Option<u32>, SwitchError> {
        let output = self
            .vsctl(strings(&["get", "Interface", name, "ofport"]))
            .await?;
        Ok(parse_ofport(&output))
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Quotes a value in OVSDB string syntax.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn external_id_args(external_ids: &BTreeMap<String, String>) -> Vec<String> {
    external_ids
        .iter()
        .map(|(key, value)| format!("external_ids:{}={}", quote(key), quote(value)))
        .collect()
}

/// `ofport` column value; unassigned shows up as `[]` or `-1`.
fn parse_ofport(output: &str) -> Option<u32> {
    match output.trim().parse::<i64>() {
        Ok(ofport) if ofport > 0 => u32::try_from(ofport).ok(),
        _ => None,
    }
}

fn parse_uuid(output: &str) -> Result<String, SwitchError> {
    let uuid = output.trim();
    let well_formed = uuid.len() == 36
        && uuid
            .chars()
            .enumerate()
            .all(|(i, c)| match i {
                8 | 13 | 18 | 23 => c == '-',
                _ => c.is_ascii_hexdigit(),
            });
    if well_formed {
        Ok(uuid.to_string())
    } else {
        Err(SwitchError::InvalidOutput(format!("expected a UUID, got {:?}", uuid)))
    }
}

/// Decodes one OVSDB JSON datum: `["uuid", "..."]`, `["map", [[k, v]...]]`,
/// `["set", [...]]` or a plain atom.
fn datum_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(pair) if pair.len() == 2 && pair[0].as_str() == Some("uuid") => {
            pair[1].as_str().map(str::to_string)
        }
        _ => None,
    }
}

fn datum_map(value: &Value) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if let Some([tag, Value::Array(entries)]) = value.as_array().map(Vec::as_slice) {
        if tag.as_str() == Some("map") {
            for entry in entries {
                if let Some([k, v]) = entry.as_array().map(Vec::as_slice) {
                    if let (Some(k), Some(v)) = (datum_string(k), datum_string(v)) {
                        map.insert(k, v);
                    }
                }
            }
        }
    }
    map
}

/// Rows of `--format=json list <table>` as column-name keyed maps.
fn parse_table(output: &str) -> Result<Vec<HashMap<String, Value>>, SwitchError> {
    let table: Value = serde_json::from_str(output)
        .map_err(|e| SwitchError::InvalidOutput(format!("list output: {}", e)))?;
    let headings: Vec<String> = table["headings"]
        .as_array()
        .ok_or_else(|| SwitchError::InvalidOutput("list output without headings".to_string()))?
        .iter()
        .filter_map(|h| h.as_str().map(str::to_string))
        .collect();
    let rows = table["data"]
        .as_array()
        .ok_or_else(|| SwitchError::InvalidOutput("list output without data".to_string()))?;

    Ok(rows
        .iter()
        .filter_map(Value::as_array)
        .map(|row| headings.iter().cloned().zip(row.iter().cloned()).collect())
        .collect())
}

fn parse_port_list(ports: &str, interfaces: &str) -> Result<Vec<PortData>, SwitchError> {
    let ofports: HashMap<String, u32> = parse_table(interfaces)?
        .into_iter()
        .filter_map(|row| {
            let name = row.get("name").and_then(datum_string)?;
            let ofport = row.get("ofport").and_then(datum_string)?;
            parse_ofport(&ofport).map(|ofport| (name, ofport))
        })
        .collect();

    let mut result: Vec<PortData> = parse_table(ports)?
        .into_iter()
        .filter_map(|row| {
            let uuid = row.get("_uuid").and_then(datum_string)?;
            let name = row.get("name").and_then(datum_string)?;
            let external_ids = row.get("external_ids").map(datum_map).unwrap_or_default();
            Some(PortData {
                ofport: ofports.get(&name).copied(),
                uuid,
                name,
                external_ids,
            })
        })
        .collect();
    result.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(result)
}

#[async_trait]
impl BridgeClient for OvsVsctlClient {
    async fn create_port(
        &self,
        name: &str,
        external_ids: &BTreeMap<String, String>,
    ) -> Result<String, SwitchError> {
        // A stale port of the same name is replaced in the same transaction
        let mut args = strings(&[
            "--", "--if-exists", "del-port", name, "--", "add-port", &self.bridge, name, "--",
            "set", "Port", name,
        ]);
        args.extend(external_id_args(external_ids));
        self.vsctl(args).await?;

        let uuid = parse_uuid(&self.vsctl(strings(&["get", "Port", name, "_uuid"])).await?)?;
        info!("Created port {} ({}) on bridge {}", name, uuid, self.bridge);
        Ok(uuid)
    }

    async fn delete_port(&self, port_uuid: &str) -> Result<(), SwitchError> {
        self.vsctl(strings(&["remove", "Bridge", &self.bridge, "ports", port_uuid]))
            .await?;
        info!("Deleted port {} from bridge {}", port_uuid, self.bridge);
        Ok(())
    }

    async fn get_ofport(&self, name: &str) -> Result<u32, SwitchError> {
        let started = Instant::now();
        loop {
            if let Some(ofport) = self.query_ofport(name).await? {
                debug!("Port {} has OpenFlow port {}", name, ofport);
                return Ok(ofport);
            }
            if started.elapsed() >= self.ofport_wait {
                return Err(SwitchError::OfPortUnavailable {
                    port: name.to_string(),
                });
            }
            tokio::time::sleep(OFPORT_POLL_INTERVAL).await;
        }
    }

    async fn list_ports(&self) -> Result<Vec<PortData>, SwitchError> {
        let ports = self
            .vsctl(strings(&[
                "--format=json",
                "--columns=_uuid,name,external_ids",
                "list",
                "Port",
            ]))
            .await?;
        let interfaces = self
            .vsctl(strings(&["--format=json", "--columns=name,ofport", "list", "Interface"]))
            .await?;
        parse_port_list(&ports, &interfaces)
    }
}
