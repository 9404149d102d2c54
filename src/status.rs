//! Hosted engine VM status
//!
//! Status is recomputed on every query and never cached. A host without a
//! deployed engine (no disk image in `vm.conf`) reports "not configured"
//! without contacting the HA daemon at all.

use crate::error::{DeployError, Result};
use crate::invocation::{SetMaintenance, VmStatusQuery};
use crate::tool_runner::run_tool_with_timeout;
use crate::types::MaintenanceLevel;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Shown whenever the HA daemon cannot be queried
pub const HA_UNREACHABLE_MESSAGE: &str = "Cannot connect to HA daemon, please check the logs";

/// One host as reported by the HA agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub host_id: u32,
    pub hostname: String,
    /// `health` field of the engine status, e.g. `good` or `bad`
    pub engine_health: Option<String>,
    pub local_maintenance: bool,
}

/// Parsed `--vm-status --json` output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HaStats {
    pub global_maintenance: bool,
    pub hosts: BTreeMap<u32, HostRecord>,
}

impl HaStats {
    /// Host whose engine health is `good`
    pub fn engine_host(&self) -> Option<&HostRecord> {
        self.hosts
            .values()
            .find(|host| host.engine_health.as_deref() == Some("good"))
    }

    /// Global flag first, then the local host's own flag
    pub fn maintenance_level(&self, local_host_id: Option<u32>) -> MaintenanceLevel {
        if self.global_maintenance {
            return MaintenanceLevel::Global;
        }
        let local = local_host_id
            .and_then(|id| self.hosts.get(&id))
            .is_some_and(|host| host.local_maintenance);
        if local {
            MaintenanceLevel::Local
        } else {
            MaintenanceLevel::None
        }
    }
}

/// Parse the JSON document printed by `hosted-engine --vm-status --json`.
///
/// Host records are keyed by their numeric id. `engine-status` arrives
/// either as an object or as a JSON document encoded in a string.
pub fn parse_vm_status(json: &str) -> Result<HaStats> {
    let root: Map<String, Value> = serde_json::from_str(json)?;
    let mut stats = HaStats {
        global_maintenance: root
            .get("global_maintenance")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        hosts: BTreeMap::new(),
    };

    for (key, value) in &root {
        let Ok(host_id) = key.parse::<u32>() else {
            continue;
        };
        let Some(record) = value.as_object() else {
            continue;
        };
        let hostname = record
            .get("hostname")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let engine_health = record
            .get("engine-status")
            .and_then(engine_status_object)
            .and_then(|status| status.get("health").and_then(Value::as_str).map(str::to_string));
        let local_maintenance = record
            .get("maintenance")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        stats.hosts.insert(
            host_id,
            HostRecord {
                host_id,
                hostname,
                engine_health,
                local_maintenance,
            },
        );
    }
    Ok(stats)
}

fn engine_status_object(value: &Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

/// HA coordination daemon
pub trait HaClient: Send + Sync {
    fn all_host_stats(&self) -> Result<HaStats>;

    fn set_maintenance(&self, level: MaintenanceLevel) -> Result<()>;
}

/// `HaClient` through the `hosted-engine` command line tool
#[derive(Debug, Clone)]
pub struct HostedEngineCli {
    status_tool: String,
    /// Each call is killed after this long and reported as unreachable
    timeout: Duration,
}

impl HostedEngineCli {
    pub fn new(status_tool: impl Into<String>, timeout: Duration) -> Self {
        Self {
            status_tool: status_tool.into(),
            timeout,
        }
    }
}

impl HaClient for HostedEngineCli {
    fn all_host_stats(&self) -> Result<HaStats> {
        let query = VmStatusQuery {
            status_tool: self.status_tool.clone(),
        };
        let output = run_tool_with_timeout(&query, self.timeout)
            .map_err(|e| DeployError::ha_unreachable(format!("{:#}", e)))?;
        output
            .ensure_success("vm-status")
            .map_err(|e| DeployError::ha_unreachable(format!("{:#}", e)))?;
        parse_vm_status(&output.stdout)
    }

    fn set_maintenance(&self, level: MaintenanceLevel) -> Result<()> {
        let invocation = SetMaintenance {
            status_tool: self.status_tool.clone(),
            level,
        };
        run_tool_with_timeout(&invocation, self.timeout)
            .and_then(|output| output.ensure_success("set-maintenance"))
            .map_err(|e| DeployError::ha_unreachable(format!("{:#}", e)))
    }
}

/// Fields of interest from `vm.conf`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmDescriptor {
    pub vm_name: Option<String>,
    pub disk_image_id: Option<String>,
}

impl VmDescriptor {
    /// Parse `key=value` lines. The disk image id is taken from a
    /// `devices=` entry describing a disk.
    pub fn parse(content: &str) -> Self {
        let mut descriptor = Self::default();
        for line in content.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            match key.trim() {
                "vmName" => descriptor.vm_name = Some(value.trim().to_string()),
                "devices" if value.contains("device:disk") && descriptor.disk_image_id.is_none() => {
                    descriptor.disk_image_id = field_value(value, "imageID:");
                }
                _ => {}
            }
        }
        descriptor
    }

    /// Read `path`; a missing file yields `None`
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(Self::parse(&content))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.disk_image_id.is_some()
    }
}

/// Value after `prefix` up to the next `,` or `}`
fn field_value(text: &str, prefix: &str) -> Option<String> {
    let start = text.find(prefix)? + prefix.len();
    let value: String = text[start..]
        .chars()
        .take_while(|c| *c != ',' && *c != '}')
        .collect();
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Engine state as shown on the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    NotConfigured,
    Unreachable,
    RunningOn(String),
    Down,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured => write!(f, "Hosted engine is not configured"),
            Self::Unreachable => write!(f, "{}", HA_UNREACHABLE_MESSAGE),
            Self::RunningOn(host) => write!(f, "Engine is running on {}", host),
            Self::Down => write!(f, "Engine is down or not deployed"),
        }
    }
}

/// Derived VM status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmStatus {
    pub vm_name: Option<String>,
    pub engine: EngineState,
    /// `None` when the HA daemon was not consulted
    pub maintenance: Option<MaintenanceLevel>,
}

impl VmStatus {
    pub fn not_configured() -> Self {
        Self {
            vm_name: None,
            engine: EngineState::NotConfigured,
            maintenance: None,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.engine != EngineState::NotConfigured
    }
}

/// Computes `VmStatus` from local files and the HA daemon
pub struct StatusQuery {
    vm_conf_path: PathBuf,
    ha_conf_path: PathBuf,
    client: Arc<dyn HaClient>,
}

impl StatusQuery {
    pub fn new(vm_conf_path: PathBuf, ha_conf_path: PathBuf, client: Arc<dyn HaClient>) -> Self {
        Self {
            vm_conf_path,
            ha_conf_path,
            client,
        }
    }

    /// Current status. Never fails: problems become diagnostic states.
    pub fn current_status(&self) -> VmStatus {
        let descriptor = match VmDescriptor::load(&self.vm_conf_path) {
            Ok(Some(descriptor)) if descriptor.is_configured() => descriptor,
            Ok(_) => return VmStatus::not_configured(),
            Err(e) => {
                tracing::warn!("Could not read {}: {}", self.vm_conf_path.display(), e);
                return VmStatus::not_configured();
            }
        };

        match self.client.all_host_stats() {
            Ok(stats) => {
                let engine = match stats.engine_host() {
                    Some(host) => EngineState::RunningOn(host.hostname.clone()),
                    None => EngineState::Down,
                };
                VmStatus {
                    vm_name: descriptor.vm_name,
                    engine,
                    maintenance: Some(stats.maintenance_level(self.local_host_id())),
                }
            }
            Err(e) => {
                tracing::error!("HA status query failed: {}", e);
                VmStatus {
                    vm_name: descriptor.vm_name,
                    engine: EngineState::Unreachable,
                    maintenance: None,
                }
            }
        }
    }

    /// This host's id from `hosted-engine.conf`
    pub fn local_host_id(&self) -> Option<u32> {
        let content = fs::read_to_string(&self.ha_conf_path).ok()?;
        content.lines().find_map(|line| {
            let (key, value) = line.trim().split_once('=')?;
            if key.trim() != "host_id" {
                return None;
            }
            value.trim().parse().ok()
        })
    }

    pub fn set_maintenance(&self, level: MaintenanceLevel) -> Result<()> {
        tracing::info!("Setting maintenance mode to {}", level);
        self.client.set_maintenance(level)
    }
}
