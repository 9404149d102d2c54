//! Typed external tool invocations.
//!
//! Every subprocess this crate starts is described by a struct implementing
//! `ToolInvocation`. The struct definition is the argv contract: flag names
//! live in exactly one place and the runners never assemble raw strings.

use crate::types::MaintenanceLevel;
use std::fmt;
use std::path::PathBuf;
use std::process::Command;

/// Trait for typed tool arguments.
///
/// - `program()`: executable name or path, resolved through `PATH`.
/// - `to_cli_args()`: arguments exactly as the tool expects them.
/// - `get_env_vars()`: extra environment for the child.
pub trait ToolInvocation {
    fn program(&self) -> &str;

    fn to_cli_args(&self) -> Vec<String>;

    fn get_env_vars(&self) -> Vec<(String, String)>;

    /// Fully resolved command line
    fn command_line(&self) -> CommandLine {
        CommandLine {
            program: self.program().to_string(),
            args: self.to_cli_args(),
            env: self.get_env_vars(),
        }
    }
}

/// Program, argv and environment of one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandLine {
    /// `std::process::Command` with program, args and env applied
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

// ============================================================================
// Deployment
// ============================================================================

/// Deploy tool running inside a named detachable session:
/// `screen -S <name> <deploy-tool> --config-append=<file>`
#[derive(Debug, Clone)]
pub struct DeploySession {
    pub session_tool: String,
    pub session_name: String,
    pub deploy_tool: String,
    pub config_path: PathBuf,
}

impl ToolInvocation for DeploySession {
    fn program(&self) -> &str {
        &self.session_tool
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-S".to_string(),
            self.session_name.clone(),
            self.deploy_tool.clone(),
            format!("--config-append={}", self.config_path.display()),
        ]
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        vec![]
    }
}

/// Deploy tool run directly with forwarded arguments (wrapper mode)
#[derive(Debug, Clone)]
pub struct DeployTool {
    pub deploy_tool: String,
    pub args: Vec<String>,
}

impl ToolInvocation for DeployTool {
    fn program(&self) -> &str {
        &self.deploy_tool
    }

    fn to_cli_args(&self) -> Vec<String> {
        self.args.clone()
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        vec![]
    }
}

// ============================================================================
// HA status
// ============================================================================

/// `hosted-engine --vm-status --json`
#[derive(Debug, Clone)]
pub struct VmStatusQuery {
    pub status_tool: String,
}

impl ToolInvocation for VmStatusQuery {
    fn program(&self) -> &str {
        &self.status_tool
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["--vm-status".to_string(), "--json".to_string()]
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        vec![]
    }
}

/// `hosted-engine --set-maintenance --mode=<level>`
#[derive(Debug, Clone)]
pub struct SetMaintenance {
    pub status_tool: String,
    pub level: MaintenanceLevel,
}

impl ToolInvocation for SetMaintenance {
    fn program(&self) -> &str {
        &self.status_tool
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--set-maintenance".to_string(),
            format!("--mode={}", self.level),
        ]
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        vec![]
    }
}

// ============================================================================
// Node persistence
// ============================================================================

/// `persist <path>` on oVirt Node, which keeps `path` across reboots
#[derive(Debug, Clone)]
pub struct PersistPath {
    pub persist_tool: String,
    pub path: PathBuf,
}

impl ToolInvocation for PersistPath {
    fn program(&self) -> &str {
        &self.persist_tool
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![self.path.display().to_string()]
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        vec![]
    }
}
