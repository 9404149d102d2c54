//! Deploy tool hand-off
//!
//! The deploy tool is interactive and long running, so it runs inside a
//! named `screen` session that an operator can reattach to with
//! `screen -d -r`. The page blocks until the session closes, then persists
//! the directories the deployment wrote so they survive a Node reboot.

use crate::error::{DeployError, Result};
use crate::invocation::{CommandLine, DeploySession, PersistPath, ToolInvocation};
use crate::settings::PluginSettings;
use crate::tool_runner::run_tool;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Runs a command attached to the controlling terminal
pub trait SessionHost: Send + Sync {
    /// Block until the command exits; `None` when it was killed by a signal
    fn run_attached(&self, line: &CommandLine) -> io::Result<Option<i32>>;
}

/// Runs the session on the real terminal, inheriting stdio
#[derive(Debug, Clone, Copy, Default)]
pub struct ScreenHost;

impl SessionHost for ScreenHost {
    fn run_attached(&self, line: &CommandLine) -> io::Result<Option<i32>> {
        // No separate process group: screen needs the foreground terminal.
        line.to_command().status().map(|status| status.code())
    }
}

/// Keeps a path across reboots
pub trait Persister: Send + Sync {
    fn persist(&self, path: &Path) -> anyhow::Result<()>;
}

/// oVirt Node `persist` tool
#[derive(Debug, Clone)]
pub struct NodePersister {
    tool: String,
}

impl NodePersister {
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }
}

impl Persister for NodePersister {
    fn persist(&self, path: &Path) -> anyhow::Result<()> {
        let invocation = PersistPath {
            persist_tool: self.tool.clone(),
            path: path.to_path_buf(),
        };
        run_tool(&invocation)?.ensure_success(&format!("persist {}", path.display()))
    }
}

/// What happened during a launch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOutcome {
    /// Exit code of the session; `None` when killed by a signal
    pub exit_code: Option<i32>,
    pub persisted: Vec<PathBuf>,
    /// Paths that could not be persisted, with the reason
    pub persist_failures: Vec<(PathBuf, String)>,
}

impl LaunchOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Starts the deploy tool in a detachable session
pub struct SessionLauncher {
    host: Arc<dyn SessionHost>,
    persister: Arc<dyn Persister>,
    session_tool: String,
    session_name: String,
    deploy_tool: String,
    persist_dirs: Vec<PathBuf>,
}

impl SessionLauncher {
    pub fn new(
        settings: &PluginSettings,
        host: Arc<dyn SessionHost>,
        persister: Arc<dyn Persister>,
    ) -> Self {
        Self {
            host,
            persister,
            session_tool: settings.session_tool.clone(),
            session_name: settings.session_name.clone(),
            deploy_tool: settings.deploy_tool.clone(),
            persist_dirs: settings.persist_dirs.clone(),
        }
    }

    /// Command line that `launch` runs for `config_path`
    pub fn command_for(&self, config_path: &Path) -> CommandLine {
        DeploySession {
            session_tool: self.session_tool.clone(),
            session_name: self.session_name.clone(),
            deploy_tool: self.deploy_tool.clone(),
            config_path: config_path.to_path_buf(),
        }
        .command_line()
    }

    /// Run the deploy tool against `config_path` and wait for the session.
    ///
    /// # Errors
    ///
    /// - `MissingConfig` if the file is gone; nothing is started.
    /// - `Session` if the session could not be spawned. Persistence still
    ///   runs in that case.
    pub fn launch(&self, config_path: &Path) -> Result<LaunchOutcome> {
        if !config_path.is_file() {
            tracing::error!(
                "Deployment configuration {} does not exist",
                config_path.display()
            );
            return Err(DeployError::MissingConfig(config_path.to_path_buf()));
        }

        let line = self.command_for(config_path);
        tracing::info!("Starting session: {}", line);
        let status = self.host.run_attached(&line);

        let mut outcome = self.persist_all();
        match fs::remove_file(config_path) {
            Ok(()) => tracing::debug!("Removed {}", config_path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Could not remove {}: {}", config_path.display(), e),
        }

        match status {
            Ok(code) => {
                tracing::info!("Session {} ended with {:?}", self.session_name, code);
                outcome.exit_code = code;
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!("Could not start {}: {}", self.session_tool, e);
                Err(DeployError::session(format!(
                    "could not start {}: {}",
                    self.session_tool, e
                )))
            }
        }
    }

    fn persist_all(&self) -> LaunchOutcome {
        let mut outcome = LaunchOutcome::default();
        for dir in &self.persist_dirs {
            if !dir.exists() {
                tracing::debug!("Skipping persist of missing {}", dir.display());
                continue;
            }
            match self.persister.persist(dir) {
                Ok(()) => outcome.persisted.push(dir.clone()),
                Err(e) => {
                    tracing::warn!("Could not persist {}: {:#}", dir.display(), e);
                    outcome.persist_failures.push((dir.clone(), e.to_string()));
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingHost {
        calls: Mutex<Vec<CommandLine>>,
        fail: bool,
    }

    impl SessionHost for RecordingHost {
        fn run_attached(&self, line: &CommandLine) -> io::Result<Option<i32>> {
            self.calls.lock().unwrap().push(line.clone());
            if self.fail {
                Err(io::Error::new(io::ErrorKind::NotFound, "screen: not found"))
            } else {
                Ok(Some(1))
            }
        }
    }

    #[derive(Default)]
    struct RecordingPersister {
        paths: Mutex<Vec<PathBuf>>,
    }

    impl Persister for RecordingPersister {
        fn persist(&self, path: &Path) -> anyhow::Result<()> {
            self.paths.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    fn launcher(
        root: &TempDir,
        host: Arc<RecordingHost>,
        persister: Arc<RecordingPersister>,
    ) -> SessionLauncher {
        let settings = PluginSettings {
            persist_dirs: vec![root.path().join("etc-he"), root.path().join("missing")],
            ..Default::default()
        };
        SessionLauncher::new(&settings, host, persister)
    }

    #[test]
    fn test_missing_config_starts_nothing() {
        let root = TempDir::new().unwrap();
        let host = Arc::new(RecordingHost::default());
        let launcher = launcher(&root, host.clone(), Arc::new(RecordingPersister::default()));

        let err = launcher.launch(&root.path().join("gone.conf")).unwrap_err();
        assert!(matches!(err, DeployError::MissingConfig(_)));
        assert!(host.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_persists_existing_dirs_after_failed_session() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("etc-he")).unwrap();
        let config = root.path().join("he.conf");
        fs::write(&config, "[environment:default]\n").unwrap();

        let host = Arc::new(RecordingHost::default());
        let persister = Arc::new(RecordingPersister::default());
        let launcher = launcher(&root, host.clone(), persister.clone());

        let outcome = launcher.launch(&config).unwrap();
        assert_eq!(outcome.exit_code, Some(1));
        assert!(!outcome.succeeded());
        assert_eq!(*persister.paths.lock().unwrap(), vec![root.path().join("etc-he")]);
        assert!(!config.exists());

        let calls = host.calls.lock().unwrap();
        assert_eq!(calls[0].program, "screen");
        assert_eq!(
            calls[0].args.last().unwrap(),
            &format!("--config-append={}", config.display())
        );
    }

    #[test]
    fn test_spawn_failure_is_a_session_error() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("etc-he")).unwrap();
        let config = root.path().join("he.conf");
        fs::write(&config, "[environment:default]\n").unwrap();

        let host = Arc::new(RecordingHost {
            fail: true,
            ..Default::default()
        });
        let persister = Arc::new(RecordingPersister::default());
        let launcher = launcher(&root, host, persister.clone());

        let err = launcher.launch(&config).unwrap_err();
        assert!(matches!(err, DeployError::Session(_)));
        assert_eq!(persister.paths.lock().unwrap().len(), 1);
    }
}
