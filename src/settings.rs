//! Plugin settings: paths, tool names and tunables.
//!
//! Every field has a default matching a stock oVirt Node host, so an empty
//! JSON object (or no settings file at all) is a valid configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default chunk size for image downloads (256 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Settings that can be saved/loaded as JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    // Filesystem layout
    /// Working directory where downloaded images live
    pub setup_dir: PathBuf,
    /// Scratch directory handed to the deploy tool
    pub engine_temp_dir: PathBuf,
    /// Directory for generated answer files (system temp dir when unset)
    pub answer_file_dir: Option<PathBuf>,
    /// VM descriptor written by a completed deployment
    pub vm_conf_path: PathBuf,
    /// HA agent configuration holding this host's id
    pub ha_conf_path: PathBuf,
    /// Shell-style key file holding the persisted selection
    pub defaults_file: PathBuf,

    // External tools
    pub deploy_tool: String,
    pub session_tool: String,
    pub session_name: String,
    pub status_tool: String,
    pub persist_tool: String,
    /// Directories persisted after the deploy tool returns
    pub persist_dirs: Vec<PathBuf>,
    /// Status and maintenance calls are killed after this many seconds
    pub status_timeout_secs: u64,

    // Download tunables
    pub chunk_size: usize,
    pub connect_timeout_secs: u64,
    /// Skip TLS certificate verification for image downloads
    pub accept_invalid_certs: bool,

    /// Check gzip/tar signatures of non-ISO images before deploying
    pub verify_image_signature: bool,

    /// Log file used while the TUI owns the terminal
    pub log_file: PathBuf,
}

impl Default for PluginSettings {
    fn default() -> Self {
        let setup_dir = PathBuf::from("/data/ovirt-hosted-engine-setup");
        Self {
            engine_temp_dir: setup_dir.join("ovirt-engine-tmp"),
            setup_dir,
            answer_file_dir: None,
            vm_conf_path: PathBuf::from("/etc/ovirt-hosted-engine/vm.conf"),
            ha_conf_path: PathBuf::from("/etc/ovirt-hosted-engine/hosted-engine.conf"),
            defaults_file: PathBuf::from("/etc/default/ovirt"),
            deploy_tool: "ovirt-hosted-engine-setup".to_string(),
            session_tool: "screen".to_string(),
            session_name: "hosted-engine-setup".to_string(),
            status_tool: "hosted-engine".to_string(),
            persist_tool: "persist".to_string(),
            persist_dirs: vec![
                PathBuf::from("/etc/ovirt-hosted-engine"),
                PathBuf::from("/etc/ovirt-hosted-engine-ha"),
                PathBuf::from("/etc/ovirt-hosted-engine-setup.env.d"),
                PathBuf::from("/etc/pki/vdsm"),
                PathBuf::from("/etc/pki/libvirt"),
                PathBuf::from("/etc/vdsm"),
            ],
            status_timeout_secs: 10,
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout_secs: 30,
            accept_invalid_certs: false,
            verify_image_signature: true,
            log_file: PathBuf::from("/var/log/ovirt-hosted-engine-tui.log"),
        }
    }
}

impl PluginSettings {
    /// Save settings to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize settings to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write settings to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load settings from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {:?}", path.as_ref()))?;

        let settings: Self =
            serde_json::from_str(&content).context("Failed to parse settings JSON")?;

        Ok(settings)
    }

    /// Load from `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if !self.setup_dir.is_absolute() {
            anyhow::bail!("setup_dir must be an absolute path");
        }
        if !self.engine_temp_dir.is_absolute() {
            anyhow::bail!("engine_temp_dir must be an absolute path");
        }
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than zero");
        }
        if self.connect_timeout_secs == 0 {
            anyhow::bail!("connect_timeout_secs must be greater than zero");
        }
        if self.status_timeout_secs == 0 {
            anyhow::bail!("status_timeout_secs must be greater than zero");
        }
        for (name, value) in [
            ("deploy_tool", &self.deploy_tool),
            ("session_tool", &self.session_tool),
            ("status_tool", &self.status_tool),
            ("session_name", &self.session_name),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("{} must not be empty", name);
            }
        }
        if self.session_name.contains(char::is_whitespace) {
            anyhow::bail!("session_name cannot contain whitespace");
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }

    /// Directory where answer files are created
    pub fn answer_dir(&self) -> PathBuf {
        self.answer_file_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = PluginSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.chunk_size, 256 * 1024);
        assert!(settings.engine_temp_dir.starts_with(&settings.setup_dir));
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let settings: PluginSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, PluginSettings::default());
    }

    #[test]
    fn test_partial_json_overrides_only_given_fields() {
        let settings: PluginSettings =
            serde_json::from_str(r#"{"chunk_size": 4096, "session_tool": "tmux"}"#).unwrap();
        assert_eq!(settings.chunk_size, 4096);
        assert_eq!(settings.session_tool, "tmux");
        assert_eq!(settings.deploy_tool, "ovirt-hosted-engine-setup");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let file = NamedTempFile::new().unwrap();
        let mut settings = PluginSettings::default();
        settings.accept_invalid_certs = true;
        settings.save_to_file(file.path()).unwrap();

        let loaded = PluginSettings::load_from_file(file.path()).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_validate_rejects_relative_setup_dir() {
        let settings = PluginSettings {
            setup_dir: PathBuf::from("relative/dir"),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_status_timeout() {
        let settings = PluginSettings {
            status_timeout_secs: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        assert_eq!(PluginSettings::default().status_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_validate_rejects_zero_chunk() {
        let settings = PluginSettings {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
