//! Persisted hosted engine selection.
//!
//! The selection lives in a shell-style key file (`KEY="value"` per line),
//! shared with other node tooling. `ConfigStore` is the raw key/value seam;
//! `HostedEngineConfig` is the typed record on top of it.
//!
//! Writes replace the whole file through a temp file in the same directory,
//! so readers see either the old key set or the new one, never a mix.

use crate::error::{DeployError, Result};
use crate::types::MaintenanceLevel;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use tempfile::NamedTempFile;

pub const KEY_IMAGE_PATH: &str = "OVIRT_HOSTED_ENGINE_IMAGE_PATH";
pub const KEY_PXE: &str = "OVIRT_HOSTED_ENGINE_PXE";
pub const KEY_FORCE_ENABLE: &str = "OVIRT_HOSTED_ENGINE_FORCE_ENABLE";
pub const KEY_MAINTENANCE: &str = "OVIRT_HOSTED_ENGINE_MAINTENANCE";

const HOSTED_ENGINE_KEYS: &[&str] = &[KEY_IMAGE_PATH, KEY_PXE, KEY_FORCE_ENABLE, KEY_MAINTENANCE];

/// Typed get/set access to a persistent key set
pub trait ConfigStore: Send + Sync {
    /// Read the requested keys. Missing keys are absent from the result.
    fn get(&self, keys: &[&str]) -> Result<BTreeMap<String, String>>;

    /// Apply all updates as one replace. `None` removes the key.
    fn set(&self, values: &BTreeMap<String, Option<String>>) -> Result<()>;
}

/// `ConfigStore` backed by a `KEY="value"` defaults file
#[derive(Debug)]
pub struct DefaultsFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl DefaultsFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_lines(&self) -> Result<Vec<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Split a `KEY="value"` line. Comments and blank lines yield `None`.
fn parse_line(line: &str) -> Option<(&str, String)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (key, value) = trimmed.split_once('=')?;
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    Some((key.trim(), value.to_string()))
}

impl ConfigStore for DefaultsFileStore {
    fn get(&self, keys: &[&str]) -> Result<BTreeMap<String, String>> {
        let mut found = BTreeMap::new();
        for line in self.read_lines()? {
            if let Some((key, value)) = parse_line(&line) {
                if keys.contains(&key) {
                    found.insert(key.to_string(), value);
                }
            }
        }
        Ok(found)
    }

    fn set(&self, values: &BTreeMap<String, Option<String>>) -> Result<()> {
        for (key, value) in values {
            if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(DeployError::validation(format!("invalid key {:?}", key)));
            }
            if let Some(value) = value {
                validate_text(key, value)?;
            }
        }

        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| DeployError::internal(format!("config store lock poisoned: {}", e)))?;

        let mut pending = values.clone();
        let mut output = Vec::new();
        for line in self.read_lines()? {
            let key = parse_line(&line).map(|(key, _)| key.to_string());
            match key.and_then(|key| pending.remove(&key).map(|value| (key, value))) {
                Some((key, Some(value))) => output.push(format!("{}=\"{}\"", key, value)),
                Some((_, None)) => {}
                None => output.push(line),
            }
        }
        for (key, value) in pending {
            if let Some(value) = value {
                output.push(format!("{}=\"{}\"", key, value));
            }
        }

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        for line in &output {
            writeln!(tmp, "{}", line)?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| DeployError::Io(e.error))?;

        tracing::debug!("Updated {} key(s) in {}", values.len(), self.path.display());
        Ok(())
    }
}

/// Accept empty or printable single-line text without quotes
fn validate_text(field: &str, value: &str) -> Result<()> {
    if value.chars().any(|c| c.is_control() || c == '"') {
        return Err(DeployError::validation(format!(
            "{} must be single-line text without quotes",
            field
        )));
    }
    Ok(())
}

/// A boolean as handed over by a form: either a real bool or its text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagValue {
    Bool(bool),
    Text(String),
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl FlagValue {
    /// Canonical boolean, rejecting text that is not a recognizable flag
    pub fn normalize(&self, field: &str) -> Result<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => Ok(true),
                "false" | "no" | "0" | "off" | "" => Ok(false),
                other => Err(DeployError::validation(format!(
                    "{} must be a boolean, got {:?}",
                    field, other
                ))),
            },
        }
    }
}

/// Persisted hosted engine record
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostedEngineConfig {
    /// Image source as entered (URL or local path), empty for PXE
    pub image_path: String,
    pub pxe: bool,
    pub force_enable: bool,
    pub maintenance: Option<MaintenanceLevel>,
}

impl HostedEngineConfig {
    /// Build a validated record. `pxe` may be a bool or its text form.
    pub fn new(
        image_path: &str,
        pxe: impl Into<FlagValue>,
        force_enable: bool,
        maintenance: Option<MaintenanceLevel>,
    ) -> Result<Self> {
        validate_text("image path", image_path)?;
        let pxe = pxe.into().normalize("pxe")?;
        Ok(Self {
            image_path: image_path.trim().to_string(),
            pxe,
            force_enable,
            maintenance,
        })
    }

    /// Read the record back, treating missing keys as defaults
    pub fn retrieve(store: &dyn ConfigStore) -> Result<Self> {
        let values = store.get(HOSTED_ENGINE_KEYS)?;
        let flag = |key: &str| values.get(key).is_some_and(|v| v == "yes");
        let maintenance = match values.get(KEY_MAINTENANCE) {
            Some(level) => Some(MaintenanceLevel::from_str(level).map_err(|_| {
                DeployError::validation(format!("unknown maintenance level {:?}", level))
            })?),
            None => None,
        };
        Ok(Self {
            image_path: values.get(KEY_IMAGE_PATH).cloned().unwrap_or_default(),
            pxe: flag(KEY_PXE),
            force_enable: flag(KEY_FORCE_ENABLE),
            maintenance,
        })
    }

    /// Write every key of the record in a single store update
    pub fn update(&self, store: &dyn ConfigStore) -> Result<()> {
        let yes = |b: bool| b.then(|| "yes".to_string());
        let mut values = BTreeMap::new();
        values.insert(KEY_IMAGE_PATH.to_string(), Some(self.image_path.clone()));
        values.insert(KEY_PXE.to_string(), yes(self.pxe));
        values.insert(KEY_FORCE_ENABLE.to_string(), yes(self.force_enable));
        values.insert(
            KEY_MAINTENANCE.to_string(),
            self.maintenance.map(|level| level.to_string()),
        );
        store.set(&values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> DefaultsFileStore {
        DefaultsFileStore::new(dir.path().join("ovirt"))
    }

    #[test]
    fn test_round_trip_with_string_pxe() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let cfg = HostedEngineConfig::new("http://host/image.iso", "True", false, None).unwrap();
        cfg.update(&store).unwrap();

        let loaded = HostedEngineConfig::retrieve(&store).unwrap();
        assert_eq!(loaded.image_path, "http://host/image.iso");
        assert!(loaded.pxe);
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn test_round_trip_with_bool_pxe() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let cfg = HostedEngineConfig::new("", true, true, Some(MaintenanceLevel::Global)).unwrap();
        cfg.update(&store).unwrap();

        let loaded = HostedEngineConfig::retrieve(&store).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn test_false_flags_remove_keys() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        HostedEngineConfig::new("", true, true, None).unwrap().update(&store).unwrap();
        HostedEngineConfig::new("/data/x.iso", false, false, None)
            .unwrap()
            .update(&store)
            .unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert!(!content.contains(KEY_PXE));
        assert!(!content.contains(KEY_FORCE_ENABLE));
        assert!(content.contains("OVIRT_HOSTED_ENGINE_IMAGE_PATH=\"/data/x.iso\""));
    }

    #[test]
    fn test_unrelated_keys_survive_update() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "# node defaults\nOVIRT_HOSTNAME=\"node1\"\n").unwrap();

        HostedEngineConfig::new("", true, false, None).unwrap().update(&store).unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.starts_with("# node defaults\n"));
        assert!(content.contains("OVIRT_HOSTNAME=\"node1\""));
        assert!(content.contains("OVIRT_HOSTED_ENGINE_PXE=\"yes\""));
    }

    #[test]
    fn test_missing_file_reads_as_defaults() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let cfg = HostedEngineConfig::retrieve(&store).unwrap();
        assert_eq!(cfg, HostedEngineConfig::default());
    }

    #[test]
    fn test_rejects_non_boolean_text() {
        let err = HostedEngineConfig::new("", "maybe", false, None).unwrap_err();
        assert!(matches!(err, DeployError::Validation(_)));
    }

    #[test]
    fn test_rejects_multiline_image_path() {
        let err = HostedEngineConfig::new("http://a/b.iso\nEVIL=1", false, false, None).unwrap_err();
        assert!(matches!(err, DeployError::Validation(_)));
    }

    #[test]
    fn test_parse_line_handles_unquoted_values() {
        assert_eq!(parse_line("KEY=value"), Some(("KEY", "value".to_string())));
        assert_eq!(parse_line("KEY=\"quoted\""), Some(("KEY", "quoted".to_string())));
        assert_eq!(parse_line("# comment"), None);
        assert_eq!(parse_line("garbage"), None);
    }
}
