//! Type-safe value types shared across the pipeline
//!
//! These replace the string tokens the deploy tool and the HA tooling expect
//! with enums, so a typo in `"cdrom"` or `"global"` is a compile error.

use serde::{Deserialize, Serialize};
use std::path::Path;
use strum::{Display, EnumIter, EnumString};

/// How the engine VM boots on first start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BootMode {
    /// Network boot, no local image needed
    Pxe,
    /// Boot an installer ISO attached as a CD-ROM
    Cdrom,
    /// Boot a pre-installed disk unpacked from an OVA archive
    Disk,
}

impl BootMode {
    /// Decide the boot mode from an image file name.
    ///
    /// `.iso` (any case) boots as a CD-ROM. Everything else is assumed to be
    /// a compressed appliance archive; content is not inspected here.
    pub fn from_extension(path: &Path) -> Self {
        let is_iso = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("iso"));
        if is_iso { Self::Cdrom } else { Self::Disk }
    }
}

/// HA maintenance level for the hosted engine cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceLevel {
    /// Every host stops monitoring the engine VM
    Global,
    /// Only this host is in maintenance
    Local,
    #[default]
    None,
}

impl MaintenanceLevel {
    /// Cycle to the next level (used by the page selector)
    pub fn next(self) -> Self {
        match self {
            Self::None => Self::Local,
            Self::Local => Self::Global,
            Self::Global => Self::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_boot_mode_from_extension() {
        assert_eq!(BootMode::from_extension(Path::new("/data/rhevm.iso")), BootMode::Cdrom);
        assert_eq!(BootMode::from_extension(Path::new("/data/RHEVM.ISO")), BootMode::Cdrom);
        assert_eq!(BootMode::from_extension(Path::new("/data/appliance.ova.gz")), BootMode::Disk);
        assert_eq!(BootMode::from_extension(Path::new("/data/no_extension")), BootMode::Disk);
    }

    #[test]
    fn test_boot_mode_tokens() {
        assert_eq!(BootMode::Pxe.to_string(), "pxe");
        assert_eq!(BootMode::Cdrom.to_string(), "cdrom");
        assert_eq!(BootMode::Disk.to_string(), "disk");
    }

    #[test]
    fn test_maintenance_parse() {
        assert_eq!(MaintenanceLevel::from_str("global").unwrap(), MaintenanceLevel::Global);
        assert_eq!(MaintenanceLevel::from_str("none").unwrap(), MaintenanceLevel::None);
        assert!(MaintenanceLevel::from_str("partial").is_err());
    }

    #[test]
    fn test_maintenance_cycle_returns_to_start() {
        let start = MaintenanceLevel::None;
        assert_eq!(start.next().next().next(), start);
    }
}
