//! Property-Based Tests for hosted-engine-tui
//!
//! Uses proptest for invariants that must hold across inputs:
//! - Request classification (mutual exclusivity, no side effects)
//! - Persisted selection round-trips
//! - Throughput labels and maintenance level parsing

use proptest::prelude::*;

use hosted_engine_tui::config_store::{DefaultsFileStore, FlagValue, HostedEngineConfig};
use hosted_engine_tui::download::{format_rate, format_throughput};
use hosted_engine_tui::error::ErrorKind;
use hosted_engine_tui::planner::{DeploymentPlanner, DeploymentRequest, Plan};
use hosted_engine_tui::probe::{FilesystemProbe, LocalFilesystem};
use hosted_engine_tui::types::{BootMode, MaintenanceLevel};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

// =============================================================================
// Planner Property Tests
// =============================================================================

/// Probe that counts every call and reports `present` for `exists`
#[derive(Default)]
struct CountingProbe {
    present: bool,
    calls: AtomicUsize,
}

impl FilesystemProbe for CountingProbe {
    fn exists(&self, _path: &Path) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.present
    }

    fn make_dirs(&self, _path: &Path) -> io::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn maintenance_strategy() -> impl Strategy<Value = Option<MaintenanceLevel>> {
    prop_oneof![
        Just(None),
        Just(Some(MaintenanceLevel::Global)),
        Just(Some(MaintenanceLevel::Local)),
        Just(Some(MaintenanceLevel::None)),
    ]
}

/// Non-empty image sources: remote URLs, absolute paths and junk
fn image_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z]{1,8}".prop_map(|name| format!("http://mirror/{}.iso", name)),
        "[a-z]{1,8}".prop_map(|name| format!("/var/tmp/{}.ova", name)),
        "[a-zA-Z0-9 ]{0,12}[a-zA-Z0-9]",
    ]
}

proptest! {
    /// Both image and PXE set: always InvalidRequest, probe untouched
    #[test]
    fn image_and_pxe_is_invalid(image in image_strategy(), maintenance in maintenance_strategy()) {
        let probe = CountingProbe::default();
        let planner = DeploymentPlanner::new("/data/setup");
        let request = DeploymentRequest::from_form(&image, true, maintenance);

        let err = planner.classify(&request, &probe).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        prop_assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    /// Neither image nor PXE: always InvalidRequest, probe untouched
    #[test]
    fn neither_image_nor_pxe_is_invalid(blank in "[ \t]{0,6}", maintenance in maintenance_strategy()) {
        let probe = CountingProbe::default();
        let planner = DeploymentPlanner::new("/data/setup");
        let request = DeploymentRequest::from_form(&blank, false, maintenance);

        let err = planner.classify(&request, &probe).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        prop_assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    /// A URL whose basename is already in the setup dir never needs a download
    #[test]
    fn existing_basename_never_downloads(
        host in "[a-z]{1,10}",
        dir in "[a-z]{1,6}",
        name in "[a-z0-9_-]{1,12}",
        ext in prop_oneof![Just("iso"), Just("ISO"), Just("gz"), Just("ova")],
        scheme in prop_oneof![Just("http"), Just("https"), Just("ftp")],
    ) {
        let probe = CountingProbe { present: true, ..Default::default() };
        let planner = DeploymentPlanner::new("/data/setup");
        let url = format!("{}://{}/{}/{}.{}", scheme, host, dir, name, ext);
        let request = DeploymentRequest::from_form(&url, false, None);

        let plan = planner.classify(&request, &probe).unwrap();
        prop_assert!(!plan.needs_download());
        let expected = PathBuf::from(format!("/data/setup/{}.{}", name, ext));
        prop_assert_eq!(plan.image(), Some(expected.as_path()));
        let boot = if ext.eq_ignore_ascii_case("iso") { BootMode::Cdrom } else { BootMode::Disk };
        prop_assert_eq!(plan.boot(), boot);
    }

    /// A missing basename always plans a download into the setup dir
    #[test]
    fn missing_basename_plans_download(name in "[a-z0-9]{1,12}") {
        let probe = CountingProbe::default();
        let planner = DeploymentPlanner::new("/data/setup");
        let request = DeploymentRequest::from_form(&format!("https://h/{}.gz", name), false, None);

        match planner.classify(&request, &probe).unwrap() {
            Plan::Download { destination, boot, .. } => {
                prop_assert_eq!(destination, PathBuf::from(format!("/data/setup/{}.gz", name)));
                prop_assert_eq!(boot, BootMode::Disk);
            }
            other => prop_assert!(false, "expected download plan, got {:?}", other),
        }
    }
}

// =============================================================================
// Persisted Selection Property Tests
// =============================================================================

fn pxe_text_strategy() -> impl Strategy<Value = (String, bool)> {
    prop_oneof![
        Just(("true".to_string(), true)),
        Just(("Yes".to_string(), true)),
        Just(("1".to_string(), true)),
        Just(("ON".to_string(), true)),
        Just(("false".to_string(), false)),
        Just(("no".to_string(), false)),
        Just(("0".to_string(), false)),
        Just((" off ".to_string(), false)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Write then read yields the same image path and a canonical pxe flag
    #[test]
    fn selection_roundtrip(
        image in "(/[a-z0-9._-]{1,10}){1,4}",
        (pxe_text, pxe) in pxe_text_strategy(),
        as_text in any::<bool>(),
        maintenance in maintenance_strategy(),
    ) {
        let dir = TempDir::new().unwrap();
        let store = DefaultsFileStore::new(dir.path().join("ovirt"));

        let flag: FlagValue = if as_text { pxe_text.into() } else { pxe.into() };
        let record = HostedEngineConfig::new(&image, flag, false, maintenance).unwrap();
        record.update(&store).unwrap();

        let read = HostedEngineConfig::retrieve(&store).unwrap();
        prop_assert_eq!(&read.image_path, &image);
        prop_assert_eq!(read.pxe, pxe);
        prop_assert_eq!(read.maintenance, maintenance);
    }

    /// Unknown flag text is rejected instead of guessed
    #[test]
    fn unknown_pxe_text_rejected(text in "[a-z]{2,8}") {
        prop_assume!(!["true", "yes", "on", "false", "no", "off"].contains(&text.as_str()));
        prop_assert!(HostedEngineConfig::new("", text.as_str(), false, None).is_err());
    }
}

// =============================================================================
// Filesystem Probe Property Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// make_dirs on an existing tree is a no-op
    #[test]
    fn make_dirs_is_idempotent(parts in prop::collection::vec("[a-z]{1,6}", 1..4)) {
        let root = TempDir::new().unwrap();
        let path = parts.iter().fold(root.path().to_path_buf(), |acc, part| acc.join(part));

        LocalFilesystem.make_dirs(&path).unwrap();
        LocalFilesystem.make_dirs(&path).unwrap();
        prop_assert!(path.is_dir());
    }
}

// =============================================================================
// Throughput and Enum Property Tests
// =============================================================================

proptest! {
    /// Labels always carry one decimal and a known unit
    #[test]
    fn rate_label_is_well_formed(rate in 0.0f64..1.0e13) {
        let label = format_rate(rate);
        let (number, unit) = label.split_once(' ').unwrap();
        prop_assert!(["B/s", "KB/s", "MB/s", "GB/s"].contains(&unit));
        let decimals = number.split_once('.').map(|(_, d)| d.len());
        prop_assert_eq!(decimals, Some(1));
        if unit != "GB/s" {
            prop_assert!(number.parse::<f64>().unwrap() <= 1024.0);
        }
    }

    /// Zero elapsed time never divides by zero
    #[test]
    fn throughput_without_elapsed_time(bytes in any::<u64>()) {
        let label = format_throughput(bytes, Duration::ZERO);
        prop_assert!(label.ends_with("/s"));
        prop_assert!(!label.contains("inf") && !label.contains("NaN"));
    }

    /// Maintenance levels parse from their display text
    #[test]
    fn maintenance_roundtrip(level in prop_oneof![
        Just(MaintenanceLevel::Global),
        Just(MaintenanceLevel::Local),
        Just(MaintenanceLevel::None),
    ]) {
        let parsed: MaintenanceLevel = level.to_string().parse().unwrap();
        prop_assert_eq!(parsed, level);
        prop_assert_eq!(level.next().next().next(), level);
    }
}
