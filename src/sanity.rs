//! Pre-flight sanity checks for runtime environment
//!
//! Verified before the page starts:
//! - the session tool, the deploy tool and the status tool are on `PATH`
//! - the process runs with root privileges (EUID 0)

use crate::settings::PluginSettings;
use std::path::Path;

/// Result of environment verification
#[derive(Debug)]
pub struct SanityCheckResult {
    pub missing_binaries: Vec<String>,
    pub is_root: bool,
}

impl SanityCheckResult {
    /// Returns true if all checks passed
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty() && self.is_root
    }

    /// Human readable failure report
    pub fn report(&self) -> String {
        let mut out = String::from("Hosted Engine Setup - pre-flight check failed\n\n");
        if !self.is_root {
            out.push_str("ERROR: root privileges required\n");
            out.push_str("   Deployment writes to /etc and /data; run as root.\n\n");
        }
        if !self.missing_binaries.is_empty() {
            out.push_str("ERROR: missing required binaries\n");
            for binary in &self.missing_binaries {
                out.push_str(&format!("   - {} (package: {})\n", binary, package_for_binary(binary)));
            }
            out.push('\n');
        }
        out
    }
}

/// Find `name` in `PATH`. Names containing a slash are checked directly.
pub fn binary_exists(name: &str) -> bool {
    if name.contains('/') {
        return is_executable(Path::new(name));
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| is_executable(&dir.join(name))))
        .unwrap_or(false)
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

fn package_for_binary(binary: &str) -> &'static str {
    match binary {
        "screen" => "screen",
        "ovirt-hosted-engine-setup" => "ovirt-hosted-engine-setup",
        "hosted-engine" => "ovirt-hosted-engine-ha",
        _ => "unknown",
    }
}

/// Perform all sanity checks and return the result
pub fn verify_environment(settings: &PluginSettings) -> SanityCheckResult {
    let missing = [
        &settings.session_tool,
        &settings.deploy_tool,
        &settings.status_tool,
    ]
    .into_iter()
    .filter(|binary| !binary_exists(binary))
    .cloned()
    .collect();

    if !binary_exists(&settings.persist_tool) {
        tracing::debug!(
            "Optional binary not found: {} (directories will not be persisted)",
            settings.persist_tool
        );
    }

    SanityCheckResult {
        missing_binaries: missing,
        is_root: is_running_as_root(),
    }
}

/// Set HOSTED_ENGINE_TUI_SKIP_ROOT_CHECK=1 to skip the root check
pub fn should_skip_root_check() -> bool {
    std::env::var("HOSTED_ENGINE_TUI_SKIP_ROOT_CHECK")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Run the checks; the error carries the printable report
pub fn run_preflight_checks(settings: &PluginSettings) -> anyhow::Result<()> {
    tracing::debug!("Running pre-flight sanity checks...");
    let mut result = verify_environment(settings);

    if should_skip_root_check() {
        tracing::warn!("Root check skipped (HOSTED_ENGINE_TUI_SKIP_ROOT_CHECK=1)");
        result.is_root = true;
    }

    if !result.is_ok() {
        anyhow::bail!("{}", result.report());
    }

    tracing::info!("Pre-flight checks passed");
    Ok(())
}
