//! Supervisor liveness and child process hygiene
//!
//! Background work (the image download) must stop as soon as the
//! supervising UI goes away, and clean up after itself when it does.
//!
//! # Mechanism
//! - `SupervisorGuard` is owned by the orchestrator; dropping it marks the
//!   supervisor gone.
//! - `SupervisorToken` is a cheap clone handed to background threads, which
//!   poll `is_alive()` at every checkpoint.
//! - Background threads hold a `WorkerTicket` while running, so the signal
//!   handler can give them a grace period to delete partial files before
//!   the process exits.
//! - Files still being written are registered on the token. A worker stuck
//!   past the grace period cannot clean up, so whoever gives up on it calls
//!   `remove_stale_partials()` instead.
//! - Captured helper commands run in their own process group with a parent
//!   death signal, so they never outlive the page.

use nix::libc;
use nix::unistd::Pid;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Liveness {
    gone: AtomicBool,
    workers: AtomicUsize,
    partials: Mutex<BTreeSet<PathBuf>>,
}

/// Read side of the supervisor liveness flag
#[derive(Debug, Clone, Default)]
pub struct SupervisorToken {
    inner: Arc<Liveness>,
}

impl SupervisorToken {
    /// True while the supervising UI is still running
    pub fn is_alive(&self) -> bool {
        !self.inner.gone.load(Ordering::SeqCst)
    }

    /// Mark the supervisor gone. Idempotent.
    pub fn mark_gone(&self) {
        if !self.inner.gone.swap(true, Ordering::SeqCst) {
            tracing::debug!("Supervisor marked gone");
        }
    }

    /// Register a running background worker
    pub fn worker(&self) -> WorkerTicket {
        self.inner.workers.fetch_add(1, Ordering::SeqCst);
        WorkerTicket {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of background workers still holding a ticket
    pub fn active_workers(&self) -> usize {
        self.inner.workers.load(Ordering::SeqCst)
    }

    /// Wait until every worker has finished, or `timeout` elapses.
    /// Returns true when all workers finished.
    pub fn wait_for_workers(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        while self.active_workers() > 0 {
            if start.elapsed() >= timeout {
                tracing::warn!(
                    "{} background worker(s) still running after {:?}",
                    self.active_workers(),
                    timeout
                );
                return false;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        true
    }

    /// Record a file that is incomplete until the worker releases it
    pub fn register_partial(&self, path: &Path) {
        self.partials().insert(path.to_path_buf());
    }

    /// The worker is done with `path`, either kept or already removed
    pub fn release_partial(&self, path: &Path) {
        self.partials().remove(path);
    }

    /// Files registered and not yet released
    pub fn pending_partials(&self) -> Vec<PathBuf> {
        self.partials().iter().cloned().collect()
    }

    /// Delete every file a worker registered and never released.
    /// The lock is held while deleting, so a worker finishing at the same
    /// moment either releases first (file kept) or finds it gone.
    pub fn remove_stale_partials(&self) {
        let mut partials = self.partials();
        for path in std::mem::take(&mut *partials) {
            match fs::remove_file(&path) {
                Ok(()) => tracing::warn!("Removed unfinished download {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::error!("Could not remove {}: {}", path.display(), e),
            }
        }
    }

    fn partials(&self) -> std::sync::MutexGuard<'_, BTreeSet<PathBuf>> {
        self.inner.partials.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held by a background thread for as long as it runs
#[derive(Debug)]
pub struct WorkerTicket {
    inner: Arc<Liveness>,
}

impl Drop for WorkerTicket {
    fn drop(&mut self) {
        self.inner.workers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// RAII owner of supervisor liveness.
/// Attach this to the orchestrator so every exit path cancels background work.
#[derive(Debug, Default)]
pub struct SupervisorGuard {
    token: SupervisorToken,
}

impl SupervisorGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> SupervisorToken {
        self.token.clone()
    }
}

impl Drop for SupervisorGuard {
    fn drop(&mut self) {
        tracing::debug!("SupervisorGuard dropped, cancelling background work");
        self.token.mark_gone();
    }
}

/// Install handlers for SIGINT, SIGTERM and SIGHUP.
///
/// On a signal the supervisor is marked gone, background workers get a
/// short grace period to clean up, files they left unfinished are removed,
/// `on_exit` runs (terminal restore) and the process exits with 128 +
/// signal number.
pub fn init_signal_handlers<F>(token: SupervisorToken, on_exit: F) -> Result<(), std::io::Error>
where
    F: Fn() + Send + 'static,
{
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let signal_name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };
            tracing::info!("Received {} signal, cleaning up...", signal_name);

            token.mark_gone();
            token.wait_for_workers(Duration::from_secs(3));
            token.remove_stale_partials();
            on_exit();

            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for std::process::Command to set up process groups
pub trait CommandProcessGroup {
    /// Run the command in its own process group and deliver SIGTERM to it
    /// when this process dies.
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;

                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }

                Ok(())
            });
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_token_alive_until_guard_dropped() {
        let guard = SupervisorGuard::new();
        let token = guard.token();
        assert!(token.is_alive());

        drop(guard);
        assert!(!token.is_alive());
    }

    #[test]
    fn test_mark_gone_is_idempotent() {
        let token = SupervisorToken::default();
        token.mark_gone();
        token.mark_gone();
        assert!(!token.is_alive());
    }

    #[test]
    fn test_worker_tickets_are_counted() {
        let token = SupervisorToken::default();
        let first = token.worker();
        let second = token.worker();
        assert_eq!(token.active_workers(), 2);

        drop(first);
        assert_eq!(token.active_workers(), 1);
        drop(second);
        assert!(token.wait_for_workers(Duration::from_millis(10)));
    }

    #[test]
    fn test_wait_for_workers_times_out() {
        let token = SupervisorToken::default();
        let _ticket = token.worker();
        assert!(!token.wait_for_workers(Duration::from_millis(50)));
    }

    #[test]
    fn test_stale_partials_are_removed() {
        let dir = tempfile::TempDir::new().unwrap();
        let stale = dir.path().join("stale.iso");
        let done = dir.path().join("done.iso");
        std::fs::write(&stale, b"half").unwrap();
        std::fs::write(&done, b"whole").unwrap();

        let token = SupervisorToken::default();
        token.register_partial(&stale);
        token.register_partial(&done);
        token.release_partial(&done);
        assert_eq!(token.pending_partials(), vec![stale.clone()]);

        token.remove_stale_partials();
        assert!(!stale.exists());
        assert!(done.exists());
        assert!(token.pending_partials().is_empty());

        // Already gone is not an error
        token.register_partial(&stale);
        token.remove_stale_partials();
    }

    #[test]
    fn test_process_group_command_runs() {
        let output = Command::new("sh")
            .args(["-c", "echo grouped"])
            .in_new_process_group()
            .output()
            .expect("sh should run");
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "grouped");
    }
}
