//! Deployment orchestrator
//!
//! Owns the page state and sequences planner, downloader, transaction,
//! session launcher and status query. Both the interactive page and the
//! headless `deploy` command drive it.
//!
//! ```text
//! on_deploy_requested ─► classify ─┬─ Pxe / Local ─► build + commit ─► ConfirmLaunch
//!                                  └─ Download ───► Downloader::start ─► Progress
//!                                                        │
//!            on_download_terminal(Succeeded) ◄───────────┘
//!                    └─► on_deploy_requested(LocalPath)
//! ```

use super::state::{Dialog, PageState, LAUNCH_NOTICE};
use crate::config_store::{ConfigStore, DefaultsFileStore, HostedEngineConfig};
use crate::download::{DownloadEvent, Downloader, HttpTransport, JobHandle, JobState};
use crate::error::{DeployError, ErrorKind, Result};
use crate::planner::{DeploymentPlanner, DeploymentRequest, Plan};
use crate::probe::{basename, FilesystemProbe, LocalFilesystem};
use crate::process_guard::{SupervisorGuard, SupervisorToken};
use crate::session::{LaunchOutcome, NodePersister, ScreenHost, SessionLauncher};
use crate::settings::PluginSettings;
use crate::status::{HostedEngineCli, StatusQuery, VmStatus};
use crate::transaction::{DeploymentConfigFile, TransactionRunner};
use crate::types::MaintenanceLevel;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

/// Collaborators the orchestrator sequences
pub struct Services {
    pub planner: DeploymentPlanner,
    pub probe: Arc<dyn FilesystemProbe>,
    pub store: Arc<dyn ConfigStore>,
    pub downloader: Downloader,
    pub transactions: TransactionRunner,
    pub launcher: SessionLauncher,
    pub status: StatusQuery,
}

impl Services {
    /// Production wiring for a real host
    pub fn from_settings(settings: &PluginSettings) -> Result<Self> {
        let probe: Arc<dyn FilesystemProbe> = Arc::new(LocalFilesystem);
        let store: Arc<dyn ConfigStore> = Arc::new(DefaultsFileStore::new(&settings.defaults_file));
        let transport = HttpTransport::new(settings.connect_timeout(), settings.accept_invalid_certs)?;

        Ok(Self {
            planner: DeploymentPlanner::new(&settings.setup_dir),
            transactions: TransactionRunner::new(settings, Arc::clone(&store), Arc::clone(&probe)),
            downloader: Downloader::new(Arc::new(transport), settings.chunk_size),
            launcher: SessionLauncher::new(
                settings,
                Arc::new(ScreenHost),
                Arc::new(NodePersister::new(&settings.persist_tool)),
            ),
            status: StatusQuery::new(
                settings.vm_conf_path.clone(),
                settings.ha_conf_path.clone(),
                Arc::new(HostedEngineCli::new(&settings.status_tool, settings.status_timeout())),
            ),
            probe,
            store,
        })
    }
}

/// How long a running download gets to clean up when the page goes away
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Download in flight, with the parts of the request needed to resume
struct ActiveDownload {
    handle: JobHandle,
    maintenance: Option<MaintenanceLevel>,
}

/// Page orchestrator
pub struct Orchestrator {
    services: Services,
    state: PageState,
    events_tx: Sender<DownloadEvent>,
    events_rx: Receiver<DownloadEvent>,
    download: Option<ActiveDownload>,
    guard: SupervisorGuard,
}

impl Orchestrator {
    /// Create the orchestrator and load the saved selection into the form
    pub fn new(services: Services) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        let mut orchestrator = Self {
            services,
            state: PageState::default(),
            events_tx,
            events_rx,
            download: None,
            guard: SupervisorGuard::new(),
        };
        orchestrator.load_saved_selection();
        orchestrator
    }

    pub fn state(&self) -> &PageState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut PageState {
        &mut self.state
    }

    /// Token that signal handling flips when the process is going away
    pub fn supervisor(&self) -> SupervisorToken {
        self.guard.token()
    }

    pub fn download_in_progress(&self) -> bool {
        self.download.is_some()
    }

    /// Stop background work before the page goes away.
    ///
    /// A running download is cancelled and given `grace` to delete its
    /// partial file. If it is still stuck after that (a read blocked on the
    /// server), the file is deleted here and the thread is left behind.
    /// Safe to call more than once.
    pub fn shutdown(&mut self, grace: Duration) {
        let token = self.guard.token();
        token.mark_gone();

        let Some(active) = self.download.take() else {
            return;
        };
        tracing::info!("Shutting down with a download in progress");
        if token.wait_for_workers(grace) {
            active.handle.join();
        } else {
            tracing::warn!(
                "Download of {} did not stop within {:?}",
                active.handle.snapshot().url,
                grace
            );
        }
        token.remove_stale_partials();
    }

    fn load_saved_selection(&mut self) {
        match HostedEngineConfig::retrieve(self.services.store.as_ref()) {
            Ok(saved) => {
                self.state.image_input = saved.image_path;
                self.state.pxe = saved.pxe;
                if let Some(level) = saved.maintenance {
                    self.state.maintenance = level;
                }
            }
            Err(e) => tracing::warn!("Could not load saved hosted engine selection: {}", e),
        }
    }

    /// Request built from the current form values
    pub fn request_from_form(&self) -> DeploymentRequest {
        DeploymentRequest::from_form(
            &self.state.image_input,
            self.state.pxe,
            Some(self.state.maintenance),
        )
    }

    /// Deploy button
    pub fn deploy_from_form(&mut self) {
        let request = self.request_from_form();
        self.on_deploy_requested(request);
    }

    /// Plan `request` and either start a download or prepare the hand-off
    pub fn on_deploy_requested(&mut self, request: DeploymentRequest) {
        if self.download.is_some() {
            tracing::warn!("Deploy requested while a download is running");
            self.show_error(
                "Download in progress",
                "An image download is already running. Wait for it to finish.",
            );
            return;
        }

        tracing::info!("Deploy requested for {:?}", request);
        let plan = match self
            .services
            .planner
            .classify(&request, self.services.probe.as_ref())
        {
            Ok(plan) => plan,
            Err(e) => return self.report(e),
        };

        match plan {
            Plan::Download { url, .. } => {
                if let Err(e) = self.start_download(url, request.maintenance) {
                    self.report(e);
                }
            }
            plan => match self.prepare(&plan, &request) {
                Ok(config) => {
                    self.state.status_message = "Ready to start hosted engine setup".to_string();
                    self.state.dialog = Some(Dialog::ConfirmLaunch {
                        config,
                        text: LAUNCH_NOTICE.to_string(),
                    });
                }
                Err(e) => self.report(e),
            },
        }
    }

    fn start_download(&mut self, url: url::Url, maintenance: Option<MaintenanceLevel>) -> Result<()> {
        let setup_dir = self.services.planner.setup_dir().to_path_buf();
        self.services.probe.make_dirs(&setup_dir)?;

        let name = basename(url.path());
        let handle = self.services.downloader.start(
            url,
            &setup_dir,
            self.events_tx.clone(),
            self.guard.token(),
        )?;
        self.download = Some(ActiveDownload {
            handle,
            maintenance,
        });
        self.state.status_message = format!("Downloading {}", name);
        self.state.dialog = Some(Dialog::Progress {
            title: format!("Downloading {}", name),
            percentage: None,
            throughput: String::new(),
        });
        Ok(())
    }

    fn prepare(&self, plan: &Plan, request: &DeploymentRequest) -> Result<DeploymentConfigFile> {
        let transaction = self.services.transactions.build(plan, request)?;
        self.services.transactions.commit(transaction)
    }

    /// Drain pending download events without blocking
    pub fn poll_download(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.dispatch(event);
        }
        self.reap_aborted();
    }

    /// Wait up to `timeout` for one download event and handle it.
    /// Returns false when nothing arrived.
    pub fn wait_for_download_event(&mut self, timeout: Duration) -> bool {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => {
                self.dispatch(event);
                true
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                self.reap_aborted();
                false
            }
        }
    }

    /// Aborted jobs send no terminal event; drop them once they stop
    fn reap_aborted(&mut self) {
        let aborted = self
            .download
            .as_ref()
            .is_some_and(|active| active.handle.state() == JobState::Aborted);
        if !aborted {
            return;
        }
        if let Some(active) = self.download.take() {
            active.handle.join();
            if self.state.dialog.as_ref().is_some_and(Dialog::is_progress) {
                self.state.dialog = None;
            }
            self.state.status_message = "Download aborted".to_string();
        }
    }

    fn dispatch(&mut self, event: DownloadEvent) {
        match event {
            DownloadEvent::Progress {
                percentage,
                throughput,
                ..
            } => self.on_download_progress(percentage, throughput),
            DownloadEvent::Terminal {
                state,
                message,
                destination,
            } => self.on_download_terminal(state, message, destination),
        }
    }

    pub fn on_download_progress(&mut self, percentage: Option<u8>, throughput: String) {
        if let Some(Dialog::Progress {
            percentage: shown,
            throughput: shown_rate,
            ..
        }) = self.state.dialog.as_mut()
        {
            *shown = percentage;
            *shown_rate = throughput;
        }
    }

    pub fn on_download_terminal(
        &mut self,
        state: JobState,
        message: Option<String>,
        destination: PathBuf,
    ) {
        let Some(active) = self.download.take() else {
            tracing::warn!("Terminal download event without an active job");
            return;
        };
        active.handle.join();
        if self.state.dialog.as_ref().is_some_and(Dialog::is_progress) {
            self.state.dialog = None;
        }

        match state {
            JobState::Succeeded => {
                tracing::info!("Continuing deployment with {}", destination.display());
                self.on_deploy_requested(DeploymentRequest::local(destination, active.maintenance));
            }
            JobState::Failed => {
                let message = message.unwrap_or_else(|| "unknown error".to_string());
                self.report(DeployError::network(message));
            }
            JobState::Aborted | JobState::Pending | JobState::Running => {
                tracing::debug!("Download ended as {}", state);
            }
        }
    }

    pub fn on_status_refreshed(&mut self, status: VmStatus) {
        if let Some(level) = status.maintenance {
            self.state.maintenance = level;
        }
        self.state.status = status;
    }

    /// Query the HA daemon again
    pub fn refresh_status(&mut self) {
        let status = self.services.status.current_status();
        self.on_status_refreshed(status);
    }

    /// Apply the selected maintenance level through the HA daemon
    pub fn apply_maintenance(&mut self) {
        let level = self.state.maintenance;
        match self.services.status.set_maintenance(level) {
            Ok(()) => {
                self.state.status_message = format!("Maintenance mode set to {}", level);
                self.refresh_status();
            }
            Err(e) => self.report(e),
        }
    }

    /// Accept the launch dialog. Returns the answer file to hand to
    /// `launch`; the caller releases the terminal in between.
    pub fn confirm_launch(&mut self) -> Option<DeploymentConfigFile> {
        match self.state.dialog.take() {
            Some(Dialog::ConfirmLaunch { config, .. }) => Some(config),
            other => {
                self.state.dialog = other;
                None
            }
        }
    }

    /// Run the deploy session and report the outcome
    pub fn launch(&mut self, config: &DeploymentConfigFile) -> Option<LaunchOutcome> {
        let result = self.services.launcher.launch(config.path());
        self.refresh_status();
        match result {
            Ok(outcome) => {
                self.state.status_message = if outcome.succeeded() {
                    "Hosted engine setup finished".to_string()
                } else {
                    "Hosted engine setup did not complete".to_string()
                };
                if !outcome.persist_failures.is_empty() {
                    let paths: Vec<String> = outcome
                        .persist_failures
                        .iter()
                        .map(|(path, _)| path.display().to_string())
                        .collect();
                    self.show_error(
                        "Persist failed",
                        format!("Could not persist: {}", paths.join(", ")),
                    );
                }
                Some(outcome)
            }
            Err(e) => {
                self.report(e);
                None
            }
        }
    }

    /// Close the open dialog. A pending answer file is discarded; a
    /// running download keeps its progress dialog.
    pub fn dismiss_dialog(&mut self) {
        match self.state.dialog.take() {
            Some(Dialog::ConfirmLaunch { config, .. }) => {
                if let Err(e) = config.discard() {
                    tracing::warn!("Could not remove {}: {}", config.path().display(), e);
                }
                self.state.status_message = "Hosted engine setup cancelled".to_string();
            }
            Some(dialog @ Dialog::Progress { .. }) if self.download.is_some() => {
                self.state.dialog = Some(dialog);
            }
            _ => {}
        }
    }

    fn show_error(&mut self, title: impl Into<String>, message: impl Into<String>) {
        let message = message.into();
        self.state.status_message = message.clone();
        self.state.dialog = Some(Dialog::error(title, message));
    }

    /// Render an error as a dialog
    fn report(&mut self, error: DeployError) {
        tracing::error!("{}", error);
        let title = match error.kind() {
            ErrorKind::InvalidRequest | ErrorKind::Validation => "Invalid input",
            ErrorKind::NetworkFailure => "Download failed",
            ErrorKind::UnrecognizedImageFormat => "Unrecognized image",
            ErrorKind::HaDaemonUnreachable => "HA daemon unreachable",
            ErrorKind::Session => "Could not start setup",
            ErrorKind::MissingConfig
            | ErrorKind::Io
            | ErrorKind::Config
            | ErrorKind::Internal => "Error",
        };
        self.show_error(title, error.user_message());
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown(SHUTDOWN_GRACE);
    }
}
