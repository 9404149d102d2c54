//! Hosted Engine Setup TUI Library
//!
//! Core of the hosted engine page: planning, image download, the
//! configuration hand-off and the deploy session, plus HA status queries.

pub mod app;
pub mod cli;
pub mod config_store;
pub mod download;
pub mod error;
pub mod invocation;
pub mod planner;
pub mod probe;
pub mod process_guard;
pub mod sanity;
pub mod session;
pub mod settings;
pub mod status;
pub mod theme;
pub mod tool_runner;
pub mod transaction;
pub mod types;
pub mod ui;
pub mod wrapper;

// Re-export main types for convenience
pub use app::{App, Orchestrator, PageState, Services};
pub use config_store::{ConfigStore, DefaultsFileStore, FlagValue, HostedEngineConfig};
pub use download::{
    format_rate, format_throughput, DownloadEvent, DownloadJob, Downloader, HttpTransport,
    JobHandle, JobState, JobTransitionError, Transport, TransportError, TransportResponse,
};
pub use error::{DeployError, ErrorKind};
pub use invocation::{CommandLine, ToolInvocation};
pub use planner::{DeploymentPlanner, DeploymentRequest, ImageSource, Plan};
pub use probe::{FilesystemProbe, LocalFilesystem};
pub use process_guard::{CommandProcessGroup, SupervisorGuard, SupervisorToken};
pub use session::{LaunchOutcome, Persister, SessionHost, SessionLauncher};
pub use settings::PluginSettings;
pub use status::{EngineState, HaClient, HaStats, StatusQuery, VmStatus};
pub use tool_runner::{run_tool, ToolOutput};
pub use transaction::{DeploymentConfigFile, DeploymentDirectives, Step, Transaction, TransactionRunner};
pub use types::{BootMode, MaintenanceLevel};
