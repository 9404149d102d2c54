//! Page state definitions
//!
//! Everything the renderer reads lives here. Only the orchestrator mutates
//! it; background threads report through the download channel instead.

use crate::status::VmStatus;
use crate::transaction::DeploymentConfigFile;
use crate::types::MaintenanceLevel;

/// Text shown before the deploy tool takes over the terminal
pub const LAUNCH_NOTICE: &str = "Setup will be run with screen enabled that can be \
reconnected in the event of a timeout or connection failure.\n\n\
It can be reconnected by running 'screen -d -r'";

/// Focusable page elements, in tab order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    #[default]
    ImagePath,
    Pxe,
    Maintenance,
    Deploy,
}

impl Focus {
    pub fn next(self) -> Self {
        match self {
            Self::ImagePath => Self::Pxe,
            Self::Pxe => Self::Maintenance,
            Self::Maintenance => Self::Deploy,
            Self::Deploy => Self::ImagePath,
        }
    }

    pub fn previous(self) -> Self {
        match self {
            Self::ImagePath => Self::Deploy,
            Self::Pxe => Self::ImagePath,
            Self::Maintenance => Self::Pxe,
            Self::Deploy => Self::Maintenance,
        }
    }
}

/// Modal dialogs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialog {
    /// Answer file is ready; waiting for the operator to start the session
    ConfirmLaunch {
        config: DeploymentConfigFile,
        text: String,
    },
    Progress {
        title: String,
        /// `None` while the size is unknown
        percentage: Option<u8>,
        throughput: String,
    },
    Error {
        title: String,
        message: String,
    },
    Info {
        title: String,
        message: String,
    },
}

impl Dialog {
    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Info {
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::ConfirmLaunch { .. } => "Begin Hosted Engine Setup",
            Self::Progress { title, .. } | Self::Error { title, .. } | Self::Info { title, .. } => {
                title
            }
        }
    }

    pub fn is_progress(&self) -> bool {
        matches!(self, Self::Progress { .. })
    }
}

/// Main page state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageState {
    /// Image URL or local path as typed
    pub image_input: String,
    pub pxe: bool,
    /// Selected maintenance level
    pub maintenance: MaintenanceLevel,
    pub status: VmStatus,
    pub dialog: Option<Dialog>,
    /// One-line feedback under the form
    pub status_message: String,
    pub focus: Focus,
}

impl Default for PageState {
    fn default() -> Self {
        Self {
            image_input: String::new(),
            pxe: false,
            maintenance: MaintenanceLevel::None,
            status: VmStatus::not_configured(),
            dialog: None,
            status_message: "Enter an image location or select PXE boot".to_string(),
            focus: Focus::default(),
        }
    }
}
