//! Deployment planning
//!
//! Turns what the user entered into a `Plan`: boot over PXE, use an image
//! that is already on disk, or fetch one first. Planning has no side effects;
//! it only asks the `FilesystemProbe` whether files exist.
//!
//! # Decision order
//!
//! ```text
//! validate (exactly one of image / PXE)
//!     ↓
//! PXE ─────────────────────────────► Plan::Pxe
//! local path (file://, /…) ────────► Plan::Local (must exist)
//! remote URL
//!     ├─ setup_dir/basename exists ─► Plan::Local   (never re-download)
//!     └─ otherwise ─────────────────► Plan::Download
//! ```

use crate::error::{DeployError, Result};
use crate::probe::{local_copy_path, FilesystemProbe};
use crate::types::{BootMode, MaintenanceLevel};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// URL schemes an image may be fetched from
pub const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "ftp"];

/// Where the engine image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Empty,
    LocalPath(PathBuf),
    /// Unparsed remote location; parsed during classification
    RemoteUrl(String),
}

impl ImageSource {
    /// Interpret the text of the image field
    pub fn from_input(input: &str) -> Self {
        let input = input.trim();
        if input.is_empty() {
            Self::Empty
        } else if let Some(path) = input.strip_prefix("file://") {
            Self::LocalPath(PathBuf::from(path))
        } else if input.starts_with('/') {
            Self::LocalPath(PathBuf::from(input))
        } else {
            Self::RemoteUrl(input.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::LocalPath(path) => write!(f, "{}", path.display()),
            Self::RemoteUrl(url) => write!(f, "{}", url),
        }
    }
}

/// What the user asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRequest {
    pub image_source: ImageSource,
    pub pxe: bool,
    pub maintenance: Option<MaintenanceLevel>,
}

impl DeploymentRequest {
    /// Build a request from raw form values
    pub fn from_form(image: &str, pxe: bool, maintenance: Option<MaintenanceLevel>) -> Self {
        Self {
            image_source: ImageSource::from_input(image),
            pxe,
            maintenance,
        }
    }

    /// Request for an image that is now on local disk
    pub fn local(path: PathBuf, maintenance: Option<MaintenanceLevel>) -> Self {
        Self {
            image_source: ImageSource::LocalPath(path),
            pxe: false,
            maintenance,
        }
    }

    /// Exactly one of {image, PXE} must be selected
    pub fn validate(&self) -> Result<()> {
        match (self.image_source.is_empty(), self.pxe) {
            (false, true) => Err(DeployError::invalid_request(
                "choose either an image source or PXE boot, not both",
            )),
            (true, false) => Err(DeployError::invalid_request(
                "an image source or PXE boot is required",
            )),
            _ => Ok(()),
        }
    }
}

/// Outcome of classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Pxe,
    /// Image is on disk and ready to be referenced
    Local { image: PathBuf, boot: BootMode },
    /// Image must be fetched into `destination` first; `boot` is pending
    Download {
        url: Url,
        destination: PathBuf,
        boot: BootMode,
    },
}

impl Plan {
    pub fn needs_download(&self) -> bool {
        matches!(self, Self::Download { .. })
    }

    pub fn boot(&self) -> BootMode {
        match self {
            Self::Pxe => BootMode::Pxe,
            Self::Local { boot, .. } | Self::Download { boot, .. } => *boot,
        }
    }

    /// Local image the plan refers to, if any
    pub fn image(&self) -> Option<&Path> {
        match self {
            Self::Local { image, .. } => Some(image),
            _ => None,
        }
    }
}

/// Classifies requests against the deployment working directory
#[derive(Debug, Clone)]
pub struct DeploymentPlanner {
    setup_dir: PathBuf,
}

impl DeploymentPlanner {
    pub fn new(setup_dir: impl Into<PathBuf>) -> Self {
        Self {
            setup_dir: setup_dir.into(),
        }
    }

    pub fn setup_dir(&self) -> &Path {
        &self.setup_dir
    }

    /// Decide the boot strategy for `request`
    ///
    /// # Errors
    ///
    /// `InvalidRequest` when the request is ambiguous or empty, when the
    /// source cannot be parsed, or when a local path does not exist.
    pub fn classify(&self, request: &DeploymentRequest, probe: &dyn FilesystemProbe) -> Result<Plan> {
        request.validate()?;

        match &request.image_source {
            ImageSource::Empty => Ok(Plan::Pxe),
            ImageSource::LocalPath(path) => {
                if !probe.exists(path) {
                    return Err(DeployError::invalid_request(format!(
                        "image {} does not exist",
                        path.display()
                    )));
                }
                Ok(Plan::Local {
                    image: path.clone(),
                    boot: BootMode::from_extension(path),
                })
            }
            ImageSource::RemoteUrl(raw) => {
                let url = parse_source(raw)?;
                let destination = local_copy_path(&self.setup_dir, url.path()).ok_or_else(|| {
                    DeployError::invalid_request(format!("could not determine a file name from {}", raw))
                })?;
                let boot = BootMode::from_extension(&destination);

                if probe.exists(&destination) {
                    tracing::info!(
                        "Image {} already present, skipping download",
                        destination.display()
                    );
                    Ok(Plan::Local {
                        image: destination,
                        boot,
                    })
                } else {
                    Ok(Plan::Download {
                        url,
                        destination,
                        boot,
                    })
                }
            }
        }
    }
}

/// Parse a remote source, accepting only supported schemes
fn parse_source(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| {
        tracing::debug!("Rejecting image source {:?}: {}", raw, e);
        DeployError::invalid_request("could not parse source")
    })?;
    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(DeployError::invalid_request("could not parse source"));
    }
    Ok(url)
}
