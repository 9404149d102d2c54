//! Deployment hand-off transaction
//!
//! A `Transaction` is the ordered list of steps that turns a local `Plan`
//! into an answer file the deploy tool can consume:
//!
//! 1. `EnsureDirectories`: setup dir and engine temp dir
//! 2. `PersistConfig`: the hosted engine record, one atomic store write
//! 3. `WriteDeploymentConfig`: a fresh uniquely named answer file
//! 4. `VerifyImageSignature`: disk images only, when enabled
//!
//! Steps run in order and stop at the first failure. Earlier steps stay in
//! place; the failing step removes what it created. Nothing is retried.

use crate::config_store::{ConfigStore, HostedEngineConfig};
use crate::error::{DeployError, Result};
use crate::planner::{DeploymentRequest, Plan};
use crate::probe::FilesystemProbe;
use crate::settings::PluginSettings;
use crate::types::BootMode;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const GZIP_MAGIC: &[u8] = b"\x1f\x8b\x08";
const TAR_MAGIC: &[u8] = b"ustar";
const TAR_MAGIC_OFFSET: usize = 257;

/// Directives handed to the deploy tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentDirectives {
    pub boot: BootMode,
    /// ISO attached as CD-ROM (CD-ROM boot only)
    pub cdrom: Option<PathBuf>,
    /// OVA archive to import (disk boot only)
    pub ova_archive: Option<PathBuf>,
    pub temp_dir: PathBuf,
}

impl DeploymentDirectives {
    /// Directives for a plan whose image, if any, is already local
    pub fn for_plan(plan: &Plan, temp_dir: &Path) -> Result<Self> {
        let (cdrom, ova_archive) = match plan {
            Plan::Pxe => (None, None),
            Plan::Local { image, boot } => match boot {
                BootMode::Cdrom => (Some(image.clone()), None),
                BootMode::Disk => (None, Some(image.clone())),
                BootMode::Pxe => (None, None),
            },
            Plan::Download { url, .. } => {
                return Err(DeployError::invalid_request(format!(
                    "{} must be downloaded before deploying",
                    url
                )));
            }
        };
        Ok(Self {
            boot: plan.boot(),
            cdrom,
            ova_archive,
            temp_dir: temp_dir.to_path_buf(),
        })
    }

    /// Answer file contents in the deploy tool's `otopi` format
    pub fn render(&self) -> String {
        let mut out = String::from("[environment:default]\n");
        if let Some(cdrom) = &self.cdrom {
            out.push_str(&format!("OVEHOSTED_VM/vmCDRom=str:{}\n", cdrom.display()));
        }
        out.push_str(&format!("OVEHOSTED_VM/vmBoot=str:{}\n", self.boot));
        match &self.ova_archive {
            Some(ova) => out.push_str(&format!("OVEHOSTED_VM/ovfArchive=str:{}\n", ova.display())),
            None => out.push_str("OVEHOSTED_VM/ovfArchive=none:None\n"),
        }
        out.push_str(&format!(
            "OVEHOSTED_CORE/tempDir=str:{}\n",
            self.temp_dir.display()
        ));
        out
    }
}

/// One unit of the hand-off
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    EnsureDirectories(Vec<PathBuf>),
    PersistConfig(HostedEngineConfig),
    WriteDeploymentConfig(DeploymentDirectives),
    VerifyImageSignature(PathBuf),
}

impl Step {
    pub fn title(&self) -> &'static str {
        match self {
            Self::EnsureDirectories(_) => "Creating setup directories",
            Self::PersistConfig(_) => "Saving hosted engine configuration",
            Self::WriteDeploymentConfig(_) => "Writing deployment configuration",
            Self::VerifyImageSignature(_) => "Verifying image format",
        }
    }
}

/// Ordered, not yet committed steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    steps: Vec<Step>,
}

impl Transaction {
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Answer file produced by a committed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentConfigFile {
    path: PathBuf,
}

impl DeploymentConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file; a file that is already gone is not an error
    pub fn discard(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Builds and commits hand-off transactions
pub struct TransactionRunner {
    store: Arc<dyn ConfigStore>,
    probe: Arc<dyn FilesystemProbe>,
    setup_dir: PathBuf,
    engine_temp_dir: PathBuf,
    answer_dir: PathBuf,
    verify_signature: bool,
}

impl TransactionRunner {
    pub fn new(
        settings: &PluginSettings,
        store: Arc<dyn ConfigStore>,
        probe: Arc<dyn FilesystemProbe>,
    ) -> Self {
        Self {
            store,
            probe,
            setup_dir: settings.setup_dir.clone(),
            engine_temp_dir: settings.engine_temp_dir.clone(),
            answer_dir: settings.answer_dir(),
            verify_signature: settings.verify_image_signature,
        }
    }

    /// Lay out the steps for `plan`. Plans that still need a download are
    /// rejected.
    pub fn build(&self, plan: &Plan, request: &DeploymentRequest) -> Result<Transaction> {
        let directives = DeploymentDirectives::for_plan(plan, &self.engine_temp_dir)?;

        let force_enable = match HostedEngineConfig::retrieve(self.store.as_ref()) {
            Ok(existing) => existing.force_enable,
            Err(e) => {
                tracing::warn!("Could not read existing hosted engine config: {}", e);
                false
            }
        };
        let record = HostedEngineConfig::new(
            &request.image_source.to_string(),
            plan.boot() == BootMode::Pxe,
            force_enable,
            request.maintenance,
        )?;

        let mut steps = vec![
            Step::EnsureDirectories(vec![self.setup_dir.clone(), self.engine_temp_dir.clone()]),
            Step::PersistConfig(record),
            Step::WriteDeploymentConfig(directives),
        ];
        if self.verify_signature {
            if let Plan::Local {
                image,
                boot: BootMode::Disk,
            } = plan
            {
                steps.push(Step::VerifyImageSignature(image.clone()));
            }
        }
        Ok(Transaction { steps })
    }

    /// Run every step in order and return the answer file.
    ///
    /// On failure the failing step's artifact is removed and earlier steps
    /// are left as they are.
    pub fn commit(&self, transaction: Transaction) -> Result<DeploymentConfigFile> {
        let total = transaction.len();
        let mut config_file: Option<DeploymentConfigFile> = None;

        for (index, step) in transaction.steps.iter().enumerate() {
            tracing::info!("Step {}/{}: {}", index + 1, total, step.title());
            let result = match step {
                Step::EnsureDirectories(dirs) => self.ensure_directories(dirs),
                Step::PersistConfig(record) => record.update(self.store.as_ref()),
                Step::WriteDeploymentConfig(directives) => self
                    .write_config(directives)
                    .map(|file| config_file = Some(file)),
                Step::VerifyImageSignature(image) => {
                    let verified = verify_signature(image);
                    if verified.is_err() {
                        if let Some(file) = config_file.take() {
                            if let Err(e) = file.discard() {
                                tracing::error!(
                                    "Could not remove {}: {}",
                                    file.path().display(),
                                    e
                                );
                            }
                        }
                    }
                    verified
                }
            };

            if let Err(e) = result {
                tracing::error!("Step '{}' failed: {}", step.title(), e);
                return Err(e);
            }
        }

        config_file.ok_or_else(|| DeployError::internal("transaction produced no deployment configuration"))
    }

    fn ensure_directories(&self, dirs: &[PathBuf]) -> Result<()> {
        for dir in dirs {
            self.probe.make_dirs(dir)?;
        }
        Ok(())
    }

    /// Unique answer file in the answer directory. An unpersisted temp file
    /// removes itself when a write fails.
    fn write_config(&self, directives: &DeploymentDirectives) -> Result<DeploymentConfigFile> {
        let mut tmp = tempfile::Builder::new()
            .prefix("hosted-engine-")
            .suffix(".conf")
            .tempfile_in(&self.answer_dir)?;
        tmp.write_all(directives.render().as_bytes())?;
        tmp.as_file().sync_all()?;
        let (_, path) = tmp.keep().map_err(|e| DeployError::Io(e.error))?;
        tracing::info!("Wrote deployment configuration {}", path.display());
        Ok(DeploymentConfigFile::new(path))
    }
}

/// True when `header` starts like a gzip stream or a POSIX tar archive
pub fn has_archive_signature(header: &[u8]) -> bool {
    header.starts_with(GZIP_MAGIC)
        || header
            .get(TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len())
            .is_some_and(|magic| magic == TAR_MAGIC)
}

fn verify_signature(image: &Path) -> Result<()> {
    let mut header = Vec::with_capacity(512);
    File::open(image)?.take(512).read_to_end(&mut header)?;
    if has_archive_signature(&header) {
        Ok(())
    } else {
        Err(DeployError::unrecognized_image(format!(
            "{} is neither an ISO nor a recognized archive",
            image.display()
        )))
    }
}
