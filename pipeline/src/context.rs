use std::path::Path;

use models::{CertConfig, ConfigError};
use once_cell::sync::OnceCell;
use tempfile::TempDir;
use utilities::RotateDepth;

use crate::errors::Error;

/// Everything one pipeline run needs, passed explicitly into every step.
///
/// The scratch directory is created on first use and removed when the
/// context is dropped; external tools run from inside it so their litter
/// never lands in the caller's working directory.
pub struct PipelineContext {
    config: CertConfig,
    password: Option<String>,
    depth: RotateDepth,
    scratch: OnceCell<TempDir>,
}

impl PipelineContext {
    /// Validate the configuration and build a run context around it.
    pub fn new(config: CertConfig, password: Option<String>) -> Result<Self, ConfigError> {
        config.validate()?;
        let depth = RotateDepth::from_raw(config.rotation_depth)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(Self {
            config,
            password,
            depth,
            scratch: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &CertConfig {
        &self.config
    }

    pub fn depth(&self) -> RotateDepth {
        self.depth
    }

    /// The CA password, required by the key-encrypting and signing steps.
    pub fn require_password(&self) -> Result<&str, Error> {
        match self.password.as_deref() {
            Some(pw) if !pw.is_empty() => Ok(pw),
            _ => Err(Error::InvalidArgument(
                "a CA password must be supplied".to_string(),
            )),
        }
    }

    /// Per-run scratch directory, created lazily.
    pub fn scratch_dir(&self) -> Result<&Path, Error> {
        let dir = self.scratch.get_or_try_init(|| {
            tempfile::Builder::new()
                .prefix("fleetcert-")
                .tempdir()
                .map_err(Error::io_at(Path::new("scratch directory")))
        })?;
        Ok(dir.path())
    }
}
