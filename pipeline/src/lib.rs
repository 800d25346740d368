//! Orchestration of the certificate generation pipeline.
//!
//! Every stage follows the same shape: check the artifacts it consumes,
//! rotate the artifact it is about to overwrite, invoke the external tool
//! through the runner, then fix up permissions and the scope's
//! `latest.txt`. The orchestrator keeps no state between process runs;
//! everything is re-derived from the filesystem.

use std::env;
use std::path::{Path, PathBuf};

use runner::{Invocation, RunHooks, RunOutput};
use tracing::{debug, info};
use utilities::{rotate_file, RotateDepth};

pub mod ca;
pub mod classify;
pub mod context;
mod errors;
pub mod latest;
pub mod package;
pub mod request_cnf;
pub mod server;

pub use classify::{classify_signer_stderr, Diagnostic};
pub use context::PipelineContext;
pub use errors::{Error, Step};

/// Rotate an artifact that is about to be overwritten.
///
/// A missing artifact means there is nothing to back up; an index-1
/// backup already identical to the artifact is left alone. Both cases
/// return `Ok(None)`.
pub fn backup_artifact(path: &Path, depth: RotateDepth) -> Result<Option<PathBuf>, Error> {
    if !path.exists() {
        return Ok(None);
    }
    let rotated = rotate_file(path, depth)?;
    if let Some(backup) = &rotated {
        info!("rotated {} -> {}", path.display(), backup.display());
    }
    Ok(rotated)
}

/// Fail fast when an artifact a step consumes is not on disk.
pub(crate) fn dependency_check(path: &Path) -> Result<(), Error> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::MissingDependency(path.to_path_buf()))
    }
}

/// Invoke the configured signer from inside the scratch directory.
pub(crate) fn run_signer(
    ctx: &PipelineContext,
    step: Step,
    args: Vec<String>,
) -> Result<RunOutput, Error> {
    let signer = path_arg(&ctx.config().signer);
    run_external(step, &signer, args, ctx.scratch_dir()?)
}

/// Invoke an external tool and classify a non-zero exit.
pub(crate) fn run_external(
    step: Step,
    program: &str,
    args: Vec<String>,
    cwd: &Path,
) -> Result<RunOutput, Error> {
    debug!(%step, program, "invoking external tool");
    let invocation = Invocation::exec(program, args);
    let output = runner::run(&invocation, Some(cwd), RunHooks::none())?;
    if output.success() {
        return Ok(output);
    }
    let stdout = output.stdout_text().into_owned();
    let stderr = output.stderr_text().into_owned();
    Err(Error::ExternalTool {
        step,
        status: output.status,
        diagnostic: classify_signer_stderr(&stderr),
        stdout,
        stderr,
    })
}

/// Absolute form of a path, resolved against the current directory.
///
/// External tools run from the scratch directory, so every path handed
/// to them must survive the directory change.
pub(crate) fn absolute(path: &Path) -> Result<PathBuf, Error> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = env::current_dir().map_err(Error::io_at(path))?;
    Ok(cwd.join(path))
}

pub(crate) fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Absolute path rendered as a command-line argument.
pub(crate) fn abs_arg(path: &Path) -> Result<String, Error> {
    Ok(path_arg(&absolute(path)?))
}
