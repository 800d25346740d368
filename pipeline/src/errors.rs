use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use utilities::RotateError;

use crate::classify::Diagnostic;

/// The generation stages the orchestrator can run.
///
/// CA stages operate on the build directory; server stages operate on the
/// per-hostname subdirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    CaKey,
    CaCert,
    CaPackage,
    ServerKey,
    ServerCertReq,
    ServerCert,
    ServerPackage,
}

impl Step {
    /// Process exit code reported when this step fails against the
    /// external tool.
    pub fn exit_code(self) -> i32 {
        match self {
            Step::CaKey => 10,
            Step::CaCert => 11,
            Step::CaPackage => 12,
            Step::ServerKey => 20,
            Step::ServerCertReq => 21,
            Step::ServerCert => 22,
            Step::ServerPackage => 23,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::CaKey => "CA private key generation",
            Step::CaCert => "CA public certificate generation",
            Step::CaPackage => "CA certificate package generation",
            Step::ServerKey => "server private key generation",
            Step::ServerCertReq => "server certificate request generation",
            Step::ServerCert => "server certificate signing",
            Step::ServerPackage => "server key set package generation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("filesystem operation failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Rotate(#[from] RotateError),

    #[error(transparent)]
    Runner(#[from] runner::RunnerError),

    /// A consumed artifact was absent; nothing was written.
    #[error("missing artifact dependency: {0} (run the step that produces it first)")]
    MissingDependency(PathBuf),

    /// An artifact would be overwritten without the force flag.
    #[error("refusing to overwrite existing {path}; pass --force to regenerate")]
    RefusingOverwrite { path: PathBuf },

    /// The external tool exited non-zero. `diagnostic` is set when the
    /// stderr text matched a known failure signature.
    #[error("{step} failed (external tool exited {status}){}{}", diagnostic.as_ref().map(|d| format!(": {d}")).unwrap_or_default(), render_streams(stdout, stderr))]
    ExternalTool {
        step: Step,
        status: i32,
        diagnostic: Option<Diagnostic>,
        stdout: String,
        stderr: String,
    },

    /// The external tool exited zero but the artifact it was asked to
    /// produce never appeared.
    #[error("{step} reported success but {path} was not created")]
    MissingArtifact { step: Step, path: PathBuf },
}

impl Error {
    /// Exit code this failure maps to; errors not tied to a step fall
    /// back to the general code 1 (configuration errors are mapped by
    /// the caller before the pipeline is entered).
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ExternalTool { step, .. } | Error::MissingArtifact { step, .. } => {
                step.exit_code()
            }
            Error::MissingDependency(_) => 33,
            Error::InvalidArgument(_) | Error::Rotate(RotateError::InvalidArgument(_)) => 32,
            _ => 1,
        }
    }

    pub(crate) fn io_at(path: &std::path::Path) -> impl FnOnce(io::Error) -> Error + '_ {
        move |source| Error::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn render_streams(stdout: &str, stderr: &str) -> String {
    let mut out = String::new();
    if !stdout.trim().is_empty() {
        out.push_str("\nstdout:\n");
        out.push_str(stdout.trim_end());
    }
    if !stderr.trim().is_empty() {
        out.push_str("\nstderr:\n");
        out.push_str(stderr.trim_end());
    }
    out
}
