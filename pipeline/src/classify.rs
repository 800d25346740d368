//! Best-effort recognition of known external-signer failure signatures.
//!
//! The substrings below track the signer's message format and are kept in
//! one place so they are easy to adjust when that format drifts. A miss
//! here is never an error; the caller falls back to the raw streams.

use std::fmt;

/// A recognized failure cause distilled from the signer's stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    /// The signer could not decrypt the CA private key, which in this
    /// tool's usage means the supplied CA password was wrong.
    CaPasswordMismatch,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::CaPasswordMismatch => {
                f.write_str("the CA private key could not be decrypted; was the CA password mistyped?")
            }
        }
    }
}

/// Classify the stderr text of a failed signer invocation.
pub fn classify_signer_stderr(stderr: &str) -> Option<Diagnostic> {
    if stderr.contains("unable to load CA private key") && stderr.contains("bad decrypt") {
        return Some(Diagnostic::CaPasswordMismatch);
    }
    None
}
