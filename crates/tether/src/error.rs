//! Error taxonomy for sandboxed operations.
//!
//! Every failure a tool can hit is a [`ToolError`] variant. Conditions that
//! are already satisfied (a file that already exists, a directory that is
//! already gone) are not errors: they come back as
//! [`Outcome::Advisory`](crate::tools::fs::Outcome::Advisory).

use std::path::PathBuf;

use thiserror::Error;

/// A failure surfaced to the orchestrator. Nothing here is retried.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The requested path resolves outside the sandbox root.
    #[error("path '{path}' escapes the sandbox root '{}'", root.display())]
    PathEscape { path: String, root: PathBuf },

    /// Filesystem failure (permissions, disk, non-empty directory, ...).
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The search pattern is not a valid regular expression.
    #[error("invalid search pattern: {0}")]
    Regex(#[from] regex::Error),

    /// The subprocess could not be started.
    #[error("failed to launch '{command}': {source}")]
    ProcessLaunch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The subprocess started but its output stream (or exit status) failed.
    /// `transcript` holds every line captured before the failure.
    #[error("I/O failure while running '{command}' after {} line(s): {source}", transcript.len())]
    ProcessIo {
        command: String,
        #[source]
        source: std::io::Error,
        transcript: Vec<String>,
    },
}

impl ToolError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ToolError::Io {
            path: path.into(),
            source,
        }
    }

    /// Partial transcript captured before a subprocess failure, if any.
    pub fn partial_transcript(&self) -> Option<&[String]> {
        match self {
            ToolError::ProcessIo { transcript, .. } => Some(transcript),
            _ => None,
        }
    }
}
