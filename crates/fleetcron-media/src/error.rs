//! Media tool errors.

use std::path::PathBuf;
use thiserror::Error;

pub type MediaResult<T> = Result<T, MediaError>;

/// Failures of the external media tools.
///
/// Everything except [`MediaError::ToolMissing`] is tied to one input file;
/// a missing tool affects every file on the node.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} is not installed or not on PATH")]
    ToolMissing(&'static str),

    #[error("{tool} exited with status {status:?}")]
    ToolFailed {
        tool: &'static str,
        status: Option<i32>,
        stderr: String,
    },

    #[error("{tool} was killed after {secs}s")]
    Timeout { tool: &'static str, secs: u64 },

    #[error("no output written to {0}")]
    MissingOutput(PathBuf),

    #[error("input does not exist: {0}")]
    NoSuchInput(PathBuf),

    #[error("not a usable video: {0}")]
    NotAVideo(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("unreadable probe output: {0}")]
    Json(#[from] serde_json::Error),
}

impl MediaError {
    pub fn is_tool_missing(&self) -> bool {
        matches!(self, MediaError::ToolMissing(_))
    }

    /// Tail of the tool's stderr, when the tool ran and failed.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            MediaError::ToolFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}
