//! CLI command implementations.

pub mod dump;
pub mod inspect;
pub mod verify;

use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by the commands themselves.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The log failed verification.
    #[error("verification failed: {0}")]
    VerifyFailed(raftwal_core::WalError),

    /// The directory holds no segment files.
    #[error("no log found at {}", .0.display())]
    NoLog(PathBuf),

    /// Unsupported `--format` value.
    #[error("unknown output format {0:?} (expected text or json)")]
    UnknownFormat(String),
}

/// Output format shared by the commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl Format {
    /// Parses a `--format` value.
    pub fn parse(value: &str) -> Result<Self, CommandError> {
        match value {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(CommandError::UnknownFormat(other.to_string())),
        }
    }
}
