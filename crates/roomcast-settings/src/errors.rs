//! Settings errors.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The file or the merged result is not valid settings JSON.
    #[error("malformed settings: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A value the gateway cannot run with.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending key, in its JSON spelling.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Settings result.
pub type Result<T> = std::result::Result<T, SettingsError>;
