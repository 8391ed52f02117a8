//! Error types shared by the whole crate.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors. Per-molecule and per-library rejections are not errors;
/// they are counted by the component that rejects them.
#[derive(Debug, Error)]
pub enum Error {
    /// A parameter file violates the tabular schema or a typed loader's
    /// expectations.
    #[error("parameter error in '{file}': {reason}")]
    Parameter {
        /// File that failed to load.
        file: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// The loaded tables are mutually inconsistent (dangling FG index,
    /// headpiece without a matching BBT, non-null first row, ...).
    #[error("inconsistent catalogue: {0}")]
    Catalogue(String),

    /// The external cheminformatics toolkit is missing or unusable.
    #[error("external toolkit: {0}")]
    ExternalTool(String),

    /// A record stream contains a torn or oversized frame.
    #[error("corrupt record stream: {0}")]
    Stream(String),

    /// A record failed to encode or decode.
    #[error(transparent)]
    Serialize(#[from] bincode::Error),

    /// An underlying IO operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a [`Error::Parameter`] with a formatted reason.
    pub fn parameter(file: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Parameter {
            file: file.into(),
            reason: reason.into(),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
