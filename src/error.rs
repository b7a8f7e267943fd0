//! Error types for the counter storage core.

use thiserror::Error;

/// Result type alias for counter operations.
pub type Result<T> = std::result::Result<T, CounterError>;

/// Errors that can occur while writing or reading a persisted counter.
///
/// A missing successor is not an error: lookups report it as `None`,
/// an empty list or zero counts.
#[derive(Error, Debug)]
pub enum CounterError {
    /// The counter file could not be created, opened or read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A record does not match the on-disk layout.
    #[error("malformed record at offset {offset}: {reason}")]
    Format { offset: u64, reason: String },

    /// Configuration could not be loaded or stored.
    #[error("config error: {0}")]
    Config(#[from] confy::ConfyError),
}

impl CounterError {
    pub(crate) fn format(offset: u64, reason: impl Into<String>) -> Self {
        Self::Format {
            offset,
            reason: reason.into(),
        }
    }
}
