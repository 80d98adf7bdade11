//! Error type shared by the store, the ledger, and the processors built on them.

use crate::alignment::ReferenceLocation;

use thiserror::Error;

//-----------------------------------------------------------------------------

/// Errors reported by alignment stores and the components reading them.
///
/// None of these are recovered from internally.
/// A query found to be ambiguous is not an error; see [`crate::TooManyHitsReader`].
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying file operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A file is corrupt, truncated, or inconsistent with the other inputs.
    #[error("Format error: {0}")]
    Format(String),

    /// A sorted store or sorted merge input produced a decreasing key.
    #[error("Ordering violation: {next} follows {previous}")]
    Ordering {
        previous: ReferenceLocation,
        next: ReferenceLocation,
    },

    /// Declared sizes do not cover the data that refers to them.
    #[error("Capacity error: {0}")]
    Capacity(String),

    /// A forward-only seek was asked to move backward.
    #[error("Cannot skip to {requested}: reader is already at {current}")]
    SeekMisuse {
        requested: ReferenceLocation,
        current: ReferenceLocation,
    },

    /// The request is understood but not supported by this implementation.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl StoreError {
    pub(crate) fn format<T: Into<String>>(message: T) -> Self {
        StoreError::Format(message.into())
    }

    pub(crate) fn capacity<T: Into<String>>(message: T) -> Self {
        StoreError::Capacity(message.into())
    }
}

impl From<StoreError> for String {
    fn from(error: StoreError) -> Self {
        error.to_string()
    }
}

//-----------------------------------------------------------------------------
