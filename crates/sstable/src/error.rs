use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the table layer.
///
/// The taxonomy is deliberate:
/// - [`Corruption`](Error::Corruption) means persisted data failed
///   validation. It is always surfaced and never silently repaired.
/// - [`Io`](Error::Io) wraps an operating-system failure as-is; retrying is
///   the caller's business.
/// - [`Config`](Error::Config) is reported at configuration time, before any
///   file is written.
/// - [`State`](Error::State) is a programmer-contract violation (writer used
///   after `finish`, table used after its final release).
#[derive(Debug, Error)]
pub enum Error {
    #[error("corruption: {0}")]
    Corruption(String),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid state: {0}")]
    State(&'static str),
}

impl Error {
    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }
}

// Coalesced cache loads hand one failure to every waiting thread. `io::Error`
// is not `Clone`, so the copy keeps the kind and renders the rest to text.
impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::Corruption(msg) => Error::Corruption(msg.clone()),
            Error::Io(err) => Error::Io(io::Error::new(err.kind(), err.to_string())),
            Error::Config(msg) => Error::Config(msg.clone()),
            Error::State(msg) => Error::State(msg),
        }
    }
}

impl Error {
    /// Returns `true` for data-integrity failures.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }
}
