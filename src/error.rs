use std::sync::Arc;

/// Represents a result type for operations in this crate.
///
/// Evaluation itself never fails (it always produces an
/// [`EvaluationResult`](crate::eval::EvaluationResult)); `Result` is used by synchronization,
/// initialization and the pluggable collaborators.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type returned by pluggable collaborators (data adapter, persistent storage, country
/// lookup). Boxed so that implementations can surface their own error types.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Enum representing possible errors that can occur while synchronizing or initializing.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The request was unauthorized, possibly due to an invalid server secret.
    #[error("unauthorized, server secret is likely invalid")]
    Unauthorized,

    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// Specs payload could not be parsed. The whole update is discarded.
    #[error("malformed specs payload")]
    MalformedSpecs(#[source] Arc<serde_json::Error>),

    /// ID list lookup table could not be parsed.
    #[error("malformed ID list lookup")]
    MalformedIdListLookup(#[source] Arc<serde_json::Error>),

    /// A byte-range response for an ID list did not start with a diff line. The list is dropped
    /// and rebuilt from scratch on the next cycle.
    #[error("ID list {name:?} is out of sync")]
    IdListDesync {
        /// Name of the list that got dropped.
        name: String,
    },

    /// Data adapter failed to read or write.
    #[error("data adapter error: {0}")]
    DataAdapter(String),

    /// Persistent assignment storage failed to load, save or delete.
    #[error("persistent storage error: {0}")]
    PersistentStorage(String),

    /// Indicates that the sync thread panicked. This should normally never happen.
    #[error("sync thread panicked")]
    SyncThreadPanicked,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl Error {
    /// Return `true` if retrying cannot possibly succeed, so background synchronization should
    /// stop.
    pub(crate) fn is_unrecoverable(&self) -> bool {
        matches!(self, Error::Unauthorized | Error::InvalidBaseUrl(_))
    }
}
