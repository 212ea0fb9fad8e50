//! Error types for DNS lookups.

use std::io;

use horizon_wire_io::NetworkError;

/// Errors reported synchronously when a lookup is submitted.
///
/// Anything that goes wrong after submission is delivered through the
/// request's callback as a [`ResolveStatus`](crate::ResolveStatus) instead.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The hostname exceeds 253 bytes.
    #[error("hostname is {len} bytes long, the limit is 253")]
    HostnameTooLong {
        /// Length of the rejected name in bytes.
        len: usize,
    },

    /// The hostname cannot be encoded as a DNS name.
    #[error("invalid hostname: {0}")]
    InvalidHostname(String),

    /// This handle already has an outstanding lookup.
    #[error("a lookup is already in progress on this handle")]
    AlreadyInProgress,

    /// All 65536 transaction ids are in use.
    #[error("too many outstanding lookups")]
    TooManyRequests,

    /// The worker's socket or wait set could not be created.
    #[error("resolver I/O setup failed: {0}")]
    Io(#[from] NetworkError),

    /// The worker thread could not be started.
    #[error("failed to spawn the resolver thread: {0}")]
    Spawn(#[source] io::Error),
}

/// A specialized Result type for lookup submission.
pub type Result<T> = std::result::Result<T, ResolveError>;

/// Errors raised while encoding a query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// The name is empty.
    #[error("empty name")]
    EmptyName,

    /// The name is longer than 253 bytes.
    #[error("name is {0} bytes long")]
    NameTooLong(usize),

    /// A label between dots is empty.
    #[error("empty label")]
    EmptyLabel,

    /// A label exceeds 63 bytes.
    #[error("label `{0}` exceeds 63 bytes")]
    LabelTooLong(String),
}

impl From<MessageError> for ResolveError {
    fn from(err: MessageError) -> Self {
        match err {
            MessageError::NameTooLong(len) => Self::HostnameTooLong { len },
            other => Self::InvalidHostname(other.to_string()),
        }
    }
}
