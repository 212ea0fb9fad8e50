//! Error types for readiness multiplexing and sockets.

use std::io;

/// Errors raised by wait sets and sockets.
///
/// "Would block" and "interrupted" conditions are never reported through this
/// type; non-blocking operations report them as zero bytes transferred.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// A native call failed.
    #[error("{operation} failed: {source}")]
    Os {
        /// The native operation that failed (for example `"connect"`).
        operation: &'static str,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The operation was attempted on a socket that is not open.
    #[error("operation on an invalid socket")]
    InvalidSocket,

    /// The wait set has no free registration slots.
    #[error("wait set is full (capacity {capacity})")]
    WaitSetFull {
        /// Capacity the wait set was created with.
        capacity: usize,
    },

    /// The requested capacity exceeds what the native facility supports.
    #[error("wait set capacity {requested} exceeds the platform limit of {max}")]
    CapacityUnsupported {
        /// Requested capacity.
        requested: usize,
        /// Largest capacity the platform supports.
        max: usize,
    },

    /// The waitable already belongs to a wait set.
    #[error("waitable is already registered with a wait set")]
    AlreadyRegistered,

    /// The waitable is not registered with this wait set.
    #[error("waitable is not registered with this wait set")]
    NotRegistered,

    /// The address cannot be used with this socket.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl NetworkError {
    /// Create an error for a failed native operation.
    pub fn os(operation: &'static str, source: io::Error) -> Self {
        Self::Os { operation, source }
    }

    /// The raw OS error code, when this error came from a native call.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Self::Os { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// A specialized Result type for readiness and socket operations.
pub type Result<T> = std::result::Result<T, NetworkError>;
