//! Error types for network operations.

use skiff_types::{FaultKind, FaultRecord};

/// Errors that can occur on channels and in the pool.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The logical node could not be resolved to a physical endpoint.
    #[error("endpoint not found for {0}")]
    EndpointNotFound(String),

    /// Establishing a transport connection failed.
    #[error("connect error: {0}")]
    Connect(String),

    /// The channel was closed before or during the call.
    #[error("channel closed")]
    ChannelClosed,

    /// A read or write on an established channel failed.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding a wire message failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The peer answered with something the protocol does not allow here.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// An inbound frame exceeded the size limit.
    #[error("message too large: {len} bytes (max {max})")]
    MessageTooLarge {
        /// Declared frame length.
        len: usize,
        /// The enforced maximum.
        max: usize,
    },

    /// The pool is shutting down and no longer hands out connections.
    #[error("connection pool shut down")]
    PoolShutDown,
}

impl NetError {
    /// Translate to the user-visible fault taxonomy.
    ///
    /// Resolution misses surface as `EndpointNotFound`; every other
    /// transport failure is a `CommunicationFailure`. Raw transport error
    /// text is preserved as the inner cause only.
    pub fn to_fault(&self) -> FaultRecord {
        let kind = match self {
            Self::EndpointNotFound(_) => FaultKind::EndpointNotFound,
            _ => FaultKind::CommunicationFailure,
        };
        FaultRecord {
            kind,
            message: match kind {
                FaultKind::EndpointNotFound => "target node could not be resolved".to_owned(),
                _ => "communication with the target node failed".to_owned(),
            },
            cause: Some(self.to_string()),
        }
    }
}
