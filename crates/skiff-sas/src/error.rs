//! Error types and the storage error-code taxonomy mapping.

use skiff_types::{FaultKind, FaultRecord};

/// Errors from the SAS cache and blob client.
#[derive(Debug, thiserror::Error)]
pub enum SasError {
    /// The storage provider rejected an operation. `code` is the
    /// provider's error-code string, which drives fault classification.
    #[error("storage error {code}: {message}")]
    Storage {
        /// Provider error code, e.g. `AuthenticationFailed`.
        code: String,
        /// Provider error description.
        message: String,
    },

    /// A SAS was requested against a policy the container does not hold.
    #[error("container {container} has no policy {policy}")]
    UnknownPolicy {
        /// Container name.
        container: String,
        /// Requested policy name.
        policy: String,
    },

    /// A SAS was requested for a container that does not exist.
    #[error("container {0} not found")]
    ContainerNotFound(String),
}

impl SasError {
    /// Shorthand for a storage-provider error.
    pub fn storage(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Translate to the user-visible fault taxonomy.
    ///
    /// Classification inspects the provider's error-code *string*, not the
    /// error type: transport-level codes and throttling map to
    /// `CommunicationFailure`, credential problems to
    /// `BlobStorageMisconfigured`, anything unrecognized to
    /// `InternalServerError`.
    pub fn to_fault(&self) -> FaultRecord {
        let kind = match self {
            Self::Storage { code, .. } => classify_storage_code(code),
            Self::UnknownPolicy { .. } | Self::ContainerNotFound(_) => {
                FaultKind::InternalServerError
            }
        };
        FaultRecord {
            kind,
            message: "intermediate blob storage operation failed".to_owned(),
            cause: Some(self.to_string()),
        }
    }
}

/// Map a storage-provider error-code string to a fault kind.
pub fn classify_storage_code(code: &str) -> FaultKind {
    match code {
        "BadGateway" | "BadRequest" => FaultKind::CommunicationFailure,
        "AuthenticationFailed" | "AuthorizationFailure" => FaultKind::BlobStorageMisconfigured,
        "OperationTimedOut" | "ServerBusy" => FaultKind::CommunicationFailure,
        _ => FaultKind::InternalServerError,
    }
}
