//! Shared types and identifiers for Skiff.
//!
//! This crate defines the types used across the Skiff workspace:
//! destination names ([`LogicalNode`]), caller identity ([`UserIdentity`],
//! [`RouteHeaders`]), the user-visible fault taxonomy ([`FaultKind`],
//! [`FaultRecord`]), and file-enumeration rows ([`FileEntry`]).

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Destination and identity
// ---------------------------------------------------------------------------

/// An opaque name identifying a destination: a compute node or a cloud proxy.
///
/// The mapping to a physical endpoint is resolved externally and can change
/// over time (a node's location may flip between on-premise and cloud), so
/// resolutions are never cached alongside the name.
#[derive(Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct LogicalNode(String);

impl LogicalNode {
    /// Create a logical node name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The raw name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LogicalNode {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

impl fmt::Display for LogicalNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for LogicalNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogicalNode({})", self.0)
    }
}

/// A resolved caller identity, attached to forwarded requests by the proxy
/// so workers never re-authenticate the original caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Account name, e.g. `DOMAIN\alice`.
    pub name: String,
    /// Whether the caller holds cluster administrator rights.
    pub is_admin: bool,
}

impl UserIdentity {
    /// Create an identity.
    pub fn new(name: impl Into<String>, is_admin: bool) -> Self {
        Self {
            name: name.into(),
            is_admin,
        }
    }
}

/// Out-of-band metadata carried on every file operation, independent of the
/// operation payload. The router inspects these without deserializing the
/// operation body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteHeaders {
    /// The node the operation is addressed to.
    pub target: LogicalNode,
    /// Caller account name. Overwritten by the proxy with the
    /// authenticated identity before forwarding.
    pub user: String,
    /// Admin flag resolved by the proxy.
    pub is_admin: bool,
}

impl RouteHeaders {
    /// Headers for an unauthenticated client request.
    pub fn addressed_to(target: LogicalNode, user: impl Into<String>) -> Self {
        Self {
            target,
            user: user.into(),
            is_admin: false,
        }
    }

    /// Replace the identity fields with an authenticated identity.
    pub fn with_identity(mut self, identity: &UserIdentity) -> Self {
        self.user = identity.name.clone();
        self.is_admin = identity.is_admin;
        self
    }
}

/// Rights requested for a file-permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessRights {
    /// Read file contents or enumerate a directory.
    Read,
    /// Create or overwrite a file.
    Write,
    /// Remove a file or directory.
    Delete,
}

// ---------------------------------------------------------------------------
// Fault taxonomy
// ---------------------------------------------------------------------------

/// The closed set of user-visible error kinds.
///
/// Every underlying failure (I/O, permission, transport, storage) is
/// translated to one of these at the operation boundary. No operation
/// surfaces an undocumented kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// The caller could not be authenticated.
    AuthenticationFailed,
    /// The caller is authenticated but lacks permission on the target path.
    NotAuthorized,
    /// The target node could not be resolved to a physical endpoint.
    EndpointNotFound,
    /// The operation exceeded its transport-level timeout.
    RequestTimedOut,
    /// A transport or storage round trip failed.
    CommunicationFailure,
    /// A filesystem operation on the target node failed.
    TargetIoFailure,
    /// The target file already exists and overwrite was not requested.
    TargetExists,
    /// The intermediate blob storage account rejected our credentials.
    BlobStorageMisconfigured,
    /// An unexpected internal failure.
    InternalServerError,
    /// A failure that could not be classified.
    UnknownFault,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AuthenticationFailed => "AuthenticationFailed",
            Self::NotAuthorized => "NotAuthorized",
            Self::EndpointNotFound => "EndpointNotFound",
            Self::RequestTimedOut => "RequestTimedOut",
            Self::CommunicationFailure => "CommunicationFailure",
            Self::TargetIoFailure => "TargetIoFailure",
            Self::TargetExists => "TargetExists",
            Self::BlobStorageMisconfigured => "BlobStorageMisconfigured",
            Self::InternalServerError => "InternalServerError",
            Self::UnknownFault => "UnknownFault",
        };
        f.write_str(s)
    }
}

/// A fault carried back to the caller in place of the raw underlying error.
///
/// Never mutated after construction. `cause` preserves the original error
/// text for diagnostics; callers must not parse it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FaultRecord {
    /// Taxonomy kind.
    pub kind: FaultKind,
    /// Human-readable description.
    pub message: String,
    /// Summary of the underlying cause, informational only.
    pub cause: Option<String>,
}

impl FaultRecord {
    /// Create a fault with no inner cause.
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Create a fault preserving the underlying error's text.
    pub fn with_cause(
        kind: FaultKind,
        message: impl Into<String>,
        cause: &dyn std::error::Error,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: Some(cause.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Enumeration rows
// ---------------------------------------------------------------------------

/// One row of a `GetFiles`/`GetDirectories` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Entry name relative to the enumerated directory.
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Last modification time, if the filesystem reports one.
    pub modified: Option<SystemTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_node_display_and_eq() {
        let a = LogicalNode::new("NODE-07");
        let b = LogicalNode::from("NODE-07");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "NODE-07");
    }

    #[test]
    fn test_headers_identity_overwrite() {
        let headers = RouteHeaders::addressed_to(LogicalNode::new("n1"), "claimed-user");
        let identity = UserIdentity::new("DOMAIN\\alice", true);
        let headers = headers.with_identity(&identity);

        assert_eq!(headers.user, "DOMAIN\\alice");
        assert!(headers.is_admin);
        assert_eq!(headers.target, LogicalNode::new("n1"));
    }

    #[test]
    fn test_fault_record_display() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let fault = FaultRecord::with_cause(FaultKind::TargetIoFailure, "cannot open log", &io);

        assert_eq!(fault.to_string(), "TargetIoFailure: cannot open log");
        assert_eq!(fault.cause.as_deref(), Some("denied"));
    }
}
