//! Container access policies and their staleness/expiry windows.

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Permission set carried by a policy or an ad-hoc grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SasPermissions {
    /// Read blob contents.
    pub read: bool,
    /// Create or overwrite blobs.
    pub write: bool,
    /// Delete blobs.
    pub delete: bool,
    /// List blobs in the container.
    pub list: bool,
}

impl SasPermissions {
    /// Read-only access.
    pub const READ: Self = Self {
        read: true,
        write: false,
        delete: false,
        list: false,
    };

    /// Full read/write/delete/list access, used for staging containers.
    pub const ALL: Self = Self {
        read: true,
        write: true,
        delete: true,
        list: true,
    };

    /// Whether this set grants everything `other` asks for.
    pub fn covers(&self, other: &Self) -> bool {
        (self.read || !other.read)
            && (self.write || !other.write)
            && (self.delete || !other.delete)
            && (self.list || !other.list)
    }
}

impl fmt::Display for SasPermissions {
    /// Provider-style permission string, e.g. `rwdl`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.read {
            f.write_str("r")?;
        }
        if self.write {
            f.write_str("w")?;
        }
        if self.delete {
            f.write_str("d")?;
        }
        if self.list {
            f.write_str("l")?;
        }
        Ok(())
    }
}

/// A named, time-bounded access grant scoped to one container.
///
/// Invariant: `expiry > start`. A policy is *stale* once less than one
/// rotation interval of validity remains, and *expired* once past its
/// expiry. Staleness triggers rotation pre-emptively; only expiry permits
/// eviction, so SAS tokens issued just before a rotation stay valid
/// through their own lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    /// Rights granted by the policy.
    pub permissions: SasPermissions,
    /// When the grant becomes valid.
    pub start: SystemTime,
    /// When the grant stops working.
    pub expiry: SystemTime,
}

impl AccessPolicy {
    /// Create a policy valid from `start` for `validity`.
    pub fn new(permissions: SasPermissions, start: SystemTime, validity: Duration) -> Self {
        Self {
            permissions,
            start,
            expiry: start + validity,
        }
    }

    /// Whether the policy is past its expiry.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expiry
    }

    /// Whether less than one `rotation` interval of validity remains.
    pub fn is_stale(&self, now: SystemTime, rotation: Duration) -> bool {
        match self.expiry.duration_since(now) {
            Ok(remaining) => remaining < rotation,
            Err(_) => true,
        }
    }
}
