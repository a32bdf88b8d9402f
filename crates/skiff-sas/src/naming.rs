//! Deterministic per-user container naming.

use std::fmt::Write as _;

use md5::{Digest, Md5};

/// Prefix for all staging containers.
pub const CONTAINER_PREFIX: &str = "hpcfilestaging-";

/// Derive the staging container name for a user.
///
/// The name is `hpcfilestaging-<hex-md5("{cluster}/{deployment}/{user}")>`:
/// stable across processes, collision-resistant, within the storage
/// provider's 63-character container-name limit, and free of the raw
/// identifiers (user names may contain characters containers cannot).
pub fn container_name(cluster: &str, deployment: &str, user: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(cluster.as_bytes());
    hasher.update(b"/");
    hasher.update(deployment.as_bytes());
    hasher.update(b"/");
    hasher.update(user.as_bytes());
    let digest = hasher.finalize();

    let mut name = String::with_capacity(CONTAINER_PREFIX.len() + 32);
    name.push_str(CONTAINER_PREFIX);
    for byte in digest {
        let _ = write!(name, "{byte:02x}");
    }
    name
}
