//! Shared-access-signature provisioning for the intermediate staging
//! container.
//!
//! Each cluster user gets one deterministic container in the staging
//! account. [`SasPolicyCache`] keeps a per-container set of rotating,
//! time-bounded access policies and issues SAS tokens against them
//! without serializing all callers behind storage round trips:
//!
//! - container-level tokens ride on cached named policies that rotate
//!   pre-emptively (on staleness, before the old generation expires);
//! - blob-level tokens are always freshly minted and never cached.
//!
//! The storage service itself sits behind the [`BlobClient`] trait;
//! [`MemoryBlobClient`] is the bundled in-memory implementation.

mod cache;
mod client;
mod error;
mod naming;
mod policy;

pub use cache::{ContainerSas, SasCacheConfig, SasPolicyCache};
pub use client::{BlobClient, MemoryBlobClient};
pub use error::SasError;
pub use naming::{CONTAINER_PREFIX, container_name};
pub use policy::{AccessPolicy, SasPermissions};
