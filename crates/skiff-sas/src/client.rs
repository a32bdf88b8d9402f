//! Blob storage client abstraction.
//!
//! The cache and the router only talk to storage through [`BlobClient`],
//! so tests run against [`MemoryBlobClient`] while a deployment wires in
//! a real provider-backed implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::SasError;
use crate::policy::{AccessPolicy, SasPermissions};

type HmacSha256 = Hmac<Sha256>;

/// Operations the cache needs from a blob storage account.
#[async_trait]
pub trait BlobClient: Send + Sync {
    /// Create the container if it does not exist. Returns `true` when the
    /// call actually created it.
    async fn create_container_if_absent(&self, container: &str) -> Result<bool, SasError>;

    /// Fetch the stored access policies of a container.
    async fn get_container_policies(
        &self,
        container: &str,
    ) -> Result<BTreeMap<String, AccessPolicy>, SasError>;

    /// Replace the stored access policies of a container.
    async fn set_container_policies(
        &self,
        container: &str,
        policies: &BTreeMap<String, AccessPolicy>,
    ) -> Result<(), SasError>;

    /// Base URL of a container.
    fn container_url(&self, container: &str) -> String;

    /// Issue a SAS token bound to a stored access policy.
    async fn issue_container_sas(&self, container: &str, policy: &str)
        -> Result<String, SasError>;

    /// Issue an ad-hoc SAS token for a single blob.
    async fn issue_blob_sas(
        &self,
        container: &str,
        blob: &str,
        permissions: SasPermissions,
        start: SystemTime,
        expiry: SystemTime,
    ) -> Result<String, SasError>;
}

#[derive(Default)]
struct MemoryAccount {
    containers: HashMap<String, BTreeMap<String, AccessPolicy>>,
}

/// In-memory [`BlobClient`] signing tokens with HMAC-SHA256.
///
/// Counts storage round-trips so tests can assert how often the cache
/// actually hits the account.
pub struct MemoryBlobClient {
    key: Vec<u8>,
    account: Mutex<MemoryAccount>,
    get_calls: AtomicU32,
    set_calls: AtomicU32,
    blob_sas_calls: AtomicU32,
}

impl MemoryBlobClient {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            account: Mutex::new(MemoryAccount::default()),
            get_calls: AtomicU32::new(0),
            set_calls: AtomicU32::new(0),
            blob_sas_calls: AtomicU32::new(0),
        }
    }

    /// Pre-create a container with the given policies, bypassing counters.
    pub fn seed_container(&self, container: &str, policies: BTreeMap<String, AccessPolicy>) {
        let mut account = self.account.lock().unwrap();
        account.containers.insert(container.to_string(), policies);
    }

    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> u32 {
        self.set_calls.load(Ordering::SeqCst)
    }

    pub fn blob_sas_calls(&self) -> u32 {
        self.blob_sas_calls.load(Ordering::SeqCst)
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(payload.as_bytes());
        let digest = mac.finalize().into_bytes();
        let mut token = String::with_capacity(digest.len() * 2);
        for byte in digest {
            use std::fmt::Write;
            let _ = write!(token, "{byte:02x}");
        }
        token
    }

    /// Verify a token previously issued by [`sign`](Self::sign). Constant
    /// time over the token bytes.
    pub fn verify(&self, payload: &str, token: &str) -> bool {
        use subtle::ConstantTimeEq;
        let expected = self.sign(payload);
        expected.as_bytes().ct_eq(token.as_bytes()).into()
    }
}

#[async_trait]
impl BlobClient for MemoryBlobClient {
    async fn create_container_if_absent(&self, container: &str) -> Result<bool, SasError> {
        let mut account = self.account.lock().unwrap();
        if account.containers.contains_key(container) {
            return Ok(false);
        }
        account
            .containers
            .insert(container.to_string(), BTreeMap::new());
        Ok(true)
    }

    async fn get_container_policies(
        &self,
        container: &str,
    ) -> Result<BTreeMap<String, AccessPolicy>, SasError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let account = self.account.lock().unwrap();
        account
            .containers
            .get(container)
            .cloned()
            .ok_or_else(|| SasError::ContainerNotFound(container.to_string()))
    }

    async fn set_container_policies(
        &self,
        container: &str,
        policies: &BTreeMap<String, AccessPolicy>,
    ) -> Result<(), SasError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        let mut account = self.account.lock().unwrap();
        let slot = account
            .containers
            .get_mut(container)
            .ok_or_else(|| SasError::ContainerNotFound(container.to_string()))?;
        *slot = policies.clone();
        Ok(())
    }

    fn container_url(&self, container: &str) -> String {
        format!("https://memory.blob.local/{container}")
    }

    async fn issue_container_sas(
        &self,
        container: &str,
        policy: &str,
    ) -> Result<String, SasError> {
        let account = self.account.lock().unwrap();
        let policies = account
            .containers
            .get(container)
            .ok_or_else(|| SasError::ContainerNotFound(container.to_string()))?;
        if !policies.contains_key(policy) {
            return Err(SasError::UnknownPolicy {
                container: container.to_string(),
                policy: policy.to_string(),
            });
        }
        Ok(self.sign(&format!("c/{container}/{policy}")))
    }

    async fn issue_blob_sas(
        &self,
        container: &str,
        blob: &str,
        permissions: SasPermissions,
        start: SystemTime,
        expiry: SystemTime,
    ) -> Result<String, SasError> {
        self.blob_sas_calls.fetch_add(1, Ordering::SeqCst);
        let since = |t: SystemTime| {
            t.duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0)
        };
        Ok(self.sign(&format!(
            "b/{container}/{blob}/{permissions}/{}/{}",
            since(start),
            since(expiry)
        )))
    }
}
