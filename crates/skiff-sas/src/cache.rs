//! Policy-backed SAS issuing with rotation.
//!
//! Container SAS tokens are bound to stored access policies so they can
//! be revoked server-side. The cache keeps one entry per container,
//! rotates the backing policy before it runs out, and never evicts a
//! policy that still has validity left, so tokens issued just before a
//! rotation keep working.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime};

use tokio::sync::Mutex;
use tracing::debug;

use crate::client::BlobClient;
use crate::error::SasError;
use crate::naming::container_name;
use crate::policy::{AccessPolicy, SasPermissions};

/// Timing knobs for policy rotation and ad-hoc blob grants.
#[derive(Debug, Clone, Copy)]
pub struct SasCacheConfig {
    /// A policy with less than this much validity left is stale and gets
    /// rotated out. New policies are minted with twice this validity.
    pub rotation_interval: Duration,
    /// Lifetime of ad-hoc single-blob tokens.
    pub blob_validity: Duration,
}

impl Default for SasCacheConfig {
    fn default() -> Self {
        Self {
            rotation_interval: Duration::from_secs(30 * 60),
            blob_validity: Duration::from_secs(60 * 60),
        }
    }
}

/// A container-scoped SAS grant handed back to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSas {
    /// Container the token is scoped to.
    pub container: String,
    /// Base URL of the container.
    pub url: String,
    /// The signed token.
    pub token: String,
}

#[derive(Default)]
struct ContainerState {
    policies: std::collections::BTreeMap<String, AccessPolicy>,
    /// Whether we have reconciled with storage at least once.
    fetched: bool,
}

struct ContainerEntry {
    state: Mutex<ContainerState>,
}

/// Caches stored access policies per staging container and mints SAS
/// tokens against them.
pub struct SasPolicyCache {
    client: Arc<dyn BlobClient>,
    config: SasCacheConfig,
    // Brief lock: only guards the entry map, never held across awaits.
    containers: StdMutex<HashMap<String, Arc<ContainerEntry>>>,
    seq: AtomicU64,
}

impl SasPolicyCache {
    pub fn new(client: Arc<dyn BlobClient>, config: SasCacheConfig) -> Self {
        Self {
            client,
            config,
            containers: StdMutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Container name for a (cluster, deployment, user) triple.
    pub fn container_for(&self, cluster: &str, deployment: &str, user: &str) -> String {
        container_name(cluster, deployment, user)
    }

    /// Issue a container SAS carrying at least `permissions`, rotating
    /// the backing policy if no current one covers the request.
    pub async fn get_container_sas(
        &self,
        cluster: &str,
        deployment: &str,
        user: &str,
        permissions: SasPermissions,
    ) -> Result<ContainerSas, SasError> {
        let container = container_name(cluster, deployment, user);
        let entry = self.entry(&container);

        // Per-container async lock: serializes rotation, leaves other
        // containers untouched.
        let mut state = entry.state.lock().await;
        self.reconcile(&container, &mut state).await?;

        let now = SystemTime::now();
        let policy_name = match Self::pick(&state, now, self.config.rotation_interval, &permissions)
        {
            Some(name) => name,
            None => self.rotate(&container, &mut state, now, permissions).await?,
        };

        let token = self.client.issue_container_sas(&container, &policy_name).await?;
        Ok(ContainerSas {
            url: self.client.container_url(&container),
            container,
            token,
        })
    }

    /// Issue an ad-hoc token for a single blob. Always freshly signed,
    /// never cached, so revoking the container policies does not affect
    /// in-flight transfers.
    pub async fn get_blob_sas(
        &self,
        cluster: &str,
        deployment: &str,
        user: &str,
        blob: &str,
        permissions: SasPermissions,
    ) -> Result<ContainerSas, SasError> {
        let container = container_name(cluster, deployment, user);
        let entry = self.entry(&container);

        {
            let mut state = entry.state.lock().await;
            self.reconcile(&container, &mut state).await?;
        }

        let now = SystemTime::now();
        let token = self
            .client
            .issue_blob_sas(&container, blob, permissions, now, now + self.config.blob_validity)
            .await?;
        Ok(ContainerSas {
            url: self.client.container_url(&container),
            container,
            token,
        })
    }

    fn entry(&self, container: &str) -> Arc<ContainerEntry> {
        let mut containers = self.containers.lock().unwrap();
        containers
            .entry(container.to_string())
            .or_insert_with(|| {
                Arc::new(ContainerEntry {
                    state: Mutex::new(ContainerState::default()),
                })
            })
            .clone()
    }

    /// First touch of a container: create it, and if it already existed
    /// pull down whatever policies a previous process left behind.
    async fn reconcile(
        &self,
        container: &str,
        state: &mut ContainerState,
    ) -> Result<(), SasError> {
        if state.fetched {
            return Ok(());
        }
        let created = self.client.create_container_if_absent(container).await?;
        if !created {
            state.policies = self.client.get_container_policies(container).await?;
        }
        state.fetched = true;
        Ok(())
    }

    /// Newest non-stale policy covering the request, if any.
    fn pick(
        state: &ContainerState,
        now: SystemTime,
        rotation: Duration,
        permissions: &SasPermissions,
    ) -> Option<String> {
        state
            .policies
            .iter()
            .filter(|(_, p)| !p.is_stale(now, rotation) && p.permissions.covers(permissions))
            .max_by_key(|(_, p)| p.expiry)
            .map(|(name, _)| name.clone())
    }

    /// Mint a replacement policy and push the merged set to storage.
    /// Expired policies are dropped; stale-but-valid ones stay so their
    /// outstanding tokens keep working.
    async fn rotate(
        &self,
        container: &str,
        state: &mut ContainerState,
        now: SystemTime,
        permissions: SasPermissions,
    ) -> Result<String, SasError> {
        state.policies.retain(|_, p| !p.is_expired(now));

        let millis = now
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let name = format!("skiff-{millis}-{}", self.seq.fetch_add(1, Ordering::SeqCst));
        let policy = AccessPolicy::new(permissions, now, self.config.rotation_interval * 2);
        state.policies.insert(name.clone(), policy);

        self.client
            .set_container_policies(container, &state.policies)
            .await?;
        debug!(container, policy = %name, kept = state.policies.len(), "rotated access policy");
        Ok(name)
    }
}
