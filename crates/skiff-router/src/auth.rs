//! Caller authentication and per-path permission checks.

use std::collections::HashSet;

use async_trait::async_trait;
use skiff_types::{AccessRights, FaultKind, FaultRecord, UserIdentity};

/// Account name used by node-local system services. Always authenticates,
/// never as admin.
pub const SYSTEM_ACCOUNT: &str = "SYSTEM";

/// What the transport layer could establish about the caller before the
/// request reached us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerClaims {
    /// Account name presented by the connection.
    pub account: String,
}

impl CallerClaims {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }
}

/// Decides who may call and what they may touch.
///
/// The proxy runs [`authenticate`](Self::authenticate) once per request;
/// workers run [`check_file_permissions`](Self::check_file_permissions)
/// before every local filesystem access.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve claims to an identity, or reject the caller.
    async fn authenticate(&self, claims: &CallerClaims) -> Result<UserIdentity, FaultRecord>;

    /// Whether `user` may exercise `rights` on `path`.
    async fn check_file_permissions(
        &self,
        user: &UserIdentity,
        path: &str,
        rights: AccessRights,
    ) -> Result<(), FaultRecord>;
}

/// Allow-list authenticator for the daemon and tests.
///
/// Admins get every right. Cluster users and the system account
/// authenticate without the admin flag; read-only users additionally fail
/// write and delete permission checks.
#[derive(Debug, Default)]
pub struct StaticAuthenticator {
    cluster_users: HashSet<String>,
    admins: HashSet<String>,
    read_only: HashSet<String>,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cluster_user(mut self, account: impl Into<String>) -> Self {
        self.cluster_users.insert(account.into());
        self
    }

    pub fn with_admin(mut self, account: impl Into<String>) -> Self {
        let account = account.into();
        self.cluster_users.insert(account.clone());
        self.admins.insert(account);
        self
    }

    pub fn with_read_only(mut self, account: impl Into<String>) -> Self {
        let account = account.into();
        self.cluster_users.insert(account.clone());
        self.read_only.insert(account);
        self
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, claims: &CallerClaims) -> Result<UserIdentity, FaultRecord> {
        if claims.account == SYSTEM_ACCOUNT {
            return Ok(UserIdentity::new(SYSTEM_ACCOUNT, false));
        }
        if self.cluster_users.contains(&claims.account) {
            let is_admin = self.admins.contains(&claims.account);
            return Ok(UserIdentity::new(claims.account.clone(), is_admin));
        }
        Err(FaultRecord::new(
            FaultKind::AuthenticationFailed,
            format!("account {} is not a cluster user", claims.account),
        ))
    }

    async fn check_file_permissions(
        &self,
        user: &UserIdentity,
        path: &str,
        rights: AccessRights,
    ) -> Result<(), FaultRecord> {
        if user.is_admin {
            return Ok(());
        }
        if matches!(rights, AccessRights::Write | AccessRights::Delete)
            && self.read_only.contains(&user.name)
        {
            return Err(FaultRecord::new(
                FaultKind::NotAuthorized,
                format!("account {} may not modify {path}", user.name),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator() -> StaticAuthenticator {
        StaticAuthenticator::new()
            .with_cluster_user("alice")
            .with_admin("root")
            .with_read_only("viewer")
    }

    #[tokio::test]
    async fn test_unknown_account_is_rejected() {
        let auth = authenticator();
        let err = auth
            .authenticate(&CallerClaims::new("mallory"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FaultKind::AuthenticationFailed);
    }

    #[tokio::test]
    async fn test_admin_flag_is_resolved_not_claimed() {
        let auth = authenticator();
        let alice = auth.authenticate(&CallerClaims::new("alice")).await.unwrap();
        assert!(!alice.is_admin);
        let root = auth.authenticate(&CallerClaims::new("root")).await.unwrap();
        assert!(root.is_admin);
    }

    #[tokio::test]
    async fn test_system_account_always_authenticates() {
        let auth = StaticAuthenticator::new();
        let system = auth
            .authenticate(&CallerClaims::new(SYSTEM_ACCOUNT))
            .await
            .unwrap();
        assert!(!system.is_admin);
    }

    #[tokio::test]
    async fn test_read_only_user_cannot_write() {
        let auth = authenticator();
        let viewer = auth.authenticate(&CallerClaims::new("viewer")).await.unwrap();
        auth.check_file_permissions(&viewer, "/data/out.log", AccessRights::Read)
            .await
            .unwrap();
        let err = auth
            .check_file_permissions(&viewer, "/data/out.log", AccessRights::Write)
            .await
            .unwrap_err();
        assert_eq!(err.kind, FaultKind::NotAuthorized);
    }
}
