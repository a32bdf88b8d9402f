//! The proxy role: authenticate, stamp identity, forward.

use std::sync::Arc;

use skiff_net::{ConnectionPool, FileOp, OpReply, WireRequest, WireResponse};
use tracing::debug;

use crate::auth::{Authenticator, CallerClaims};

/// Cluster-facing entry point.
///
/// The proxy trusts nothing in the incoming headers except the target
/// node: the identity fields are overwritten with whatever authentication
/// resolves, so a caller cannot claim another account or the admin flag.
/// The proxy itself never performs file I/O.
pub struct Proxy {
    authenticator: Arc<dyn Authenticator>,
    pool: Arc<ConnectionPool>,
}

impl Proxy {
    pub fn new(authenticator: Arc<dyn Authenticator>, pool: Arc<ConnectionPool>) -> Self {
        Self {
            authenticator,
            pool,
        }
    }

    pub async fn handle(&self, claims: &CallerClaims, request: WireRequest) -> WireResponse {
        let identity = self.authenticator.authenticate(claims).await?;

        // Connection liveness probes terminate here; forwarding one to the
        // proxy's own pool would loop it back to this process.
        if matches!(request.op, FileOp::KeepAlive) {
            return Ok(OpReply::Done);
        }

        let mut request = request;
        request.headers = request.headers.with_identity(&identity);

        debug!(
            target = %request.headers.target,
            user = %request.headers.user,
            is_admin = request.headers.is_admin,
            "forwarding to target node"
        );

        let guard = self
            .pool
            .acquire(&request.headers.target)
            .await
            .map_err(|e| e.to_fault())?;
        guard.call(&request).await.map_err(|e| e.to_fault())?
    }
}
