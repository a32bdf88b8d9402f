//! The worker role: node-local execution, with off-node requests bounced
//! back through the proxy.

use std::sync::Arc;

use skiff_net::{ConnectionPool, FileOp, WireRequest, WireResponse};
use skiff_types::LogicalNode;
use tracing::debug;

use crate::local::LocalExecutor;

/// Handles requests arriving at one compute node.
///
/// A request addressed to this node executes locally. Anything else is
/// forwarded unchanged to the proxy, which owns resolution and fan-out;
/// workers never talk to each other directly.
pub struct Worker {
    node: LogicalNode,
    proxy: LogicalNode,
    executor: Arc<LocalExecutor>,
    pool: Arc<ConnectionPool>,
}

impl Worker {
    pub fn new(
        node: LogicalNode,
        proxy: LogicalNode,
        executor: Arc<LocalExecutor>,
        pool: Arc<ConnectionPool>,
    ) -> Self {
        Self {
            node,
            proxy,
            executor,
            pool,
        }
    }

    pub fn node(&self) -> &LogicalNode {
        &self.node
    }

    pub async fn handle(&self, request: WireRequest) -> WireResponse {
        // KeepAlive is answered by whichever node the connection landed on.
        if request.headers.target == self.node || matches!(request.op, FileOp::KeepAlive) {
            return self.executor.execute(&request.headers, &request.op).await;
        }

        debug!(target = %request.headers.target, via = %self.proxy, "forwarding off-node request");
        let guard = self
            .pool
            .acquire(&self.proxy)
            .await
            .map_err(|e| e.to_fault())?;
        // The guard aborts its connection on transport failure; the reply,
        // fault or not, is passed through untouched.
        guard.call(&request).await.map_err(|e| e.to_fault())?
    }
}
