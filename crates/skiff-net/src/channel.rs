//! Channel and connector seams, plus the bundled TCP implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use skiff_types::{LogicalNode, RouteHeaders};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::NetError;
use crate::message::{FileOp, OpReply, WireRequest, WireResponse, read_frame, write_frame};

/// Identity attached to pool-originated keep-alive pings.
const KEEPALIVE_USER: &str = "SYSTEM";

/// Health state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Constructed but not yet connected.
    Created,
    /// Connected and usable.
    Opened,
    /// Teardown in progress.
    Closing,
    /// Torn down.
    Closed,
    /// A call failed at the transport level. Never reused.
    Faulted,
}

impl ChannelState {
    /// Whether the pool may hand this channel to a caller.
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Created | Self::Opened)
    }
}

/// Coarse transport scheme. The pool is scheme-agnostic beyond checking
/// that a cached channel still matches the configured scheme (a flipped
/// protocol preference invalidates existing connections).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Plain TCP framing.
    Tcp,
    /// TLS over TCP.
    Tls,
}

/// One outbound transport connection to one logical destination.
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    /// Issue a request and wait for the reply.
    async fn call(&self, request: &WireRequest) -> Result<WireResponse, NetError>;

    /// Lightweight liveness probe (a `KeepAlive` round trip).
    async fn ping(&self) -> Result<(), NetError>;

    /// Current health state.
    fn state(&self) -> ChannelState;

    /// Mark the channel unusable after an RPC failure.
    fn mark_faulted(&self);

    /// The transport scheme this channel was created with.
    fn scheme(&self) -> Scheme;

    /// Tear the channel down. Idempotent.
    async fn close(&self);
}

/// Where a logical node physically lives right now.
///
/// Resolutions are point-in-time: a node's location can flip between
/// on-premise and cloud over the life of the pool, so they are performed
/// fresh at connection-creation time and never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Whether the node is this process itself.
    pub is_local: bool,
    /// Host:port of the node (or of the proxy fronting it).
    pub endpoint: String,
}

/// External node/location lookup.
#[async_trait::async_trait]
pub trait NodeResolver: Send + Sync {
    /// Resolve a logical name to its current physical endpoint.
    async fn resolve(&self, node: &LogicalNode) -> Result<Resolution, NetError>;
}

/// Endpoint resolution + connect factory injected into the pool.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Resolve the node and open a fresh channel to it.
    async fn connect(&self, node: &LogicalNode) -> Result<Arc<dyn Channel>, NetError>;

    /// The scheme channels from this connector carry.
    fn scheme(&self) -> Scheme;
}

// ---------------------------------------------------------------------------
// Static resolver
// ---------------------------------------------------------------------------

/// Resolver backed by a fixed name→endpoint table (config-file driven).
#[derive(Debug, Default)]
pub struct StaticResolver {
    entries: HashMap<LogicalNode, Resolution>,
}

impl StaticResolver {
    /// Empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a remote node.
    pub fn with_node(mut self, node: LogicalNode, endpoint: impl Into<String>) -> Self {
        self.entries.insert(
            node,
            Resolution {
                is_local: false,
                endpoint: endpoint.into(),
            },
        );
        self
    }

    /// Register the local node itself.
    pub fn with_local(mut self, node: LogicalNode, endpoint: impl Into<String>) -> Self {
        self.entries.insert(
            node,
            Resolution {
                is_local: true,
                endpoint: endpoint.into(),
            },
        );
        self
    }
}

#[async_trait::async_trait]
impl NodeResolver for StaticResolver {
    async fn resolve(&self, node: &LogicalNode) -> Result<Resolution, NetError> {
        self.entries
            .get(node)
            .cloned()
            .ok_or_else(|| NetError::EndpointNotFound(node.to_string()))
    }
}

// ---------------------------------------------------------------------------
// TCP channel
// ---------------------------------------------------------------------------

/// Channel over a plain TCP stream with length-prefixed postcard framing.
///
/// Calls are serialized: one request/response round trip at a time holds
/// the stream. Any I/O error faults the channel permanently; the pool
/// replaces faulted channels on the next acquire.
pub struct TcpChannel {
    node: LogicalNode,
    endpoint: String,
    stream: Mutex<Option<TcpStream>>,
    state: StdMutex<ChannelState>,
}

impl TcpChannel {
    /// Connect to the given endpoint.
    pub async fn connect(node: LogicalNode, endpoint: &str) -> Result<Self, NetError> {
        let stream = TcpStream::connect(endpoint)
            .await
            .map_err(|e| NetError::Connect(format!("{endpoint}: {e}")))?;
        stream.set_nodelay(true)?;
        debug!(%node, endpoint, "connected");

        Ok(Self {
            node,
            endpoint: endpoint.to_owned(),
            stream: Mutex::new(Some(stream)),
            state: StdMutex::new(ChannelState::Opened),
        })
    }

    /// The endpoint this channel was connected to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn set_state(&self, state: ChannelState) {
        *self.state.lock().expect("channel state lock poisoned") = state;
    }

    async fn round_trip(&self, request: &WireRequest) -> Result<WireResponse, NetError> {
        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Err(NetError::ChannelClosed);
        };

        if let Err(e) = write_frame(stream, request).await {
            self.set_state(ChannelState::Faulted);
            return Err(e);
        }
        match read_frame(stream).await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.set_state(ChannelState::Faulted);
                Err(e)
            }
        }
    }
}

#[async_trait::async_trait]
impl Channel for TcpChannel {
    async fn call(&self, request: &WireRequest) -> Result<WireResponse, NetError> {
        if !self.state().is_usable() {
            return Err(NetError::ChannelClosed);
        }
        self.round_trip(request).await
    }

    async fn ping(&self) -> Result<(), NetError> {
        let request = WireRequest {
            headers: RouteHeaders {
                target: self.node.clone(),
                user: KEEPALIVE_USER.to_owned(),
                is_admin: false,
            },
            op: FileOp::KeepAlive,
        };
        match self.round_trip(&request).await? {
            Ok(OpReply::Done) => Ok(()),
            Ok(other) => Err(NetError::UnexpectedReply(format!(
                "keep-alive answered with {other:?}"
            ))),
            Err(fault) => Err(NetError::UnexpectedReply(format!(
                "keep-alive rejected: {fault}"
            ))),
        }
    }

    fn state(&self) -> ChannelState {
        *self.state.lock().expect("channel state lock poisoned")
    }

    fn mark_faulted(&self) {
        self.set_state(ChannelState::Faulted);
    }

    fn scheme(&self) -> Scheme {
        Scheme::Tcp
    }

    async fn close(&self) {
        {
            let state = self.state();
            if matches!(state, ChannelState::Closing | ChannelState::Closed) {
                return;
            }
        }
        self.set_state(ChannelState::Closing);
        let stream = self.stream.lock().await.take();
        if let Some(mut stream) = stream {
            use tokio::io::AsyncWriteExt;
            if let Err(e) = stream.shutdown().await {
                warn!(node = %self.node, "shutdown failed: {e}");
            }
        }
        self.set_state(ChannelState::Closed);
    }
}

/// Connector producing [`TcpChannel`]s via a [`NodeResolver`].
pub struct TcpConnector {
    resolver: Arc<dyn NodeResolver>,
}

impl TcpConnector {
    /// Create a connector over the given resolver.
    pub fn new(resolver: Arc<dyn NodeResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, node: &LogicalNode) -> Result<Arc<dyn Channel>, NetError> {
        // Resolution happens here, at creation time, never at acquire time
        // for an already-healthy connection.
        let resolution = self.resolver.resolve(node).await?;
        let channel = TcpChannel::connect(node.clone(), &resolution.endpoint).await?;
        Ok(Arc::new(channel))
    }

    fn scheme(&self) -> Scheme {
        Scheme::Tcp
    }
}
