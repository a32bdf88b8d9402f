//! Tests for the skiff-net crate.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use skiff_types::{LogicalNode, RouteHeaders};

use crate::channel::{Channel, ChannelState, Connector, NodeResolver, Scheme, StaticResolver};
use crate::error::NetError;
use crate::message::{FileOp, OpReply, WireRequest, WireResponse, read_frame, write_frame};
use crate::pool::{ConnectionPool, PoolConfig};

// =========================================================================
// Mock channel / connector
// =========================================================================

struct MockChannel {
    state: StdMutex<ChannelState>,
    scheme: Scheme,
    pings: AtomicU32,
    calls: AtomicU32,
    fail_calls: AtomicBool,
    closed: AtomicBool,
}

impl MockChannel {
    fn new(scheme: Scheme) -> Self {
        Self {
            state: StdMutex::new(ChannelState::Opened),
            scheme,
            pings: AtomicU32::new(0),
            calls: AtomicU32::new(0),
            fail_calls: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait::async_trait]
impl Channel for MockChannel {
    async fn call(&self, _request: &WireRequest) -> Result<WireResponse, NetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_calls.load(Ordering::SeqCst) {
            return Err(NetError::ChannelClosed);
        }
        Ok(Ok(OpReply::Done))
    }

    async fn ping(&self) -> Result<(), NetError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    fn mark_faulted(&self) {
        *self.state.lock().unwrap() = ChannelState::Faulted;
    }

    fn scheme(&self) -> Scheme {
        self.scheme
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        *self.state.lock().unwrap() = ChannelState::Closed;
    }
}

struct MockConnector {
    connects: AtomicU32,
    scheme: StdMutex<Scheme>,
    channels: StdMutex<Vec<Arc<MockChannel>>>,
}

impl MockConnector {
    fn new() -> Self {
        Self {
            connects: AtomicU32::new(0),
            scheme: StdMutex::new(Scheme::Tcp),
            channels: StdMutex::new(Vec::new()),
        }
    }

    fn channel(&self, index: usize) -> Arc<MockChannel> {
        self.channels.lock().unwrap()[index].clone()
    }
}

#[async_trait::async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _node: &LogicalNode) -> Result<Arc<dyn Channel>, NetError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let channel = Arc::new(MockChannel::new(*self.scheme.lock().unwrap()));
        self.channels.lock().unwrap().push(channel.clone());
        Ok(channel)
    }

    fn scheme(&self) -> Scheme {
        *self.scheme.lock().unwrap()
    }
}

fn request_for(node: &LogicalNode) -> WireRequest {
    WireRequest {
        headers: RouteHeaders::addressed_to(node.clone(), "tester"),
        op: FileOp::KeepAlive,
    }
}

// =========================================================================
// Pool behavior
// =========================================================================

#[tokio::test]
async fn test_acquire_reuses_healthy_connection() {
    let connector = Arc::new(MockConnector::new());
    let pool = ConnectionPool::new(connector.clone(), PoolConfig::default());
    let node = LogicalNode::new("n1");

    let a = pool.acquire(&node).await.unwrap();
    let b = pool.acquire(&node).await.unwrap();

    assert!(Arc::ptr_eq(a.connection(), b.connection()));
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    assert_eq!(a.connection().in_flight(), 2);
}

#[tokio::test]
async fn test_faulted_connection_is_replaced() {
    let connector = Arc::new(MockConnector::new());
    let pool = ConnectionPool::new(connector.clone(), PoolConfig::default());
    let node = LogicalNode::new("n1");

    let first = pool.acquire(&node).await.unwrap();
    first.connection().channel().mark_faulted();
    drop(first);

    let second = pool.acquire(&node).await.unwrap();
    assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    assert!(second.connection().channel().state().is_usable());

    // The replaced channel gets closed off the hot path.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(connector.channel(0).closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_guard_drop_decrements_in_flight() {
    let connector = Arc::new(MockConnector::new());
    let pool = ConnectionPool::new(connector, PoolConfig::default());
    let node = LogicalNode::new("n1");

    let a = pool.acquire(&node).await.unwrap();
    let conn = a.connection().clone();
    assert_eq!(conn.in_flight(), 1);
    drop(a);
    assert_eq!(conn.in_flight(), 0);
}

#[tokio::test]
async fn test_call_failure_aborts_connection() {
    let connector = Arc::new(MockConnector::new());
    let pool = ConnectionPool::new(connector.clone(), PoolConfig::default());
    let node = LogicalNode::new("n1");

    let guard = pool.acquire(&node).await.unwrap();
    connector.channel(0).fail_calls.store(true, Ordering::SeqCst);

    let err = guard.call(&request_for(&node)).await;
    assert!(err.is_err());
    assert_eq!(
        guard.connection().channel().state(),
        ChannelState::Faulted
    );
    drop(guard);

    // Stale connections are never retried: the next acquire reconnects.
    let _second = pool.acquire(&node).await.unwrap();
    assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_scheme_flip_invalidates_connection() {
    let connector = Arc::new(MockConnector::new());
    let pool = ConnectionPool::new(connector.clone(), PoolConfig::default());
    let node = LogicalNode::new("n1");

    drop(pool.acquire(&node).await.unwrap());

    // Protocol preference flips; the cached Tcp channel no longer matches.
    *connector.scheme.lock().unwrap() = Scheme::Tls;
    drop(pool.acquire(&node).await.unwrap());

    assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    assert_eq!(connector.channel(1).scheme(), Scheme::Tls);
}

#[tokio::test]
async fn test_keepalive_pings_healthy_and_skips_faulted() {
    let connector = Arc::new(MockConnector::new());
    let pool = ConnectionPool::new(connector.clone(), PoolConfig::default());

    let in_flight_guard = pool.acquire(&LogicalNode::new("busy")).await.unwrap();
    drop(pool.acquire(&LogicalNode::new("idle")).await.unwrap());
    drop(pool.acquire(&LogicalNode::new("broken")).await.unwrap());
    connector.channel(2).mark_faulted();

    pool.keepalive_pass().await;

    // In-flight and idle-but-healthy connections are both pinged.
    assert_eq!(connector.channel(0).pings.load(Ordering::SeqCst), 1);
    assert_eq!(connector.channel(1).pings.load(Ordering::SeqCst), 1);
    // Faulted connections are skipped.
    assert_eq!(connector.channel(2).pings.load(Ordering::SeqCst), 0);
    drop(in_flight_guard);
}

#[tokio::test]
async fn test_ttl_eviction_removes_only_idle_connections() {
    let connector = Arc::new(MockConnector::new());
    let config = PoolConfig {
        idle_ttl: Duration::from_millis(80),
        ..PoolConfig::default()
    };
    let pool = ConnectionPool::new(connector.clone(), config);

    let stale = LogicalNode::new("stale");
    let fresh = LogicalNode::new("fresh");

    drop(pool.acquire(&stale).await.unwrap());
    tokio::time::sleep(Duration::from_millis(120)).await;
    drop(pool.acquire(&fresh).await.unwrap());

    pool.sweep_pass().await;

    assert!(!pool.contains(&stale).await, "idle connection not evicted");
    assert!(pool.contains(&fresh).await, "recent connection evicted");
}

#[tokio::test]
async fn test_keepalive_refresh_defers_eviction() {
    let connector = Arc::new(MockConnector::new());
    let config = PoolConfig {
        idle_ttl: Duration::from_millis(100),
        ..PoolConfig::default()
    };
    let pool = ConnectionPool::new(connector, config);
    let node = LogicalNode::new("n1");

    drop(pool.acquire(&node).await.unwrap());
    tokio::time::sleep(Duration::from_millis(70)).await;
    // A successful ping refreshes the idle timestamp.
    pool.keepalive_pass().await;
    tokio::time::sleep(Duration::from_millis(70)).await;

    pool.sweep_pass().await;
    assert!(pool.contains(&node).await);
}

#[tokio::test]
async fn test_acquire_after_shutdown_fails() {
    let connector = Arc::new(MockConnector::new());
    let pool = ConnectionPool::new(connector, PoolConfig::default());
    pool.shutdown();

    let err = pool.acquire(&LogicalNode::new("n1")).await.unwrap_err();
    assert!(matches!(err, NetError::PoolShutDown));
}

#[tokio::test]
async fn test_resolver_miss_is_endpoint_not_found() {
    let resolver = StaticResolver::new().with_node(LogicalNode::new("known"), "127.0.0.1:9");
    let err = resolver
        .resolve(&LogicalNode::new("unknown"))
        .await
        .unwrap_err();
    assert!(matches!(err, NetError::EndpointNotFound(_)));
}

// =========================================================================
// Wire framing and TCP channel
// =========================================================================

#[tokio::test]
async fn test_request_roundtrip_postcard() {
    let node = LogicalNode::new("n1");
    let requests = vec![
        request_for(&node),
        WireRequest {
            headers: RouteHeaders::addressed_to(node.clone(), "alice"),
            op: FileOp::ReadFile {
                path: "/var/log/job.out".into(),
                span: crate::message::ReadSpan::Tail(50),
            },
        },
        WireRequest {
            headers: RouteHeaders::addressed_to(node, "bob"),
            op: FileOp::WriteFile {
                path: "/data/in.txt".into(),
                data: b"payload".to_vec(),
                overwrite: true,
            },
        },
    ];

    for request in &requests {
        let encoded = postcard::to_allocvec(request).unwrap();
        let decoded: WireRequest = postcard::from_bytes(&encoded).unwrap();
        assert_eq!(request, &decoded);
    }
}

#[tokio::test]
async fn test_tcp_channel_call_and_ping() {
    use crate::channel::TcpChannel;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Minimal server: answer every request with Done.
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        loop {
            let request: WireRequest = match read_frame(&mut stream).await {
                Ok(r) => r,
                Err(_) => break,
            };
            assert_eq!(request.op, FileOp::KeepAlive);
            let response: WireResponse = Ok(OpReply::Done);
            if write_frame(&mut stream, &response).await.is_err() {
                break;
            }
        }
    });

    let node = LogicalNode::new("n1");
    let channel = TcpChannel::connect(node.clone(), &addr.to_string())
        .await
        .unwrap();
    assert_eq!(channel.state(), ChannelState::Opened);

    let response = channel.call(&request_for(&node)).await.unwrap();
    assert_eq!(response, Ok(OpReply::Done));

    channel.ping().await.unwrap();

    channel.close().await;
    assert_eq!(channel.state(), ChannelState::Closed);
    assert!(matches!(
        channel.call(&request_for(&node)).await,
        Err(NetError::ChannelClosed)
    ));
}

#[tokio::test]
async fn test_ping_rejection_is_not_a_serialization_error() {
    use skiff_types::{FaultKind, FaultRecord};

    use crate::channel::TcpChannel;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Server that answers every request with a well-formed fault.
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _: WireRequest = read_frame(&mut stream).await.unwrap();
        let response: WireResponse = Err(FaultRecord::new(
            FaultKind::AuthenticationFailed,
            "unknown system account",
        ));
        write_frame(&mut stream, &response).await.unwrap();
    });

    let channel = TcpChannel::connect(LogicalNode::new("n1"), &addr.to_string())
        .await
        .unwrap();
    let err = channel.ping().await.unwrap_err();
    // The frame decoded fine; the peer just said no.
    assert!(matches!(err, NetError::UnexpectedReply(_)));
}
