//! Integration test: connection pool behavior against a live proxy.

use std::sync::Arc;
use std::time::Duration;

use skiff_integration_tests::StagingCluster;
use skiff_net::{
    ConnectionPool, FileOp, OpReply, PoolConfig, StaticResolver, TcpConnector, WireRequest,
};
use skiff_types::{LogicalNode, RouteHeaders};

fn pool_for(c: &StagingCluster, config: PoolConfig) -> Arc<ConnectionPool> {
    let resolver = Arc::new(
        StaticResolver::new().with_node(LogicalNode::new("proxy"), c.proxy_addr().to_string()),
    );
    ConnectionPool::new(Arc::new(TcpConnector::new(resolver)), config)
}

fn keepalive(target: LogicalNode) -> WireRequest {
    WireRequest {
        headers: RouteHeaders::addressed_to(target, "alice"),
        op: FileOp::KeepAlive,
    }
}

/// Sequential requests all reuse the single cached connection.
#[tokio::test]
async fn test_sequential_requests_share_one_connection() {
    let c = StagingCluster::new(1).await;
    let pool = pool_for(&c, PoolConfig::default());
    let proxy = LogicalNode::new("proxy");

    for _ in 0..50 {
        let guard = pool.acquire(&proxy).await.unwrap();
        let reply = guard.call(&keepalive(c.worker(0))).await.unwrap().unwrap();
        assert_eq!(reply, OpReply::Done);
    }
    assert_eq!(pool.len().await, 1);
}

/// Concurrent requests multiplex over one connection without interference.
#[tokio::test]
async fn test_concurrent_requests_complete() {
    let c = StagingCluster::new(2).await;
    let pool = pool_for(&c, PoolConfig::default());
    let proxy = LogicalNode::new("proxy");

    let mut handles = Vec::new();
    for i in 0..32 {
        let pool = pool.clone();
        let proxy = proxy.clone();
        let target = c.worker(i % 2);
        handles.push(tokio::spawn(async move {
            let guard = pool.acquire(&proxy).await.unwrap();
            guard.call(&keepalive(target)).await.unwrap().unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), OpReply::Done);
    }
    assert_eq!(pool.len().await, 1);
}

/// The keep-alive loop keeps an otherwise idle connection from being
/// evicted; after shutdown the pool refuses new work.
#[tokio::test]
async fn test_keepalive_loop_sustains_idle_connection() {
    let c = StagingCluster::new(1).await;
    let pool = pool_for(
        &c,
        PoolConfig {
            keepalive_interval: Duration::from_millis(20),
            sweep_interval: Duration::from_millis(40),
            idle_ttl: Duration::from_millis(100),
        },
    );
    pool.start();
    let proxy = LogicalNode::new("proxy");

    // Prime the pool, then stay idle well past the TTL.
    {
        let guard = pool.acquire(&proxy).await.unwrap();
        guard.call(&keepalive(c.worker(0))).await.unwrap().unwrap();
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(
        pool.contains(&proxy).await,
        "keep-alive should have refreshed the idle connection"
    );

    pool.shutdown();
    assert!(pool.acquire(&proxy).await.is_err());
}
