//! Shared test harness for skiff integration tests.
//!
//! Provides [`StagingCluster`] — a proxy plus N worker daemons on real TCP
//! sockets, sharing one staging container backend, exercising the full
//! path: client → proxy (authentication, identity stamping) → pooled
//! connection → worker → local filesystem / staging container.

use std::sync::Arc;

use skiff_net::{
    Channel, ConnectionPool, FileOp, OpReply, PoolConfig, StaticResolver, TcpChannel,
    TcpConnector, WireRequest, WireResponse, read_frame, write_frame,
};
use skiff_router::{
    CallerClaims, DirTransfer, ExecutorConfig, LocalExecutor, Proxy, StaticAuthenticator, Worker,
};
use skiff_sas::{MemoryBlobClient, SasCacheConfig, SasPolicyCache};
use skiff_types::{FaultRecord, LogicalNode, RouteHeaders};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

enum Service {
    Worker(Worker),
    Proxy(Proxy),
}

impl Service {
    async fn dispatch(&self, request: WireRequest) -> WireResponse {
        match self {
            Service::Worker(worker) => worker.handle(request).await,
            Service::Proxy(proxy) => {
                let claims = CallerClaims::new(request.headers.user.clone());
                proxy.handle(&claims, request).await
            }
        }
    }
}

async fn serve(listener: TcpListener, service: Arc<Service>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let Ok((stream, _)) = accepted else { return };
                let service = service.clone();
                tokio::spawn(handle_connection(stream, service));
            }
            _ = shutdown.changed() => return,
        }
    }
}

async fn handle_connection(mut stream: TcpStream, service: Arc<Service>) {
    while let Ok(request) = read_frame::<_, WireRequest>(&mut stream).await {
        let response = service.dispatch(request).await;
        if write_frame(&mut stream, &response).await.is_err() {
            return;
        }
    }
}

/// A proxy and N workers listening on loopback, all sharing one staging
/// container backend (as cluster nodes share one storage account).
pub struct StagingCluster {
    proxy_addr: String,
    worker_names: Vec<String>,
    worker_addrs: Vec<String>,
    shutdown: watch::Sender<bool>,
    _staging: TempDir,
}

impl StagingCluster {
    pub async fn new(workers: usize) -> Self {
        let staging = TempDir::new().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Bind everything first so the routing table is complete before
        // any service starts.
        let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap().to_string();
        let mut worker_listeners = Vec::new();
        let mut resolver = StaticResolver::new().with_node(LogicalNode::new("proxy"), &proxy_addr);
        let mut worker_names = Vec::new();
        let mut worker_addrs = Vec::new();
        for i in 0..workers {
            let name = format!("n{i}");
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap().to_string();
            resolver = resolver.with_node(LogicalNode::new(name.clone()), addr.clone());
            worker_listeners.push(listener);
            worker_names.push(name);
            worker_addrs.push(addr);
        }

        let resolver: Arc<StaticResolver> = Arc::new(resolver);
        let authenticator = Arc::new(
            StaticAuthenticator::new()
                .with_cluster_user("alice")
                .with_cluster_user("bob")
                .with_admin("ops")
                .with_read_only("viewer"),
        );
        // One blob account shared by every node.
        let blob_client = Arc::new(MemoryBlobClient::new(b"cluster-secret".to_vec()));

        for (name, listener) in worker_names.iter().zip(worker_listeners) {
            let pool = ConnectionPool::new(
                Arc::new(TcpConnector::new(resolver.clone())),
                PoolConfig::default(),
            );
            let sas = Arc::new(SasPolicyCache::new(
                blob_client.clone(),
                SasCacheConfig::default(),
            ));
            let executor = Arc::new(LocalExecutor::new(
                ExecutorConfig {
                    cluster: "hpc".to_string(),
                    deployment: "itest".to_string(),
                },
                authenticator.clone(),
                sas,
                Arc::new(DirTransfer::new(staging.path())),
            ));
            let worker = Worker::new(
                LogicalNode::new(name.clone()),
                LogicalNode::new("proxy"),
                executor,
                pool,
            );
            tokio::spawn(serve(
                listener,
                Arc::new(Service::Worker(worker)),
                shutdown_rx.clone(),
            ));
        }

        let proxy_pool = ConnectionPool::new(
            Arc::new(TcpConnector::new(resolver.clone())),
            PoolConfig::default(),
        );
        let proxy = Proxy::new(authenticator, proxy_pool);
        tokio::spawn(serve(
            proxy_listener,
            Arc::new(Service::Proxy(proxy)),
            shutdown_rx,
        ));

        Self {
            proxy_addr,
            worker_names,
            worker_addrs,
            shutdown: shutdown_tx,
            _staging: staging,
        }
    }

    pub fn proxy_addr(&self) -> &str {
        &self.proxy_addr
    }

    pub fn worker(&self, i: usize) -> LogicalNode {
        LogicalNode::new(self.worker_names[i].clone())
    }

    pub fn worker_addr(&self, i: usize) -> &str {
        &self.worker_addrs[i]
    }

    /// One client round trip through the proxy.
    pub async fn call(
        &self,
        account: &str,
        target: LogicalNode,
        op: FileOp,
    ) -> Result<OpReply, FaultRecord> {
        let channel = TcpChannel::connect(LogicalNode::new("proxy"), &self.proxy_addr)
            .await
            .expect("proxy unreachable");
        let response = channel
            .call(&WireRequest {
                headers: RouteHeaders::addressed_to(target, account),
                op,
            })
            .await
            .expect("transport failure");
        channel.close().await;
        response
    }
}

impl Drop for StagingCluster {
    fn drop(&mut self) {
        self.shutdown.send(true).ok();
    }
}

/// Deterministic test payload.
pub fn test_data_seeded(size: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
    (0..size)
        .map(|_| {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            (state >> 16) as u8
        })
        .collect()
}
