//! Framed TCP serving for the daemon.
//!
//! Each accepted connection carries a sequence of length-prefixed
//! [`WireRequest`] frames, answered in order with [`WireResponse`] frames.
//! Concurrency is bounded by a semaphore; the accept loop drains on a
//! shutdown signal.

use std::sync::Arc;

use skiff_net::{WireRequest, WireResponse, read_frame, write_frame};
use skiff_router::{CallerClaims, Proxy, Worker};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, watch};
use tracing::{debug, info, warn};

/// Which role this daemon answers requests as.
pub enum Service {
    Worker(Worker),
    Proxy(Proxy),
}

impl Service {
    async fn dispatch(&self, request: WireRequest) -> WireResponse {
        match self {
            Service::Worker(worker) => worker.handle(request).await,
            // The transport-level account stands in for the caller's
            // credentials; the proxy resolves it to a verified identity.
            Service::Proxy(proxy) => {
                let claims = CallerClaims::new(request.headers.user.clone());
                proxy.handle(&claims, request).await
            }
        }
    }
}

/// Accept connections until `shutdown` flips, handling each on its own task.
pub async fn serve(
    listener: TcpListener,
    service: Arc<Service>,
    max_connections: usize,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let permits = Arc::new(Semaphore::new(max_connections));
    info!(addr = %listener.local_addr()?, "accepting connections");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let permit = match permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let service = service.clone();
                tokio::spawn(async move {
                    debug!(%peer, "connection opened");
                    handle_connection(stream, service).await;
                    debug!(%peer, "connection closed");
                    drop(permit);
                });
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("stopping accept loop");
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn handle_connection(mut stream: TcpStream, service: Arc<Service>) {
    loop {
        let request: WireRequest = match read_frame(&mut stream).await {
            Ok(request) => request,
            // Peers hang up between requests; anything else is worth a log.
            Err(e) => {
                debug!(error = %e, "connection ended");
                return;
            }
        };

        let response = service.dispatch(request).await;
        if let Err(e) = write_frame(&mut stream, &response).await {
            warn!(error = %e, "could not write response");
            return;
        }
    }
}
