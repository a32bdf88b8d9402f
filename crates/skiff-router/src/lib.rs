//! Request routing for file staging operations.
//!
//! Two roles share the wire protocol from `skiff-net`:
//!
//! - [`Proxy`] — the cluster-facing entry point. Authenticates callers,
//!   stamps the verified identity into the route headers, and forwards
//!   each request to its target node over a pooled connection. Never
//!   touches the filesystem.
//! - [`Worker`] — runs on every compute node. Executes operations
//!   addressed to its own node via [`LocalExecutor`] and bounces anything
//!   else back through the proxy (a single hop, never worker-to-worker).

mod auth;
mod blob;
mod local;
mod proxy;
mod worker;


pub use auth::{Authenticator, CallerClaims, StaticAuthenticator};
pub use blob::{BlobTransfer, DirTransfer};
pub use local::{ExecutorConfig, LocalExecutor};
pub use proxy::Proxy;
pub use worker::Worker;
