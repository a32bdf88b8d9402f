//! `skiffd` — the file staging daemon.
//!
//! Runs on every compute node as a worker, and on the head node as the
//! proxy that authenticates callers and routes operations to their target
//! nodes.
//!
//! # Usage
//!
//! ```text
//! skiffd start                          # start with defaults
//! skiffd start -c skiffd.toml           # start with a config file
//! skiffd start --role proxy -l 0.0.0.0:4940
//! skiffd check -c skiffd.toml           # validate a config file
//! ```

mod config;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use skiff_net::{ConnectionPool, StaticResolver, TcpConnector};
use skiff_router::{
    DirTransfer, ExecutorConfig, LocalExecutor, Proxy, StaticAuthenticator, Worker,
};
use skiff_sas::{MemoryBlobClient, SasPolicyCache};
use skiff_types::LogicalNode;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use config::CliConfig;
use server::Service;

/// Upper bound on concurrently served connections.
const MAX_CONNECTIONS: usize = 256;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "skiffd", version, about = "Skiff file staging daemon")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true, env = "SKIFFD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon.
    Start {
        /// Override this node's logical name.
        #[arg(short, long)]
        node: Option<String>,

        /// Override the listen address (e.g. "127.0.0.1:4941").
        #[arg(short = 'l', long)]
        listen_addr: Option<String>,

        /// Override the role ("worker" or "proxy").
        #[arg(short, long)]
        role: Option<String>,
    },

    /// Validate the config file and print the effective settings.
    Check,
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Start {
            node,
            listen_addr,
            role,
        } => {
            // CLI args override config file values.
            if let Some(name) = node {
                config.node.name = name;
            }
            if let Some(addr) = listen_addr {
                config.node.listen_addr = addr;
            }
            if let Some(role) = role {
                config.node.role = role;
            }
            cmd_start(config).await
        }
        Commands::Check => cmd_check(&config),
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// -----------------------------------------------------------------------
// skiffd start
// -----------------------------------------------------------------------

async fn cmd_start(config: CliConfig) -> Result<()> {
    info!("starting skiffd");
    info!(
        node = %config.node.name,
        role = %config.node.role,
        listen = %config.node.listen_addr,
        cluster = %config.node.cluster,
        deployment = %config.node.deployment,
        "node configuration"
    );
    anyhow::ensure!(
        matches!(config.node.role.as_str(), "worker" | "proxy"),
        "unknown role {:?} (expected \"worker\" or \"proxy\")",
        config.node.role
    );

    // --- Routing table and connection pool ---
    let mut resolver = StaticResolver::new();
    for (name, endpoint) in &config.nodes {
        resolver = resolver.with_node(LogicalNode::new(name.clone()), endpoint.clone());
    }
    let connector = Arc::new(TcpConnector::new(Arc::new(resolver)));
    let pool = ConnectionPool::new(connector, config.pool_config());
    pool.start();

    // --- Authentication ---
    let mut authenticator = StaticAuthenticator::new();
    for account in &config.auth.cluster_users {
        authenticator = authenticator.with_cluster_user(account.clone());
    }
    for account in &config.auth.admins {
        authenticator = authenticator.with_admin(account.clone());
    }
    for account in &config.auth.read_only {
        authenticator = authenticator.with_read_only(account.clone());
    }
    let authenticator = Arc::new(authenticator);

    // --- Service for the configured role ---
    let service = if config.is_proxy() {
        Arc::new(Service::Proxy(Proxy::new(authenticator, pool.clone())))
    } else {
        // Staging container access. The in-process blob account is backed
        // by a directory; a cloud-provider client slots in behind the same
        // BlobClient trait.
        let signing_key = if config.sas.signing_key.is_empty() {
            anyhow::bail!("[sas] signing_key must be set for worker nodes");
        } else {
            config.sas.signing_key.clone().into_bytes()
        };
        std::fs::create_dir_all(&config.sas.staging_root)
            .context("failed to create staging root")?;
        let sas = Arc::new(SasPolicyCache::new(
            Arc::new(MemoryBlobClient::new(signing_key)),
            config.sas_config(),
        ));
        let transfer = Arc::new(DirTransfer::new(config.sas.staging_root.clone()));

        let executor = Arc::new(LocalExecutor::new(
            ExecutorConfig {
                cluster: config.node.cluster.clone(),
                deployment: config.node.deployment.clone(),
            },
            authenticator,
            sas,
            transfer,
        ));
        Arc::new(Service::Worker(Worker::new(
            LogicalNode::new(config.node.name.clone()),
            LogicalNode::new(config.node.proxy.clone()),
            executor,
            pool.clone(),
        )))
    };

    // --- Serve until ctrl-c ---
    let listener = TcpListener::bind(&config.node.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.node.listen_addr))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(server::serve(listener, service, MAX_CONNECTIONS, shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown signal received");

    shutdown_tx.send(true).ok();
    server.await.context("server task failed")??;
    pool.shutdown();

    info!("skiffd stopped");
    Ok(())
}

// -----------------------------------------------------------------------
// skiffd check
// -----------------------------------------------------------------------

fn cmd_check(config: &CliConfig) -> Result<()> {
    println!("node:       {} ({})", config.node.name, config.node.role);
    println!("listen:     {}", config.node.listen_addr);
    println!("proxy:      {}", config.node.proxy);
    println!(
        "container:  {}/{}/<user>",
        config.node.cluster, config.node.deployment
    );
    println!("routes:     {}", config.nodes.len());
    for (name, endpoint) in &config.nodes {
        println!("  {name} -> {endpoint}");
    }
    let pool = config.pool_config();
    println!(
        "pool:       keepalive {:?}, sweep {:?}, ttl {:?}",
        pool.keepalive_interval, pool.sweep_interval, pool.idle_ttl
    );
    let sas = config.sas_config();
    println!(
        "sas:        rotation {:?}, blob validity {:?}",
        sas.rotation_interval, sas.blob_validity
    );
    println!(
        "auth:       {} users, {} admins, {} read-only",
        config.auth.cluster_users.len(),
        config.auth.admins.len(),
        config.auth.read_only.len()
    );
    Ok(())
}
