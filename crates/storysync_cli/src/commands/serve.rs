//! Serve command implementation.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storysync_server::{EntityStore, FileStore, MemoryStore, ServerConfig, SyncServer};
use tokio::net::TcpListener;

/// Flags of the serve command.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Listen address.
    pub bind: SocketAddr,
    /// Data directory; `None` keeps projects in memory.
    pub data_dir: Option<PathBuf>,
    /// Token signing secret; `None` disables authentication.
    pub auth_secret: Option<String>,
    /// Session lease in seconds.
    pub session_lease: u64,
    /// Tombstone retention in days.
    pub tombstone_retention_days: u64,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    /// Whether begin_sync creates missing projects.
    pub create_missing_projects: bool,
}

impl ServeOptions {
    /// Builds the server configuration.
    pub fn config(&self) -> ServerConfig {
        let config = ServerConfig::new(self.bind)
            .with_session_lease(Duration::from_secs(self.session_lease))
            .with_tombstone_retention(Duration::from_secs(
                self.tombstone_retention_days.saturating_mul(24 * 60 * 60),
            ))
            .with_request_timeout(Duration::from_secs(self.request_timeout))
            .with_create_missing_projects(self.create_missing_projects);

        match &self.auth_secret {
            Some(secret) => config.with_auth(secret.clone().into_bytes()),
            None => config,
        }
    }
}

/// Runs the server until Ctrl-C.
pub fn run(options: ServeOptions) -> Result<(), Box<dyn std::error::Error>> {
    let store: Arc<dyn EntityStore> = match &options.data_dir {
        Some(dir) => Arc::new(FileStore::open(dir)?),
        None => {
            tracing::warn!("no data directory given, projects are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };
    if options.auth_secret.is_none() {
        tracing::warn!("authentication disabled");
    }

    let server = SyncServer::with_store(options.config(), store)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let listener = TcpListener::bind(options.bind).await?;
        server
            .serve_with_shutdown(listener, shutdown_signal())
            .await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown requested"),
        Err(e) => {
            tracing::error!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}
