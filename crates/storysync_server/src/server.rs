//! Main sync server.

use crate::auth::{AuthConfig, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::http;
use crate::repository::ProjectRepository;
use crate::store::{EntityStore, MemoryStore};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// The sync server.
///
/// Owns the project repository and serves it over HTTP.
///
/// # Example
///
/// ```
/// use storysync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default()).unwrap();
/// assert!(server.token_validator().is_none());
///
/// // `server.run().await` binds `config.bind_addr` and serves until the
/// // process exits; `serve_with_shutdown` stops on a signal instead.
/// ```
pub struct SyncServer {
    config: ServerConfig,
    repository: Arc<ProjectRepository>,
    validator: Option<TokenValidator>,
}

impl SyncServer {
    /// Creates a sync server over an in-memory store.
    ///
    /// # Errors
    ///
    /// Fails if authentication is required but no secret is configured.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    /// Creates a sync server over an existing store.
    ///
    /// # Errors
    ///
    /// Fails if authentication is required but no secret is configured.
    pub fn with_store(config: ServerConfig, store: Arc<dyn EntityStore>) -> ServerResult<Self> {
        let validator = if config.require_auth {
            let secret = config.auth_secret.clone().ok_or_else(|| {
                ServerError::InvalidRequest("authentication required but no secret set".into())
            })?;
            Some(TokenValidator::new(
                AuthConfig::new(secret).with_expiry(config.token_expiry),
            ))
        } else {
            None
        };

        let repository = Arc::new(ProjectRepository::new(store, &config));
        Ok(Self {
            config,
            repository,
            validator,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the repository.
    pub fn repository(&self) -> &Arc<ProjectRepository> {
        &self.repository
    }

    /// Returns the token validator, if authentication is enabled.
    pub fn token_validator(&self) -> Option<&TokenValidator> {
        self.validator.as_ref()
    }

    /// Builds the HTTP router.
    pub fn router(&self) -> Router {
        http::router(
            Arc::clone(&self.repository),
            self.validator.clone(),
            &self.config,
        )
    }

    /// Starts a task that reaps expired sessions every `reap_interval`.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        let repository = Arc::clone(&self.repository);
        let period = self.config.reap_interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reaped = repository.reap_expired_sessions();
                if reaped > 0 {
                    tracing::debug!(reaped, "reaped expired sync sessions");
                }
            }
        })
    }

    /// Serves on a bound listener until the process exits.
    pub async fn serve(self, listener: TcpListener) -> ServerResult<()> {
        self.serve_with_shutdown(listener, std::future::pending())
            .await
    }

    /// Serves on a bound listener until `shutdown` completes.
    ///
    /// In-flight requests finish before this returns.
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::Internal(format!("listener address: {e}")))?;
        let reaper = self.spawn_reaper();
        tracing::info!(
            %addr,
            auth = self.validator.is_some(),
            lease_secs = self.config.session_lease.as_secs(),
            "sync server listening"
        );

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;
        reaper.abort();
        tracing::info!(%addr, "sync server stopped");

        result.map_err(|e| ServerError::Internal(format!("server failed: {e}")))
    }

    /// Binds `config.bind_addr` and serves until the process exits.
    pub async fn run(self) -> ServerResult<()> {
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| {
                ServerError::Internal(format!("cannot bind {}: {e}", self.config.bind_addr))
            })?;
        self.serve(listener).await
    }
}
