//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Request timeout.
    pub request_timeout: Duration,
    /// Idle time after which a sync session expires.
    pub session_lease: Duration,
    /// How often expired sessions are reaped.
    pub reap_interval: Duration,
    /// How long tombstones are kept.
    pub tombstone_retention: Duration,
    /// Whether `begin_sync` creates projects that do not exist yet.
    pub create_missing_projects: bool,
    /// Whether to require authentication.
    pub require_auth: bool,
    /// Secret key for token validation (if auth enabled).
    pub auth_secret: Option<Vec<u8>>,
    /// Lifetime of issued tokens.
    pub token_expiry: Duration,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            request_timeout: Duration::from_secs(30),
            session_lease: Duration::from_secs(5 * 60),
            reap_interval: Duration::from_secs(60),
            tombstone_retention: Duration::from_secs(30 * 24 * 60 * 60),
            create_missing_projects: true,
            require_auth: false,
            auth_secret: None,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the session lease.
    pub fn with_session_lease(mut self, lease: Duration) -> Self {
        self.session_lease = lease;
        self
    }

    /// Sets the interval of the expired-session reaper.
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Sets the tombstone retention period.
    pub fn with_tombstone_retention(mut self, retention: Duration) -> Self {
        self.tombstone_retention = retention;
        self
    }

    /// Sets whether missing projects are created on `begin_sync`.
    pub fn with_create_missing_projects(mut self, create: bool) -> Self {
        self.create_missing_projects = create;
        self
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.require_auth = true;
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the token lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.session_lease, Duration::from_secs(300));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.create_missing_projects);
        assert!(!config.require_auth);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap())
            .with_session_lease(Duration::from_secs(10))
            .with_tombstone_retention(Duration::from_secs(3600))
            .with_create_missing_projects(false)
            .with_auth(vec![1, 2, 3, 4]);

        assert_eq!(config.session_lease, Duration::from_secs(10));
        assert_eq!(config.tombstone_retention, Duration::from_secs(3600));
        assert!(!config.create_missing_projects);
        assert!(config.require_auth);
        assert_eq!(config.auth_secret, Some(vec![1, 2, 3, 4]));
    }
}
