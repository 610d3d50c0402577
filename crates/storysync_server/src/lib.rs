//! # StorySync Server
//!
//! HTTP sync server for StorySync projects.
//!
//! This crate provides:
//! - HTTP endpoints (begin/end sync, upload, download, delete)
//! - Sync session management with lease expiry
//! - Hash-based conflict detection on upload
//! - Watermark and tombstone bookkeeping
//! - Authentication (HMAC-SHA256 bearer tokens)
//! - In-memory and file-backed entity stores
//!
//! # Architecture
//!
//! Every route is scoped to one project of one user. The server keeps, per
//! project:
//! - The current version of every entity, with its content hash
//! - A watermark (time of the last completed sync, highest known ID)
//! - Tombstones for deleted entities
//!
//! Entity operations are only permitted inside a sync session. A session is
//! opened with `begin_sync`, identified by an opaque sync ID, renewed by every
//! entity operation and closed with `end_sync`.
//!
//! # Authentication
//!
//! ```rust
//! use storysync_server::{AuthConfig, ServerConfig, TokenValidator};
//!
//! let secret = b"my-secure-secret-32-bytes-long!".to_vec();
//! let config = ServerConfig::default().with_auth(secret.clone());
//! assert!(config.require_auth);
//!
//! let validator = TokenValidator::new(AuthConfig::new(secret));
//! let token = validator.create_token(42).unwrap();
//! assert_eq!(validator.validate_token(&token).unwrap(), 42);
//! ```
//!
//! # Protocol
//!
//! 1. Client begins a session and learns what changed since the last sync
//! 2. Client uploads dirty entities with the hash it last saw from the server
//! 3. Server accepts or answers with its own version (conflict)
//! 4. Client downloads changed entities, skipping unchanged ones by hash
//! 5. Client ends the session, committing the watermark and receiving tombstones

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod http;
mod locks;
mod repository;
mod server;
mod session;
pub mod store;

pub use auth::{AuthConfig, TokenValidator};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use http::router;
pub use locks::{EntityLockGuard, EntityLocks};
pub use repository::{DownloadOutcome, ProjectRepository, SaveOutcome};
pub use server::SyncServer;
pub use session::{SessionManager, SyncSession};
pub use store::{EntityStore, FileStore, MemoryStore, StoreError, StoreResult, StoredEntity};
