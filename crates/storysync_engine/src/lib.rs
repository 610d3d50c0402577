//! # StorySync Engine
//!
//! Client sync engine for StorySync projects.
//!
//! This crate provides:
//! - Sync state machine (idle → begin → upload → download → end → synced)
//! - Sync marker management
//! - Conflict detection and resolution
//! - Retry with exponential backoff
//! - HTTP transport abstraction with a `reqwest` client
//! - In-memory local project for tests and embedding
//!
//! ## Architecture
//!
//! One sync pass runs inside one server session:
//! 1. Begin the session and learn the server's watermark
//! 2. Push pending deletions, then upload dirty entities with the hash each
//!    was last synced at; resolve conflicts by policy
//! 3. Download what changed since the local sync marker, skipping
//!    unchanged entities by hash
//! 4. End the session, apply the tombstone sweep and store the new marker
//!
//! ## Key Invariants
//!
//! - A local edit is never overwritten without a conflict resolution
//! - An entity is only marked clean with the hash the server acknowledged
//! - The sync marker only advances after a completed pass

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod http;
mod local;
mod resolver;
mod state;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestClient};
pub use local::{DirtyEntity, LocalProject, MemoryLocalProject};
pub use resolver::ConflictResolver;
pub use state::{SyncCycleResult, SyncEngine, SyncState, SyncStats};
pub use transport::{DownloadResult, MockCall, MockTransport, SyncTransport, UploadResult};
