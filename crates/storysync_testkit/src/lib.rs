//! # StorySync Testkit
//!
//! Test utilities for StorySync.
//!
//! This crate provides:
//! - Entity fixtures with fixed timestamps
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use storysync_testkit::prelude::*;
//!
//! let note = sample_note(1, "Opening line");
//! assert_eq!(note.id(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
