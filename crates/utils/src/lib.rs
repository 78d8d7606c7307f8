//! Shared utilities for the failover cache workspace
//!
//! Small helpers that the cache crate leans on but that have nothing to do
//! with caching itself: tracing bootstrap, XDG directory resolution and
//! crash-safe file writes.

pub mod atomic_file;
pub mod tracing;
pub mod xdg;

pub use atomic_file::*;
pub use xdg::*;
