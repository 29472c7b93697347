//! Cache-related MCP tools.
//!
//! This module provides tools for managing the persistent asset store.

pub mod purge;

pub use purge::{CachePurgeParams, purge_impl};
