//! MCP tool implementations.
//!
//! This module contains all tools exposed by the stitchcap server.

pub mod cache;
pub mod capture;
