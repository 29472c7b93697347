//! Core types and shared functionality for stitchcap.
//!
//! This crate provides:
//! - Persistent asset store with SQLite backend
//! - Unified error types
//! - Configuration structures

pub mod config;
pub mod error;
pub mod store;

pub use config::{AppConfig, CaptureOptions, ConfigError, OutputFormat, SelectorConfig};
pub use error::Error;
pub use store::{AssetDb, AssetRecord, AssetStore, Namespace};
