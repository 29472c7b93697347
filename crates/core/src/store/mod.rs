//! SQLite-backed persistent asset store.
//!
//! Durable key-value storage with three independent namespaces: font
//! mappings by style source, font binaries by URL, and image binaries by
//! URL. Access is async via tokio-rusqlite.
//!
//! The [`AssetStore`] handle opens the database lazily on first use. When
//! the database cannot be opened every call fails with
//! [`Error::StorageUnavailable`] and callers fall back to memory-only or
//! network-only operation.

pub mod assets;
pub mod connection;
pub mod hash;
pub mod migrations;

pub use crate::Error;

pub use assets::{AssetRecord, Namespace};
pub use connection::AssetDb;

use std::path::PathBuf;
use tokio::sync::OnceCell;

enum Location {
    File(PathBuf),
    Memory,
}

/// Lazily opened asset store.
///
/// `init` is idempotent and safe to call from concurrent tasks: all callers
/// await the same open. A failed open is not cached, so a later call may
/// retry once the underlying problem is fixed.
pub struct AssetStore {
    location: Location,
    db: OnceCell<AssetDb>,
}

impl AssetStore {
    /// Store backed by the SQLite file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { location: Location::File(path.into()), db: OnceCell::new() }
    }

    /// Store backed by an in-memory database.
    pub fn in_memory() -> Self {
        Self { location: Location::Memory, db: OnceCell::new() }
    }

    /// Open the database, creating it and its namespaces on first run.
    pub async fn init(&self) -> Result<&AssetDb, Error> {
        self.db
            .get_or_try_init(|| async {
                let opened = match &self.location {
                    Location::File(path) => AssetDb::open(path).await,
                    Location::Memory => AssetDb::open_in_memory().await,
                };
                opened.map_err(|e| {
                    tracing::error!(error = %e, "failed to open asset store");
                    Error::StorageUnavailable(e.to_string())
                })
            })
            .await
    }

    pub async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<String>, Error> {
        self.init().await?.get_asset(namespace, key).await
    }

    pub async fn put(&self, namespace: Namespace, key: &str, payload: &str) -> Result<(), Error> {
        self.init().await?.put_asset(namespace, key, payload).await
    }

    pub async fn get_all(&self, namespace: Namespace) -> Result<Vec<AssetRecord>, Error> {
        self.init().await?.get_all_assets(namespace).await
    }

    pub async fn count(&self, namespace: Namespace) -> Result<u64, Error> {
        self.init().await?.count_assets(namespace).await
    }

    pub async fn purge(&self, namespace: Namespace) -> Result<u64, Error> {
        self.init().await?.purge_assets(namespace).await
    }
}
