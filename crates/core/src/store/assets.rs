//! Namespaced asset record operations.
//!
//! Each namespace is its own table with an identical `(key, payload,
//! stored_at)` shape, so the queries are shared and only the table name
//! changes.

use super::connection::AssetDb;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// One of the three independent record collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// Character-to-font mappings keyed by style source identifier.
    FontMappings,
    /// Font binaries as data URIs keyed by absolute URL.
    FontData,
    /// Image binaries as data URIs keyed by absolute URL.
    ImageData,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Namespace::FontMappings, Namespace::FontData, Namespace::ImageData];

    /// Backing table name.
    pub fn table(self) -> &'static str {
        match self {
            Namespace::FontMappings => "font_mappings",
            Namespace::FontData => "font_data",
            Namespace::ImageData => "image_data",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// A stored asset.
///
/// `payload` is a data URI for binaries and JSON for font mappings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub key: String,
    pub payload: String,
}

impl AssetDb {
    /// Get a payload by key.
    ///
    /// Returns None if the key doesn't exist in the namespace.
    pub async fn get_asset(&self, namespace: Namespace, key: &str) -> Result<Option<String>, Error> {
        let key = key.to_string();
        let sql = format!("SELECT payload FROM {} WHERE key = ?1", namespace.table());
        self.conn
            .call(move |conn| -> Result<Option<String>, Error> {
                let mut stmt = conn.prepare(&sql)?;
                match stmt.query_row(params![key], |row| row.get(0)) {
                    Ok(payload) => Ok(Some(payload)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Insert or replace a payload.
    pub async fn put_asset(&self, namespace: Namespace, key: &str, payload: &str) -> Result<(), Error> {
        let key = key.to_string();
        let payload = payload.to_string();
        let stored_at = chrono::Utc::now().to_rfc3339();
        let sql = format!(
            "INSERT INTO {} (key, payload, stored_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                payload = excluded.payload,
                stored_at = excluded.stored_at",
            namespace.table()
        );
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(&sql, params![key, payload, stored_at])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Read every record in a namespace.
    pub async fn get_all_assets(&self, namespace: Namespace) -> Result<Vec<AssetRecord>, Error> {
        let sql = format!("SELECT key, payload FROM {} ORDER BY key", namespace.table());
        self.conn
            .call(move |conn| -> Result<Vec<AssetRecord>, Error> {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], |row| Ok(AssetRecord { key: row.get(0)?, payload: row.get(1)? }))?;
                let mut records = Vec::new();
                for row in rows {
                    records.push(row?);
                }
                Ok(records)
            })
            .await
            .map_err(Error::from)
    }

    /// Number of records in a namespace.
    pub async fn count_assets(&self, namespace: Namespace) -> Result<u64, Error> {
        let sql = format!("SELECT COUNT(*) FROM {}", namespace.table());
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every record in a namespace.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_assets(&self, namespace: Namespace) -> Result<u64, Error> {
        let sql = format!("DELETE FROM {}", namespace.table());
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute(&sql, [])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
