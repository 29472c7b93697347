//! Process-lifetime memory layer over the persistent asset store.
//!
//! Lookups never touch the database. Stores land in memory immediately and
//! are written through to the [`AssetStore`] on a spawned task; a failed
//! write is logged and otherwise ignored, since the memory copy is already
//! serving reads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use stitchcap_core::{AssetStore, Namespace};
use tokio::sync::RwLock;
use tokio::task::JoinSet;

/// Counts loaded by [`AssetCache::hydrate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrationReport {
    pub fonts: usize,
    pub images: usize,
}

/// Two-level asset cache: memory tables in front of the persistent store.
pub struct AssetCache {
    store: Arc<AssetStore>,
    tables: RwLock<HashMap<Namespace, HashMap<String, String>>>,
    writes: Mutex<JoinSet<()>>,
}

impl AssetCache {
    pub fn new(store: Arc<AssetStore>) -> Self {
        Self { store, tables: RwLock::new(HashMap::new()), writes: Mutex::new(JoinSet::new()) }
    }

    /// The persistent layer.
    pub fn persistent(&self) -> &Arc<AssetStore> {
        &self.store
    }

    /// Pre-load font and image payloads from the persistent store.
    ///
    /// A namespace that fails to load is logged and skipped; lookups for it
    /// simply fall through to the store or the network later.
    pub async fn hydrate(&self) -> HydrationReport {
        let start = Instant::now();
        let (fonts, images) = tokio::join!(
            self.hydrate_namespace(Namespace::FontData),
            self.hydrate_namespace(Namespace::ImageData)
        );
        let report = HydrationReport { fonts, images };
        tracing::info!(
            fonts = report.fonts,
            images = report.images,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "asset memory cache hydrated"
        );
        report
    }

    async fn hydrate_namespace(&self, namespace: Namespace) -> usize {
        match self.store.get_all(namespace).await {
            Ok(records) => {
                let count = records.len();
                let mut tables = self.tables.write().await;
                let table = tables.entry(namespace).or_default();
                for record in records {
                    table.insert(record.key, record.payload);
                }
                count
            }
            Err(e) => {
                tracing::warn!(%namespace, error = %e, "skipping hydration");
                0
            }
        }
    }

    /// Memory-only lookup.
    pub async fn lookup(&self, namespace: Namespace, key: &str) -> Option<String> {
        self.tables
            .read()
            .await
            .get(&namespace)
            .and_then(|table| table.get(key))
            .cloned()
    }

    /// Populate memory without writing through (used after a store hit).
    pub async fn remember(&self, namespace: Namespace, key: &str, payload: &str) {
        self.tables
            .write()
            .await
            .entry(namespace)
            .or_default()
            .insert(key.to_string(), payload.to_string());
    }

    /// Insert into memory and write through to the persistent store.
    ///
    /// Returns once the memory table is updated; the persistent write runs
    /// in the background.
    pub async fn store(&self, namespace: Namespace, key: &str, payload: &str) {
        self.remember(namespace, key, payload).await;

        let store = self.store.clone();
        let key = key.to_string();
        let payload = payload.to_string();
        let mut writes = self.writes();
        while writes.try_join_next().is_some() {}
        writes.spawn(async move {
            if let Err(e) = store.put(namespace, &key, &payload).await {
                tracing::warn!(%namespace, key = %key, error = %e, "asset write-through failed");
            }
        });
    }

    /// Wait for every pending write-through to finish.
    pub async fn flush(&self) {
        let mut pending = std::mem::take(&mut *self.writes());
        while pending.join_next().await.is_some() {}
    }

    /// Drop the memory table for a namespace.
    pub async fn clear(&self, namespace: Namespace) {
        self.tables.write().await.remove(&namespace);
    }

    /// Number of entries held in memory for a namespace.
    pub async fn len(&self, namespace: Namespace) -> usize {
        self.tables.read().await.get(&namespace).map_or(0, HashMap::len)
    }

    fn writes(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.writes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_writes_through() {
        let store = Arc::new(AssetStore::in_memory());
        let cache = AssetCache::new(store.clone());

        cache.store(Namespace::ImageData, "https://example.com/a.png", "data:x").await;
        assert_eq!(cache.lookup(Namespace::ImageData, "https://example.com/a.png").await.as_deref(), Some("data:x"));

        cache.flush().await;
        assert_eq!(
            store.get(Namespace::ImageData, "https://example.com/a.png").await.unwrap().as_deref(),
            Some("data:x")
        );
    }

    #[tokio::test]
    async fn test_persistent_shares_store_handle() {
        let store = Arc::new(AssetStore::in_memory());
        let cache = AssetCache::new(store.clone());
        assert!(Arc::ptr_eq(cache.persistent(), &store));

        cache.store(Namespace::FontData, "f", "payload").await;
        cache.flush().await;
        assert_eq!(cache.persistent().count(Namespace::FontData).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_hydrate_loads_fonts_and_images() {
        let store = Arc::new(AssetStore::in_memory());
        store.put(Namespace::FontData, "f1", "font").await.unwrap();
        store.put(Namespace::ImageData, "i1", "img").await.unwrap();
        store.put(Namespace::ImageData, "i2", "img").await.unwrap();
        store.put(Namespace::FontMappings, "m1", "{}").await.unwrap();

        let cache = AssetCache::new(store);
        let report = cache.hydrate().await;

        assert_eq!(report, HydrationReport { fonts: 1, images: 2 });
        assert_eq!(cache.lookup(Namespace::FontData, "f1").await.as_deref(), Some("font"));
        assert_eq!(cache.len(Namespace::FontMappings).await, 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_degrades_to_memory() {
        let store = Arc::new(AssetStore::new("/nonexistent-dir/definitely/missing/assets.sqlite"));
        let cache = AssetCache::new(store);

        assert_eq!(cache.hydrate().await, HydrationReport::default());

        cache.store(Namespace::FontData, "f", "payload").await;
        cache.flush().await;
        assert_eq!(cache.lookup(Namespace::FontData, "f").await.as_deref(), Some("payload"));
    }

    #[tokio::test]
    async fn test_clear_namespace() {
        let cache = AssetCache::new(Arc::new(AssetStore::in_memory()));
        cache.remember(Namespace::ImageData, "a", "1").await;
        cache.remember(Namespace::FontData, "b", "2").await;

        cache.clear(Namespace::ImageData).await;

        assert_eq!(cache.len(Namespace::ImageData).await, 0);
        assert_eq!(cache.len(Namespace::FontData).await, 1);
    }
}
