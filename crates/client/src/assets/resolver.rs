//! Cache-aware resource resolution.
//!
//! Turns a resource reference into an inline `data:` URI, consulting the
//! memory layer, then the persistent store, then the network, and writing
//! back on every miss.
//!
//! The outcome has three shapes:
//! - `Ok(Some(data_uri))`: the resource is available inline
//! - `Ok(None)`: nothing to do (inline already, empty or malformed reference,
//!   or the host could not be reached)
//! - `Err(ResourceFetchFailed)`: the resource exists but could not be used

use std::sync::Arc;

use async_trait::async_trait;
use stitchcap_core::{Error, Namespace};
use url::Url;

use super::inline::encode_data_uri;
use super::memory::AssetCache;
use crate::fetch::{Fetcher, ResourceUrl, UrlError, classify};
use crate::raster::ResourceFetch;

/// Which kind of binary a resolver serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Image,
    Font,
}

impl AssetKind {
    pub fn namespace(self) -> Namespace {
        match self {
            AssetKind::Image => Namespace::ImageData,
            AssetKind::Font => Namespace::FontData,
        }
    }

    /// Whether a response with this media type is usable.
    ///
    /// Images must declare an `image/*` type; font servers are too
    /// inconsistent about font media types to gate on.
    fn accepts(self, mime: Option<&str>) -> bool {
        match self {
            AssetKind::Image => mime.is_some_and(|m| m.starts_with("image/")),
            AssetKind::Font => true,
        }
    }

    fn fallback_mime(self) -> &'static str {
        match self {
            AssetKind::Image => "image/png",
            AssetKind::Font => "application/octet-stream",
        }
    }
}

/// Resolver for one asset kind.
///
/// Safe to call many times per capture from concurrent tasks; calls share
/// nothing but the cache.
pub struct Resolver {
    kind: AssetKind,
    cache: Arc<AssetCache>,
    fetcher: Arc<dyn Fetcher>,
    base: Option<Url>,
}

impl Resolver {
    pub fn new(kind: AssetKind, cache: Arc<AssetCache>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { kind, cache, fetcher, base: None }
    }

    /// Resolve relative references against `base`.
    pub fn with_base(mut self, base: Option<Url>) -> Self {
        self.base = base;
        self
    }

    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    /// Resolve `reference` into an inline payload.
    pub async fn resolve(&self, reference: &str) -> Result<Option<String>, Error> {
        let url = match classify(reference, self.base.as_ref()) {
            Ok(ResourceUrl::Remote(url)) => url,
            Ok(ResourceUrl::Inline) => {
                tracing::debug!("reference is already inline; no fetch needed");
                return Ok(None);
            }
            Ok(ResourceUrl::RootOnly(url)) => {
                tracing::error!(
                    url = %url,
                    "reference resolves to the document root, likely an empty src attribute; skipping"
                );
                return Ok(None);
            }
            Err(UrlError::Empty) => {
                tracing::warn!("empty resource reference; skipping");
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!(reference = %reference, error = %e, "invalid resource reference; skipping");
                return Ok(None);
            }
        };

        let namespace = self.kind.namespace();
        let key = url.as_str();

        if let Some(payload) = self.cache.lookup(namespace, key).await {
            tracing::debug!(url = %key, "memory cache hit");
            return Ok(Some(payload));
        }

        match self.cache.persistent().get(namespace, key).await {
            Ok(Some(payload)) => {
                tracing::debug!(url = %key, "asset store hit");
                self.cache.remember(namespace, key, &payload).await;
                return Ok(Some(payload));
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(url = %key, error = %e, "asset store lookup failed; using network"),
        }

        tracing::info!(url = %key, kind = ?self.kind, "not cached; fetching from network");
        let response = match self.fetcher.fetch(&url).await {
            Ok(response) => response,
            Err(Error::Unreachable(reason)) => {
                tracing::warn!(url = %key, error = %reason, "resource unreachable; leaving reference as is");
                return Ok(None);
            }
            Err(e) => {
                tracing::error!(url = %key, error = %e, "resource fetch failed");
                return Err(Error::fetch_failed(key, e));
            }
        };

        let mime = response.mime();
        if !self.kind.accepts(mime.as_deref()) {
            tracing::error!(url = %key, content_type = ?response.content_type, "response is not an image");
            return Err(Error::fetch_failed(
                key,
                format!("unexpected content type: {}", mime.as_deref().unwrap_or("none")),
            ));
        }

        let payload = encode_data_uri(mime.as_deref().unwrap_or(self.kind.fallback_mime()), &response.bytes);
        self.cache.store(namespace, key, &payload).await;
        tracing::debug!(url = %key, bytes = response.bytes.len(), "resource inlined and cached");

        Ok(Some(payload))
    }
}

#[async_trait]
impl ResourceFetch for Resolver {
    async fn fetch_resource(&self, url: &str) -> Result<Option<String>, Error> {
        self.resolve(url).await
    }
}
