//! Font subsetting: inline only the font files a capture's text needs.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use stitchcap_core::{Error, Namespace};
use tokio::sync::RwLock;

use super::css::{self, StyleSource};
use super::mapping::FontMapping;
use crate::assets::{AssetCache, Resolver};
use crate::fetch::{Fetcher, is_inline};
use crate::raster::DocumentHost;

/// What [`FontSubsetter::ensure_mapping`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingOutcome {
    /// The active mapping already belongs to the current style source.
    AlreadyActive,
    /// Activated from the persistent store.
    LoadedFromStore,
    /// Scanned from the stylesheet, persisted and activated.
    Built,
    /// No custom fonts; the active slot is now empty.
    NoFontFaces,
}

/// The single active mapping and the source it was built from.
#[derive(Debug)]
struct ActiveMapping {
    source: StyleSource,
    mapping: FontMapping,
}

/// Maintains the active font mapping and produces per-capture font CSS.
pub struct FontSubsetter {
    cache: Arc<AssetCache>,
    fonts: Arc<Resolver>,
    fetcher: Arc<dyn Fetcher>,
    active: RwLock<Option<Arc<ActiveMapping>>>,
    stylesheets: RwLock<HashMap<String, Arc<str>>>,
}

impl FontSubsetter {
    pub fn new(cache: Arc<AssetCache>, fonts: Arc<Resolver>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { cache, fonts, fetcher, active: RwLock::new(None), stylesheets: RwLock::new(HashMap::new()) }
    }

    /// Identifier of the active mapping, if any.
    pub async fn active_source(&self) -> Option<String> {
        self.active.read().await.as_ref().map(|a| a.mapping.source_id.clone())
    }

    /// Make the mapping for the document's current style source active.
    ///
    /// A stylesheet that cannot be downloaded leaves the active slot as it
    /// was and returns the fetch error.
    pub async fn ensure_mapping(&self, host: &dyn DocumentHost) -> Result<MappingOutcome, Error> {
        let base = host.base_url().await;
        let raw = host.style_source_text().await?;

        let source = match raw.as_deref() {
            None => {
                tracing::warn!("style source node not found; using default fonts");
                None
            }
            Some(raw) => StyleSource::detect(raw, base.as_ref()),
        };
        let Some(source) = source else {
            self.deactivate().await;
            return Ok(MappingOutcome::NoFontFaces);
        };

        let id = source.id();
        if self.active.read().await.as_ref().is_some_and(|a| a.mapping.source_id == id) {
            tracing::debug!(source = %id, "font mapping already active");
            return Ok(MappingOutcome::AlreadyActive);
        }

        match self.cache.persistent().get(Namespace::FontMappings, &id).await {
            Ok(Some(payload)) => match FontMapping::from_payload(&id, &payload) {
                Ok(mapping) => {
                    tracing::info!(source = %id, "font mapping loaded from store");
                    self.activate(source, mapping).await;
                    return Ok(MappingOutcome::LoadedFromStore);
                }
                Err(e) => tracing::warn!(source = %id, error = %e, "discarding stored font mapping"),
            },
            Ok(None) => {}
            Err(e) => tracing::debug!(source = %id, error = %e, "font mapping store unavailable"),
        }

        let text = self.stylesheet_text(&source).await?;
        let mapping = FontMapping::build(&source, &text);
        if mapping.is_empty() {
            tracing::error!(source = %id, "font-face rules found but none had a usable source");
            self.deactivate().await;
            return Ok(MappingOutcome::NoFontFaces);
        }

        match mapping.to_payload() {
            Ok(payload) => {
                if let Err(e) = self.cache.persistent().put(Namespace::FontMappings, &id, &payload).await {
                    tracing::warn!(source = %id, error = %e, "font mapping not persisted");
                }
            }
            Err(e) => tracing::warn!(source = %id, error = %e, "font mapping not serializable"),
        }

        tracing::info!(source = %id, ranges = mapping.ranges().len(), "font mapping built");
        self.activate(source, mapping).await;
        Ok(MappingOutcome::Built)
    }

    /// `@font-face` rules for exactly the fonts `text` needs, with their
    /// sources inlined. Empty when no mapping is active.
    pub async fn build_subset_css(&self, text: &str) -> String {
        let Some(active) = self.active.read().await.clone() else {
            tracing::debug!("no active font mapping; skipping font subsetting");
            return String::new();
        };

        let required = active.mapping.required_urls(text);
        if required.is_empty() {
            return String::new();
        }

        let fetched = required.iter().filter(|url| !is_inline(url));
        let resolved: HashMap<String, String> = join_all(fetched.map(|url| async move {
            match self.fonts.resolve(url).await {
                Ok(Some(data)) => Some((url.clone(), data)),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "font skipped");
                    None
                }
            }
        }))
        .await
        .into_iter()
        .flatten()
        .collect();

        let stylesheet = match self.stylesheet_text(&active.source).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "font stylesheet unavailable; skipping font subsetting");
                return String::new();
            }
        };

        let rules: Vec<String> = css::font_faces(&stylesheet)
            .filter_map(|rule| {
                let src = rule.first_url()?;
                let url = css::resolve_reference(src.reference, active.source.base())?;
                if is_inline(&url) {
                    return required.contains(&url).then(|| rule.block.to_string());
                }
                let data = resolved.get(&url)?;
                Some(rule.block.replacen(src.token, &format!("url(\"{data}\")"), 1))
            })
            .collect();

        tracing::info!(required = required.len(), rules = rules.len(), "generated subset font CSS");
        rules.join("\n")
    }

    /// Forget downloaded stylesheet text after the style source changed.
    pub async fn invalidate_style_source(&self) {
        let mut stylesheets = self.stylesheets.write().await;
        if !stylesheets.is_empty() {
            tracing::info!(entries = stylesheets.len(), "stylesheet text cache cleared");
        }
        stylesheets.clear();
    }

    async fn activate(&self, source: StyleSource, mapping: FontMapping) {
        *self.active.write().await = Some(Arc::new(ActiveMapping { source, mapping }));
    }

    async fn deactivate(&self) {
        if self.active.write().await.take().is_some() {
            tracing::info!("active font mapping cleared");
        }
    }

    async fn stylesheet_text(&self, source: &StyleSource) -> Result<Arc<str>, Error> {
        let url = match source {
            StyleSource::Inline { css, .. } => return Ok(Arc::from(css.as_str())),
            StyleSource::External { url } => url,
        };

        if let Some(text) = self.stylesheets.read().await.get(url.as_str()) {
            tracing::debug!(url = %url, "stylesheet text served from memory");
            return Ok(text.clone());
        }

        tracing::info!(url = %url, "downloading font stylesheet");
        let response = self.fetcher.fetch(url).await.map_err(|e| {
            tracing::error!(url = %url, error = %e, "font stylesheet download failed");
            Error::fetch_failed(url.as_str(), e)
        })?;
        let text: Arc<str> = Arc::from(response.text());
        self.stylesheets.write().await.insert(url.to_string(), text.clone());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetKind;
    use crate::testing::{StubFetcher, StubHost};
    use stitchcap_core::AssetStore;

    const CSS_URL: &str = "https://fonts.example.com/css/noto.css";
    const LATIN: &str = "https://fonts.example.com/f/latin.woff2";
    const CJK: &str = "https://fonts.example.com/f/cjk.woff2";
    const CYRILLIC: &str = "https://fonts.example.com/f/cyrillic.woff2";

    const STYLESHEET: &str = "\
@font-face { font-family: N; src: url(../f/latin.woff2) format('woff2'); unicode-range: U+0000-00FF; }
@font-face { font-family: N; src: url(../f/cjk.woff2) format('woff2'); unicode-range: U+4E00-9FFF; }
@font-face { font-family: N; src: url(../f/cyrillic.woff2) format('woff2'); unicode-range: U+0400-04FF; }";

    fn fetcher() -> StubFetcher {
        StubFetcher::default()
            .with(CSS_URL, 200, Some("text/css"), STYLESHEET.as_bytes())
            .with(LATIN, 200, Some("font/woff2"), b"latin")
            .with(CJK, 200, Some("font/woff2"), b"cjk")
            .with(CYRILLIC, 200, Some("font/woff2"), b"cyrillic")
    }

    fn setup(fetcher: StubFetcher) -> (FontSubsetter, Arc<AssetCache>, Arc<StubFetcher>) {
        let cache = Arc::new(AssetCache::new(Arc::new(AssetStore::in_memory())));
        let fetcher = Arc::new(fetcher);
        let fonts = Arc::new(Resolver::new(AssetKind::Font, cache.clone(), fetcher.clone()));
        (FontSubsetter::new(cache.clone(), fonts, fetcher.clone()), cache, fetcher)
    }

    fn import_host() -> StubHost {
        let host = StubHost::new();
        host.set_style_text(Some(&format!("@import url('{CSS_URL}');")));
        host
    }

    #[tokio::test]
    async fn test_build_then_already_active() {
        let (subsetter, cache, fetcher) = setup(fetcher());
        let host = import_host();

        assert_eq!(subsetter.ensure_mapping(&host).await.unwrap(), MappingOutcome::Built);
        assert_eq!(subsetter.ensure_mapping(&host).await.unwrap(), MappingOutcome::AlreadyActive);

        assert_eq!(fetcher.call_count(CSS_URL), 1);
        assert_eq!(subsetter.active_source().await.as_deref(), Some(CSS_URL));
        assert!(cache.persistent().get(Namespace::FontMappings, CSS_URL).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_mapping_loaded_from_store() {
        let (first, cache, _) = setup(fetcher());
        let host = import_host();
        first.ensure_mapping(&host).await.unwrap();

        let fetcher = Arc::new(StubFetcher::default());
        let fonts = Arc::new(Resolver::new(AssetKind::Font, cache.clone(), fetcher.clone()));
        let second = FontSubsetter::new(cache, fonts, fetcher.clone());

        assert_eq!(second.ensure_mapping(&host).await.unwrap(), MappingOutcome::LoadedFromStore);
        assert_eq!(fetcher.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_subset_includes_only_needed_fonts() {
        let (subsetter, _cache, fetcher) = setup(fetcher());
        subsetter.ensure_mapping(&import_host()).await.unwrap();

        let css = subsetter.build_subset_css("hello 水").await;

        assert_eq!(css.matches("@font-face").count(), 2);
        assert!(css.contains("data:font/woff2;base64,"));
        assert!(!css.contains("../f/"));
        assert!(css.contains("format('woff2')"));
        assert_eq!(fetcher.call_count(CYRILLIC), 0);
        assert_eq!(fetcher.call_count(LATIN), 1);
        assert_eq!(fetcher.call_count(CJK), 1);
        assert_eq!(fetcher.call_count(CSS_URL), 1);
    }

    #[tokio::test]
    async fn test_failed_font_is_skipped() {
        let stub = StubFetcher::default()
            .with(CSS_URL, 200, Some("text/css"), STYLESHEET.as_bytes())
            .with(LATIN, 200, Some("font/woff2"), b"latin")
            .with(CJK, 404, None, b"");
        let (subsetter, _cache, _fetcher) = setup(stub);
        subsetter.ensure_mapping(&import_host()).await.unwrap();

        let css = subsetter.build_subset_css("a水").await;

        assert_eq!(css.matches("@font-face").count(), 1);
        assert!(css.contains("data:font/woff2;base64,"));
    }

    #[tokio::test]
    async fn test_no_custom_fonts_clears_slot() {
        let (subsetter, _cache, _fetcher) = setup(fetcher());
        let host = import_host();
        subsetter.ensure_mapping(&host).await.unwrap();

        host.set_style_text(Some("body { color: red }"));
        assert_eq!(subsetter.ensure_mapping(&host).await.unwrap(), MappingOutcome::NoFontFaces);
        assert_eq!(subsetter.active_source().await, None);
        assert_eq!(subsetter.build_subset_css("hello").await, "");

        host.set_style_text(None);
        assert_eq!(subsetter.ensure_mapping(&host).await.unwrap(), MappingOutcome::NoFontFaces);
    }

    #[tokio::test]
    async fn test_inline_rules_use_document_base() {
        let (subsetter, _cache, fetcher) = setup(
            StubFetcher::default().with("https://chat.example.com/fonts/a.woff2", 200, Some("font/woff2"), b"a"),
        );
        let host = StubHost::new();
        host.set_style_text(Some("@font-face { font-family: A; src: url('fonts/a.woff2'); }"));

        assert_eq!(subsetter.ensure_mapping(&host).await.unwrap(), MappingOutcome::Built);
        assert!(subsetter.active_source().await.unwrap().starts_with("inline-style:"));

        let css = subsetter.build_subset_css("").await;
        assert!(css.contains("url(\"data:font/woff2;base64,"));
        assert_eq!(fetcher.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_already_inline_font_kept_as_is() {
        let (subsetter, _cache, fetcher) = setup(StubFetcher::default());
        let host = StubHost::new();
        let rule = "@font-face { font-family: A; src: url(data:font/woff2;base64,AAAA) format('woff2'); }";
        host.set_style_text(Some(rule));

        assert_eq!(subsetter.ensure_mapping(&host).await.unwrap(), MappingOutcome::Built);

        let css = subsetter.build_subset_css("hello").await;
        assert_eq!(css, rule);
        assert_eq!(fetcher.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_stylesheet_download_failure_keeps_active_slot() {
        let (subsetter, _cache, _fetcher) = setup(fetcher());
        let host = import_host();
        subsetter.ensure_mapping(&host).await.unwrap();

        host.set_style_text(Some("@import url('https://fonts.example.com/missing.css');"));
        let result = subsetter.ensure_mapping(&host).await;

        assert!(matches!(result, Err(Error::ResourceFetchFailed { .. })));
        assert_eq!(subsetter.active_source().await.as_deref(), Some(CSS_URL));
    }

    #[tokio::test]
    async fn test_invalidate_refetches_stylesheet() {
        let (subsetter, _cache, fetcher) = setup(fetcher());
        subsetter.ensure_mapping(&import_host()).await.unwrap();
        subsetter.build_subset_css("a").await;
        assert_eq!(fetcher.call_count(CSS_URL), 1);

        subsetter.invalidate_style_source().await;
        subsetter.build_subset_css("a").await;
        assert_eq!(fetcher.call_count(CSS_URL), 2);
    }
}
