//! Inlined CSS for the page's icon font.
//!
//! Icon glyphs live in private-use code points that no text scan would
//! request, so the icon font's rules are inlined whole, once.

use futures_util::future::join_all;
use tokio::sync::RwLock;
use url::Url;

use super::css;
use crate::assets::Resolver;
use crate::fetch::is_inline;
use crate::raster::DocumentHost;

/// Single-entry cache of the icon font CSS.
#[derive(Default)]
pub struct IconFontCache {
    css: RwLock<Option<String>>,
}

impl IconFontCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Icon font rules with every `url(...)` inlined.
    ///
    /// Built on first use and kept for the life of the cache. Finding no
    /// rules is not cached, so a late-loading stylesheet is picked up by the
    /// next capture.
    pub async fn css(&self, host: &dyn DocumentHost, family: &str, fonts: &Resolver) -> String {
        if let Some(css) = self.css.read().await.as_ref() {
            tracing::debug!("icon font CSS served from memory");
            return css.clone();
        }

        let rules = match host.icon_font_rules(family).await {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!(family, error = %e, "icon font rules unavailable");
                return String::new();
            }
        };
        if rules.is_empty() {
            tracing::warn!(family, "no icon font rules found");
            return String::new();
        }

        let document = host.base_url().await;
        let inlined = join_all(
            rules
                .iter()
                .map(|(rule, sheet)| inline_rule(rule, sheet.as_ref().or(document.as_ref()), fonts)),
        )
        .await;

        let css = inlined.join("\n");
        tracing::info!(family, rules = inlined.len(), "icon font CSS inlined");
        *self.css.write().await = Some(css.clone());
        css
    }

    pub async fn clear(&self) {
        *self.css.write().await = None;
    }
}

async fn inline_rule(rule: &str, base: Option<&Url>, fonts: &Resolver) -> String {
    let mut out = rule.to_string();
    for token in css::url_tokens(rule) {
        let Some(url) = css::resolve_reference(token.reference, base) else { continue };
        if is_inline(&url) {
            continue;
        }
        match fonts.resolve(&url).await {
            Ok(Some(data)) => out = out.replacen(token.token, &format!("url(\"{data}\")"), 1),
            Ok(None) => {}
            Err(e) => tracing::warn!(url = %url, error = %e, "icon font file skipped"),
        }
    }
    out
}
