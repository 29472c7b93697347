//! URL classification for resource lookups.
//!
//! Resource references arrive from markup and stylesheets: they may be
//! relative, already inline, or empty. Everything that reaches the cache
//! or the network is first turned into a canonical absolute URL here.

use url::Url;

/// Error type for resource URL failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// How a resource reference should be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceUrl {
    /// Absolute http(s) URL worth looking up.
    Remote(Url),
    /// Already a `data:` URI; nothing to fetch.
    Inline,
    /// The document root with no query or fragment, which is what an empty
    /// `src` attribute resolves to.
    RootOnly(Url),
}

/// Whether `input` is already in inline data form.
pub fn is_inline(input: &str) -> bool {
    input.trim_start().get(..5).is_some_and(|prefix| prefix.eq_ignore_ascii_case("data:"))
}

/// Classify a resource reference, resolving it against `base`.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Resolve relative references against `base`
/// 3. Reject anything that is not http(s)
/// 4. Lowercase the host (done by the URL parser)
pub fn classify(input: &str, base: Option<&Url>) -> Result<ResourceUrl, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    if is_inline(trimmed) {
        return Ok(ResourceUrl::Inline);
    }

    let parsed = match base {
        Some(base) => base.join(trimmed),
        None => Url::parse(trimmed),
    }
    .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    if parsed.path() == "/" && parsed.query().is_none() && parsed.fragment().is_none() {
        return Ok(ResourceUrl::RootOnly(parsed));
    }

    Ok(ResourceUrl::Remote(parsed))
}

/// Resolve `reference` against `base` into an absolute URL string.
///
/// Used for font-face sources, which are compared by their absolute form.
pub fn absolutize(reference: &str, base: &Url) -> Result<String, UrlError> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }
    if is_inline(trimmed) {
        return Ok(trimmed.to_string());
    }
    base.join(trimmed)
        .map(String::from)
        .map_err(|e| UrlError::InvalidUrl(e.to_string()))
}
