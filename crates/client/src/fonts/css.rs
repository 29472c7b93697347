//! Just enough CSS scanning for `@import` and `@font-face`.
//!
//! Style sources are user-authored snippets or well-formed font
//! stylesheets, so block-level regex scanning is sufficient; nested braces
//! inside a font-face block are not supported.

use std::sync::LazyLock;

use regex::Regex;
use stitchcap_core::store::hash::inline_style_id;
use url::Url;

use crate::fetch::absolutize;

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"@import\s+url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)"#).expect("import pattern")
});

static FONT_FACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@font-face\s*\{([^}]*)\}").expect("font-face pattern"));

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"']*?))\s*\)"#).expect("url pattern")
});

static UNICODE_RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)unicode-range\s*:\s*([^;]*)(?:;|$)").expect("unicode-range pattern"));

const MAX_CODE_POINT: u32 = 0x10FFFF;

/// Where a document's custom font declarations come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleSource {
    /// An `@import`ed stylesheet, identified by its URL.
    External { url: Url },
    /// `@font-face` rules written inline, resolved against the document URL.
    Inline { css: String, base: Option<Url> },
}

impl StyleSource {
    /// Classify the text of the style node.
    ///
    /// An `@import` wins over inline rules; text with neither means the
    /// document uses no custom fonts.
    pub fn detect(raw: &str, base: Option<&Url>) -> Option<Self> {
        if raw.trim().is_empty() {
            return None;
        }

        if let Some(reference) = IMPORT_RE.captures(raw).and_then(|caps| first_group(&caps)) {
            let parsed = match base {
                Some(base) => base.join(reference),
                None => Url::parse(reference),
            };
            match parsed {
                Ok(url) => return Some(StyleSource::External { url }),
                Err(e) => tracing::warn!(reference = %reference, error = %e, "unusable @import URL"),
            }
        }

        if raw.contains("@font-face") {
            return Some(StyleSource::Inline { css: raw.to_string(), base: base.cloned() });
        }

        None
    }

    /// Identifier used as the font mapping key.
    pub fn id(&self) -> String {
        match self {
            StyleSource::External { url } => url.to_string(),
            StyleSource::Inline { css, .. } => inline_style_id(css),
        }
    }

    /// URL that relative font references resolve against.
    pub fn base(&self) -> Option<&Url> {
        match self {
            StyleSource::External { url } => Some(url),
            StyleSource::Inline { base, .. } => base.as_ref(),
        }
    }
}

/// A `url(...)` token and the reference inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrlToken<'a> {
    pub token: &'a str,
    pub reference: &'a str,
}

/// One `@font-face` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontFaceRule<'a> {
    /// The whole rule, `@font-face { ... }`.
    pub block: &'a str,
    pub body: &'a str,
}

impl<'a> FontFaceRule<'a> {
    /// First `url(...)` of the rule, the source every rewrite targets.
    pub fn first_url(&self) -> Option<UrlToken<'a>> {
        url_tokens(self.body).next()
    }

    /// Raw `unicode-range` descriptor value, if declared.
    pub fn unicode_range(&self) -> Option<&'a str> {
        UNICODE_RANGE_RE
            .captures(self.body)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
    }
}

/// Iterate the `@font-face` blocks of a stylesheet.
pub fn font_faces(css: &str) -> impl Iterator<Item = FontFaceRule<'_>> {
    FONT_FACE_RE.captures_iter(css).filter_map(|caps| {
        let block = caps.get(0)?.as_str();
        let body = caps.get(1)?.as_str();
        Some(FontFaceRule { block, body })
    })
}

/// Iterate every `url(...)` token in `css`, skipping empty references.
pub fn url_tokens(css: &str) -> impl Iterator<Item = UrlToken<'_>> {
    URL_RE.captures_iter(css).filter_map(|caps| {
        let token = caps.get(0)?.as_str();
        let reference = first_group(&caps)?.trim();
        (!reference.is_empty()).then_some(UrlToken { token, reference })
    })
}

/// Resolve a font reference to the absolute form used as a cache key.
pub fn resolve_reference(reference: &str, base: Option<&Url>) -> Option<String> {
    match base {
        Some(base) => absolutize(reference, base).ok(),
        None => Url::parse(reference).ok().map(String::from),
    }
}

/// Expand a `unicode-range` value into inclusive code point intervals.
///
/// Accepts single code points (`U+263A`), ranges (`U+0000-00FF`) and
/// wildcards (`U+4??`). Malformed entries are skipped.
pub fn parse_unicode_range(value: &str) -> Vec<(u32, u32)> {
    value.split(',').filter_map(parse_range_entry).collect()
}

fn parse_range_entry(entry: &str) -> Option<(u32, u32)> {
    let entry = entry.trim();
    let digits = entry.strip_prefix("U+").or_else(|| entry.strip_prefix("u+"))?;

    let (start, end) = if let Some((lo, hi)) = digits.split_once('-') {
        (u32::from_str_radix(lo.trim(), 16).ok()?, u32::from_str_radix(hi.trim(), 16).ok()?)
    } else if digits.contains('?') {
        let lo = u32::from_str_radix(&digits.replace('?', "0"), 16).ok()?;
        let hi = u32::from_str_radix(&digits.replace('?', "F"), 16).ok()?;
        (lo, hi)
    } else {
        let cp = u32::from_str_radix(digits, 16).ok()?;
        (cp, cp)
    };

    let end = end.min(MAX_CODE_POINT);
    (start <= end).then_some((start, end))
}

fn first_group<'h>(caps: &regex::Captures<'h>) -> Option<&'h str> {
    (1..caps.len()).find_map(|i| caps.get(i)).map(|m| m.as_str())
}
