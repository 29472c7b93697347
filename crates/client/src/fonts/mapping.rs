//! Character to font-file mapping for one style source.

use serde::{Deserialize, Serialize};
use stitchcap_core::Error;

use super::css::{self, StyleSource};

/// Font file serving an inclusive code point interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeEntry {
    pub start: u32,
    pub end: u32,
    pub url: String,
}

/// Code point to font URL table.
///
/// Intervals are kept sorted and disjoint so lookups are a binary search.
/// A rule without `unicode-range` becomes the default font, which is always
/// required.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FontMapping {
    pub source_id: String,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    ranges: Vec<RangeEntry>,
}

impl FontMapping {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self { source_id: source_id.into(), default: None, ranges: Vec::new() }
    }

    /// Scan every `@font-face` rule of `css`.
    ///
    /// Each rule's first `url(...)` is resolved against the source base.
    /// Rules are applied in order, so a later rule wins wherever ranges
    /// overlap. Rules without a resolvable URL are ignored.
    pub fn build(source: &StyleSource, css: &str) -> Self {
        let mut mapping = Self::new(source.id());
        let mut rules = 0usize;

        for rule in css::font_faces(css) {
            rules += 1;
            let Some(src) = rule.first_url() else { continue };
            let Some(url) = css::resolve_reference(src.reference, source.base()) else {
                tracing::debug!(reference = %src.reference, "font source not resolvable; rule skipped");
                continue;
            };

            match rule.unicode_range() {
                Some(range) => {
                    for (start, end) in css::parse_unicode_range(range) {
                        mapping.insert_range(start, end, &url);
                    }
                }
                None => mapping.default = Some(url),
            }
        }

        tracing::info!(
            source = %mapping.source_id,
            rules,
            ranges = mapping.ranges.len(),
            has_default = mapping.default.is_some(),
            "scanned font-face rules"
        );
        mapping
    }

    /// Map `start..=end` to `url`, replacing whatever covered it before.
    pub fn insert_range(&mut self, start: u32, end: u32, url: &str) {
        if start > end {
            return;
        }

        let mut next = Vec::with_capacity(self.ranges.len() + 2);
        for entry in self.ranges.drain(..) {
            if entry.end < start || entry.start > end {
                next.push(entry);
                continue;
            }
            if entry.start < start {
                next.push(RangeEntry { start: entry.start, end: start - 1, url: entry.url.clone() });
            }
            if entry.end > end {
                next.push(RangeEntry { start: end + 1, end: entry.end, url: entry.url });
            }
        }
        next.push(RangeEntry { start, end, url: url.to_string() });
        next.sort_by_key(|e| e.start);

        // coalesce touching intervals that share a file
        let mut merged: Vec<RangeEntry> = Vec::with_capacity(next.len());
        for entry in next {
            match merged.last_mut() {
                Some(last) if last.url == entry.url && last.end.checked_add(1) == Some(entry.start) => {
                    last.end = entry.end;
                }
                _ => merged.push(entry),
            }
        }
        self.ranges = merged;
    }

    /// Font URL for one code point.
    pub fn lookup(&self, code_point: u32) -> Option<&str> {
        let idx = self.ranges.partition_point(|e| e.end < code_point);
        self.ranges
            .get(idx)
            .filter(|e| e.start <= code_point)
            .map(|e| e.url.as_str())
    }

    /// Distinct font URLs needed to render `text`, default first.
    pub fn required_urls(&self, text: &str) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        let mut push = |url: &str| {
            if !urls.iter().any(|u| u == url) {
                urls.push(url.to_string());
            }
        };

        if let Some(default) = &self.default {
            push(default);
        }
        for c in text.chars() {
            if let Some(url) = self.lookup(c as u32) {
                push(url);
            }
        }
        urls
    }

    pub fn ranges(&self) -> &[RangeEntry] {
        &self.ranges
    }

    /// No default font and no ranges.
    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.ranges.is_empty()
    }

    pub fn to_payload(&self) -> Result<String, Error> {
        serde_json::to_string(self)
            .map_err(|e| Error::CorruptRecord { key: self.source_id.clone(), reason: e.to_string() })
    }

    /// Decode a persisted mapping, rejecting one stored under another key.
    pub fn from_payload(key: &str, payload: &str) -> Result<Self, Error> {
        let corrupt = |reason: String| Error::CorruptRecord { key: key.to_string(), reason };
        let mapping: Self = serde_json::from_str(payload).map_err(|e| corrupt(e.to_string()))?;
        if mapping.source_id != key {
            return Err(corrupt(format!("source id mismatch: {}", mapping.source_id)));
        }
        if mapping.ranges.windows(2).any(|w| w[0].end >= w[1].start) || mapping.ranges.iter().any(|e| e.start > e.end) {
            return Err(corrupt("ranges not sorted and disjoint".into()));
        }
        Ok(mapping)
    }
}
