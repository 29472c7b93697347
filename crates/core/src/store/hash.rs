//! Content-derived identifiers for style sources.

use sha2::{Digest, Sha256};

/// Prefix marking identifiers derived from inline style content.
pub const INLINE_STYLE_PREFIX: &str = "inline-style:";

/// Compute the identifier for an inline style source.
///
/// Leading and trailing whitespace is ignored so that re-serialized style
/// nodes with identical rules share one mapping.
pub fn inline_style_id(css: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(css.trim().as_bytes());
    format!("{INLINE_STYLE_PREFIX}{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_stability() {
        let a = inline_style_id("@font-face { src: url(a.woff2) }");
        let b = inline_style_id("@font-face { src: url(a.woff2) }");
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_ignores_outer_whitespace() {
        let a = inline_style_id("  @font-face { src: url(a.woff2) }\n");
        let b = inline_style_id("@font-face { src: url(a.woff2) }");
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_different_content() {
        let a = inline_style_id("@font-face { src: url(a.woff2) }");
        let b = inline_style_id("@font-face { src: url(b.woff2) }");
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_format() {
        let id = inline_style_id("x");
        assert!(id.starts_with(INLINE_STYLE_PREFIX));
        let digest = id.trim_start_matches(INLINE_STYLE_PREFIX);
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
