//! Font subsetting engine.
//!
//! The document's custom fonts are declared by a style node holding either
//! an `@import` of a font stylesheet or inline `@font-face` rules. Each rule
//! covers a `unicode-range`; a capture inlines only the rules whose range
//! intersects the captured text, plus the default (range-less) rule.

pub mod css;
pub mod icons;
pub mod mapping;
pub mod subset;

pub use css::StyleSource;
pub use icons::IconFontCache;
pub use mapping::{FontMapping, RangeEntry};
pub use subset::{FontSubsetter, MappingOutcome};
