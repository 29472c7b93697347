//! Asset caching and resolution.
//!
//! - [`memory`]: process-lifetime tables in front of the persistent store
//! - [`resolver`]: reference to inline `data:` URI, through both cache levels
//! - [`inline`]: `data:` URI encoding helpers

pub mod inline;
pub mod memory;
pub mod resolver;

pub use inline::{decode_data_uri, encode_data_uri};
pub use memory::{AssetCache, HydrationReport};
pub use resolver::{AssetKind, Resolver};
