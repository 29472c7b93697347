//! Client code for stitchcap.
//!
//! This crate provides the capture pipeline: asset resolution and caching,
//! font subsetting, background compositing, and stitching rendered nodes
//! into one encoded image. Rasterization and document queries go through
//! the [`raster`] seams.

pub mod assets;
pub mod background;
pub mod capture;
pub mod fetch;
pub mod fonts;
pub mod raster;

#[cfg(test)]
mod testing;

pub use assets::{AssetCache, AssetKind, HydrationReport, Resolver};
pub use background::{BackgroundCompositor, ForegroundScope};
pub use capture::{CaptureOutput, CapturePhase, CaptureService, CaptureWarning};
pub use fetch::{FetchClient, FetchConfig, FetchResponse, Fetcher};
pub use fonts::{FontMapping, FontSubsetter, IconFontCache, MappingOutcome};
pub use raster::{ContentNode, ContentRegion, ContextOptions, DocumentHost, RasterContext, Rasterizer, Rect};

#[cfg(feature = "render")]
pub use raster::headless::{HeadlessBrowser, HeadlessPage};
