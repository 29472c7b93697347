//! Seams to the rasterization service and the live document.
//!
//! The capture pipeline never paints pixels or walks a DOM itself. It talks
//! to a [`Rasterizer`] (turns a node into an RGBA bitmap) and a
//! [`DocumentHost`] (answers layout questions about the page). The
//! headless-browser implementation of both lives in [`headless`] behind the
//! `render` feature; tests use in-memory stubs.

#[cfg(feature = "render")]
pub mod headless;

use std::sync::Arc;

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use stitchcap_core::Error;
use url::Url;

/// Computed style properties copied onto cloned nodes.
pub const STYLE_WHITELIST: &[&str] = &[
    "display", "position", "top", "right", "bottom", "left", "float", "clear",
    "width", "height", "min-width", "min-height", "max-width", "max-height",
    "margin", "margin-top", "margin-right", "margin-bottom", "margin-left",
    "padding", "padding-top", "padding-right", "padding-bottom", "padding-left",
    "border", "border-width", "border-style", "border-color", "border-radius",
    "border-top-left-radius", "border-top-right-radius", "border-bottom-left-radius",
    "border-bottom-right-radius", "border-collapse", "border-spacing", "box-sizing",
    "overflow", "overflow-x", "overflow-y", "flex", "flex-basis", "flex-direction",
    "flex-flow", "flex-grow", "flex-shrink", "flex-wrap", "align-content", "align-items",
    "align-self", "justify-content", "justify-items", "justify-self", "gap", "row-gap",
    "column-gap", "grid", "grid-area", "grid-template", "grid-template-areas",
    "grid-template-rows", "grid-template-columns", "grid-row", "grid-row-start",
    "grid-row-end", "grid-column", "grid-column-start", "grid-column-end", "color", "font",
    "font-family", "font-size", "font-weight", "font-style", "font-variant", "line-height",
    "letter-spacing", "word-spacing", "text-align", "text-decoration", "text-indent",
    "text-transform", "text-shadow", "white-space", "vertical-align", "background",
    "background-color", "background-image", "background-repeat", "background-position",
    "background-size", "background-clip", "opacity", "visibility", "box-shadow", "outline",
    "outline-offset", "cursor", "transform", "transform-origin", "transform-style",
    "transition", "animation", "filter", "list-style", "list-style-type",
    "list-style-position", "list-style-image",
];

/// Suppresses generated quotation marks, which clones render twice.
pub const QUOTE_FIX_CSS: &str = "q::before, q::after { content: none !important; }";

/// Wrapping and spacing corrections for preformatted text and name labels.
pub const LAYOUT_FIX_CSS: &str = "pre { white-space: pre-wrap !important; word-break: break-all !important; \
     overflow-wrap: break-word !important; } .name_text { white-space: nowrap !important; } \
     .ch_name { letter-spacing: -0.5px !important; }";

/// Axis-aligned box in CSS pixels, document coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// A node the rasterizer can render.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentNode {
    /// Handle the rasterizer understands (a selector in the headless backend).
    pub id: String,
    /// Border box.
    pub bounds: Rect,
    /// Inner width excluding scrollbars.
    pub client_width: f64,
    /// Rendered text content, used to pick fonts.
    pub text: String,
}

/// Layout of the primary content container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRegion {
    pub bounds: Rect,
    pub client_width: f64,
    /// Height of the fixed footer overlapping the container bottom.
    pub footer_height: f64,
    /// Computed `background-color`, as the host reports it.
    pub background_color: String,
}

impl ContentRegion {
    /// One visible content area in CSS pixels: client width by the height
    /// not covered by the footer.
    pub fn unit_size(&self) -> (f64, f64) {
        (self.client_width.max(0.0), (self.bounds.height - self.footer_height).max(0.0))
    }

    /// Background colour, or `None` when fully transparent or unparseable.
    pub fn fill_color(&self) -> Option<Rgba<u8>> {
        parse_css_color(&self.background_color).filter(|c| c.0[3] > 0)
    }
}

/// An element hidden by [`DocumentHost::hide`], with what it looked like before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiddenElement {
    pub handle: String,
    pub previous_visibility: String,
}

/// Async resource lookup handed to the rasterizer.
///
/// `Ok(None)` tells the rasterizer to keep the reference as it is.
#[async_trait]
pub trait ResourceFetch: Send + Sync {
    async fn fetch_resource(&self, url: &str) -> Result<Option<String>, Error>;
}

/// Options fixed for the lifetime of a rasterization context.
#[derive(Clone)]
pub struct ContextOptions {
    /// Device pixels per CSS pixel.
    pub scale: f64,
    pub style_whitelist: &'static [&'static str],
    /// Resolves every image reference met while cloning.
    pub resource_fetch: Arc<dyn ResourceFetch>,
    /// Stylesheet injected into every clone before painting.
    pub injected_css: String,
    /// Script resource for the rasterizer's background worker, if it uses one.
    pub worker_url: Option<String>,
}

impl ContextOptions {
    pub fn new(scale: f64, resource_fetch: Arc<dyn ResourceFetch>) -> Self {
        Self {
            scale,
            style_whitelist: STYLE_WHITELIST,
            resource_fetch,
            injected_css: String::new(),
            worker_url: None,
        }
    }

    pub fn with_injected_css(mut self, css: impl Into<String>) -> Self {
        self.injected_css = css.into();
        self
    }

    pub fn with_worker_url(mut self, worker_url: Option<String>) -> Self {
        self.worker_url = worker_url;
        self
    }
}

impl std::fmt::Debug for ContextOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextOptions")
            .field("scale", &self.scale)
            .field("style_whitelist", &self.style_whitelist.len())
            .field("injected_css", &self.injected_css.len())
            .field("worker_url", &self.worker_url)
            .finish_non_exhaustive()
    }
}

/// A rasterization context: one target node plus fixed options.
///
/// Retargeting swaps the node and its size without rebuilding the options.
#[derive(Debug)]
pub struct RasterContext {
    id: u64,
    target: ContentNode,
    options: ContextOptions,
}

impl RasterContext {
    pub fn new(id: u64, target: ContentNode, options: ContextOptions) -> Self {
        Self { id, target, options }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn target(&self) -> &ContentNode {
        &self.target
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// Point the context at another node.
    pub fn retarget(&mut self, node: ContentNode) {
        self.target = node;
    }

    /// Expected bitmap size for the current target.
    pub fn output_size(&self) -> (u32, u32) {
        scaled_size(self.target.bounds.width, self.target.bounds.height, self.options.scale)
    }
}

/// Rasterization service.
///
/// `render` returns a bitmap of the context's current target at the
/// context's scale.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn create_context(&self, node: &ContentNode, options: ContextOptions) -> Result<RasterContext, Error>;

    async fn render(&self, context: &mut RasterContext) -> Result<RgbaImage, Error>;

    /// Release everything held by `context`. Must not fail.
    async fn destroy_context(&self, context: RasterContext);

    /// Create, render and destroy in one call.
    async fn render_once(&self, node: &ContentNode, options: ContextOptions) -> Result<RgbaImage, Error> {
        let mut context = self.create_context(node, options).await?;
        let result = self.render(&mut context).await;
        self.destroy_context(context).await;
        result
    }
}

/// Layout and style queries against the live document.
#[async_trait]
pub trait DocumentHost: Send + Sync {
    /// Document URL, used to resolve relative references.
    async fn base_url(&self) -> Option<Url>;

    /// The primary content container, if present.
    async fn content_region(&self) -> Result<Option<ContentRegion>, Error>;

    /// First visible candidate painting a background image, falling back to
    /// the content container.
    async fn background_node(&self) -> Result<Option<ContentNode>, Error>;

    /// Hide every element matching `selectors` that is not hidden already.
    async fn hide(&self, selectors: &[String]) -> Result<Vec<HiddenElement>, Error>;

    /// Put hidden elements back the way they were.
    async fn restore(&self, hidden: &[HiddenElement]) -> Result<(), Error>;

    /// Text of the custom style node, `None` if the node does not exist.
    async fn style_source_text(&self) -> Result<Option<String>, Error>;

    /// `@font-face` rules whose family contains `family`, each paired with
    /// the URL of the stylesheet that declared it.
    async fn icon_font_rules(&self, family: &str) -> Result<Vec<(String, Option<Url>)>, Error>;
}

/// Device-pixel size of a CSS box, rounded to whole pixels.
pub fn scaled_size(width: f64, height: f64, scale: f64) -> (u32, u32) {
    let px = |v: f64| (v * scale).round().clamp(0.0, u32::MAX as f64) as u32;
    (px(width), px(height))
}

/// Parse a computed CSS colour (`rgb(...)`, `rgba(...)`, `#rgb`, `#rrggbb`,
/// `transparent`).
pub fn parse_css_color(input: &str) -> Option<Rgba<u8>> {
    let value = input.trim().to_ascii_lowercase();
    if value == "transparent" {
        return Some(Rgba([0, 0, 0, 0]));
    }

    if let Some(hex) = value.strip_prefix('#') {
        let digits: Vec<u8> = hex
            .chars()
            .map(|c| c.to_digit(16).map(|d| d as u8))
            .collect::<Option<_>>()?;
        return match digits.as_slice() {
            [r, g, b] => Some(Rgba([r * 17, g * 17, b * 17, 255])),
            [r1, r2, g1, g2, b1, b2] => Some(Rgba([r1 * 16 + r2, g1 * 16 + g2, b1 * 16 + b2, 255])),
            _ => None,
        };
    }

    let inner = value
        .strip_prefix("rgba(")
        .or_else(|| value.strip_prefix("rgb("))?
        .strip_suffix(')')?;
    let parts: Vec<&str> = inner.split([',', '/', ' ']).filter(|p| !p.is_empty()).collect();

    let channel = |s: &str| s.parse::<f64>().ok().map(|v| v.round().clamp(0.0, 255.0) as u8);
    let alpha = |s: &str| {
        let v = match s.strip_suffix('%') {
            Some(pct) => pct.parse::<f64>().ok()? / 100.0,
            None => s.parse::<f64>().ok()?,
        };
        Some((v.clamp(0.0, 1.0) * 255.0).round() as u8)
    };

    match parts.as_slice() {
        [r, g, b] => Some(Rgba([channel(r)?, channel(g)?, channel(b)?, 255])),
        [r, g, b, a] => Some(Rgba([channel(r)?, channel(g)?, channel(b)?, alpha(a)?])),
        _ => None,
    }
}
