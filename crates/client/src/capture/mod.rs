//! Capture orchestration.
//!
//! A [`CaptureService`] owns one document's capture pipeline:
//!
//! 1. Preparing: font CSS for the captured text, icon font CSS, sizing and
//!    format selection
//! 2. BackgroundReady: unit background tiled down the canvas, then the
//!    content region's background colour
//! 3. Stitching: one rasterization context, retargeted per node, each
//!    bitmap drawn centred at its offset
//! 4. Exporting: encode and wrap as a `data:` URI
//!
//! One capture runs at a time per service; a concurrent request is
//! rejected with [`Error::CaptureBusy`].

pub mod compose;
pub mod phase;
pub mod plan;

use std::sync::{Arc, Mutex};

use image::RgbaImage;
use stitchcap_core::{AppConfig, CaptureOptions, Error, OutputFormat};

pub use compose::suggested_file_name;
pub use phase::CapturePhase;
pub use plan::{CapturePlan, CaptureWarning, select_format};

use crate::assets::{AssetCache, AssetKind, HydrationReport, Resolver, encode_data_uri};
use crate::background::BackgroundCompositor;
use crate::fetch::Fetcher;
use crate::fonts::{FontSubsetter, IconFontCache, MappingOutcome};
use crate::raster::{
    ContentNode, ContentRegion, ContextOptions, DocumentHost, LAYOUT_FIX_CSS, QUOTE_FIX_CSS, RasterContext,
    Rasterizer,
};
use phase::PhaseTracker;

/// A finished capture.
#[derive(Debug, Clone)]
pub struct CaptureOutput {
    /// `data:image/<format>;base64,...`
    pub payload: String,
    /// Format actually used, which may differ from the requested one.
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub node_count: usize,
    pub warnings: Vec<CaptureWarning>,
    pub elapsed_ms: u64,
}

impl CaptureOutput {
    pub fn file_name(&self, at: chrono::DateTime<chrono::Utc>) -> String {
        suggested_file_name(self.node_count, self.format, at)
    }
}

/// Capture pipeline for one document.
pub struct CaptureService {
    host: Arc<dyn DocumentHost>,
    rasterizer: Arc<dyn Rasterizer>,
    cache: Arc<AssetCache>,
    images: Arc<Resolver>,
    fonts: Arc<Resolver>,
    subsetter: FontSubsetter,
    icons: IconFontCache,
    background: BackgroundCompositor,
    node_margin: f64,
    webp_max_dimension: u32,
    icon_font_family: String,
    worker_url: Option<String>,
    in_flight: tokio::sync::Mutex<()>,
    phase: Mutex<CapturePhase>,
}

impl CaptureService {
    /// Wire a service to a document. Relative references resolve against
    /// the document's URL as reported by `host`.
    pub async fn new(
        config: &AppConfig, host: Arc<dyn DocumentHost>, rasterizer: Arc<dyn Rasterizer>, cache: Arc<AssetCache>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let base = host.base_url().await;
        let images =
            Arc::new(Resolver::new(AssetKind::Image, cache.clone(), fetcher.clone()).with_base(base.clone()));
        let fonts = Arc::new(Resolver::new(AssetKind::Font, cache.clone(), fetcher.clone()).with_base(base));
        let subsetter = FontSubsetter::new(cache.clone(), fonts.clone(), fetcher);
        let background = BackgroundCompositor::new(
            host.clone(),
            rasterizer.clone(),
            images.clone(),
            config.selectors.foreground.clone(),
            config.settle_delay(),
        );

        Self {
            host,
            rasterizer,
            cache,
            images,
            fonts,
            subsetter,
            icons: IconFontCache::new(),
            background,
            node_margin: config.node_margin,
            webp_max_dimension: config.webp_max_dimension,
            icon_font_family: config.icon_font_family.clone(),
            worker_url: config.worker_url.clone(),
            in_flight: tokio::sync::Mutex::new(()),
            phase: Mutex::new(CapturePhase::Idle),
        }
    }

    /// Open the store, hydrate the memory cache and build the initial font
    /// mapping. Every step degrades instead of failing.
    pub async fn start(&self) -> HydrationReport {
        if let Err(e) = self.cache.persistent().init().await {
            tracing::warn!(error = %e, "asset store unavailable; continuing memory-only");
        }
        let report = self.cache.hydrate().await;
        self.refresh_fonts().await;
        report
    }

    pub fn cache(&self) -> &Arc<AssetCache> {
        &self.cache
    }

    /// Phase of the current (or last) capture.
    pub fn phase(&self) -> CapturePhase {
        *self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn on_resize(&self) {
        self.background.invalidate().await;
    }

    pub async fn on_scale_changed(&self) {
        self.background.invalidate().await;
    }

    pub async fn on_background_mode_toggled(&self) {
        self.background.invalidate().await;
    }

    /// The style node changed: drop cached stylesheet text and rebuild the
    /// active mapping.
    pub async fn on_style_source_mutated(&self) -> Option<MappingOutcome> {
        self.subsetter.invalidate_style_source().await;
        self.refresh_fonts().await
    }

    /// Make sure the font mapping matches the document's current style
    /// source. Failures are logged and leave the previous mapping active.
    pub async fn refresh_fonts(&self) -> Option<MappingOutcome> {
        match self.subsetter.ensure_mapping(self.host.as_ref()).await {
            Ok(outcome) => {
                tracing::info!(?outcome, "font mapping ready");
                Some(outcome)
            }
            Err(e) => {
                tracing::error!(error = %e, "font mapping not updated");
                None
            }
        }
    }

    /// Capture `nodes` into one image.
    ///
    /// Nodes are drawn top to bottom in order of their vertical position.
    pub async fn capture(&self, mut nodes: Vec<ContentNode>, options: CaptureOptions) -> Result<CaptureOutput, Error> {
        options.validate().map_err(|e| Error::InvalidInput(e.to_string()))?;
        if nodes.is_empty() {
            tracing::error!("capture requested with no nodes");
            return Err(Error::CaptureAborted("no nodes supplied".into()));
        }

        let _guard = self.in_flight.try_lock().map_err(|_| {
            tracing::warn!("capture rejected; another capture is in progress");
            Error::CaptureBusy
        })?;

        let region = self.host.content_region().await?.ok_or_else(|| {
            tracing::error!("content region not found");
            Error::CaptureAborted("content region not found".into())
        })?;

        nodes.sort_by(|a, b| a.bounds.top.total_cmp(&b.bounds.top));
        tracing::info!(nodes = nodes.len(), scale = options.scale, format = %options.format, "capture started");

        let mut tracker = PhaseTracker::start(&self.phase);
        match self.run(&mut tracker, &nodes, &options, &region).await {
            Ok(mut output) => {
                output.elapsed_ms = tracker.finish();
                Ok(output)
            }
            Err(e) => {
                tracker.fail(&e);
                Err(e)
            }
        }
    }

    async fn run(
        &self, tracker: &mut PhaseTracker<'_>, nodes: &[ContentNode], options: &CaptureOptions, region: &ContentRegion,
    ) -> Result<CaptureOutput, Error> {
        let text: String = nodes.iter().map(|n| n.text.as_str()).collect();
        let (font_css, icon_css) = tokio::join!(
            self.subsetter.build_subset_css(&text),
            self.icons.css(self.host.as_ref(), &self.icon_font_family, &self.fonts)
        );

        let plan = CapturePlan::new(nodes, options, self.node_margin, self.webp_max_dimension);
        for warning in &plan.warnings {
            tracing::warn!(%warning, "format fallback");
        }
        tracing::info!(width = plan.width, height = plan.height, format = %plan.format, "output sized");

        tracker.advance(CapturePhase::BackgroundReady);
        let mut canvas = RgbaImage::new(plan.width, plan.height);
        let unit = self
            .background
            .unit_background(region, options.scale, options.suppress_background)
            .await?;
        if !options.suppress_background {
            compose::tile_vertically(&mut canvas, &unit);
            if let Some(color) = region.fill_color() {
                tracing::debug!(color = %region.background_color, "applying content background colour");
                compose::fill(&mut canvas, color);
            }
        }

        tracker.advance(CapturePhase::Stitching);
        let injected_css = [font_css.as_str(), icon_css.as_str(), QUOTE_FIX_CSS, LAYOUT_FIX_CSS].join("\n");
        let context_options = ContextOptions::new(options.scale, self.images.clone())
            .with_injected_css(injected_css)
            .with_worker_url(self.worker_url.clone());

        let mut context = self.rasterizer.create_context(&nodes[0], context_options).await?;
        let stitched = self.stitch(&mut context, &mut canvas, nodes, &plan.offsets).await;
        self.rasterizer.destroy_context(context).await;
        stitched?;

        tracker.advance(CapturePhase::Exporting);
        let bytes = compose::encode(&canvas, plan.format, options.quality)?;
        let payload = encode_data_uri(&format!("image/{}", plan.format.subtype()), &bytes);
        tracing::info!(bytes = bytes.len(), format = %plan.format, "capture encoded");

        Ok(CaptureOutput {
            payload,
            format: plan.format,
            width: plan.width,
            height: plan.height,
            node_count: nodes.len(),
            warnings: plan.warnings,
            elapsed_ms: 0,
        })
    }

    async fn stitch(
        &self, context: &mut RasterContext, canvas: &mut RgbaImage, nodes: &[ContentNode], offsets: &[i64],
    ) -> Result<(), Error> {
        for (node, &offset) in nodes.iter().zip(offsets) {
            context.retarget(node.clone());
            let section = self.rasterizer.render(context).await?;
            tracing::debug!(node = %node.id, width = section.width(), height = section.height(), offset, "node rendered");
            compose::draw_centered(canvas, &section, offset);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::decode_data_uri;
    use crate::raster::Rect;
    use crate::testing::{StubFetcher, StubHost, StubRasterizer, node};
    use image::Rgba;
    use std::sync::atomic::Ordering;
    use stitchcap_core::AssetStore;

    struct Harness {
        service: Arc<CaptureService>,
        host: Arc<StubHost>,
        rasterizer: Arc<StubRasterizer>,
    }

    async fn harness_with(host: StubHost, rasterizer: StubRasterizer, fetcher: StubFetcher) -> Harness {
        let host = Arc::new(host);
        let rasterizer = Arc::new(rasterizer);
        let cache = Arc::new(AssetCache::new(Arc::new(AssetStore::in_memory())));
        let config = AppConfig { settle_delay_ms: 0, ..Default::default() };
        let service =
            CaptureService::new(&config, host.clone(), rasterizer.clone(), cache, Arc::new(fetcher)).await;
        Harness { service: Arc::new(service), host, rasterizer }
    }

    async fn harness() -> Harness {
        harness_with(StubHost::new(), StubRasterizer::new(), StubFetcher::default()).await
    }

    fn opts(scale: f64, format: OutputFormat) -> CaptureOptions {
        CaptureOptions { scale, format, quality: 0.92, suppress_background: false }
    }

    fn decode(output: &CaptureOutput) -> RgbaImage {
        let bytes = decode_data_uri(&output.payload).unwrap();
        image::load_from_memory(&bytes).unwrap().to_rgba8()
    }

    #[tokio::test]
    async fn test_single_node_png() {
        let h = harness().await;
        let output = h.service.capture(vec![node("#m1", 0.0, 800.0, 200.0)], opts(2.0, OutputFormat::Png)).await.unwrap();

        assert_eq!((output.width, output.height), (1600, 400));
        assert!(output.payload.starts_with("data:image/png;base64,"));
        assert_eq!(output.format, OutputFormat::Png);
        assert_eq!(h.rasterizer.renders_of("#m1"), 1);
        assert_eq!(decode(&output).dimensions(), (1600, 400));
        assert_eq!(h.service.phase(), CapturePhase::Done);
    }

    #[tokio::test]
    async fn test_multi_node_offsets() {
        fn paint(node: &str, _x: u32, _y: u32) -> Rgba<u8> {
            match node {
                "#a" => Rgba([255, 0, 0, 255]),
                "#b" => Rgba([0, 255, 0, 255]),
                "#c" => Rgba([0, 0, 255, 255]),
                _ => Rgba([0, 0, 0, 0]),
            }
        }
        let h = harness_with(StubHost::new(), StubRasterizer::new().painting(paint), StubFetcher::default()).await;
        let nodes = vec![node("#a", 0.0, 300.0, 100.0), node("#b", 100.0, 300.0, 150.0), node("#c", 250.0, 300.0, 120.0)];

        let mut options = opts(1.0, OutputFormat::Png);
        options.suppress_background = true;
        let output = h.service.capture(nodes, options).await.unwrap();
        let image = decode(&output);

        assert_eq!(output.height, 380);
        assert_eq!(h.rasterizer.render_count(), 3);
        assert_eq!(image.get_pixel(10, 0).0, [255, 0, 0, 255]);
        assert_eq!(image.get_pixel(10, 99).0, [255, 0, 0, 255]);
        assert_eq!(image.get_pixel(10, 102).0, [0, 0, 0, 0]);
        assert_eq!(image.get_pixel(10, 105).0, [0, 255, 0, 255]);
        assert_eq!(image.get_pixel(10, 254).0, [0, 255, 0, 255]);
        assert_eq!(image.get_pixel(10, 257).0, [0, 0, 0, 0]);
        assert_eq!(image.get_pixel(10, 260).0, [0, 0, 255, 255]);
        assert_eq!(image.get_pixel(10, 379).0, [0, 0, 255, 255]);
    }

    #[tokio::test]
    async fn test_nodes_drawn_in_vertical_order() {
        let h = harness().await;
        let nodes = vec![node("#late", 500.0, 100.0, 10.0), node("#early", 0.0, 100.0, 10.0)];
        h.service.capture(nodes, opts(1.0, OutputFormat::Png)).await.unwrap();

        let rendered = h.rasterizer.rendered.lock().unwrap().clone();
        assert_eq!(rendered, vec!["#bg1".to_string(), "#early".to_string(), "#late".to_string()]);
    }

    #[tokio::test]
    async fn test_webp_fallback_to_jpeg() {
        let h = harness().await;
        let output = h
            .service
            .capture(vec![node("#tall", 0.0, 400.0, 9000.0)], opts(2.0, OutputFormat::Webp))
            .await
            .unwrap();

        assert_eq!(output.format, OutputFormat::Jpeg);
        assert!(output.payload.starts_with("data:image/jpeg;base64,"));
        assert!(matches!(output.warnings.as_slice(), [CaptureWarning::FormatFallback { .. }]));
    }

    #[tokio::test]
    async fn test_webp_within_limit() {
        let h = harness().await;
        let output = h.service.capture(vec![node("#m", 0.0, 100.0, 50.0)], opts(1.0, OutputFormat::Webp)).await.unwrap();

        assert_eq!(output.format, OutputFormat::Webp);
        assert!(output.payload.starts_with("data:image/webp;base64,"));
        assert_eq!(output.warnings, vec![CaptureWarning::QualityIgnored { format: OutputFormat::Webp, quality: 0.92 }]);
    }

    #[tokio::test]
    async fn test_too_tall_for_jpeg_encoded_as_png() {
        let h = harness().await;
        let mut options = opts(8.0, OutputFormat::Webp);
        options.suppress_background = true;
        let output = h.service.capture(vec![node("#long", 0.0, 1.0, 9000.0)], options).await.unwrap();

        assert_eq!((output.width, output.height), (8, 72_000));
        assert_eq!(output.format, OutputFormat::Png);
        assert!(output.payload.starts_with("data:image/png;base64,"));
        assert!(matches!(
            output.warnings.as_slice(),
            [CaptureWarning::FormatFallback { used: OutputFormat::Png, .. }]
        ));
        assert_eq!(h.rasterizer.render_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_nodes_aborted_before_any_phase() {
        let h = harness().await;
        let result = h.service.capture(Vec::new(), opts(1.0, OutputFormat::Png)).await;

        assert!(matches!(result, Err(Error::CaptureAborted(_))));
        assert_eq!(h.service.phase(), CapturePhase::Idle);
        assert_eq!(h.rasterizer.created.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_missing_region_aborted() {
        let h = harness().await;
        h.host.set_region(None);
        let result = h.service.capture(vec![node("#m", 0.0, 10.0, 10.0)], opts(1.0, OutputFormat::Png)).await;

        assert!(matches!(result, Err(Error::CaptureAborted(_))));
        assert_eq!(h.service.phase(), CapturePhase::Idle);
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let h = harness().await;
        let result = h.service.capture(vec![node("#m", 0.0, 10.0, 10.0)], opts(0.1, OutputFormat::Png)).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_rasterization_failure_releases_context() {
        let h = harness_with(StubHost::new(), StubRasterizer::new().failing_on("#b"), StubFetcher::default()).await;
        let nodes = vec![node("#a", 0.0, 100.0, 10.0), node("#b", 10.0, 100.0, 10.0), node("#c", 20.0, 100.0, 10.0)];

        let result = h.service.capture(nodes, opts(1.0, OutputFormat::Png)).await;

        assert!(matches!(result, Err(Error::RasterizationFailed { .. })));
        assert_eq!(h.rasterizer.renders_of("#c"), 0);
        let created: Vec<u64> = h.rasterizer.created.lock().unwrap().iter().map(|(id, _)| *id).collect();
        let destroyed = h.rasterizer.destroyed.lock().unwrap().clone();
        assert_eq!(created, destroyed);
        assert_eq!(h.service.phase(), CapturePhase::Failed);
    }

    #[tokio::test]
    async fn test_fresh_context_per_capture() {
        let h = harness().await;
        h.service.capture(vec![node("#m", 0.0, 10.0, 10.0)], opts(1.0, OutputFormat::Png)).await.unwrap();
        h.service.capture(vec![node("#m", 0.0, 10.0, 10.0)], opts(1.0, OutputFormat::Png)).await.unwrap();

        // background context + capture context, twice; background cached after the first
        let created = h.rasterizer.created.lock().unwrap().len();
        assert_eq!(created, 3);
        assert_eq!(h.rasterizer.destroyed.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_background_tiled_then_refreshed_after_resize() {
        fn paint(node: &str, _x: u32, _y: u32) -> Rgba<u8> {
            if node == "#bg1" { Rgba([0, 0, 200, 255]) } else { Rgba([0, 0, 0, 0]) }
        }
        let h = harness_with(StubHost::new(), StubRasterizer::new().painting(paint), StubFetcher::default()).await;

        let output = h.service.capture(vec![node("#m", 0.0, 400.0, 600.0)], opts(1.0, OutputFormat::Png)).await.unwrap();
        let image = decode(&output);
        // unit is 400x250; rows past the first tile are covered too
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 200, 255]);
        assert_eq!(image.get_pixel(399, 599).0, [0, 0, 200, 255]);
        assert_eq!(h.rasterizer.renders_of("#bg1"), 1);

        h.service.capture(vec![node("#m", 0.0, 400.0, 10.0)], opts(1.0, OutputFormat::Png)).await.unwrap();
        assert_eq!(h.rasterizer.renders_of("#bg1"), 1);

        h.service.on_resize().await;
        h.service.capture(vec![node("#m", 0.0, 400.0, 10.0)], opts(1.0, OutputFormat::Png)).await.unwrap();
        assert_eq!(h.rasterizer.renders_of("#bg1"), 2);
        assert_eq!(h.host.hidden_count(), 0);
    }

    #[tokio::test]
    async fn test_region_colour_painted_over_tile() {
        let host = StubHost::new();
        host.set_region(Some(ContentRegion {
            bounds: Rect { left: 0.0, top: 0.0, width: 100.0, height: 100.0 },
            client_width: 100.0,
            footer_height: 0.0,
            background_color: "rgb(10, 20, 30)".into(),
        }));
        let h = harness_with(host, StubRasterizer::new().painting(|_, _, _| Rgba([0, 0, 0, 0])), StubFetcher::default()).await;

        let output = h.service.capture(vec![node("#m", 0.0, 100.0, 10.0)], opts(1.0, OutputFormat::Png)).await.unwrap();
        assert_eq!(decode(&output).get_pixel(50, 5).0, [10, 20, 30, 255]);
    }

    #[tokio::test]
    async fn test_suppressed_background_skips_capture() {
        let h = harness().await;
        let mut options = opts(1.0, OutputFormat::Png);
        options.suppress_background = true;

        h.service.capture(vec![node("#m", 0.0, 10.0, 10.0)], options).await.unwrap();

        assert_eq!(h.rasterizer.renders_of("#bg1"), 0);
        assert_eq!(h.host.hide_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_injected_css_carries_fonts_and_fixes() {
        let css_url = "https://fonts.example.com/n.css";
        let font_url = "https://fonts.example.com/latin.woff2";
        let host = StubHost::new();
        host.set_style_text(Some(&format!("@import url({css_url});")));
        let fetcher = StubFetcher::default()
            .with(
                css_url,
                200,
                Some("text/css"),
                b"@font-face { font-family: N; src: url(latin.woff2); unicode-range: U+0000-00FF; }",
            )
            .with(font_url, 200, Some("font/woff2"), b"latin");
        let h = harness_with(host, StubRasterizer::new(), fetcher).await;
        h.service.start().await;

        let mut m = node("#m", 0.0, 10.0, 10.0);
        m.text = "hello".into();
        let mut options = opts(1.0, OutputFormat::Png);
        options.suppress_background = true;
        h.service.capture(vec![m], options).await.unwrap();

        let created = h.rasterizer.created.lock().unwrap();
        let (_, context_options) = created.last().unwrap();
        assert!(context_options.injected_css.contains("data:font/woff2;base64,"));
        assert!(context_options.injected_css.contains(QUOTE_FIX_CSS));
        assert!(context_options.injected_css.contains(LAYOUT_FIX_CSS));
        assert_eq!(context_options.scale, 1.0);
    }

    #[tokio::test]
    async fn test_style_mutation_rebuilds_mapping() {
        let host = StubHost::new();
        host.set_style_text(Some("@font-face { font-family: A; src: url(https://f.example.com/a.woff2); }"));
        let h = harness_with(host, StubRasterizer::new(), StubFetcher::default()).await;
        h.service.start().await;

        h.host.set_style_text(Some("@font-face { font-family: B; src: url(https://f.example.com/b.woff2); }"));
        assert_eq!(h.service.on_style_source_mutated().await, Some(MappingOutcome::Built));
        assert_eq!(h.service.on_style_source_mutated().await, Some(MappingOutcome::AlreadyActive));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_capture_rejected() {
        let h = harness().await;
        let guard = h.service.in_flight.lock().await;

        let result = h.service.capture(vec![node("#m", 0.0, 10.0, 10.0)], opts(1.0, OutputFormat::Png)).await;
        assert!(matches!(result, Err(Error::CaptureBusy)));

        drop(guard);
        assert!(h.service.capture(vec![node("#m", 0.0, 10.0, 10.0)], opts(1.0, OutputFormat::Png)).await.is_ok());
    }

    #[test]
    fn test_output_file_name() {
        use chrono::TimeZone;
        let output = CaptureOutput {
            payload: String::new(),
            format: OutputFormat::Jpeg,
            width: 1,
            height: 1,
            node_count: 2,
            warnings: Vec::new(),
            elapsed_ms: 0,
        };
        let at = chrono::Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(output.file_name(at), "Capture_Multi_20250102030405.jpeg");
    }
}
