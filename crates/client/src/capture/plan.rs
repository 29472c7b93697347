//! Output sizing and format selection.

use std::fmt;

use stitchcap_core::{CaptureOptions, OutputFormat};

use crate::raster::{ContentNode, scaled_size};

/// Non-fatal conditions reported alongside a successful capture.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureWarning {
    /// The requested format cannot hold an image this large; this capture
    /// used `used` instead. The configured preference is unchanged.
    FormatFallback { requested: OutputFormat, used: OutputFormat, width: u32, height: u32, limit: u32 },
    /// WebP is encoded lossless; the requested quality had no effect.
    QualityIgnored { format: OutputFormat, quality: f32 },
}

impl fmt::Display for CaptureWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureWarning::FormatFallback { requested, used, width, height, limit } => write!(
                f,
                "{requested} is limited to {limit}px per side but the capture is {width}x{height}; encoded as {used}"
            ),
            CaptureWarning::QualityIgnored { format, quality } => {
                write!(f, "{format} is encoded lossless; quality {quality} was not applied")
            }
        }
    }
}

/// Largest width or height the JPEG encoder accepts.
pub const JPEG_MAX_DIMENSION: u32 = 65_535;

/// Pick the encoding for a `width` x `height` canvas.
///
/// WebP cannot exceed `webp_limit` on either side and JPEG cannot exceed
/// [`JPEG_MAX_DIMENSION`]. An oversized capture falls back to JPEG when it
/// fits, otherwise to PNG.
pub fn select_format(
    requested: OutputFormat, width: u32, height: u32, webp_limit: u32,
) -> (OutputFormat, Option<CaptureWarning>) {
    let limit = |format: OutputFormat| match format {
        OutputFormat::Webp => Some(webp_limit),
        OutputFormat::Jpeg => Some(JPEG_MAX_DIMENSION),
        OutputFormat::Png => None,
    };
    let fits = |format: OutputFormat| limit(format).is_none_or(|max| width <= max && height <= max);

    if fits(requested) {
        return (requested, None);
    }
    let used = if fits(OutputFormat::Jpeg) { OutputFormat::Jpeg } else { OutputFormat::Png };
    let warning = CaptureWarning::FormatFallback {
        requested,
        used,
        width,
        height,
        limit: limit(requested).unwrap_or(u32::MAX),
    };
    (used, Some(warning))
}

/// Canvas geometry for one capture.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturePlan {
    pub width: u32,
    pub height: u32,
    /// Gap between nodes, CSS pixels.
    pub margin: f64,
    /// Device-pixel y at which each node is drawn.
    pub offsets: Vec<i64>,
    pub format: OutputFormat,
    pub warnings: Vec<CaptureWarning>,
}

impl CapturePlan {
    /// Lay out `nodes` top to bottom: width is the widest client width,
    /// height the sum of node heights plus `node_margin` between nodes when
    /// there is more than one.
    pub fn new(nodes: &[ContentNode], options: &CaptureOptions, node_margin: f64, webp_limit: u32) -> Self {
        let scale = options.scale;
        let margin = if nodes.len() > 1 { node_margin } else { 0.0 };

        let max_width = nodes.iter().map(|n| n.client_width).fold(0.0_f64, f64::max);
        let heights: f64 = nodes.iter().map(|n| n.bounds.height).sum();
        let total_height = heights + margin * nodes.len().saturating_sub(1) as f64;
        let (width, height) = scaled_size(max_width, total_height, scale);

        let mut offsets = Vec::with_capacity(nodes.len());
        let mut y = 0.0_f64;
        for node in nodes {
            offsets.push((y * scale).round() as i64);
            y += node.bounds.height + margin;
        }

        let (format, fallback) = select_format(options.format, width, height, webp_limit);
        let mut warnings: Vec<CaptureWarning> = fallback.into_iter().collect();
        if format == OutputFormat::Webp && options.quality < 1.0 {
            warnings.push(CaptureWarning::QualityIgnored { format, quality: options.quality });
        }

        Self { width, height, margin, offsets, format, warnings }
    }
}
