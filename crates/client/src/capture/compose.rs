//! Canvas painting and final encoding.

use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{Rgb, RgbImage, Rgba, RgbaImage, imageops};
use stitchcap_core::{Error, OutputFormat};

/// Repeat `tile` down the canvas from the origin. Columns beyond the tile
/// width are left untouched.
pub fn tile_vertically(canvas: &mut RgbaImage, tile: &RgbaImage) {
    let step = tile.height();
    if step == 0 || tile.width() == 0 {
        return;
    }
    let mut y = 0u32;
    while y < canvas.height() {
        imageops::replace(canvas, tile, 0, i64::from(y));
        y = y.saturating_add(step);
    }
}

/// Paint `color` over the whole canvas.
pub fn fill(canvas: &mut RgbaImage, color: Rgba<u8>) {
    for pixel in canvas.pixels_mut() {
        source_over(pixel, color);
    }
}

/// Draw `section` horizontally centred at device-pixel row `y`.
pub fn draw_centered(canvas: &mut RgbaImage, section: &RgbaImage, y: i64) {
    let x0 = (i64::from(canvas.width()) - i64::from(section.width())) / 2;
    let (width, height) = (i64::from(canvas.width()), i64::from(canvas.height()));

    for (sx, sy, pixel) in section.enumerate_pixels() {
        let (cx, cy) = (x0 + i64::from(sx), y + i64::from(sy));
        if cx < 0 || cy < 0 || cx >= width || cy >= height {
            continue;
        }
        source_over(canvas.get_pixel_mut(cx as u32, cy as u32), *pixel);
    }
}

/// Porter-Duff source-over on straight (non-premultiplied) alpha.
fn source_over(dst: &mut Rgba<u8>, src: Rgba<u8>) {
    let sa = u32::from(src.0[3]);
    if sa == 0 {
        return;
    }
    if sa == 255 {
        *dst = src;
        return;
    }

    let da = u32::from(dst.0[3]);
    let dst_weight = da * (255 - sa);
    let out_a = sa * 255 + dst_weight;
    if out_a == 0 {
        return;
    }

    let mut out = [0u8; 4];
    for (i, channel) in out.iter_mut().take(3).enumerate() {
        let value = u32::from(src.0[i]) * sa * 255 + u32::from(dst.0[i]) * dst_weight;
        *channel = ((value + out_a / 2) / out_a) as u8;
    }
    out[3] = ((out_a + 127) / 255) as u8;
    *dst = Rgba(out);
}

/// Encode the canvas.
///
/// `quality` in (0, 1] applies to JPEG. WebP is written lossless. JPEG has
/// no alpha channel, so translucent pixels are flattened onto black.
pub fn encode(canvas: &RgbaImage, format: OutputFormat, quality: f32) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    let result = match format {
        OutputFormat::Png => canvas.write_with_encoder(PngEncoder::new(&mut buf)),
        OutputFormat::Webp => canvas.write_with_encoder(WebPEncoder::new_lossless(&mut buf)),
        OutputFormat::Jpeg => {
            let q = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
            flatten(canvas).write_with_encoder(JpegEncoder::new_with_quality(&mut buf, q))
        }
    };
    result.map_err(|e| Error::EncodeFailed(format!("{format}: {e}")))?;
    Ok(buf)
}

fn flatten(canvas: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(canvas.width(), canvas.height(), |x, y| {
        let [r, g, b, a] = canvas.get_pixel(x, y).0;
        let mul = |c: u8| ((u16::from(c) * u16::from(a) + 127) / 255) as u8;
        Rgb([mul(r), mul(g), mul(b)])
    })
}

/// `<Prefix>_<YYYYMMDDHHMMSS>.<ext>` for a finished capture.
pub fn suggested_file_name(node_count: usize, format: OutputFormat, at: DateTime<Utc>) -> String {
    let prefix = if node_count > 1 { "Capture_Multi" } else { "Capture" };
    format!("{prefix}_{}.{}", at.format("%Y%m%d%H%M%S"), format.subtype())
}
