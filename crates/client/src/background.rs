//! Unit background capture and caching.
//!
//! The page background behind the content container is captured once per
//! (scale, background mode) as a tile exactly one content region in size.
//! Captures tile it vertically instead of re-rendering the background for
//! every node.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbaImage;
use image::imageops;
use stitchcap_core::Error;
use tokio::sync::RwLock;

use crate::raster::{ContentRegion, ContextOptions, DocumentHost, Rasterizer, ResourceFetch, scaled_size};

/// Hides foreground chrome for the duration of a future.
pub struct ForegroundScope<'a> {
    host: &'a dyn DocumentHost,
    selectors: &'a [String],
}

impl<'a> ForegroundScope<'a> {
    pub fn new(host: &'a dyn DocumentHost, selectors: &'a [String]) -> Self {
        Self { host, selectors }
    }

    /// Hide, run `work`, restore. Restoration happens whatever `work` returns.
    pub async fn run<T, F>(self, work: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        let hidden = self.host.hide(self.selectors).await?;
        tracing::debug!(hidden = hidden.len(), "foreground hidden");

        let result = work.await;

        if let Err(e) = self.host.restore(&hidden).await {
            tracing::error!(error = %e, "failed to restore foreground elements");
        }
        result
    }
}

#[derive(Clone)]
struct UnitBackground {
    image: RgbaImage,
    scale: f64,
}

/// Captures and caches the unit background tile.
pub struct BackgroundCompositor {
    host: Arc<dyn DocumentHost>,
    rasterizer: Arc<dyn Rasterizer>,
    resource_fetch: Arc<dyn ResourceFetch>,
    foreground: Vec<String>,
    settle_delay: Duration,
    cached: RwLock<Option<UnitBackground>>,
}

impl BackgroundCompositor {
    pub fn new(
        host: Arc<dyn DocumentHost>, rasterizer: Arc<dyn Rasterizer>, resource_fetch: Arc<dyn ResourceFetch>,
        foreground: Vec<String>, settle_delay: Duration,
    ) -> Self {
        Self { host, rasterizer, resource_fetch, foreground, settle_delay, cached: RwLock::new(None) }
    }

    /// One content region of background at `scale`.
    ///
    /// Always returns a fresh copy; callers may paint on it freely.
    pub async fn unit_background(
        &self, region: &ContentRegion, scale: f64, suppress: bool,
    ) -> Result<RgbaImage, Error> {
        let (unit_w, unit_h) = region.unit_size();
        let (width, height) = scaled_size(unit_w, unit_h, scale);

        if suppress {
            tracing::info!(width, height, "background suppressed; using transparent unit");
            return Ok(RgbaImage::new(width, height));
        }

        if let Some(cached) = self.cached.read().await.as_ref()
            && cached.scale == scale
            && cached.image.dimensions() == (width, height)
        {
            tracing::debug!("unit background served from cache");
            return Ok(cached.image.clone());
        }

        let start = Instant::now();
        let source = self
            .host
            .background_node()
            .await?
            .ok_or_else(|| Error::CaptureAborted("no background source element".into()))?;

        let options = ContextOptions::new(scale, self.resource_fetch.clone());
        let full = ForegroundScope::new(self.host.as_ref(), &self.foreground)
            .run(async {
                tokio::time::sleep(self.settle_delay).await;
                self.rasterizer.render_once(&source, options).await
            })
            .await?;

        let mut unit = RgbaImage::new(width, height);
        let x = ((region.bounds.left - source.bounds.left) * scale).round() as i64;
        let y = ((region.bounds.top - source.bounds.top) * scale).round() as i64;
        imageops::replace(&mut unit, &full, -x, -y);

        *self.cached.write().await = Some(UnitBackground { image: unit.clone(), scale });
        tracing::info!(
            width,
            height,
            source = %source.id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "unit background captured and cached"
        );
        Ok(unit)
    }

    /// Drop the cached tile. Never touches a capture already using a copy.
    pub async fn invalidate(&self) {
        if self.cached.write().await.take().is_some() {
            tracing::info!("unit background cache cleared");
        }
    }

    pub async fn is_cached(&self) -> bool {
        self.cached.read().await.is_some()
    }
}
