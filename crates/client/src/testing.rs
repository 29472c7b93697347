//! In-memory stand-ins for the network, the rasterizer and the document.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use image::{Rgba, RgbaImage};
use reqwest::StatusCode;
use stitchcap_core::Error;
use url::Url;

use crate::fetch::{FetchResponse, Fetcher};
use crate::raster::{
    ContentNode, ContentRegion, ContextOptions, DocumentHost, HiddenElement, RasterContext, Rasterizer, Rect,
};

/// Fetcher serving canned responses and recording every request.
#[derive(Default)]
pub(crate) struct StubFetcher {
    responses: Mutex<HashMap<String, (u16, Option<String>, Vec<u8>)>>,
    calls: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub(crate) fn with(self, url: &str, status: u16, content_type: Option<&str>, body: &[u8]) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, content_type.map(String::from), body.to_vec()));
        self
    }

    pub(crate) fn call_count(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, Error> {
        self.calls.lock().unwrap().push(url.to_string());
        let entry = self.responses.lock().unwrap().get(url.as_str()).cloned();
        let Some((status, content_type, body)) = entry else {
            return Err(Error::Unreachable("connection refused".into()));
        };
        if !(200..300).contains(&status) {
            return Err(Error::HttpError(format!("status {status}")));
        }
        Ok(FetchResponse {
            url: url.clone(),
            final_url: url.clone(),
            status: StatusCode::from_u16(status).unwrap(),
            content_type,
            bytes: Bytes::from(body),
            fetch_ms: 1,
        })
    }
}

pub(crate) fn node(id: &str, top: f64, width: f64, height: f64) -> ContentNode {
    ContentNode {
        id: id.to_string(),
        bounds: Rect { left: 0.0, top, width, height },
        client_width: width,
        text: String::new(),
    }
}

/// Document with a fixed layout and observable hide/restore state.
pub(crate) struct StubHost {
    pub(crate) base: Option<Url>,
    pub(crate) region: Mutex<Option<ContentRegion>>,
    pub(crate) background: Option<ContentNode>,
    pub(crate) style_text: Mutex<Option<String>>,
    pub(crate) icon_rules: Vec<(String, Option<Url>)>,
    pub(crate) hidden: Mutex<Vec<String>>,
    pub(crate) hide_calls: AtomicUsize,
    pub(crate) restore_calls: AtomicUsize,
}

impl StubHost {
    /// A 400x300 content region at (10, 20) with a 50px footer over a
    /// full-page background node.
    pub(crate) fn new() -> Self {
        Self {
            base: Url::parse("https://chat.example.com/index.html").ok(),
            region: Mutex::new(Some(ContentRegion {
                bounds: Rect { left: 10.0, top: 20.0, width: 400.0, height: 300.0 },
                client_width: 400.0,
                footer_height: 50.0,
                background_color: "rgba(0, 0, 0, 0)".into(),
            })),
            background: Some(ContentNode {
                id: "#bg1".into(),
                bounds: Rect { left: 0.0, top: 0.0, width: 1000.0, height: 800.0 },
                client_width: 1000.0,
                text: String::new(),
            }),
            style_text: Mutex::new(None),
            icon_rules: Vec::new(),
            hidden: Mutex::new(Vec::new()),
            hide_calls: AtomicUsize::new(0),
            restore_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_style_text(&self, text: Option<&str>) {
        *self.style_text.lock().unwrap() = text.map(String::from);
    }

    pub(crate) fn set_region(&self, region: Option<ContentRegion>) {
        *self.region.lock().unwrap() = region;
    }

    pub(crate) fn hidden_count(&self) -> usize {
        self.hidden.lock().unwrap().len()
    }
}

#[async_trait]
impl DocumentHost for StubHost {
    async fn base_url(&self) -> Option<Url> {
        self.base.clone()
    }

    async fn content_region(&self) -> Result<Option<ContentRegion>, Error> {
        Ok(self.region.lock().unwrap().clone())
    }

    async fn background_node(&self) -> Result<Option<ContentNode>, Error> {
        Ok(self.background.clone())
    }

    async fn hide(&self, selectors: &[String]) -> Result<Vec<HiddenElement>, Error> {
        self.hide_calls.fetch_add(1, Ordering::SeqCst);
        let mut hidden = self.hidden.lock().unwrap();
        let elements: Vec<HiddenElement> = selectors
            .iter()
            .map(|s| HiddenElement { handle: s.clone(), previous_visibility: String::new() })
            .collect();
        hidden.extend(elements.iter().map(|e| e.handle.clone()));
        Ok(elements)
    }

    async fn restore(&self, elements: &[HiddenElement]) -> Result<(), Error> {
        self.restore_calls.fetch_add(1, Ordering::SeqCst);
        let mut hidden = self.hidden.lock().unwrap();
        hidden.retain(|h| !elements.iter().any(|e| &e.handle == h));
        Ok(())
    }

    async fn style_source_text(&self) -> Result<Option<String>, Error> {
        Ok(self.style_text.lock().unwrap().clone())
    }

    async fn icon_font_rules(&self, family: &str) -> Result<Vec<(String, Option<Url>)>, Error> {
        Ok(self.icon_rules.iter().filter(|(css, _)| css.contains(family)).cloned().collect())
    }
}

/// Solid red, fully opaque.
pub(crate) fn solid(_node: &str, _x: u32, _y: u32) -> Rgba<u8> {
    Rgba([200, 0, 0, 255])
}

/// Rasterizer painting each node with a pixel function and recording every call.
pub(crate) struct StubRasterizer {
    pub(crate) paint: fn(&str, u32, u32) -> Rgba<u8>,
    pub(crate) fail_on: Option<String>,
    next_id: AtomicU64,
    pub(crate) created: Mutex<Vec<(u64, ContextOptions)>>,
    pub(crate) rendered: Mutex<Vec<String>>,
    pub(crate) destroyed: Mutex<Vec<u64>>,
}

impl StubRasterizer {
    pub(crate) fn new() -> Self {
        Self {
            paint: solid,
            fail_on: None,
            next_id: AtomicU64::new(1),
            created: Mutex::new(Vec::new()),
            rendered: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing_on(mut self, node_id: &str) -> Self {
        self.fail_on = Some(node_id.to_string());
        self
    }

    pub(crate) fn painting(mut self, paint: fn(&str, u32, u32) -> Rgba<u8>) -> Self {
        self.paint = paint;
        self
    }

    pub(crate) fn render_count(&self) -> usize {
        self.rendered.lock().unwrap().len()
    }

    pub(crate) fn renders_of(&self, node_id: &str) -> usize {
        self.rendered.lock().unwrap().iter().filter(|id| *id == node_id).count()
    }
}

#[async_trait]
impl Rasterizer for StubRasterizer {
    async fn create_context(&self, node: &ContentNode, options: ContextOptions) -> Result<RasterContext, Error> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.created.lock().unwrap().push((id, options.clone()));
        Ok(RasterContext::new(id, node.clone(), options))
    }

    async fn render(&self, context: &mut RasterContext) -> Result<RgbaImage, Error> {
        let target = context.target().id.clone();
        self.rendered.lock().unwrap().push(target.clone());
        if self.fail_on.as_deref() == Some(target.as_str()) {
            return Err(Error::raster_failed(target, "paint failed"));
        }
        let (width, height) = context.output_size();
        let paint = self.paint;
        Ok(RgbaImage::from_fn(width, height, |x, y| paint(&target, x, y)))
    }

    async fn destroy_context(&self, context: RasterContext) {
        self.destroyed.lock().unwrap().push(context.id());
    }
}
