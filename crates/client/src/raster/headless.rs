//! Headless Chrome/Chromium backend.
//!
//! One [`HeadlessPage`] is both the [`DocumentHost`] and the [`Rasterizer`]
//! for the page it drives. Layout queries run as page scripts; nodes are
//! rasterized with clipped DevTools screenshots at the context scale.
//! Nodes are addressed by attribute selectors stamped onto the elements
//! when they are first described, so handles stay unique across repeated
//! selector matches.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, Viewport};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures_util::StreamExt;
use image::RgbaImage;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use stitchcap_core::{Error, SelectorConfig};
use tokio::task::JoinHandle;
use url::Url;

use super::{
    ContentNode, ContentRegion, ContextOptions, DocumentHost, HiddenElement, RasterContext, Rasterizer, Rect,
    ResourceFetch,
};

const DESCRIBE_NODES: &str = r#"(args) => {
  const found = Array.from(document.querySelectorAll(args.selector));
  const picked = args.limit == null ? found : found.slice(0, args.limit);
  return picked.map((el, i) => {
    const tag = `${args.prefix}-${i}`;
    el.setAttribute('data-stitchcap-node', tag);
    const r = el.getBoundingClientRect();
    return {
      id: `[data-stitchcap-node="${tag}"]`,
      left: r.left + window.scrollX, top: r.top + window.scrollY, width: r.width, height: r.height,
      clientWidth: el.clientWidth, text: el.textContent || ''
    };
  });
}"#;

const CONTENT_REGION: &str = r#"(args) => {
  const el = document.querySelector(args.content);
  if (!el) return null;
  const r = el.getBoundingClientRect();
  const footer = args.footer ? document.querySelector(args.footer) : null;
  return {
    left: r.left + window.scrollX, top: r.top + window.scrollY, width: r.width, height: r.height,
    clientWidth: el.clientWidth, footerHeight: footer ? footer.offsetHeight : 0,
    backgroundColor: getComputedStyle(el).backgroundColor
  };
}"#;

const BACKGROUND_NODE: &str = r#"(args) => {
  let el = null;
  for (const sel of args.candidates) {
    const c = document.querySelector(sel);
    if (!c) continue;
    const s = getComputedStyle(c);
    if (s.display !== 'none' && s.backgroundImage !== 'none') { el = c; break; }
  }
  if (!el) el = document.querySelector(args.content);
  if (!el) return null;
  el.setAttribute('data-stitchcap-node', args.tag);
  const r = el.getBoundingClientRect();
  return {
    id: `[data-stitchcap-node="${args.tag}"]`,
    left: r.left + window.scrollX, top: r.top + window.scrollY, width: r.width, height: r.height,
    clientWidth: el.clientWidth, text: ''
  };
}"#;

const HIDE: &str = r#"(args) => {
  const out = [];
  let i = 0;
  for (const sel of args.selectors) {
    for (const el of document.querySelectorAll(sel)) {
      if (el.style.visibility === 'hidden') continue;
      const tag = `${args.prefix}-${i++}`;
      el.setAttribute('data-stitchcap-hidden', tag);
      out.push({ handle: `[data-stitchcap-hidden="${tag}"]`, previous: el.style.visibility || '' });
      el.style.visibility = 'hidden';
    }
  }
  return out;
}"#;

const RESTORE: &str = r#"(args) => {
  for (const item of args.items) {
    const el = document.querySelector(item.handle);
    if (!el) continue;
    el.style.visibility = item.previous;
    el.removeAttribute('data-stitchcap-hidden');
  }
  return true;
}"#;

const STYLE_SOURCE: &str = r#"(args) => {
  const el = document.querySelector(args.selector);
  return el ? (el.textContent || '') : null;
}"#;

const ICON_RULES: &str = r#"(args) => {
  const out = [];
  for (const sheet of Array.from(document.styleSheets)) {
    let rules;
    try { rules = sheet.cssRules; } catch (e) { continue; }
    if (!rules) continue;
    for (const rule of Array.from(rules)) {
      if (rule.type === CSSRule.FONT_FACE_RULE && rule.style.getPropertyValue('font-family').includes(args.family)) {
        out.push({ css: rule.cssText, href: sheet.href });
      }
    }
  }
  return out;
}"#;

const INJECT_STYLE: &str = r#"(args) => {
  const s = document.createElement('style');
  s.setAttribute('data-stitchcap-context', String(args.id));
  s.textContent = args.css;
  document.head.appendChild(s);
  return true;
}"#;

const REMOVE_STYLE: &str = r#"(args) => {
  document.querySelectorAll(`style[data-stitchcap-context="${args.id}"]`).forEach((s) => s.remove());
  return true;
}"#;

const IMAGE_SOURCES: &str = r#"(args) => {
  const root = document.querySelector(args.target);
  if (!root) return [];
  const imgs = root.tagName === 'IMG' ? [root] : Array.from(root.querySelectorAll('img'));
  return Array.from(new Set(imgs.map((i) => i.currentSrc || i.src).filter(Boolean)));
}"#;

const APPLY_IMAGES: &str = r#"async (args) => {
  const root = document.querySelector(args.target);
  if (!root) return 0;
  const imgs = root.tagName === 'IMG' ? [root] : Array.from(root.querySelectorAll('img'));
  let n = 0;
  await Promise.all(imgs.map((img) => {
    const data = args.map[img.currentSrc || img.src];
    if (!data) return null;
    n++;
    img.src = data;
    return img.decode().catch(() => null);
  }));
  return n;
}"#;

const BOUNDS: &str = r#"(args) => {
  const el = document.querySelector(args.target);
  if (!el) return null;
  const r = el.getBoundingClientRect();
  return { left: r.left + window.scrollX, top: r.top + window.scrollY, width: r.width, height: r.height };
}"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsNode {
    id: String,
    left: f64,
    top: f64,
    width: f64,
    height: f64,
    client_width: f64,
    text: String,
}

impl From<JsNode> for ContentNode {
    fn from(node: JsNode) -> Self {
        ContentNode {
            id: node.id,
            bounds: Rect { left: node.left, top: node.top, width: node.width, height: node.height },
            client_width: node.client_width,
            text: node.text,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsRegion {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
    client_width: f64,
    footer_height: f64,
    background_color: String,
}

#[derive(Debug, Deserialize)]
struct JsHidden {
    handle: String,
    previous: String,
}

#[derive(Debug, Deserialize)]
struct JsFontRule {
    css: String,
    href: Option<String>,
}

/// A launched headless browser.
pub struct HeadlessBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl HeadlessBrowser {
    /// Launch a headless browser instance.
    ///
    /// The browser uses a background task to handle Chrome DevTools
    /// Protocol events.
    pub async fn launch() -> Result<Self, Error> {
        let config = BrowserConfig::builder()
            .window_size(1280, 900)
            .build()
            .map_err(|e| Error::raster_failed("browser", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| Error::raster_failed("browser", e))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("browser handler event error: {e}");
                    break;
                }
            }
        });

        Ok(Self { browser, handler })
    }

    /// Open `url` in a new tab and wait for it to load.
    pub async fn open(&self, url: &str, selectors: SelectorConfig) -> Result<HeadlessPage, Error> {
        let page = self
            .browser
            .new_page(url)
            .await
            .map_err(|e| Error::raster_failed("page", e))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| Error::raster_failed("page", e))?;

        tracing::info!(url, "page loaded");
        Ok(HeadlessPage { page, selectors, next_tag: AtomicU64::new(1) })
    }

    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::warn!(error = %e, "browser did not close cleanly");
        }
        self.handler.abort();
    }
}

/// A loaded page acting as document host and rasterizer.
pub struct HeadlessPage {
    page: Page,
    selectors: SelectorConfig,
    next_tag: AtomicU64,
}

impl HeadlessPage {
    /// Describe up to `limit` elements matching `selector`, in document order.
    pub async fn nodes(&self, selector: &str, limit: Option<usize>) -> Result<Vec<ContentNode>, Error> {
        let prefix = format!("n{}", self.tag());
        let nodes: Vec<JsNode> = self
            .eval(DESCRIBE_NODES, json!({ "selector": selector, "limit": limit, "prefix": prefix }))
            .await?;
        Ok(nodes.into_iter().map(ContentNode::from).collect())
    }

    pub async fn close(&self) {
        if let Err(e) = self.page.clone().close().await {
            tracing::debug!(error = %e, "page close failed");
        }
    }

    fn tag(&self) -> u64 {
        self.next_tag.fetch_add(1, Ordering::Relaxed)
    }

    async fn eval<T: DeserializeOwned>(&self, script: &str, args: serde_json::Value) -> Result<T, Error> {
        let expression = format!("({script})({args})");
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(|e| Error::raster_failed("document", e))?;

        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(|e| Error::raster_failed("document", e))?;
        result
            .into_value()
            .map_err(|e| Error::raster_failed("document", format!("unexpected script result: {e}")))
    }

    /// Replace the target's image sources with inline data from `fetch`.
    async fn inline_images(&self, target: &str, fetch: &dyn ResourceFetch) {
        let sources: Vec<String> = match self.eval(IMAGE_SOURCES, json!({ "target": target })).await {
            Ok(sources) => sources,
            Err(e) => {
                tracing::warn!(target, error = %e, "could not list images");
                return;
            }
        };

        let mut map = serde_json::Map::new();
        for src in sources {
            match fetch.fetch_resource(&src).await {
                Ok(Some(data)) => {
                    map.insert(src, serde_json::Value::String(data));
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(url = %src, error = %e, "image left as-is"),
            }
        }
        if map.is_empty() {
            return;
        }

        match self.eval::<u64>(APPLY_IMAGES, json!({ "target": target, "map": map })).await {
            Ok(count) => tracing::debug!(target, count, "images inlined"),
            Err(e) => tracing::warn!(target, error = %e, "could not inline images"),
        }
    }
}

#[async_trait]
impl DocumentHost for HeadlessPage {
    async fn base_url(&self) -> Option<Url> {
        let url = self.page.url().await.ok().flatten()?;
        Url::parse(&url).ok()
    }

    async fn content_region(&self) -> Result<Option<ContentRegion>, Error> {
        let region: Option<JsRegion> = self
            .eval(
                CONTENT_REGION,
                json!({ "content": self.selectors.content, "footer": self.selectors.footer }),
            )
            .await?;
        Ok(region.map(|r| ContentRegion {
            bounds: Rect { left: r.left, top: r.top, width: r.width, height: r.height },
            client_width: r.client_width,
            footer_height: r.footer_height,
            background_color: r.background_color,
        }))
    }

    async fn background_node(&self) -> Result<Option<ContentNode>, Error> {
        let tag = format!("bg{}", self.tag());
        let node: Option<JsNode> = self
            .eval(
                BACKGROUND_NODE,
                json!({ "candidates": self.selectors.background, "content": self.selectors.content, "tag": tag }),
            )
            .await?;
        if node.is_some() {
            tracing::debug!("background source located");
        } else {
            tracing::warn!("no background source and no content element");
        }
        Ok(node.map(ContentNode::from))
    }

    async fn hide(&self, selectors: &[String]) -> Result<Vec<HiddenElement>, Error> {
        let prefix = format!("h{}", self.tag());
        let hidden: Vec<JsHidden> = self.eval(HIDE, json!({ "selectors": selectors, "prefix": prefix })).await?;
        Ok(hidden
            .into_iter()
            .map(|h| HiddenElement { handle: h.handle, previous_visibility: h.previous })
            .collect())
    }

    async fn restore(&self, hidden: &[HiddenElement]) -> Result<(), Error> {
        let items: Vec<serde_json::Value> = hidden
            .iter()
            .map(|h| json!({ "handle": h.handle, "previous": h.previous_visibility }))
            .collect();
        let _: bool = self.eval(RESTORE, json!({ "items": items })).await?;
        Ok(())
    }

    async fn style_source_text(&self) -> Result<Option<String>, Error> {
        self.eval(STYLE_SOURCE, json!({ "selector": self.selectors.style_source }))
            .await
    }

    async fn icon_font_rules(&self, family: &str) -> Result<Vec<(String, Option<Url>)>, Error> {
        let rules: Vec<JsFontRule> = self.eval(ICON_RULES, json!({ "family": family })).await?;
        Ok(rules
            .into_iter()
            .map(|r| (r.css, r.href.and_then(|href| Url::parse(&href).ok())))
            .collect())
    }
}

#[async_trait]
impl Rasterizer for HeadlessPage {
    async fn create_context(&self, node: &ContentNode, options: ContextOptions) -> Result<RasterContext, Error> {
        let id = self.tag();
        if !options.injected_css.is_empty() {
            let _: bool = self
                .eval(INJECT_STYLE, json!({ "id": id, "css": &options.injected_css }))
                .await
                .map_err(|e| Error::raster_failed(&node.id, e))?;
        }
        if let Some(worker) = &options.worker_url {
            tracing::debug!(worker = %worker, "worker resource not used by the headless backend");
        }
        tracing::debug!(context = id, node = %node.id, scale = options.scale, "rasterization context created");
        Ok(RasterContext::new(id, node.clone(), options))
    }

    async fn render(&self, context: &mut RasterContext) -> Result<RgbaImage, Error> {
        let target = context.target().id.clone();
        self.inline_images(&target, context.options().resource_fetch.as_ref())
            .await;

        let rect: Option<Rect> = self
            .eval::<Option<JsBounds>>(BOUNDS, json!({ "target": target }))
            .await
            .map_err(|e| Error::raster_failed(&target, e))?
            .map(|b| Rect { left: b.left, top: b.top, width: b.width, height: b.height });
        let rect = rect.ok_or_else(|| Error::raster_failed(&target, "node is no longer in the document"))?;
        if rect.width <= 0.0 || rect.height <= 0.0 {
            return Err(Error::raster_failed(&target, "node has no area"));
        }

        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .clip(Viewport {
                x: rect.left,
                y: rect.top,
                width: rect.width,
                height: rect.height,
                scale: context.options().scale,
            })
            .from_surface(true)
            .capture_beyond_viewport(true)
            .omit_background(true)
            .build();

        let png = self
            .page
            .screenshot(params)
            .await
            .map_err(|e| Error::raster_failed(&target, e))?;
        let bitmap = image::load_from_memory(&png)
            .map_err(|e| Error::raster_failed(&target, e))?
            .to_rgba8();

        tracing::debug!(node = %target, width = bitmap.width(), height = bitmap.height(), "node rasterized");
        Ok(bitmap)
    }

    async fn destroy_context(&self, context: RasterContext) {
        let id = context.id();
        if let Err(e) = self.eval::<bool>(REMOVE_STYLE, json!({ "id": id })).await {
            tracing::warn!(context = id, error = %e, "injected style not removed");
        }
        tracing::debug!(context = id, "rasterization context destroyed");
    }
}

#[derive(Debug, Deserialize)]
struct JsBounds {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
}
