//! page_capture tool implementation.
//!
//! Opens a URL in a headless browser, stitches the elements matching a
//! selector into one image and optionally saves it to disk.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use stitchcap_client::CaptureOutput;
use stitchcap_client::assets::decode_data_uri;
use stitchcap_core::{CaptureOptions, Error, OutputFormat};
use url::Url;

use crate::handler::ServerState;

/// Input parameters for the page_capture tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PageCaptureParams {
    /// The page to open.
    pub url: String,

    /// CSS selector matching the elements to stitch.
    pub selector: String,

    /// Capture at most this many matches, in document order.
    #[serde(default)]
    pub limit: Option<usize>,

    /// Directory to also write the image into. The image is returned either way.
    #[serde(default)]
    pub save_dir: Option<String>,

    /// Output encoding; the configured default when omitted.
    #[serde(default)]
    pub format: Option<OutputFormat>,

    /// Device pixels per CSS pixel (>= 0.5).
    #[serde(default)]
    pub scale: Option<f64>,

    /// Encoder quality in (0, 1].
    #[serde(default)]
    pub quality: Option<f32>,

    /// Leave the background transparent.
    #[serde(default)]
    pub suppress_background: Option<bool>,
}

impl PageCaptureParams {
    /// Check the request and merge its overrides onto `defaults`.
    fn resolve(&self, defaults: &CaptureOptions) -> Result<(Url, CaptureOptions), Error> {
        let url = Url::parse(&self.url).map_err(|e| Error::InvalidUrl(format!("{}: {e}", self.url)))?;
        if !matches!(url.scheme(), "http" | "https" | "file") {
            return Err(Error::InvalidUrl(format!("unsupported scheme: {}", url.scheme())));
        }
        if self.selector.trim().is_empty() {
            return Err(Error::InvalidInput("selector must not be empty".to_string()));
        }
        if self.limit == Some(0) {
            return Err(Error::InvalidInput("limit must be at least 1".to_string()));
        }

        let options = CaptureOptions {
            scale: self.scale.unwrap_or(defaults.scale),
            format: self.format.unwrap_or(defaults.format),
            quality: self.quality.unwrap_or(defaults.quality),
            suppress_background: self.suppress_background.unwrap_or(defaults.suppress_background),
        };
        options.validate().map_err(|e| Error::InvalidInput(e.to_string()))?;

        Ok((url, options))
    }
}

/// Output structure for the page_capture tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PageCaptureOutput {
    pub url: String,
    /// Number of elements stitched.
    pub node_count: usize,
    pub width: u32,
    pub height: u32,
    /// Encoding actually used.
    pub format: OutputFormat,
    /// Suggested file name.
    pub file_name: String,
    /// Where the image was written, if `save_dir` was given.
    pub saved_to: Option<String>,
    /// ISO8601 timestamp of the capture.
    pub captured_at: String,
    pub warnings: Vec<String>,
    pub elapsed_ms: u64,
}

/// Implementation of the page_capture tool.
pub async fn capture_impl(state: &ServerState, params: PageCaptureParams) -> Result<CallToolResult, McpError> {
    let (url, options) = params.resolve(&state.config.capture)?;

    let output = run_capture(state, &url, &params.selector, params.limit, options).await?;
    let captured_at = Utc::now();
    let file_name = output.file_name(captured_at);

    let saved_to = match &params.save_dir {
        Some(dir) => Some(save(Path::new(dir), &file_name, &output.payload).await?),
        None => None,
    };

    let summary = PageCaptureOutput {
        url: url.to_string(),
        node_count: output.node_count,
        width: output.width,
        height: output.height,
        format: output.format,
        file_name,
        saved_to: saved_to.map(|p| p.display().to_string()),
        captured_at: captured_at.to_rfc3339(),
        warnings: output.warnings.iter().map(ToString::to_string).collect(),
        elapsed_ms: output.elapsed_ms,
    };
    let json = serde_json::to_string_pretty(&summary)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;

    Ok(CallToolResult::success(tool_contents(json, &output.payload)?))
}

/// The summary text followed by the image itself, saved or not.
fn tool_contents(summary: String, payload: &str) -> Result<Vec<Content>, Error> {
    let (mime, data) =
        split_payload(payload).ok_or_else(|| Error::EncodeFailed("payload is not a base64 data URI".to_string()))?;
    Ok(vec![Content::text(summary), Content::image(data, mime)])
}

#[cfg(feature = "render")]
async fn run_capture(
    state: &ServerState, url: &Url, selector: &str, limit: Option<usize>, options: CaptureOptions,
) -> Result<CaptureOutput, Error> {
    use std::sync::Arc;
    use stitchcap_client::{CaptureService, HeadlessBrowser};

    let browser = HeadlessBrowser::launch().await?;
    let page = match browser.open(url.as_str(), state.config.selectors.clone()).await {
        Ok(page) => Arc::new(page),
        Err(e) => {
            browser.close().await;
            return Err(e);
        }
    };

    let result = async {
        let nodes = page.nodes(selector, limit).await?;
        tracing::info!(url = %url, selector, matched = nodes.len(), "nodes selected");

        let service =
            CaptureService::new(&state.config, page.clone(), page.clone(), state.cache.clone(), state.fetcher.clone())
                .await;
        service.refresh_fonts().await;
        service.capture(nodes, options).await
    }
    .await;

    page.close().await;
    browser.close().await;
    result
}

#[cfg(not(feature = "render"))]
async fn run_capture(
    _state: &ServerState, _url: &Url, _selector: &str, _limit: Option<usize>, _options: CaptureOptions,
) -> Result<CaptureOutput, Error> {
    Err(Error::InvalidInput("page capture requires the `render` feature".to_string()))
}

/// Write the decoded payload to `dir/file_name`, creating `dir` if needed.
async fn save(dir: &Path, file_name: &str, payload: &str) -> Result<PathBuf, Error> {
    let bytes =
        decode_data_uri(payload).ok_or_else(|| Error::EncodeFailed("payload is not a base64 data URI".to_string()))?;

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::InvalidInput(format!("cannot create {}: {e}", dir.display())))?;
    let path = dir.join(file_name);
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| Error::InvalidInput(format!("cannot write {}: {e}", path.display())))?;

    tracing::info!(path = %path.display(), bytes = bytes.len(), "capture saved");
    Ok(path)
}

/// `data:<mime>;base64,<data>` into `(mime, data)`.
fn split_payload(payload: &str) -> Option<(&str, &str)> {
    payload.strip_prefix("data:")?.split_once(";base64,")
}
