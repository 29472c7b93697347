//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (STITCHCAP_*)
//! 2. TOML config file (if STITCHCAP_CONFIG_FILE set)
//! 3. Built-in defaults

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Output image encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Size-limited primary format.
    Webp,
    /// Unconstrained secondary format, also the fallback for oversized WebP.
    Jpeg,
    /// Lossless format.
    Png,
}

impl OutputFormat {
    /// MIME subtype used in the `data:image/<subtype>` payload.
    pub fn subtype(self) -> &'static str {
        match self {
            OutputFormat::Webp => "webp",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subtype())
    }
}

/// Read-only per-capture options snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CaptureOptions {
    /// Device pixels per CSS pixel (>= 0.5).
    pub scale: f64,
    /// Requested output encoding.
    pub format: OutputFormat,
    /// Encoder quality in (0, 1].
    pub quality: f32,
    /// Skip the page background and leave the canvas transparent.
    pub suppress_background: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self { scale: 1.8, format: OutputFormat::Jpeg, quality: 0.92, suppress_background: false }
    }
}

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (STITCHCAP_*)
/// 2. TOML config file (if STITCHCAP_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to SQLite asset store.
    ///
    /// Set via STITCHCAP_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// User-Agent string for asset and stylesheet requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum bytes to fetch per asset.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Default capture options; callers may override per request.
    #[serde(default)]
    pub capture: CaptureOptions,

    /// Vertical gap in CSS pixels between stitched nodes.
    #[serde(default = "default_node_margin")]
    pub node_margin: f64,

    /// Largest width or height (device pixels) the WebP encoder accepts.
    #[serde(default = "default_webp_max_dimension")]
    pub webp_max_dimension: u32,

    /// Time to let the page repaint after hiding foreground chrome.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Document layout hooks.
    #[serde(default)]
    pub selectors: SelectorConfig,

    /// Font family fragment identifying the embedded icon font.
    #[serde(default = "default_icon_font_family")]
    pub icon_font_family: String,

    /// Script resource handed to the rasterization service for its worker.
    #[serde(default)]
    pub worker_url: Option<String>,
}

/// CSS selectors describing the captured document's layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// The primary content container.
    #[serde(default = "default_content_selector")]
    pub content: String,

    /// Fixed footer overlapping the bottom of the content container.
    #[serde(default = "default_footer_selector")]
    pub footer: String,

    /// Style node holding custom `@font-face` rules or an `@import`.
    #[serde(default = "default_style_source_selector")]
    pub style_source: String,

    /// Candidates for the element painting the page background, in priority order.
    #[serde(default = "default_background_selectors")]
    pub background: Vec<String>,

    /// Chrome hidden while the background is captured.
    #[serde(default = "default_foreground_selectors")]
    pub foreground: Vec<String>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./stitchcap-assets.sqlite")
}

fn default_user_agent() -> String {
    "stitchcap/0.1".into()
}

fn default_max_bytes() -> usize {
    10_485_760 // 10MB
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_node_margin() -> f64 {
    5.0
}

fn default_webp_max_dimension() -> u32 {
    16_000
}

fn default_settle_delay_ms() -> u64 {
    100
}

fn default_icon_font_family() -> String {
    "Font Awesome".into()
}

fn default_content_selector() -> String {
    "#chat".into()
}

fn default_footer_selector() -> String {
    "#form_sheld".into()
}

fn default_style_source_selector() -> String {
    "#custom-style".into()
}

fn default_background_selectors() -> Vec<String> {
    [
        "#bg_animation_container > div[id^=\"bg\"]",
        "#background > div[id^=\"bg\"]",
        "#bg1",
        "#bg_animation_container",
        "#background",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_foreground_selectors() -> Vec<String> {
    ["#chat", "#form_sheld", ".header", "#right-panel", "#left-panel", "#character-popup"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            content: default_content_selector(),
            footer: default_footer_selector(),
            style_source: default_style_source_selector(),
            background: default_background_selectors(),
            foreground: default_foreground_selectors(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            user_agent: default_user_agent(),
            max_bytes: default_max_bytes(),
            timeout_ms: default_timeout_ms(),
            capture: CaptureOptions::default(),
            node_margin: default_node_margin(),
            webp_max_dimension: default_webp_max_dimension(),
            settle_delay_ms: default_settle_delay_ms(),
            selectors: SelectorConfig::default(),
            icon_font_family: default_icon_font_family(),
            worker_url: None,
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Repaint settle delay as Duration.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Nested keys use a double underscore in environment variables, e.g.
    /// `STITCHCAP_CAPTURE__SCALE=2`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("STITCHCAP_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("STITCHCAP_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
