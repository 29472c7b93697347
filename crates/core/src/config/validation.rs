//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::{AppConfig, CaptureOptions};
use thiserror::Error;

/// Smallest accepted capture scale.
pub const MIN_SCALE: f64 = 0.5;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl CaptureOptions {
    /// Validate a per-capture options snapshot.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `scale` is below 0.5 or not finite,
    /// or if `quality` is outside (0, 1].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.scale.is_finite() || self.scale < MIN_SCALE {
            return Err(ConfigError::Invalid { field: "capture.scale".into(), reason: "must be at least 0.5".into() });
        }
        if !(self.quality > 0.0 && self.quality <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "capture.quality".into(),
                reason: "must be in the range (0, 1]".into(),
            });
        }
        Ok(())
    }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - the capture options are invalid
    /// - `max_bytes` is 0 or exceeds 100MB
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` is empty
    /// - `node_margin` is negative
    /// - `webp_max_dimension` is 0
    ///
    /// Returns `ConfigError::Missing` if the content selector is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.capture.validate()?;

        if self.max_bytes == 0 {
            return Err(ConfigError::Invalid { field: "max_bytes".into(), reason: "must be greater than 0".into() });
        }
        if self.max_bytes > 100 * 1024 * 1024 {
            return Err(ConfigError::Invalid { field: "max_bytes".into(), reason: "must not exceed 100MB".into() });
        }

        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        if !self.node_margin.is_finite() || self.node_margin < 0.0 {
            return Err(ConfigError::Invalid { field: "node_margin".into(), reason: "must not be negative".into() });
        }

        if self.webp_max_dimension == 0 {
            return Err(ConfigError::Invalid {
                field: "webp_max_dimension".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.selectors.content.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "selectors.content".into(),
                hint: "Set STITCHCAP_SELECTORS__CONTENT to the content container selector".into(),
            });
        }

        if self.selectors.foreground.is_empty() {
            tracing::warn!("no foreground selectors configured; background captures will include page chrome");
        }

        Ok(())
    }
}
