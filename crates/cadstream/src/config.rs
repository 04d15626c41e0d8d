//! Streamer configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! A handful of limits can be overridden from the environment:
//!
//! - `CADSTREAM_BUDGET_BYTES`: geometry download size budget
//! - `CADSTREAM_MAX_DRAW_CALLS`: draw call budget (`none` for unlimited)
//! - `CADSTREAM_MAX_CONCURRENT_LOADS`: loader concurrency

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::budget::Budget;
use crate::culler::CullerSettings;
use crate::error::{Error, Result};

pub const ENV_BUDGET_BYTES: &str = "CADSTREAM_BUDGET_BYTES";
pub const ENV_MAX_DRAW_CALLS: &str = "CADSTREAM_MAX_DRAW_CALLS";
pub const ENV_MAX_CONCURRENT_LOADS: &str = "CADSTREAM_MAX_CONCURRENT_LOADS";

/// Exponential backoff for failed fetch or parse attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after `failed_attempts` failures (1-based).
    #[must_use]
    pub fn delay(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        let millis = self
            .base_delay_ms
            .saturating_mul(1 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(millis)
    }
}

/// Sector loader limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    /// Maximum number of sector fetches in flight at once.
    pub max_concurrent_loads: usize,
    pub retry: RetryPolicy,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            max_concurrent_loads: 50,
            retry: RetryPolicy::default(),
        }
    }
}

/// How far the camera must move before it counts as a new viewpoint.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct CameraChangeThresholds {
    /// Metres.
    pub distance: f64,
    /// Degrees.
    pub angle: f64,
}

impl Default for CameraChangeThresholds {
    fn default() -> Self {
        Self {
            distance: 1.0,
            angle: 5.0,
        }
    }
}

/// Complete streamer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    pub budget: Budget,
    pub culler: CullerSettings,
    pub loader: LoaderSettings,
    pub camera_change: CameraChangeThresholds,
}

impl StreamerConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = lookup(ENV_BUDGET_BYTES) {
            self.budget.geometry_download_size_bytes = parse_var(ENV_BUDGET_BYTES, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_DRAW_CALLS) {
            self.budget.maximum_draw_calls = if value.trim().eq_ignore_ascii_case("none") {
                None
            } else {
                Some(parse_var(ENV_MAX_DRAW_CALLS, &value)?)
            };
        }
        if let Some(value) = lookup(ENV_MAX_CONCURRENT_LOADS) {
            self.loader.max_concurrent_loads = parse_var(ENV_MAX_CONCURRENT_LOADS, &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject settings the streamer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.loader.max_concurrent_loads == 0 {
            return Err(Error::Config(
                "loader.max_concurrent_loads must be at least 1".into(),
            ));
        }
        if self.loader.retry.max_attempts == 0 {
            return Err(Error::Config(
                "loader.retry.max_attempts must be at least 1".into(),
            ));
        }
        let culler = &self.culler;
        for (name, value) in [
            ("culler.near_field_distance", culler.near_field_distance),
            ("culler.near_field_boost", culler.near_field_boost),
            ("culler.detail_screen_threshold", culler.detail_screen_threshold),
            ("culler.min_screen_size", culler.min_screen_size),
            ("culler.loaded_bonus", culler.loaded_bonus),
            ("camera_change.distance", self.camera_change.distance),
            ("camera_change.angle", self.camera_change.angle),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Config(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name}={value:?} is not a valid number")))
}
