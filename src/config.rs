use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

pub const SERVICE_URL_ENV: &str = "POSE_COACH_SERVICE_URL";
pub const INTERVAL_ENV: &str = "POSE_COACH_INTERVAL_MS";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub camera: CameraConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Base address of the analysis service, without the `/api` suffix
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SamplerConfig {
    /// Tick period in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// JPEG quality (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// What to do with a response whose request was issued under a different mode/pose
    #[serde(default)]
    pub stale_results: StalePolicy,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StalePolicy {
    /// Apply against whatever state holds when the response arrives
    #[default]
    Apply,
    /// Drop responses issued before the latest mode switch or pose selection
    Discard,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CameraSourceKind {
    #[default]
    Device,
    TestPattern,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default)]
    pub source: CameraSourceKind,
    #[serde(default)]
    pub index: i32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

fn default_base_url() -> String { "http://127.0.0.1:8000".to_string() }
fn default_request_timeout_ms() -> u64 { 5000 }
fn default_interval_ms() -> u64 { 1000 }
fn default_jpeg_quality() -> u8 { 80 }
fn default_width() -> u32 { 640 }
fn default_height() -> u32 { 480 }

/// Largest accepted capture side (8K UHD width).
pub const MAX_CAMERA_SIDE: u32 = 7680;

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            jpeg_quality: default_jpeg_quality(),
            stale_results: StalePolicy::default(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: CameraSourceKind::default(),
            index: 0,
            width: default_width(),
            height: default_height(),
        }
    }
}

impl SamplerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        let content = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Read {
            path: path_str.clone(),
            source,
        })?;
        Self::parse(&content, &path_str)
    }

    /// Falls back to defaults when the file is missing or unusable.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(ConfigError::Read { path, .. }) => {
                tracing::info!("{} not found, using defaults", path);
                Self::default()
            }
            Err(e) => {
                tracing::warn!("{e}, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `POSE_COACH_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(SERVICE_URL_ENV) {
            self.service.base_url = url;
        }
        if let Some(raw) = lookup(INTERVAL_ENV) {
            self.sampler.interval_ms = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{INTERVAL_ENV}={raw} is not a number")))?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("service.base_url is empty".into()));
        }
        if self.sampler.interval_ms == 0 {
            return Err(ConfigError::Invalid("sampler.interval_ms must be positive".into()));
        }
        if !(1..=100).contains(&self.sampler.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "sampler.jpeg_quality must be 1-100, got {}",
                self.sampler.jpeg_quality
            )));
        }
        let (w, h) = (self.camera.width, self.camera.height);
        if w == 0 || h == 0 || w > MAX_CAMERA_SIDE || h > MAX_CAMERA_SIDE {
            return Err(ConfigError::Invalid(format!(
                "camera size must be 1-{MAX_CAMERA_SIDE} per side, got {w}x{h}"
            )));
        }
        Ok(())
    }
}
