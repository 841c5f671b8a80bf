//! `thumbd.toml` loading.
//!
//! The operator's file is laid over the stock defaults section by section,
//! so it only needs the keys it changes. The result is validated before the
//! server starts.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [server]
//! listen = "127.0.0.1:3520"          # Address to accept requests on
//!
//! [origin]
//! base_url = "http://127.0.0.1:8080/" # Where originals are fetched from
//! fetch_timeout_ms = 30000
//! max_idle_connections = 2            # Kept-alive connections per origin host
//!
//! [pool]
//! max_workers = 4                     # Concurrent transforms (omit for auto = CPU cores)
//! max_queue_ms = 0                    # Longest wait for a worker, 0 = forever
//! max_processing_ms = 60000           # Longest transform before the process aborts
//!
//! [thumbnail]
//! max_buffer_pixels = 100000000       # Decode budget; 0 = unlimited
//! sharpen = true
//! fast_resize = false
//! quality = 85
//! lossless = false
//! lossless_max_bits_per_pixel = 4     # 0 disables
//! allow_webp = false
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{Options, Quality, SaveOptions};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration loaded from `thumbd.toml`.
///
/// All fields have sensible defaults. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub server: ListenConfig,
    pub origin: OriginConfig,
    pub pool: PoolConfig,
    pub thumbnail: ThumbnailConfig,
}

impl ServerConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "server.listen is not a socket address: {}",
                self.server.listen
            )));
        }
        let base = Url::parse(&self.origin.base_url).map_err(|e| {
            ConfigError::Validation(format!("origin.base_url is not a URL: {e}"))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(
                "origin.base_url must be http or https".into(),
            ));
        }
        if self.origin.fetch_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "origin.fetch_timeout_ms must be non-zero".into(),
            ));
        }
        if self.pool.max_workers == Some(0) {
            return Err(ConfigError::Validation(
                "pool.max_workers must be at least 1".into(),
            ));
        }
        if !(1..=100).contains(&self.thumbnail.quality) {
            return Err(ConfigError::Validation(
                "thumbnail.quality must be 1-100".into(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .listen
            .parse()
            .map_err(|e| ConfigError::Validation(format!("server.listen: {e}")))
    }

    pub fn origin_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.origin.base_url)
            .map_err(|e| ConfigError::Validation(format!("origin.base_url: {e}")))
    }

    /// Transform options every request starts from.
    pub fn default_options(&self) -> Options {
        let t = &self.thumbnail;
        Options {
            max_buffer_pixels: t.max_buffer_pixels,
            sharpen: t.sharpen,
            fast_resize: t.fast_resize,
            save: SaveOptions {
                quality: Quality::new(t.quality),
                lossless: t.lossless,
                lossless_max_bits_per_pixel: t.lossless_max_bits_per_pixel,
                allow_webp: t.allow_webp,
                ..SaveOptions::default()
            },
            ..Options::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenConfig {
    /// Socket address to bind, e.g. `0.0.0.0:3520`.
    pub listen: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3520".to_string(),
        }
    }
}

/// Upstream the originals are fetched from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OriginConfig {
    /// Request paths are resolved relative to this URL.
    pub base_url: String,
    pub fetch_timeout_ms: u64,
    pub max_idle_connections: usize,
}

impl OriginConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/".to_string(),
            fetch_timeout_ms: 30_000,
            max_idle_connections: 2,
        }
    }
}

/// Worker pool sizing and deadlines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Maximum number of concurrent transforms.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_workers: Option<usize>,
    /// Longest a request may wait for a worker. 0 waits forever.
    pub max_queue_ms: u64,
    /// Longest a transform may run before the process is aborted. 0 never
    /// aborts.
    pub max_processing_ms: u64,
}

impl PoolConfig {
    /// Transforms are CPU-bound, so more workers than cores only adds
    /// contention: `max_workers` can lower the count, never raise it.
    pub fn workers(&self) -> usize {
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
        self.max_workers.map_or(cores, |n| n.clamp(1, cores))
    }

    pub fn max_queue(&self) -> Duration {
        Duration::from_millis(self.max_queue_ms)
    }

    pub fn max_processing(&self) -> Duration {
        Duration::from_millis(self.max_processing_ms)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            max_queue_ms: 0,
            max_processing_ms: 60_000,
        }
    }
}

/// Server-side transform defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbnailConfig {
    /// Reject originals whose decode would need more pixels than this.
    pub max_buffer_pixels: u64,
    pub sharpen: bool,
    pub fast_resize: bool,
    pub quality: u32,
    pub lossless: bool,
    pub lossless_max_bits_per_pixel: u32,
    pub allow_webp: bool,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_buffer_pixels: 100_000_000,
            sharpen: true,
            fast_resize: false,
            quality: 85,
            lossless: false,
            lossless_max_bits_per_pixel: 4,
            allow_webp: false,
        }
    }
}

/// `ServerConfig::default()` as a TOML table, the layer an operator's file
/// is laid over.
fn defaults_table() -> Result<toml::Table, ConfigError> {
    match toml::Value::try_from(ServerConfig::default()) {
        Ok(toml::Value::Table(table)) => Ok(table),
        Ok(_) => Err(ConfigError::Validation("stock defaults are not a table".into())),
        Err(e) => Err(ConfigError::Validation(format!("stock defaults: {e}"))),
    }
}

/// Lay `file` over `base` one section at a time.
///
/// A section in `file` replaces only the keys it names; the rest of that
/// section keeps its default. Anything that isn't a section table replaces
/// the base value outright and is left for deserialization to reject.
fn overlay(base: &mut toml::Table, file: toml::Table) {
    for (name, value) in file {
        match (base.get_mut(&name), value) {
            (Some(toml::Value::Table(section)), toml::Value::Table(keys)) => section.extend(keys),
            (_, value) => {
                base.insert(name, value);
            }
        }
    }
}

/// Load `thumbd.toml`, or the stock defaults when `path` is `None`.
///
/// A path that doesn't exist is an error: the operator asked for that file.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let mut table = defaults_table()?;
    if let Some(path) = path {
        let content = fs::read_to_string(path)?;
        overlay(&mut table, toml::from_str(&content)?);
    }
    let config: ServerConfig = toml::Value::Table(table).try_into()?;
    config.validate()?;
    Ok(config)
}

/// Returns a fully-commented stock `thumbd.toml` with all keys and
/// explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# thumbd Configuration
# ====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# HTTP server
# ---------------------------------------------------------------------------
[server]
# Address and port to accept thumbnail requests on.
listen = "127.0.0.1:3520"

# ---------------------------------------------------------------------------
# Origin
# ---------------------------------------------------------------------------
[origin]
# Request paths are resolved below this URL: GET /cats/a.jpg?w=200 fetches
# <base_url>/cats/a.jpg.
base_url = "http://127.0.0.1:8080/"

# Give up on an origin fetch after this many milliseconds (answers 504).
fetch_timeout_ms = 30000

# Idle keep-alive connections to hold per origin host.
max_idle_connections = 2

# ---------------------------------------------------------------------------
# Worker pool
# ---------------------------------------------------------------------------
[pool]
# Maximum concurrent image transforms.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_workers = 4

# Longest a request waits for a free worker before answering 503.
# 0 waits forever.
max_queue_ms = 0

# Longest a single transform may run. A transform that overruns leaves the
# codec in an unknown state, so the process aborts and relies on its
# supervisor to restart it. 0 disables the check.
max_processing_ms = 60000

# ---------------------------------------------------------------------------
# Thumbnail defaults (query parameters override the non-security ones)
# ---------------------------------------------------------------------------
[thumbnail]
# Refuse originals whose decode buffer would exceed this many pixels
# (answers 413). JPEG can be decoded at 1/8 scale, so its budget is 64x
# larger. 0 = unlimited.
max_buffer_pixels = 100000000

# Light unsharp mask after downscaling.
sharpen = true

# Faster, softer resampling.
fast_resize = false

# Lossy (JPEG) encoding quality, 1-100.
quality = 85

# Keep lossless PNG output for non-JPEG originals.
lossless = false

# Keep PNG output for non-JPEG originals while it costs at most this many
# bits per pixel, else fall back to JPEG. 0 disables.
lossless_max_bits_per_pixel = 4

# Emit (lossless) WebP instead of JPEG/PNG.
allow_webp = false
"##
}
