use std::{fs, path::Path};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Daemon configuration, loaded from a YAML file. Every field has a
/// default so an empty document yields a working localhost resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted netstring payload length in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub default_zone: ZoneConfig,

    #[serde(default)]
    pub zones: AHashMap<String, ZoneConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(rename = "type", default)]
    pub backend: CacheBackend,

    #[serde(default)]
    pub options: CacheOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheOptions {
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneConfig {
    /// Wall-clock deadline in seconds covering the full resolve
    /// (TXT discovery plus HTTPS fetch).
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Honor `mode: testing` policies as if they were enforcing.
    #[serde(default)]
    pub strict_testing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_frame_size: default_max_frame_size(),
            log_level: default_log_level(),
            cache: CacheConfig::default(),
            default_zone: ZoneConfig::default(),
            zones: AHashMap::new(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Internal,
            options: CacheOptions::default(),
        }
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            cache_size: default_cache_size(),
        }
    }
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            strict_testing: false,
        }
    }
}

impl Config {
    pub fn parse(contents: &str) -> Result<Self, String> {
        serde_yaml::from_str(contents).map_err(|err| err.to_string())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|err| format!("Could not read {}: {}", path.display(), err))?;
        Self::parse(&contents)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8461
}

const fn default_max_frame_size() -> usize {
    crate::listener::frame::DEFAULT_MAX_FRAME_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_cache_size() -> usize {
    10000
}

const fn default_timeout() -> u64 {
    4
}
