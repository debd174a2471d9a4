//! Configuration module for Lightbox

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::strategy::StrategyKind;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Decoded image cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Retry/backoff policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-identifier circuit breaker
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Strategy chain, timeouts and concurrency
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Study loading
    #[serde(default)]
    pub study: StudyConfig,

    /// Background preloading
    #[serde(default)]
    pub preload: PreloadConfig,
}

/// Cache sizing and eviction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Upper bound on the summed size of cached images
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,

    /// Fraction of `max_size_bytes` eviction brings usage down to
    #[serde(default = "default_eviction_target")]
    pub eviction_target: f64,

    /// Drop everything instead of trimming when an insert overflows
    #[serde(default)]
    pub aggressive_eviction: bool,
}

fn default_max_size_bytes() -> u64 {
    512 * 1024 * 1024
}

fn default_eviction_target() -> f64 {
    0.7
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_max_size_bytes(),
            eviction_target: default_eviction_target(),
            aggressive_eviction: false,
        }
    }
}

/// Exponential backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per load, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on any single delay (before jitter)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor between attempts
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add up to one second of uniform jitter
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time after the last failure before a probe is allowed
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    60
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Cooldown as a duration
    pub const fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Strategy chain and engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Deadline for a direct strategy attempt
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Deadline for server-assisted strategies
    #[serde(default = "default_server_timeout_secs")]
    pub server_timeout_secs: u64,

    /// Concurrent acquisitions admitted at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Strategies to try, in order
    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategyKind>,

    /// Base URL of the transcode server (enables `server-transcode`)
    #[serde(default)]
    pub server_base_url: Option<String>,

    /// DICOM transfer syntaxes the direct parser refuses
    #[serde(default = "default_unsupported_transfer_syntaxes")]
    pub unsupported_transfer_syntaxes: Vec<String>,

    /// Attempt records kept per identifier
    #[serde(default = "default_attempt_log_limit")]
    pub attempt_log_limit: usize,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_server_timeout_secs() -> u64 {
    60
}

fn default_max_concurrent() -> usize {
    6
}

fn default_strategies() -> Vec<StrategyKind> {
    StrategyKind::all().to_vec()
}

fn default_unsupported_transfer_syntaxes() -> Vec<String> {
    [
        "1.2.840.10008.1.2.4.57", // JPEG lossless
        "1.2.840.10008.1.2.4.70", // JPEG lossless, first-order prediction
        "1.2.840.10008.1.2.4.80", // JPEG-LS lossless
        "1.2.840.10008.1.2.4.81", // JPEG-LS near-lossless
        "1.2.840.10008.1.2.4.90", // JPEG 2000 lossless
        "1.2.840.10008.1.2.4.91", // JPEG 2000
        "1.2.840.10008.1.2.5",    // RLE
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_attempt_log_limit() -> usize {
    20
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            server_timeout_secs: default_server_timeout_secs(),
            max_concurrent: default_max_concurrent(),
            strategies: default_strategies(),
            server_base_url: None,
            unsupported_transfer_syntaxes: default_unsupported_transfer_syntaxes(),
            attempt_log_limit: default_attempt_log_limit(),
        }
    }
}

impl AcquisitionConfig {
    /// Direct strategy deadline
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Server-assisted strategy deadline
    pub const fn server_timeout(&self) -> Duration {
        Duration::from_secs(self.server_timeout_secs)
    }
}

/// Study loader settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyConfig {
    /// Leading identifiers loaded one by one at high priority
    #[serde(default = "default_high_priority_count")]
    pub high_priority_count: usize,
}

fn default_high_priority_count() -> usize {
    3
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            high_priority_count: default_high_priority_count(),
        }
    }
}

/// Preloader settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadConfig {
    /// Images warmed ahead of the current one (half as many behind)
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

fn default_window_size() -> usize {
    4
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        crate::paths::config_path()
    }

    /// Load config from the default path or create default
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        Self::load_from(&path)
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()?;
        self.save_to(&path)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.acquisition.max_concurrent, 6);
        assert_eq!(config.acquisition.strategies.len(), 4);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[retry]\nmax_attempts = 5\n\n[acquisition]\nstrategies = [\"generic-image-fallback\"]\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.acquisition.strategies, vec![StrategyKind::GenericImage]);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.acquisition.server_base_url = Some("http://localhost:5000".to_string());
        config.cache.aggressive_eviction = true;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
