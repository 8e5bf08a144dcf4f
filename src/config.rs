//! Runtime configuration for ada-snapkv.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! The press knobs are fixed once a press is built from them.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{PressError, Result};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "ada-snapkv", about = "Score a KV cache for adaptive SnapKV compression")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Path to the score request (JSON).
    #[arg(short, long)]
    pub input: PathBuf,

    /// Write the response here instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Also compute the global retention plan for the scores.
    #[arg(long)]
    pub plan: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scoring knobs.
    pub press: PressConfig,

    /// Log output settings.
    pub logging: LoggingConfig,
}

/// Knobs of the adaptive SnapKV press.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressConfig {
    /// Target fraction of the cache to evict (0.0 = no compression).
    pub compression_ratio: f64,

    /// Number of trailing query positions used as the observation window.
    pub window_size: usize,

    /// Width of the moving-average smoothing. Must be odd.
    pub kernel_size: usize,

    /// Fraction of the per-head budget guaranteed to every head.
    pub floor_alpha: f64,
}

impl Default for PressConfig {
    fn default() -> Self {
        Self {
            compression_ratio: 0.0,
            window_size: 64,
            kernel_size: 5,
            floor_alpha: 0.2,
        }
    }
}

impl PressConfig {
    /// Build a validated configuration.
    pub fn new(
        compression_ratio: f64,
        window_size: usize,
        kernel_size: usize,
        floor_alpha: f64,
    ) -> Result<Self> {
        let config = Self {
            compression_ratio,
            window_size,
            kernel_size,
            floor_alpha,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check ranges of every knob.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.compression_ratio) {
            return Err(PressError::InvalidConfig(format!(
                "compression_ratio must be in [0, 1), got {}",
                self.compression_ratio
            )));
        }
        if !(0.0..=1.0).contains(&self.floor_alpha) {
            return Err(PressError::InvalidConfig(format!(
                "floor_alpha must be in [0, 1], got {}",
                self.floor_alpha
            )));
        }
        if self.window_size == 0 {
            return Err(PressError::InvalidConfig(
                "window_size must be at least 1".to_string(),
            ));
        }
        if self.kernel_size % 2 == 0 {
            return Err(PressError::InvalidConfig(format!(
                "kernel_size must be odd, got {}",
                self.kernel_size
            )));
        }
        Ok(())
    }

    /// Number of slots every head keeps regardless of cross-head competition.
    ///
    /// ```text
    /// floor_count = floor(seq_len * (1 - compression_ratio) * floor_alpha)
    /// ```
    pub fn floor_count(&self, seq_len: usize) -> usize {
        (seq_len as f64 * (1.0 - self.compression_ratio) * self.floor_alpha) as usize
    }
}

/// Log output settings for the binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,

    /// Default filter directive when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        match Self::read(path)? {
            Some(config) => Ok(config),
            None => {
                tracing::warn!("Config file not found at {:?}, using defaults", path);
                Ok(Config::default())
            }
        }
    }

    /// Like [`Config::load`], but reports a missing file as `None` instead of logging.
    pub fn read(path: &std::path::Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        let config = serde_json::from_str::<Config>(&data)?;
        config.press.validate()?;
        Ok(Some(config))
    }
}
