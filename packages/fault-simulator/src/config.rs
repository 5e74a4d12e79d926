//! config.rs — config.toml schema
//!
//! Every field has a default, so a partial file is fine. When the file is
//! missing the copy embedded at build time is used.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::warn;

use crate::recovery::WindowedStabilityAssessor;
use crate::source::SyntheticConfig;

const EMBEDDED: &str = include_str!("../config.toml");

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub runner: RunnerConfig,
    pub recovery: WindowedStabilityAssessor,
    pub synthetic: SyntheticConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub tick_rate_hz: f64,
    /// Runs never last less than this
    pub min_test_duration_s: f64,
    /// Monitoring continues this long after the fault window closes
    pub post_fault_margin_s: f64,
    /// Per-run audit files land here
    pub logs_dir: PathBuf,
    /// Ring-buffer capacity for per-tick monitor history
    pub retention: usize,
    pub seed: Option<u64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 50.0,
            min_test_duration_s: 60.0,
            post_fault_margin_s: 10.0,
            logs_dir: PathBuf::from("logs/scenarios"),
            retention: 10_000,
            seed: None,
        }
    }
}

impl RunnerConfig {
    /// 20 ms at 50 Hz.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros((1e6 / self.tick_rate_hz).round() as u64)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub ctrl_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { ctrl_port: 9090 }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let cfg: Config = toml::from_str(text).context("invalid config.toml")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read `path`, falling back to the embedded defaults if it cannot be read.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text).with_context(|| format!("in {}", path.display())),
            Err(e) => {
                warn!("⚠️  {} not readable ({e}), using built-in config", path.display());
                Self::from_toml(EMBEDDED)
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        let r = &self.runner;
        if !(r.tick_rate_hz.is_finite() && r.tick_rate_hz > 0.0 && r.tick_rate_hz <= 1e6) {
            bail!("runner.tick_rate_hz must be within (0, 1e6], got {}", r.tick_rate_hz);
        }
        for (name, v) in [
            ("runner.min_test_duration_s", r.min_test_duration_s),
            ("runner.post_fault_margin_s", r.post_fault_margin_s),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                bail!("{name} must be a non-negative number, got {v}");
            }
        }
        // the recovery check needs `min_samples` speed samples still in the ring buffer
        if r.retention == 0 || r.retention < self.recovery.min_samples {
            bail!(
                "runner.retention must be at least recovery.min_samples ({}), got {}",
                self.recovery.min_samples,
                r.retention
            );
        }
        if !(0.0..=1.0).contains(&self.recovery.threshold) {
            bail!("recovery.threshold must be within [0, 1], got {}", self.recovery.threshold);
        }
        Ok(())
    }
}
