//! Configuration for the validation pipeline and sync orchestrator.
//!
//! Options can come from a TOML file (CLI usage) or be constructed in code
//! (library usage); both paths funnel through [`Config`] and are validated
//! by [`load_config`] / [`Config::validate`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Execution mode chosen per sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStrategy {
    StandardSync,
    BatchSync,
    ParallelSync,
    IncrementalSync,
    /// Let the orchestrator's decision table pick.
    #[default]
    Auto,
}

impl std::str::FromStr for SyncStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STANDARD_SYNC" | "STANDARD" => Ok(SyncStrategy::StandardSync),
            "BATCH_SYNC" | "BATCH" => Ok(SyncStrategy::BatchSync),
            "PARALLEL_SYNC" | "PARALLEL" => Ok(SyncStrategy::ParallelSync),
            "INCREMENTAL_SYNC" | "INCREMENTAL" => Ok(SyncStrategy::IncrementalSync),
            "AUTO" => Ok(SyncStrategy::Auto),
            other => Err(format!("unknown sync strategy: {}", other)),
        }
    }
}

/// Quality score bands used when reporting batch health.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct QualityThresholds {
    #[serde(default = "default_threshold_high")]
    pub high: u8,
    #[serde(default = "default_threshold_medium")]
    pub medium: u8,
    #[serde(default = "default_threshold_low")]
    pub low: u8,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            high: default_threshold_high(),
            medium: default_threshold_medium(),
            low: default_threshold_low(),
        }
    }
}

fn default_threshold_high() -> u8 {
    90
}
fn default_threshold_medium() -> u8 {
    70
}
fn default_threshold_low() -> u8 {
    50
}

/// Options recognized by the validation pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Records per internal batch.
    pub batch_size: usize,
    /// Hard cap on `batch_size`.
    pub max_batch_size: usize,
    /// Overall timeout for one submission, in milliseconds.
    pub validation_timeout_ms: u64,
    /// Apply pre/post auto-fix passes during validation.
    pub auto_fix: bool,
    /// Treat quality warnings as strictly as possible (more warnings, same
    /// validity rules).
    pub strict_mode: bool,
    pub quality_thresholds: QualityThresholds,
    pub enable_cache: bool,
    /// Maximum cached validation results.
    pub cache_size: usize,
    /// Cache entry time-to-live, in milliseconds.
    pub cache_ttl_ms: u64,
    /// Batches processed concurrently. 1 unless raised by the optimizer.
    pub concurrency: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_batch_size: 1000,
            validation_timeout_ms: 5000,
            auto_fix: true,
            strict_mode: false,
            quality_thresholds: QualityThresholds::default(),
            enable_cache: true,
            cache_size: 1000,
            cache_ttl_ms: 5 * 60 * 1000,
            concurrency: 1,
        }
    }
}

/// Options recognized by the sync orchestrator and retry coordinator.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncOptions {
    pub strategy: SyncStrategy,
    pub max_sync_attempts: u32,
    /// Base backoff delay, doubled per attempt.
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling.
    pub retry_max_delay_ms: u64,
    /// Conflict-detection strictness; raised by the optimizer under load.
    pub strict_conflict_detection: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            strategy: SyncStrategy::Auto,
            max_sync_attempts: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 10_000,
            strict_conflict_detection: false,
        }
    }
}

/// Top-level configuration, mirroring the TOML file layout.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineOptions,
    pub sync: SyncOptions,
}

impl Config {
    /// Reject option combinations the pipeline cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.batch_size == 0 {
            anyhow::bail!("pipeline.batch_size must be > 0");
        }
        if self.pipeline.max_batch_size == 0 {
            anyhow::bail!("pipeline.max_batch_size must be > 0");
        }
        if self.pipeline.validation_timeout_ms == 0 {
            anyhow::bail!("pipeline.validation_timeout_ms must be > 0");
        }
        if self.pipeline.concurrency == 0 {
            anyhow::bail!("pipeline.concurrency must be >= 1");
        }
        if self.pipeline.enable_cache && self.pipeline.cache_size == 0 {
            anyhow::bail!("pipeline.cache_size must be > 0 when the cache is enabled");
        }
        let t = &self.pipeline.quality_thresholds;
        if !(t.low <= t.medium && t.medium <= t.high && t.high <= 100) {
            anyhow::bail!("pipeline.quality_thresholds must satisfy low <= medium <= high <= 100");
        }
        if self.sync.max_sync_attempts == 0 {
            anyhow::bail!("sync.max_sync_attempts must be >= 1");
        }
        if self.sync.retry_base_delay_ms > self.sync.retry_max_delay_ms {
            anyhow::bail!("sync.retry_base_delay_ms must not exceed sync.retry_max_delay_ms");
        }
        Ok(())
    }
}

/// Load and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn default_pipeline_options_match_contract() {
        let opts = PipelineOptions::default();
        assert_eq!(opts.batch_size, 100);
        assert_eq!(opts.max_batch_size, 1000);
        assert_eq!(opts.validation_timeout_ms, 5000);
        assert_eq!(opts.cache_ttl_ms, 300_000);
        assert!(opts.auto_fix);
    }

    #[test]
    fn zero_batch_size_rejected() {
        let mut cfg = Config::default();
        cfg.pipeline.batch_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn threshold_ordering_enforced() {
        let mut cfg = Config::default();
        cfg.pipeline.quality_thresholds = QualityThresholds {
            high: 50,
            medium: 70,
            low: 90,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn loads_and_validates_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shelfsync.toml");
        std::fs::write(
            &path,
            r#"
            [pipeline]
            validation_timeout_ms = 8000

            [sync]
            retry_base_delay_ms = 250
            "#,
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.pipeline.validation_timeout_ms, 8000);
        assert_eq!(cfg.sync.retry_base_delay_ms, 250);

        std::fs::write(&path, "[pipeline]\nbatch_size = 0\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: Config = toml::from_str(
            r#"
            [pipeline]
            batch_size = 50
            strict_mode = true

            [sync]
            strategy = "BATCH_SYNC"
            max_sync_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.pipeline.batch_size, 50);
        assert!(cfg.pipeline.strict_mode);
        assert_eq!(cfg.sync.strategy, SyncStrategy::BatchSync);
        assert_eq!(cfg.sync.max_sync_attempts, 5);
        // Unspecified fields keep their defaults.
        assert_eq!(cfg.pipeline.max_batch_size, 1000);
    }
}
