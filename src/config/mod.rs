//! Configuration management.
//!
//! [`PalimpsestConfig`] bundles the per-component policy constants. Values
//! come from, in increasing precedence: built-in defaults, a TOML config
//! file, and `PALIMPSEST_*` environment variables.

use crate::detection::{BridgeConfig, DetectionConfig};
use crate::judge::JudgeConfig;
use crate::matching::MatcherConfig;
use crate::remap::RemapConfig;
use crate::reprocessing::ReprocessingConfig;
use serde::Deserialize;
use std::path::Path;

/// Main configuration for palimpsest.
#[derive(Debug, Clone, Default)]
pub struct PalimpsestConfig {
    /// Tiered matcher thresholds.
    pub matcher: MatcherConfig,
    /// Reprocessing orchestration policy.
    pub reprocessing: ReprocessingConfig,
    /// Reference remapper thresholds.
    pub remap: RemapConfig,
    /// Detection orchestration policy.
    pub detection: DetectionConfig,
    /// Bridge engine pre-filter policy.
    pub bridge: BridgeConfig,
    /// Judgment collaborator settings.
    pub judge: JudgeConfig,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Matcher section.
    pub matcher: Option<ConfigFileMatcher>,
    /// Reprocessing section.
    pub reprocessing: Option<ConfigFileReprocessing>,
    /// Remap section.
    pub remap: Option<ConfigFileRemap>,
    /// Detection section.
    pub detection: Option<ConfigFileDetection>,
    /// Bridge section.
    pub bridge: Option<ConfigFileBridge>,
    /// Judge section.
    pub judge: Option<ConfigFileJudge>,
}

/// Matcher section in the config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileMatcher {
    /// Commit-eligible confidence threshold.
    pub recovered_threshold: Option<f32>,
    /// Review-band confidence threshold.
    pub review_threshold: Option<f32>,
    /// Shingle fallback floor.
    pub shingle_floor: Option<f32>,
    /// Context-match confidence discount.
    pub context_discount: Option<f32>,
    /// Unit-bounded index radius.
    pub unit_window: Option<usize>,
}

/// Reprocessing section in the config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileReprocessing {
    /// Commit gate.
    pub recovery_floor: Option<f32>,
    /// Matching fan-out width.
    pub max_workers: Option<usize>,
}

/// Remap section in the config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileRemap {
    /// Auto-remap similarity threshold.
    pub auto_threshold: Option<f32>,
    /// Review-band similarity threshold.
    pub review_threshold: Option<f32>,
}

/// Detection section in the config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileDetection {
    /// Similarity engine weight.
    pub weight_similarity: Option<f32>,
    /// Contradiction engine weight.
    pub weight_contradiction: Option<f32>,
    /// Bridge engine weight.
    pub weight_bridge: Option<f32>,
    /// Edge discard floor.
    pub min_strength: Option<f32>,
    /// Per-engine deadline in milliseconds.
    pub engine_timeout_ms: Option<u64>,
    /// Batch deadline in milliseconds.
    pub batch_timeout_ms: Option<u64>,
}

/// Bridge section in the config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileBridge {
    /// Endpoint importance floor.
    pub importance_floor: Option<f32>,
    /// Sweet-spot lower edge.
    pub overlap_min: Option<f32>,
    /// Sweet-spot upper edge.
    pub overlap_max: Option<f32>,
    /// Judgment-call cap per source unit.
    pub max_candidates: Option<usize>,
}

/// Judge section in the config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileJudge {
    /// Service endpoint.
    pub endpoint: Option<String>,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Retries per pair.
    pub max_retries: Option<u32>,
    /// Linear backoff step in milliseconds.
    pub retry_backoff_ms: Option<u64>,
}

impl PalimpsestConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads defaults plus environment overrides.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies `PALIMPSEST_*` environment overrides to every section.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.matcher = self.matcher.with_env_overrides();
        self.reprocessing = self.reprocessing.with_env_overrides();
        self.remap = self.remap.with_env_overrides();
        self.detection = self.detection.with_env_overrides();
        self.bridge = self.bridge.with_env_overrides();
        self.judge = self.judge.with_env_overrides();
        self
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if the file cannot be read or
    /// parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::InvalidInput(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let file: ConfigFile = toml::from_str(&contents).map_err(|e| {
            crate::Error::InvalidInput(format!("cannot parse config file {}: {e}", path.display()))
        })?;
        Ok(Self::from_config_file(file))
    }

    /// Loads a file when given, otherwise defaults; environment overrides
    /// apply either way.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if a given file cannot be
    /// read or parsed.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        Ok(config.with_env_overrides())
    }

    /// Merges a parsed config file over the defaults.
    #[must_use]
    pub fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(matcher) = file.matcher {
            if let Some(v) = matcher.recovered_threshold {
                config.matcher.recovered_threshold = v.clamp(0.0, 1.0);
            }
            if let Some(v) = matcher.review_threshold {
                config.matcher.review_threshold = v.clamp(0.0, 1.0);
            }
            if let Some(v) = matcher.shingle_floor {
                config.matcher.shingle_floor = v.clamp(0.0, 1.0);
            }
            if let Some(v) = matcher.context_discount {
                config.matcher.context_discount = v.clamp(0.0, 1.0);
            }
            if let Some(v) = matcher.unit_window {
                config.matcher.unit_window = v;
            }
        }

        if let Some(reprocessing) = file.reprocessing {
            if let Some(v) = reprocessing.recovery_floor {
                config.reprocessing.recovery_floor = v.clamp(0.0, 1.0);
            }
            if let Some(v) = reprocessing.max_workers {
                config.reprocessing.max_workers = v.max(1);
            }
        }

        if let Some(remap) = file.remap {
            if let Some(v) = remap.auto_threshold {
                config.remap.auto_threshold = v.clamp(0.0, 1.0);
            }
            if let Some(v) = remap.review_threshold {
                config.remap.review_threshold = v.clamp(0.0, 1.0);
            }
        }

        if let Some(detection) = file.detection {
            if let Some(v) = detection.weight_similarity {
                config.detection.weights.similarity = v.max(0.0);
            }
            if let Some(v) = detection.weight_contradiction {
                config.detection.weights.contradiction = v.max(0.0);
            }
            if let Some(v) = detection.weight_bridge {
                config.detection.weights.bridge = v.max(0.0);
            }
            if let Some(v) = detection.min_strength {
                config.detection.min_strength = v.clamp(0.0, 1.0);
            }
            if let Some(v) = detection.engine_timeout_ms {
                config.detection.engine_timeout_ms = v.max(1);
            }
            if let Some(v) = detection.batch_timeout_ms {
                config.detection.batch_timeout_ms = v.max(1);
            }
        }

        if let Some(bridge) = file.bridge {
            if let Some(v) = bridge.importance_floor {
                config.bridge.importance_floor = v.clamp(0.0, 1.0);
            }
            if let Some(v) = bridge.overlap_min {
                config.bridge.overlap_min = v.clamp(0.0, 1.0);
            }
            if let Some(v) = bridge.overlap_max {
                config.bridge.overlap_max = v.clamp(0.0, 1.0);
            }
            if let Some(v) = bridge.max_candidates {
                config.bridge.max_candidates = v.max(1);
            }
        }

        if let Some(judge) = file.judge {
            if judge.endpoint.is_some() {
                config.judge.endpoint = judge.endpoint;
            }
            if let Some(v) = judge.timeout_ms {
                config.judge.timeout_ms = v.max(1);
            }
            if let Some(v) = judge.max_retries {
                config.judge.max_retries = v;
            }
            if let Some(v) = judge.retry_backoff_ms {
                config.judge.retry_backoff_ms = v;
            }
        }

        config
    }
}
