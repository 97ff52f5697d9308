//! Application configuration (`archi.json`)

use anyhow::Context;
use archi_core::{CharacterId, CoreError};
use archi_cv::{ControllerConfig, TemplateConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Character used when none is given on the command line
pub const PROFILE_ENV: &str = "ARCHI_PROFILE";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub catalog_path: PathBuf,
    pub templates_dir: PathBuf,
    pub store_path: PathBuf,
    pub scan: ScanConfig,
    pub matching: TemplateConfig,
    pub trade: TradeConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from("data/archimonstres_par_zone.json"),
            templates_dir: PathBuf::from("data/templates"),
            store_path: PathBuf::from("data/results.json"),
            scan: ScanConfig::default(),
            matching: TemplateConfig::default(),
            trade: TradeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub interval_ms: u64,
    /// Bound of the event queue between controller and aggregator
    pub channel_capacity: usize,
    pub max_consecutive_failures: u32,
    pub stop_timeout_ms: u64,
    /// Screenshot helper; `--replay` replaces it
    pub capture_command: Option<String>,
    pub capture_args: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            channel_capacity: 256,
            max_consecutive_failures: 5,
            stop_timeout_ms: 3000,
            capture_command: None,
            capture_args: Vec::new(),
        }
    }
}

impl ScanConfig {
    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            interval: Duration::from_millis(self.interval_ms),
            max_consecutive_failures: self.max_consecutive_failures,
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeConfig {
    /// Most monsters in one proposal, both sides together
    pub max_size: usize,
    /// Player the trade message is whispered to
    pub whisper_target: Option<String>,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            whisper_target: None,
        }
    }
}

impl AppConfig {
    /// Read `path`, or fall back to defaults when it does not exist
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?
        } else {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |msg: String| -> Result<(), CoreError> { Err(CoreError::InvalidConfiguration(msg)) };

        if self.scan.interval_ms == 0 {
            return invalid("scan.interval_ms must be positive".to_string());
        }
        if self.scan.channel_capacity == 0 {
            return invalid("scan.channel_capacity must be positive".to_string());
        }
        if self.scan.max_consecutive_failures == 0 {
            return invalid("scan.max_consecutive_failures must be positive".to_string());
        }
        if !in_unit_range(self.matching.default_threshold) {
            return invalid(format!(
                "matching.default_threshold {} is outside [0, 1]",
                self.matching.default_threshold
            ));
        }
        if let Some((id, t)) = self.matching.thresholds.iter().find(|(_, t)| !in_unit_range(**t)) {
            return invalid(format!("matching.thresholds.{} = {} is outside [0, 1]", id, t));
        }
        if self.matching.scale_factors.is_empty() {
            return invalid("matching.scale_factors is empty".to_string());
        }
        if let Some(scale) = self.matching.scale_factors.iter().find(|s| !(s.is_finite() && **s > 0.0)) {
            return invalid(format!("matching.scale_factors contains {}", scale));
        }
        if self.matching.stride == 0 {
            return invalid("matching.stride must be positive".to_string());
        }
        if self.trade.max_size == 0 {
            return invalid("trade.max_size must be positive".to_string());
        }
        Ok(())
    }

    /// Character named by `explicit`, else by `$ARCHI_PROFILE`
    pub fn requested_character(explicit: Option<&str>) -> Option<CharacterId> {
        let env = std::env::var(PROFILE_ENV).ok();
        explicit
            .or(env.as_deref())
            .filter(|raw| !raw.trim().is_empty())
            .map(CharacterId::sanitize)
    }
}

fn in_unit_range(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}
