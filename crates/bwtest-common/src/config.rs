//! Benchmark configuration.
//!
//! Loads [`BenchConfig`] from a TOML file (`bwtest.toml`) with environment
//! variable overrides. The resulting value is immutable for the whole run and
//! is handed to the copy engine at construction.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Selects blocking wait when set to any value.
pub const ENV_BLOCKING_RUN: &str = "ROCR_BW_RUN_BLOCKING";
/// Runs the all-pairs copy sets when no transaction is requested.
pub const ENV_DEFAULT_RUN: &str = "ROCM_BW_DEFAULT_RUN";
/// Drops fine-grained pools from the transaction list when set to any value.
pub const ENV_SKIP_FINE_GRAINED: &str = "ROCM_SKIP_FINE_GRAINED_POOL";
pub const ENV_ITERATIONS: &str = "BWTEST_ITERATIONS";
pub const ENV_VALIDATE: &str = "BWTEST_VALIDATE";
pub const ENV_REPORT_DEVICE_TIME: &str = "BWTEST_REPORT_DEVICE_TIME";

/// Configuration for a benchmark run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Round-trip every copy through host memory and compare it with the seed.
    /// Forces a single iteration per size.
    /// Override: `BWTEST_VALIDATE`
    pub validate: bool,

    /// Use a yielding wait for copy completion instead of spinning.
    /// Override: `ROCR_BW_RUN_BLOCKING`
    pub blocking_wait: bool,

    /// Capture and report device copy timestamps.
    /// Override: `BWTEST_REPORT_DEVICE_TIME`
    pub report_device_time: bool,

    /// Base iteration count before inflation.
    /// Override: `BWTEST_ITERATIONS`
    pub iterations: u32,

    /// Custom size sweep in bytes. `None` uses the built-in sweep.
    pub sizes: Option<Vec<usize>>,

    /// Skip fine-grained pools when building transactions.
    /// Override: `ROCM_SKIP_FINE_GRAINED_POOL`
    pub skip_fine_grained: bool,

    /// Emit per-iteration progress tokens.
    pub progress: bool,

    /// With no transactions requested, run every reachable pool pair in
    /// both unidirectional and bidirectional mode instead of failing.
    /// Override: `ROCM_BW_DEFAULT_RUN`
    pub default_run: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            validate: false,
            blocking_wait: false,
            report_device_time: true,
            iterations: 10,
            sizes: None,
            skip_fine_grained: false,
            progress: true,
            default_run: false,
        }
    }
}

/// Errors that can occur when loading or validating a [`BenchConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid environment override {key}={value}: {reason}")]
    EnvOverride { key: String, value: String, reason: String },
}

impl BenchConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// missing fields, then apply environment variable overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "loaded benchmark config");
        Self::from_toml(&contents)
    }

    /// Load from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut cfg: BenchConfig = toml::from_str(toml_str)?;
        cfg.apply_env_overrides()?;
        cfg.validate_fields()?;
        Ok(cfg)
    }

    /// Load only from environment variables, starting from defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate_fields()?;
        Ok(cfg)
    }

    /// Number of timed iterations run for every buffer size.
    ///
    /// Validation runs exactly once. Otherwise the base count is inflated by
    /// 1.2x (floored) plus one.
    pub fn iteration_count(&self) -> u32 {
        if self.validate {
            return 1;
        }
        self.timed_iteration_count()
    }

    /// The inflated count, ignoring `validate`. Sweeps that never validate
    /// (reads and writes) use this directly.
    pub fn timed_iteration_count(&self) -> u32 {
        let inflated = u64::from(self.iterations) * 6 / 5 + 1;
        u32::try_from(inflated).unwrap_or(u32::MAX)
    }

    /// The size sweep this run exercises.
    pub fn size_sweep(&self) -> &[usize] {
        self.sizes.as_deref().unwrap_or(crate::sizes::SIZE_SWEEP)
    }

    /// Check field ranges.
    pub fn validate_fields(&self) -> Result<(), ConfigError> {
        if self.iterations == 0 && !self.validate {
            return Err(ConfigError::Validation("iterations must be > 0".into()));
        }
        if let Some(sizes) = &self.sizes {
            if sizes.is_empty() {
                return Err(ConfigError::Validation("sizes must not be empty".into()));
            }
            if sizes.contains(&0) {
                return Err(ConfigError::Validation("sizes must be > 0".into()));
            }
            if !sizes.windows(2).all(|w| w[0] < w[1]) {
                return Err(ConfigError::Validation(format!(
                    "sizes must be strictly ascending, got {sizes:?}"
                )));
            }
        }
        Ok(())
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if std::env::var_os(ENV_BLOCKING_RUN).is_some() {
            self.blocking_wait = true;
        }

        if std::env::var_os(ENV_SKIP_FINE_GRAINED).is_some() {
            self.skip_fine_grained = true;
        }

        if std::env::var_os(ENV_DEFAULT_RUN).is_some() {
            self.default_run = true;
        }

        if let Ok(val) = std::env::var(ENV_ITERATIONS) {
            self.iterations = val.parse::<u32>().map_err(|e| ConfigError::EnvOverride {
                key: ENV_ITERATIONS.into(),
                value: val.clone(),
                reason: e.to_string(),
            })?;
        }

        if let Ok(val) = std::env::var(ENV_VALIDATE) {
            self.validate = parse_flag(ENV_VALIDATE, &val)?;
        }

        if let Ok(val) = std::env::var(ENV_REPORT_DEVICE_TIME) {
            self.report_device_time = parse_flag(ENV_REPORT_DEVICE_TIME, &val)?;
        }

        Ok(())
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::EnvOverride {
            key: key.into(),
            value: value.into(),
            reason: "expected a boolean".into(),
        }),
    }
}
