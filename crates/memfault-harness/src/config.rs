//! Scenario configuration: a TOML file plus environment overrides.
//!
//! ```toml
//! [scenario]
//! fail_at = [2]
//! backend = "psutil_uss"
//! good_value = 123456789
//! interval_ms = 100
//! max_usage = true
//! ```
//!
//! Recognized environment variables (applied after parsing, invalid values
//! ignored):
//! - `MEMFAULT_FAIL_AT` = comma list of call numbers
//! - `MEMFAULT_INTERVAL_MS` = `<u64>`
//! - `MEMFAULT_BACKEND` = backend selector

use crate::proxy::DEFAULT_GOOD_VALUE;
use crate::schedule::FaultSchedule;
use anyhow::{Context, Result};
use memfault_core::StatField;
use memfault_monitor::Backend;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// The `[scenario]` table.
    pub scenario: ScenarioConfig,
}

/// The `[scenario]` table.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Call numbers to corrupt.
    pub fail_at: FaultSchedule,
    /// Monitor backend selector.
    pub backend: Backend,
    /// Field to corrupt; defaults to the backend's field.
    pub field: Option<StatField>,
    /// Known-good replacement value.
    pub good_value: u64,
    /// Sampling interval in milliseconds.
    pub interval_ms: u64,
    /// Track only the peak.
    pub max_usage: bool,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            fail_at: FaultSchedule::from_indices([1]).unwrap_or_default(),
            backend: Backend::Uss,
            field: None,
            good_value: DEFAULT_GOOD_VALUE,
            interval_ms: 100,
            max_usage: true,
        }
    }
}

impl ScenarioConfig {
    /// Field the proxy corrupts.
    #[must_use]
    pub fn target_field(&self) -> StatField {
        self.field.unwrap_or_else(|| self.backend.field())
    }

    /// Sampling interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl HarnessConfig {
    /// Parse TOML text (no environment overrides).
    pub fn from_toml_str(src: &str) -> Result<Self> {
        toml::from_str(src).context("parse harness config toml")
    }

    /// Read a TOML file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path)
            .with_context(|| format!("read harness config {}", path.display()))?;
        let cfg = Self::from_toml_str(&src)
            .with_context(|| format!("in {}", path.display()))?;
        Ok(cfg.with_env_overrides())
    }

    /// Merge `MEMFAULT_*` overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|k| std::env::var(k).ok())
    }

    /// Merge overrides from an arbitrary lookup (the environment in
    /// production, a map in tests).
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let sc = &mut self.scenario;
        if let Some(v) = lookup("MEMFAULT_FAIL_AT") {
            if let Ok(s) = v.parse::<FaultSchedule>() {
                sc.fail_at = s;
            }
        }
        if let Some(v) = lookup("MEMFAULT_INTERVAL_MS") {
            if let Ok(ms) = v.trim().parse::<u64>() {
                sc.interval_ms = ms;
            }
        }
        if let Some(v) = lookup("MEMFAULT_BACKEND") {
            if let Ok(b) = v.parse::<Backend>() {
                sc.backend = b;
            }
        }
        self
    }
}
