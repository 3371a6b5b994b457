//! Backend selection and per-run monitor options.

use memfault_core::{StatField, Subject};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Sampling backend: which field of the stats record the monitor tracks.
///
/// Names follow the psutil-style selectors (`psutil`, `psutil_uss`, ...);
/// the bare field names are accepted as aliases.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Backend {
    /// Resident set size.
    #[default]
    Rss,
    /// Unique set size.
    Uss,
    /// Proportional set size.
    Pss,
    /// Swap usage.
    Swap,
}

impl Backend {
    /// Record field sampled by this backend.
    #[must_use]
    pub const fn field(self) -> StatField {
        match self {
            Self::Rss => StatField::Rss,
            Self::Uss => StatField::Uss,
            Self::Pss => StatField::Pss,
            Self::Swap => StatField::Swap,
        }
    }

    /// Canonical selector name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Rss => "psutil",
            Self::Uss => "psutil_uss",
            Self::Pss => "psutil_pss",
            Self::Swap => "psutil_swap",
        }
    }
}

/// Error for an unrecognized backend selector.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown backend `{0}` (expected psutil|psutil_uss|psutil_pss|psutil_swap)")]
pub struct UnknownBackend(pub String);

impl FromStr for Backend {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "psutil" | "rss" => Ok(Self::Rss),
            "psutil_uss" | "uss" => Ok(Self::Uss),
            "psutil_pss" | "pss" => Ok(Self::Pss),
            "psutil_swap" | "swap" => Ok(Self::Swap),
            _ => Err(UnknownBackend(s.to_string())),
        }
    }
}

impl TryFrom<String> for Backend {
    type Error = UnknownBackend;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Backend> for String {
    fn from(b: Backend) -> Self {
        b.name().to_string()
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Knobs for a monitored run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorOptions {
    /// Pause between samples.
    pub interval: Duration,
    /// Track only the maximum instead of the whole series.
    pub max_usage: bool,
    /// Field selection.
    pub backend: Backend,
    /// How long to wait for the worker's first sample.
    pub ready_timeout: Duration,
    /// How long to wait for the final report after the target returns.
    pub stop_timeout: Duration,
    /// Process to sample. Defaults to the calling process; `None` sends no
    /// subject, and the worker's query decides (the probe binary resolves it
    /// to its parent).
    pub subject: Option<Subject>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_usage: false,
            backend: Backend::Rss,
            ready_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(10),
            subject: Some(Subject::current()),
        }
    }
}
