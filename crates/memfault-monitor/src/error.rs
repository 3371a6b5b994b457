//! Errors surfaced by [`MemoryMonitor`](crate::MemoryMonitor).

use memfault_core::{ProviderError, StatField};
use serde::{Deserialize, Serialize};

/// Why a monitored run did not produce a measurement.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// A sampled record had no value for the monitored field.
    #[error("malformed measurement: `{field}` missing in sample {sample}")]
    MalformedMeasurement {
        /// Field the backend samples.
        field: StatField,
        /// 1-based index of the offending sample.
        sample: u64,
    },
    /// The stats query itself failed inside the worker.
    #[error("memory query failed: {0}")]
    Provider(#[from] ProviderError),
    /// The worker went away without reporting.
    #[error("sampling worker exited without a report")]
    WorkerLost,
    /// The worker did not answer in time.
    #[error("timed out waiting for sampling worker ({0})")]
    Timeout(&'static str),
    /// Unexpected message or undecodable line on the pipe.
    #[error("worker protocol violation: {0}")]
    Protocol(String),
    /// Spawning or talking to the worker failed at the OS level.
    #[error("worker i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure a worker sends back instead of a report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "failure", rename_all = "snake_case")]
pub enum WorkerFailure {
    /// See [`MonitorError::MalformedMeasurement`].
    Malformed {
        /// Field the backend samples.
        field: StatField,
        /// 1-based sample index.
        sample: u64,
    },
    /// See [`MonitorError::Provider`].
    Provider {
        /// The provider's error.
        error: ProviderError,
    },
    /// See [`MonitorError::Protocol`].
    Protocol {
        /// Description.
        message: String,
    },
}

impl From<WorkerFailure> for MonitorError {
    fn from(f: WorkerFailure) -> Self {
        match f {
            WorkerFailure::Malformed { field, sample } => {
                Self::MalformedMeasurement { field, sample }
            }
            WorkerFailure::Provider { error } => Self::Provider(error),
            WorkerFailure::Protocol { message } => Self::Protocol(message),
        }
    }
}

impl MonitorError {
    /// `true` for [`MonitorError::MalformedMeasurement`].
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedMeasurement { .. })
    }
}
