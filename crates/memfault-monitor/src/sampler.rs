//! Worker-side sampling loop.
//!
//! Protocol, from the worker's point of view:
//! 1. receive `Configure`,
//! 2. take the first sample, send `Ready`,
//! 3. wait up to one interval for `Stop`; if none arrived, sample again,
//! 4. on `Stop` send `Report`.
//!
//! Any sample whose tracked field is missing ends the loop with `Failed`
//! instead; the bad value never reaches the aggregate.

use crate::error::{MonitorError, WorkerFailure};
use crate::pipe::{Endpoint, Message, WorkerConfig};
use memfault_core::{MemoryInfo, StatsQuery};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

/// One observation of the tracked field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Milliseconds since the worker started.
    pub elapsed_ms: u64,
    /// Field value in bytes.
    pub value: u64,
}

/// Aggregate produced by a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Usage {
    /// Maximum over all samples (`max_usage = true`).
    Peak(u64),
    /// Every sample in order.
    Series(Vec<Sample>),
}

impl Usage {
    /// Peak value regardless of representation (`None` for an empty series).
    #[must_use]
    pub fn peak(&self) -> Option<u64> {
        match self {
            Self::Peak(v) => Some(*v),
            Self::Series(s) => s.iter().map(|x| x.value).max(),
        }
    }
}

/// Final message of a successful run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// The aggregate.
    pub usage: Usage,
    /// Number of queries performed.
    pub samples_taken: u64,
}

struct Tracker<'a> {
    cfg: &'a WorkerConfig,
    started: Instant,
    peak: u64,
    series: Vec<Sample>,
    taken: u64,
}

impl<'a> Tracker<'a> {
    fn new(cfg: &'a WorkerConfig) -> Self {
        Self {
            cfg,
            started: Instant::now(),
            peak: 0,
            series: Vec::new(),
            taken: 0,
        }
    }

    fn sample(&mut self, query: &StatsQuery) -> Result<(), WorkerFailure> {
        let info = query(self.cfg.subject)
            .map_err(|error| WorkerFailure::Provider { error })?;
        self.taken += 1;
        self.record(&info)
    }

    fn record(&mut self, info: &MemoryInfo) -> Result<(), WorkerFailure> {
        let Some(value) = info.get(self.cfg.field) else {
            return Err(WorkerFailure::Malformed {
                field: self.cfg.field,
                sample: self.taken,
            });
        };
        if self.cfg.max_usage {
            self.peak = self.peak.max(value);
        } else {
            let elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
            self.series.push(Sample { elapsed_ms, value });
        }
        Ok(())
    }

    fn finish(self) -> Report {
        let usage = if self.cfg.max_usage {
            Usage::Peak(self.peak)
        } else {
            Usage::Series(self.series)
        };
        Report {
            usage,
            samples_taken: self.taken,
        }
    }
}

/// Run the sampling protocol on `endpoint`, querying through `query`.
///
/// A sampling failure is reported to the caller as `Failed` and counts as a
/// normal end of the loop; `Err` is returned only when the caller could not
/// be told (pipe gone, or a protocol violation from the caller's side).
pub fn run_sampler(query: &StatsQuery, endpoint: &mut Endpoint) -> Result<(), MonitorError> {
    let cfg = match endpoint.recv()? {
        Message::Configure(cfg) => cfg,
        other => {
            return reject(endpoint, format!("expected configure, got {other:?}"));
        }
    };
    debug!(subject = ?cfg.subject, field = %cfg.field, interval_ms = cfg.interval_ms, max_usage = cfg.max_usage, "sampler configured");

    let mut tracker = Tracker::new(&cfg);
    if let Err(f) = tracker.sample(query) {
        return report_failure(endpoint, f);
    }
    endpoint.send(&Message::Ready)?;

    loop {
        match endpoint.recv_timeout(cfg.interval())? {
            Some(Message::Stop) => break,
            Some(other) => {
                return reject(endpoint, format!("unexpected message while sampling: {other:?}"));
            }
            None => {}
        }
        if let Err(f) = tracker.sample(query) {
            return report_failure(endpoint, f);
        }
    }

    let report = tracker.finish();
    debug!(samples = report.samples_taken, "sampler finished");
    endpoint.send(&Message::Report(report))
}

fn report_failure(endpoint: &mut Endpoint, failure: WorkerFailure) -> Result<(), MonitorError> {
    warn!(?failure, "sampling failed");
    endpoint.send(&Message::Failed(failure))
}

fn reject(endpoint: &mut Endpoint, message: String) -> Result<(), MonitorError> {
    let failure = WorkerFailure::Protocol {
        message: message.clone(),
    };
    // The caller may already be gone; the protocol error is what matters.
    let _ = endpoint.send(&Message::Failed(failure));
    Err(MonitorError::Protocol(message))
}
