//! The monitor façade: launch a sampler, run the target, collect the result.

use crate::error::MonitorError;
use crate::launcher::{Launcher, ThreadLauncher, WorkerHandle};
use crate::options::MonitorOptions;
use crate::pipe::{Message, WorkerConfig};
use crate::sampler::Usage;
use memfault_core::StatsQuery;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Result of a monitored run: the target's return value plus the aggregate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryUsage<T> {
    /// What the target returned.
    pub value: T,
    /// Peak or series, per [`MonitorOptions::max_usage`].
    pub usage: Usage,
    /// Number of queries the worker performed.
    pub samples_taken: u64,
}

/// Samples the calling process's memory while a target function runs.
#[derive(Clone)]
pub struct MemoryMonitor {
    query: StatsQuery,
    launcher: Arc<dyn Launcher>,
    options: MonitorOptions,
}

impl fmt::Debug for MemoryMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryMonitor")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl MemoryMonitor {
    /// Monitor sampling through `query` on a worker thread.
    #[must_use]
    pub fn new(query: StatsQuery) -> Self {
        Self {
            query,
            launcher: Arc::new(ThreadLauncher::default()),
            options: MonitorOptions::default(),
        }
    }

    /// Replace the process factory.
    #[must_use]
    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Replace the options.
    #[must_use]
    pub fn with_options(mut self, options: MonitorOptions) -> Self {
        self.options = options;
        self
    }

    /// Run `target` while sampling this process's memory.
    ///
    /// # Errors
    /// [`MonitorError::MalformedMeasurement`] when any sample lacks the
    /// backend's field; [`MonitorError::Provider`] when the query failed;
    /// `WorkerLost`/`Timeout`/`Protocol`/`Io` for worker trouble. If the
    /// worker fails before its first sample, `target` is not run.
    pub fn memory_usage<F, T>(&self, target: F) -> Result<MemoryUsage<T>, MonitorError>
    where
        F: FnOnce() -> T,
    {
        let opts = &self.options;
        let cfg = WorkerConfig {
            subject: opts.subject,
            interval_ms: u64::try_from(opts.interval.as_millis()).unwrap_or(u64::MAX),
            field: opts.backend.field(),
            max_usage: opts.max_usage,
        };
        info!(backend = %opts.backend, interval_ms = cfg.interval_ms, max_usage = cfg.max_usage, "monitoring target");

        let mut worker = self.launcher.launch(Arc::clone(&self.query))?;
        if let Err(e) = worker.endpoint().send(&Message::Configure(cfg)) {
            worker.abandon();
            return Err(e);
        }

        match await_reply(&mut worker, opts.ready_timeout, "first sample") {
            Ok(Message::Ready) => {}
            Ok(other) => return finish_early(worker, other),
            Err(e) => {
                worker.abandon();
                return Err(e);
            }
        }

        let value = target();

        // The worker may already have exited after a failed sample; its
        // message is still buffered on the pipe.
        if let Err(e) = worker.endpoint().send(&Message::Stop) {
            debug!(error = %e, "stop not delivered");
        }

        let reply = match await_reply(&mut worker, opts.stop_timeout, "report") {
            Ok(m) => m,
            Err(e) => {
                worker.abandon();
                return Err(e);
            }
        };
        worker.join()?;

        match reply {
            Message::Report(report) => {
                debug!(samples = report.samples_taken, peak = ?report.usage.peak(), "monitor report");
                Ok(MemoryUsage {
                    value,
                    usage: report.usage,
                    samples_taken: report.samples_taken,
                })
            }
            Message::Failed(f) => Err(f.into()),
            other => Err(MonitorError::Protocol(format!(
                "expected report, got {other:?}"
            ))),
        }
    }
}

fn await_reply(
    worker: &mut WorkerHandle,
    timeout: Duration,
    what: &'static str,
) -> Result<Message, MonitorError> {
    worker
        .endpoint()
        .recv_timeout(timeout)?
        .ok_or(MonitorError::Timeout(what))
}

fn finish_early<T>(worker: WorkerHandle, reply: Message) -> Result<MemoryUsage<T>, MonitorError> {
    worker.join()?;
    match reply {
        Message::Failed(f) => Err(f.into()),
        other => Err(MonitorError::Protocol(format!(
            "expected ready, got {other:?}"
        ))),
    }
}
