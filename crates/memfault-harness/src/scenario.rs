//! Scenario runner: one monitored run against a fault-injecting proxy.
//!
//! With [`Placement::InProcess`] the monitor samples on a worker thread
//! through a proxy owned by the test, so both the proxy's own log and the
//! result channel can be inspected afterwards. With
//! [`Placement::Subprocess`] the monitor spawns the `memfault-probe` binary,
//! which builds its own proxy; the result channel is then the only way to see
//! what that proxy returned.

use crate::channel::{ChannelManager, ChannelSnapshot};
use crate::config::HarnessConfig;
use crate::proxy::{FaultInjectingProxy, ProxySnapshot, DEFAULT_GOOD_VALUE};
use crate::schedule::FaultSchedule;
use anyhow::{bail, Context, Result};
use memfault_core::{query_fn, MemoryInfo, StatField, Subject, SysinfoProvider};
use memfault_monitor::{Backend, MemoryMonitor, MonitorError, MonitorOptions, ProcessLauncher, Usage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

/// Where the sampler (and so the proxy) runs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Placement {
    /// Worker thread in this process.
    #[default]
    InProcess,
    /// Child process running the probe binary at `probe`.
    Subprocess {
        /// Path to `memfault-probe`.
        probe: PathBuf,
    },
}

/// Parameters of one fault-injection run.
#[derive(Clone, Debug)]
pub struct Scenario {
    schedule: FaultSchedule,
    field: StatField,
    backend: Backend,
    good_value: u64,
    interval: Duration,
    max_usage: bool,
    placement: Placement,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            schedule: FaultSchedule::from_indices([1]).unwrap_or_default(),
            field: StatField::Uss,
            backend: Backend::Uss,
            good_value: DEFAULT_GOOD_VALUE,
            interval: Duration::from_millis(100),
            max_usage: true,
            placement: Placement::InProcess,
        }
    }
}

/// What a run produced.
#[derive(Debug)]
pub struct ScenarioReport {
    /// The monitor's verdict.
    pub outcome: Result<Usage, MonitorError>,
    /// The proxy's own view (in-process runs only).
    pub local: Option<ProxySnapshot>,
    /// What reached the result channel.
    pub shared: ChannelSnapshot,
    /// Field the proxy corrupted.
    pub field: StatField,
}

impl ScenarioReport {
    /// Records in call order: the proxy's log when available, else the
    /// channel's copy.
    #[must_use]
    pub fn records(&self) -> &[MemoryInfo] {
        self.local
            .as_ref()
            .map_or(&self.shared.records, |l| &l.records)
    }

    /// 1-based call numbers whose record has the target field missing.
    #[must_use]
    pub fn missing_at(&self) -> Vec<u64> {
        (1u64..)
            .zip(self.records())
            .filter(|(_, r)| r.get(self.field).is_none())
            .map(|(i, _)| i)
            .collect()
    }
}

impl Scenario {
    /// Scenario from a loaded configuration (in-process placement).
    #[must_use]
    pub fn from_config(cfg: &HarnessConfig) -> Self {
        let sc = &cfg.scenario;
        Self {
            schedule: sc.fail_at.clone(),
            field: sc.target_field(),
            backend: sc.backend,
            good_value: sc.good_value,
            interval: sc.interval(),
            max_usage: sc.max_usage,
            placement: Placement::InProcess,
        }
    }

    /// Set the fault schedule.
    #[must_use]
    pub fn with_schedule(mut self, schedule: FaultSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Corrupt `field`; the backend is set separately.
    #[must_use]
    pub const fn with_field(mut self, field: StatField) -> Self {
        self.field = field;
        self
    }

    /// Select the monitor backend independently of the corrupted field.
    #[must_use]
    pub const fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Known-good replacement value.
    #[must_use]
    pub const fn with_good_value(mut self, value: u64) -> Self {
        self.good_value = value;
        self
    }

    /// Sampling interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Peak-only tracking on or off.
    #[must_use]
    pub const fn with_max_usage(mut self, max_usage: bool) -> Self {
        self.max_usage = max_usage;
        self
    }

    /// Where the sampler runs.
    #[must_use]
    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    /// The fault schedule.
    #[must_use]
    pub const fn schedule(&self) -> &FaultSchedule {
        &self.schedule
    }

    fn options(&self) -> MonitorOptions {
        MonitorOptions {
            interval: self.interval,
            max_usage: self.max_usage,
            backend: self.backend,
            ..MonitorOptions::default()
        }
    }

    /// A fresh proxy over the real provider, configured for this scenario.
    #[must_use]
    pub fn build_proxy(&self) -> FaultInjectingProxy {
        FaultInjectingProxy::new(Arc::new(SysinfoProvider::new()), self.field)
            .with_schedule(self.schedule.clone())
            .with_good_value(self.good_value)
            .with_resolver(Arc::new(Subject::current))
    }

    /// Run the monitor over `target` once.
    pub fn run<F, T>(&self, target: F) -> Result<ScenarioReport>
    where
        F: FnOnce() -> T,
    {
        match &self.placement {
            Placement::InProcess => self.run_with_proxy(&Arc::new(self.build_proxy()), target),
            Placement::Subprocess { probe } => self.run_subprocess(probe, target),
        }
    }

    /// Run in-process through a caller-owned proxy.
    ///
    /// The proxy is reset and given this scenario's schedule first, then bound
    /// to a fresh result channel for the duration of the run.
    pub fn run_with_proxy<F, T>(
        &self,
        proxy: &Arc<FaultInjectingProxy>,
        target: F,
    ) -> Result<ScenarioReport>
    where
        F: FnOnce() -> T,
    {
        proxy.set_schedule(self.schedule.clone());
        proxy.reset();
        info!(schedule = %self.schedule, field = %proxy.field(), "in-process fault scenario");

        ChannelManager::scoped(|channel| {
            let client = channel.connect().context("connect proxy to result channel")?;
            proxy.bind_channel(Box::new(client));

            let monitor = MemoryMonitor::new(proxy.bind()).with_options(self.options());
            let outcome = monitor.memory_usage(target).map(|m| m.usage);
            proxy.unbind_channel();

            Ok(ScenarioReport {
                outcome,
                local: Some(proxy.snapshot()),
                shared: channel.snapshot(),
                field: proxy.field(),
            })
        })
    }

    fn run_subprocess<F, T>(&self, probe: &Path, target: F) -> Result<ScenarioReport>
    where
        F: FnOnce() -> T,
    {
        info!(schedule = %self.schedule, field = %self.field, probe = %probe.display(), "subprocess fault scenario");

        ChannelManager::scoped(|channel| {
            let mut launcher = ProcessLauncher::new(probe).args([
                "--field".to_string(),
                self.field.as_str().to_string(),
                "--good-value".to_string(),
                self.good_value.to_string(),
                "--channel".to_string(),
                channel.addr().to_string(),
            ]);
            if !self.schedule.is_empty() {
                launcher = launcher.arg("--fail-at").arg(self.schedule.to_string());
            }

            // The child samples through the proxy it builds itself; this
            // query only satisfies the monitor's constructor.
            let query = query_fn(Arc::new(SysinfoProvider::new()));
            let monitor = MemoryMonitor::new(query)
                .with_launcher(Arc::new(launcher))
                .with_options(self.options());
            let outcome = monitor.memory_usage(target).map(|m| m.usage);

            Ok(ScenarioReport {
                outcome,
                local: None,
                shared: channel.snapshot(),
                field: self.field,
            })
        })
    }

    /// Run and require the monitor to reject a malformed measurement.
    ///
    /// # Errors
    /// When the run could not be set up, when the monitor succeeded, or when
    /// it failed for any other reason.
    pub fn expect_malformed<F, T>(&self, target: F) -> Result<ScenarioReport>
    where
        F: FnOnce() -> T,
    {
        let report = self.run(target)?;
        match &report.outcome {
            Err(e) if e.is_malformed() => Ok(report),
            Err(e) => bail!("monitor failed, but not on a malformed measurement: {e}"),
            Ok(usage) => bail!(
                "monitor accepted the run (peak {:?}) despite fault schedule {{{}}}",
                usage.peak(),
                self.schedule
            ),
        }
    }
}

/// Build `size` random values, pause, build another `size`, return those.
///
/// Memory grows across the pause, and with any sampling interval shorter
/// than `pause` the monitor takes at least two samples.
#[must_use]
pub fn two_batch_target(size: usize, pause: Duration) -> Vec<f64> {
    let first: Vec<f64> = (0..size).map(|_| rand::random::<f64>()).collect();
    std::hint::black_box(&first);
    thread::sleep(pause);
    (0..size).map(|_| rand::random::<f64>()).collect()
}
