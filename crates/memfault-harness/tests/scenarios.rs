//! Full monitor runs through the fault-injecting proxy, in-process and with
//! the sampler in a child process.

#![allow(clippy::unwrap_used)]

use memfault_core::{query_fn, MemoryInfo, ProviderError, StatField, SysinfoProvider};
use memfault_harness::{
    two_batch_target, ChannelManager, FaultInjectingProxy, FaultSchedule, HarnessConfig,
    Placement, Scenario, DEFAULT_GOOD_VALUE,
};
use memfault_monitor::{Backend, MemoryMonitor, MonitorError, MonitorOptions, ProcessLauncher, Usage};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const SIZE: usize = 3000;
const PAUSE: Duration = Duration::from_secs(1);

fn good() -> Option<u64> {
    Some(DEFAULT_GOOD_VALUE)
}

fn uss(records: &[MemoryInfo]) -> Vec<Option<u64>> {
    records.iter().map(|r| r.uss).collect()
}

#[test]
fn first_sample_fault_skips_target() {
    let mut ran = false;
    let report = Scenario::default()
        .expect_malformed(|| {
            ran = true;
        })
        .unwrap();

    assert!(!ran);
    assert!(matches!(
        report.outcome,
        Err(MonitorError::MalformedMeasurement {
            field: StatField::Uss,
            sample: 1
        })
    ));
    assert_eq!(uss(report.records()), vec![None]);
    assert_eq!(report.shared.counter, 1);
}

#[test]
fn second_sample_fault_is_rejected() {
    let report = Scenario::default()
        .with_schedule(FaultSchedule::from_indices([2]).unwrap())
        .expect_malformed(|| two_batch_target(SIZE, PAUSE))
        .unwrap();

    let local = report.local.as_ref().unwrap();
    assert_eq!(local.call_count, 2);
    assert_eq!(uss(&local.records), vec![good(), None]);
    assert_eq!(report.shared.counter, 2);
    assert_eq!(report.shared.records, local.records);
    assert_eq!(report.missing_at(), vec![2]);
}

#[test]
fn empty_schedule_lets_the_run_succeed() {
    let report = Scenario::default()
        .with_schedule(FaultSchedule::none())
        .with_interval(Duration::from_millis(20))
        .run(|| two_batch_target(64, Duration::from_millis(100)))
        .unwrap();

    let usage = report.outcome.as_ref().unwrap();
    assert_eq!(usage.peak(), good());
    assert!(report.missing_at().is_empty());
    assert!(report.shared.counter >= 2);
}

#[test]
fn series_over_rss_backend() {
    let report = Scenario::default()
        .with_schedule(FaultSchedule::none())
        .with_field(StatField::Rss)
        .with_backend(Backend::Rss)
        .with_max_usage(false)
        .with_good_value(42)
        .with_interval(Duration::from_millis(20))
        .run(|| two_batch_target(64, Duration::from_millis(100)))
        .unwrap();

    let Ok(Usage::Series(samples)) = &report.outcome else {
        panic!("expected a series, got {:?}", report.outcome)
    };
    assert!(samples.len() >= 2);
    assert!(samples.iter().all(|s| s.value == 42));
    assert_eq!(samples.len() as u64, report.shared.counter);
}

#[test]
fn reused_proxy_does_not_leak_between_runs() {
    let proxy = Arc::new(Scenario::default().build_proxy());

    let first = Scenario::default()
        .run_with_proxy(&proxy, || two_batch_target(SIZE, PAUSE))
        .unwrap();
    assert_eq!(uss(first.records()), vec![None]);

    let second = Scenario::default()
        .with_schedule(FaultSchedule::from_indices([2]).unwrap())
        .run_with_proxy(&proxy, || two_batch_target(SIZE, PAUSE))
        .unwrap();
    assert!(second.outcome.as_ref().unwrap_err().is_malformed());
    assert_eq!(uss(second.records()), vec![good(), None]);
    assert_eq!(second.shared.records.len(), 2);
    assert_eq!(proxy.call_count(), 2);
}

// Needs a real USS reading for the untouched backend field.
#[cfg(target_os = "linux")]
#[test]
fn other_field_faults_go_unnoticed() {
    let report = Scenario::default()
        .with_field(StatField::Vms)
        .with_interval(Duration::from_millis(20))
        .run(|| two_batch_target(64, Duration::from_millis(60)))
        .unwrap();

    assert!(report.outcome.is_ok());
    assert_eq!(report.missing_at(), vec![1]);
}

#[test]
fn configured_scenario_matches_file() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../configs/scenarios/uss_second_call.toml");
    let cfg = HarnessConfig::load(&path).unwrap();
    let scenario = Scenario::from_config(&cfg);
    assert_eq!(scenario.schedule().to_string(), "2");

    let report = scenario
        .expect_malformed(|| two_batch_target(SIZE, PAUSE))
        .unwrap();
    assert_eq!(report.missing_at(), vec![2]);
}

#[test]
fn scoped_channel_is_released() {
    let addr = ChannelManager::scoped(|mgr| {
        let mut c = mgr.connect()?;
        c.put(1, &MemoryInfo::default())?;
        assert_eq!(mgr.snapshot().counter, 1);
        Ok::<_, memfault_harness::ChannelError>(mgr.addr())
    })
    .unwrap();
    assert!(memfault_harness::ChannelClient::connect(addr).is_err());
}

#[cfg(target_os = "linux")]
#[test]
fn child_process_results_reach_parent() {
    let report = Scenario::default()
        .with_schedule(FaultSchedule::from_indices([2]).unwrap())
        .with_placement(Placement::Subprocess {
            probe: env!("CARGO_BIN_EXE_memfault-probe").into(),
        })
        .expect_malformed(|| two_batch_target(SIZE, PAUSE))
        .unwrap();

    assert!(report.local.is_none());
    assert_eq!(report.shared.counter, 2);
    assert_eq!(uss(&report.shared.records), vec![good(), None]);
    assert!(report.shared.records[0].rss.is_some());
}

#[cfg(target_os = "linux")]
#[test]
fn child_process_first_call_fault() {
    let report = Scenario::default()
        .with_placement(Placement::Subprocess {
            probe: env!("CARGO_BIN_EXE_memfault-probe").into(),
        })
        .expect_malformed(|| ())
        .unwrap();
    assert_eq!(report.shared.counter, 1);
    assert_eq!(uss(&report.shared.records), vec![None]);
}

#[test]
fn proxy_debug_shows_schedule() {
    let proxy = FaultInjectingProxy::new(
        Arc::new(memfault_core::SysinfoProvider::new()),
        StatField::Uss,
    );
    let shown = format!("{proxy:?}");
    assert!(shown.contains("schedule"), "{shown}");
}

/// Monitor whose sampler is the probe binary, sending no subject so the
/// child's proxy has to resolve one.
fn subjectless_child_monitor(extra: &[&str]) -> MemoryMonitor {
    let launcher = ProcessLauncher::new(env!("CARGO_BIN_EXE_memfault-probe"))
        .args(["--good-value", "7"])
        .args(extra);
    MemoryMonitor::new(query_fn(Arc::new(SysinfoProvider::new())))
        .with_launcher(Arc::new(launcher))
        .with_options(MonitorOptions {
            interval: Duration::from_millis(20),
            max_usage: true,
            backend: Backend::Uss,
            subject: None,
            ..MonitorOptions::default()
        })
}

#[cfg(target_os = "linux")]
#[test]
fn child_resolves_missing_subject_to_parent() {
    let run = subjectless_child_monitor(&[])
        .memory_usage(|| two_batch_target(64, Duration::from_millis(60)))
        .unwrap();
    assert_eq!(run.usage, Usage::Peak(7));
    assert!(run.samples_taken >= 1);
}

#[cfg(target_os = "linux")]
#[test]
fn child_without_resolver_rejects_missing_subject() {
    let mut ran = false;
    let err = subjectless_child_monitor(&["--no-resolver"])
        .memory_usage(|| ran = true)
        .unwrap_err();
    assert!(!ran);
    assert!(
        matches!(err, MonitorError::Provider(ProviderError::SubjectUnavailable)),
        "{err:?}"
    );
}
