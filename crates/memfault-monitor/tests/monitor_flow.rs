//! End-to-end monitor runs on worker threads with scripted stats queries.

#![allow(clippy::unwrap_used)]

use memfault_core::{MemoryInfo, StatField, StatsQuery};
use memfault_monitor::{
    mem_pipe, Backend, Launcher, MemoryMonitor, MonitorError, MonitorOptions, ThreadLauncher,
    Usage, WorkerHandle,
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// uss = 1000 * call; `None` on the calls listed in `missing`.
fn scripted(missing: &'static [u64]) -> (StatsQuery, Arc<AtomicU64>) {
    let calls = Arc::new(AtomicU64::new(0));
    let c = Arc::clone(&calls);
    let q: StatsQuery = Arc::new(move |_| {
        let i = c.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MemoryInfo {
            uss: (!missing.contains(&i)).then_some(i * 1000),
            rss: Some(1),
            ..MemoryInfo::default()
        })
    });
    (q, calls)
}

fn opts(max_usage: bool) -> MonitorOptions {
    MonitorOptions {
        interval: Duration::from_millis(10),
        max_usage,
        backend: Backend::Uss,
        ..MonitorOptions::default()
    }
}

#[test]
fn peak_over_target_run() {
    let (q, calls) = scripted(&[]);
    let run = MemoryMonitor::new(q)
        .with_options(opts(true))
        .memory_usage(|| {
            thread::sleep(Duration::from_millis(60));
            "done"
        })
        .unwrap();
    assert_eq!(run.value, "done");
    assert_eq!(run.samples_taken, calls.load(Ordering::SeqCst));
    assert!(run.samples_taken >= 2);
    assert_eq!(run.usage, Usage::Peak(run.samples_taken * 1000));
}

#[test]
fn series_keeps_every_sample() {
    let (q, _) = scripted(&[]);
    let run = MemoryMonitor::new(q)
        .with_options(opts(false))
        .memory_usage(|| thread::sleep(Duration::from_millis(40)))
        .unwrap();
    let Usage::Series(s) = &run.usage else {
        panic!("expected series, got {:?}", run.usage)
    };
    assert_eq!(s.len() as u64, run.samples_taken);
    assert_eq!(s[0].value, 1000);
}

#[test]
fn missing_second_sample_is_fatal() {
    let (q, calls) = scripted(&[2]);
    let err = MemoryMonitor::new(q)
        .with_options(opts(true))
        .memory_usage(|| thread::sleep(Duration::from_millis(100)))
        .unwrap_err();
    assert!(
        matches!(
            err,
            MonitorError::MalformedMeasurement {
                field: StatField::Uss,
                sample: 2
            }
        ),
        "{err}"
    );
    // The worker stops at the bad sample.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn missing_first_sample_skips_target() {
    let (q, _) = scripted(&[1]);
    let ran = AtomicUsize::new(0);
    let err = MemoryMonitor::new(q)
        .with_options(opts(true))
        .memory_usage(|| ran.fetch_add(1, Ordering::SeqCst))
        .unwrap_err();
    assert!(err.is_malformed());
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn other_fields_do_not_matter() {
    let q: StatsQuery = Arc::new(|_| {
        Ok(MemoryInfo {
            uss: Some(7),
            ..MemoryInfo::default()
        })
    });
    let run = MemoryMonitor::new(q)
        .with_options(opts(true))
        .memory_usage(|| ())
        .unwrap();
    assert_eq!(run.usage, Usage::Peak(7));
}

#[test]
fn injected_pipe_factory_is_used() {
    let made = Arc::new(AtomicUsize::new(0));
    let m = Arc::clone(&made);
    let launcher = ThreadLauncher::with_pipe(Arc::new(move || {
        m.fetch_add(1, Ordering::SeqCst);
        mem_pipe()
    }));
    let (q, _) = scripted(&[]);
    MemoryMonitor::new(q)
        .with_launcher(Arc::new(launcher))
        .with_options(opts(true))
        .memory_usage(|| ())
        .unwrap();
    assert_eq!(made.load(Ordering::SeqCst), 1);
}

/// Worker that hangs up without saying anything.
struct Silent;

impl Launcher for Silent {
    fn launch(&self, _query: StatsQuery) -> Result<WorkerHandle, MonitorError> {
        let (caller, worker) = mem_pipe();
        let h = thread::spawn(move || {
            drop(worker);
            Ok(())
        });
        Ok(WorkerHandle::from_thread(caller, h))
    }
}

#[test]
fn silent_worker_is_lost() {
    let (q, _) = scripted(&[]);
    let err = MemoryMonitor::new(q)
        .with_launcher(Arc::new(Silent))
        .with_options(opts(true))
        .memory_usage(|| ())
        .unwrap_err();
    assert!(matches!(err, MonitorError::WorkerLost), "{err}");
}
