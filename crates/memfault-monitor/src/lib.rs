//! memfault-monitor: interval memory sampler.
//!
//! Runs a target function while a sampling worker polls memory statistics of
//! the calling process, then reports either the peak value or the full
//! series. Everything the sampler touches is injected:
//!
//! - the stats query ([`memfault_core::StatsQuery`]),
//! - the process factory ([`Launcher`]: worker thread or child process), and
//! - the pipe factory ([`PipeFactory`]) used between caller and worker.
//!
//! A record whose selected field is missing is fatal: the monitor returns
//! [`MonitorError::MalformedMeasurement`] instead of folding it into the
//! aggregate.
//!
//! ```no_run
//! use memfault_core::{query_fn, SysinfoProvider};
//! use memfault_monitor::{MemoryMonitor, MonitorOptions, Usage};
//! use std::sync::Arc;
//!
//! let monitor = MemoryMonitor::new(query_fn(Arc::new(SysinfoProvider::new())))
//!     .with_options(MonitorOptions { max_usage: true, ..MonitorOptions::default() });
//! let run = monitor.memory_usage(|| vec![0u8; 1 << 20].len())?;
//! if let Usage::Peak(bytes) = run.usage {
//!     println!("peak {bytes} bytes");
//! }
//! # Ok::<(), memfault_monitor::MonitorError>(())
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

/// Monitor error taxonomy.
pub mod error;
/// Worker launchers (process factories).
pub mod launcher;
/// The monitor façade.
pub mod monitor;
/// Sampling options and backend selection.
pub mod options;
/// Message pipe between caller and worker.
pub mod pipe;
/// The sampling loop.
pub mod sampler;

pub use error::{MonitorError, WorkerFailure};
pub use launcher::{serve_stdio, Launcher, ProcessLauncher, ThreadLauncher, WorkerHandle};
pub use monitor::{MemoryMonitor, MemoryUsage};
pub use options::{Backend, MonitorOptions, UnknownBackend};
pub use pipe::{mem_pipe, Endpoint, Message, PipeFactory, WorkerConfig};
pub use sampler::{run_sampler, Report, Sample, Usage};
