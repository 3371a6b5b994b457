//! memfault-harness: deterministic fault injection for memory-statistics
//! queries.
//!
//! - [`FaultInjectingProxy`] wraps a real provider and, on the call numbers
//!   in its [`FaultSchedule`], blanks one field of the returned record. Every
//!   other call gets a fixed known-good value in that field, so assertions do
//!   not depend on the machine's actual memory use.
//! - [`ChannelManager`] / [`ChannelClient`] carry the proxy's call counter
//!   and records from a child process back to the test process.
//! - [`Scenario`] wires both into a [`memfault_monitor::MemoryMonitor`] run
//!   and checks that the monitor refused the blanked record.
//!
//! ```no_run
//! use memfault_harness::{two_batch_target, FaultSchedule, Scenario};
//! use std::time::Duration;
//!
//! let report = Scenario::default()
//!     .with_schedule(FaultSchedule::from_indices([2])?)
//!     .expect_malformed(|| two_batch_target(3000, Duration::from_secs(1)))?;
//! assert_eq!(report.shared.records.len(), 2);
//! # Ok::<(), anyhow::Error>(())
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

/// Cross-process result channel.
pub mod channel;
/// Scenario configuration (TOML + environment).
pub mod config;
/// The fault-injecting proxy.
pub mod proxy;
/// Scenario runner and demo target.
pub mod scenario;
/// Fault schedules.
pub mod schedule;

pub use channel::{ChannelClient, ChannelError, ChannelManager, ChannelSnapshot, ResultSink};
pub use config::HarnessConfig;
pub use proxy::{FaultInjectingProxy, ProxySnapshot, SubjectResolver, DEFAULT_GOOD_VALUE};
pub use scenario::{two_batch_target, Placement, Scenario, ScenarioReport};
pub use schedule::{FaultSchedule, ScheduleError};
