// crates/memfault-harness/src/bin/memfault-probe.rs

//! Sampler child process for `Placement::Subprocess`.
//!
//! Builds a fault-injecting proxy over the real provider, mirrors every call
//! into the parent's result channel, then speaks the monitor's pipe protocol
//! on stdin/stdout until told to stop. Logs go to stderr.

#![forbid(unsafe_code)]
#![deny(
    rust_2018_idioms,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo
)]

use anyhow::{Context, Result};
use clap::Parser;
use memfault_core::{StatField, Subject, SysinfoProvider};
use memfault_harness::{ChannelClient, FaultInjectingProxy, FaultSchedule, DEFAULT_GOOD_VALUE};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "memfault-probe",
    about = "Memory sampler child with fault injection",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Field to corrupt (rss, vms, uss, pss, swap)
    #[arg(long, default_value = "uss")]
    field: StatField,

    /// Call numbers to corrupt, comma-separated or repeated; none by default
    #[arg(long = "fail-at", value_name = "N[,N..]")]
    fail_at: Vec<FaultSchedule>,

    /// Value written on non-faulting calls
    #[arg(long, default_value_t = DEFAULT_GOOD_VALUE)]
    good_value: u64,

    /// Result channel to mirror calls into
    #[arg(long)]
    channel: Option<SocketAddr>,

    /// Do not fall back to the parent pid for subject-less queries
    #[arg(long)]
    no_resolver: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let schedule = FaultSchedule::from_indices(cli.fail_at.iter().flat_map(FaultSchedule::iter))
        .context("merging --fail-at lists")?;
    info!(%schedule, field = %cli.field, "probe starting");

    let mut proxy = FaultInjectingProxy::new(Arc::new(SysinfoProvider::new()), cli.field)
        .with_schedule(schedule)
        .with_good_value(cli.good_value);
    if !cli.no_resolver {
        proxy = proxy.with_resolver(Arc::new(monitored_subject));
    }
    let proxy = Arc::new(proxy);

    if let Some(addr) = cli.channel {
        match ChannelClient::connect(addr) {
            Ok(client) => proxy.bind_channel(Box::new(client)),
            Err(e) => warn!(%addr, error = %e, "result channel unavailable; calls stay local"),
        }
    }

    memfault_monitor::serve_stdio(&proxy.bind()).context("sampler protocol")?;
    info!(calls = proxy.call_count(), "probe finished");
    Ok(())
}

/// The process being monitored is the one that spawned us.
fn monitored_subject() -> Subject {
    #[cfg(unix)]
    {
        Subject(std::os::unix::process::parent_id())
    }
    #[cfg(not(unix))]
    {
        Subject::current()
    }
}

/// Compact logs to stderr; stdout carries the sampler protocol.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
