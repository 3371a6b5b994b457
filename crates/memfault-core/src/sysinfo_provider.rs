//! OS-backed provider: `sysinfo` for RSS/VMS, procfs for USS/PSS/swap.
//!
//! On platforms without `/proc/<pid>/smaps_rollup` the private-memory fields
//! come back as `None`; that is a missing measurement, not an error.

use crate::smaps::{parse_smaps, SmapsTotals};
use crate::{MemoryInfo, ProviderError, StatsProvider, Subject};
use std::sync::{Mutex, PoisonError};
use sysinfo::{Pid, System};
use tracing::debug;

/// Real memory-statistics provider.
#[derive(Debug)]
pub struct SysinfoProvider {
    sys: Mutex<System>,
}

impl Default for SysinfoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProvider {
    /// Create a provider with an empty process table (refreshed per query).
    #[must_use]
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new()),
        }
    }
}

impl StatsProvider for SysinfoProvider {
    fn query(&self, subject: Option<Subject>) -> Result<MemoryInfo, ProviderError> {
        let subject = subject.ok_or(ProviderError::SubjectUnavailable)?;
        let pid = Pid::from_u32(subject.pid());

        let (rss, vms) = {
            let mut sys = self.sys.lock().unwrap_or_else(PoisonError::into_inner);
            if !sys.refresh_process(pid) {
                return Err(ProviderError::ProcessNotFound(subject));
            }
            let proc_ = sys
                .process(pid)
                .ok_or(ProviderError::ProcessNotFound(subject))?;
            (proc_.memory(), proc_.virtual_memory())
        };

        let private = read_private(subject);
        Ok(MemoryInfo {
            rss: Some(rss),
            vms: Some(vms),
            uss: private.map(|t| t.uss),
            pss: private.map(|t| t.pss),
            swap: private.map(|t| t.swap),
        })
    }
}

/// Read USS/PSS/swap from procfs, preferring the cheap rollup file.
fn read_private(subject: Subject) -> Option<SmapsTotals> {
    let pid = subject.pid();
    for path in [
        format!("/proc/{pid}/smaps_rollup"),
        format!("/proc/{pid}/smaps"),
    ] {
        match std::fs::read_to_string(&path) {
            Ok(content) => return parse_smaps(&content),
            Err(e) => debug!(%path, error = %e, "smaps unavailable"),
        }
    }
    None
}
