//! memfault-core: memory-statistics records, the provider boundary, and the
//! real sysinfo/procfs provider.
//!
//! This crate defines the **stable boundary** shared by the monitor and the
//! fault-injection harness:
//! - canonical record types (`MemoryInfo`, `StatField`, `Subject`),
//! - the provider trait (`StatsProvider`) plus its bound callable form
//!   (`StatsQuery`) and the subject handle (`ProcessHandle`), and
//! - the OS-backed provider (`SysinfoProvider`).
//!
//! ```no_run
//! use memfault_core::{StatsProvider, Subject, SysinfoProvider};
//!
//! let provider = SysinfoProvider::new();
//! let info = provider.query(Some(Subject::current()))?;
//! println!("rss={:?}", info.rss);
//! # Ok::<(), memfault_core::ProviderError>(())
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::doc_markdown
)]

/// Provider error taxonomy.
pub mod error;
/// Provider trait, bound query form and subject handle.
pub mod provider;
/// Linux `smaps_rollup` parsing for USS/PSS/swap.
pub mod smaps;
/// Real provider backed by `sysinfo` and procfs.
pub mod sysinfo_provider;
/// Canonical record types.
pub mod types;

pub use error::*;
pub use provider::*;
pub use sysinfo_provider::SysinfoProvider;
pub use types::*;
