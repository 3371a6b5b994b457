//! Errors raised by memory-statistics providers.
//!
//! The type is serializable because a sampling worker running in a child
//! process reports provider failures back to its parent over a pipe.

use crate::Subject;
use serde::{Deserialize, Serialize};

/// Failure of a [`StatsProvider::query`](crate::StatsProvider::query) call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProviderError {
    /// The query needs a subject but none was supplied or resolvable.
    #[error("subject unavailable: query requires a process to inspect")]
    SubjectUnavailable,
    /// The subject does not exist (or is no longer visible).
    #[error("process not found: {0}")]
    ProcessNotFound(Subject),
    /// The OS statistics source failed.
    #[error("reading memory statistics: {0}")]
    Io(String),
}

impl From<std::io::Error> for ProviderError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
