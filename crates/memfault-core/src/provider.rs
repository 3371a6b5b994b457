//! Provider abstraction for memory-statistics queries.
//!
//! A provider answers `query(subject)` with a [`MemoryInfo`] record. The
//! monitor never talks to a provider directly; it is handed a [`StatsQuery`],
//! the callable form of a provider, so tests can substitute anything that
//! produces records (the fault-injection proxy in particular).
//!
//! ## Contracts implementors should uphold
//! - `query(None)` must fail with [`ProviderError::SubjectUnavailable`]
//!   unless the implementor knows how to supply the subject itself.
//! - Failures are returned, never panicked.

use crate::{MemoryInfo, ProviderError, Subject};
use std::fmt;
use std::sync::Arc;

/// Source of memory-statistics records.
pub trait StatsProvider: Send + Sync {
    /// Query memory statistics for `subject`.
    ///
    /// # Errors
    /// [`ProviderError::SubjectUnavailable`] when `subject` is `None` and the
    /// provider cannot supply one; other variants on OS failures.
    fn query(&self, subject: Option<Subject>) -> Result<MemoryInfo, ProviderError>;
}

impl<P: StatsProvider + ?Sized> StatsProvider for Arc<P> {
    fn query(&self, subject: Option<Subject>) -> Result<MemoryInfo, ProviderError> {
        (**self).query(subject)
    }
}

/// Callable form of a provider's `query`, as injected into the monitor.
pub type StatsQuery =
    Arc<dyn Fn(Option<Subject>) -> Result<MemoryInfo, ProviderError> + Send + Sync>;

/// Wrap a shared provider as a [`StatsQuery`].
#[must_use]
pub fn query_fn<P>(provider: Arc<P>) -> StatsQuery
where
    P: StatsProvider + ?Sized + 'static,
{
    Arc::new(move |subject| provider.query(subject))
}

/// A process plus the provider used to inspect it.
///
/// `handle.memory_info()` is the method form of a query: the subject is the
/// implicit first argument, and the call routes through whatever provider
/// the handle was built with.
#[derive(Clone)]
pub struct ProcessHandle {
    subject: Subject,
    provider: Arc<dyn StatsProvider>,
}

impl ProcessHandle {
    /// Handle for `subject` whose queries go through `provider`.
    #[must_use]
    pub fn new(subject: impl Into<Subject>, provider: Arc<dyn StatsProvider>) -> Self {
        Self {
            subject: subject.into(),
            provider,
        }
    }

    /// The inspected process.
    #[must_use]
    pub const fn subject(&self) -> Subject {
        self.subject
    }

    /// Query memory statistics for this handle's subject.
    pub fn memory_info(&self) -> Result<MemoryInfo, ProviderError> {
        self.provider.query(Some(self.subject))
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}
