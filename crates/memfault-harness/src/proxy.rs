//! Fault-injecting stand-in for a memory-statistics provider.
//!
//! Every successful query has its target field overwritten:
//! - with `None` (missing) when the call number is in the schedule,
//! - with the known-good value otherwise.
//!
//! Everything happens under one lock (inner query, counter increment, log
//! append, channel put), so the n-th record in the log, in the channel, and
//! as seen by the n-th caller are the same record even with concurrent
//! callers.

use crate::channel::ResultSink;
use crate::schedule::FaultSchedule;
use memfault_core::{MemoryInfo, ProviderError, StatField, StatsProvider, StatsQuery, Subject};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Value written into the target field on non-faulting calls.
pub const DEFAULT_GOOD_VALUE: u64 = 123_456_789;

/// Supplies the subject when a query arrives without one.
pub type SubjectResolver = Arc<dyn Fn() -> Subject + Send + Sync>;

/// Counter and records at one point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProxySnapshot {
    /// Successful calls so far.
    pub call_count: u64,
    /// Records returned, in call order.
    pub records: Vec<MemoryInfo>,
}

#[derive(Default)]
struct ProxyState {
    schedule: FaultSchedule,
    call_count: u64,
    log: Vec<MemoryInfo>,
    invocations: Vec<Option<Subject>>,
    sink: Option<Box<dyn ResultSink>>,
}

/// See the [module docs](self).
pub struct FaultInjectingProxy {
    inner: Arc<dyn StatsProvider>,
    field: StatField,
    good_value: u64,
    resolver: Option<SubjectResolver>,
    state: Mutex<ProxyState>,
}

impl fmt::Debug for FaultInjectingProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.lock();
        f.debug_struct("FaultInjectingProxy")
            .field("field", &self.field)
            .field("good_value", &self.good_value)
            .field("schedule", &st.schedule)
            .field("call_count", &st.call_count)
            .field("channel_bound", &st.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl FaultInjectingProxy {
    /// Proxy over `inner` that corrupts `field` on call 1 only.
    #[must_use]
    pub fn new(inner: Arc<dyn StatsProvider>, field: StatField) -> Self {
        Self {
            inner,
            field,
            good_value: DEFAULT_GOOD_VALUE,
            resolver: None,
            state: Mutex::new(ProxyState {
                schedule: FaultSchedule::from_indices([1]).unwrap_or_default(),
                ..ProxyState::default()
            }),
        }
    }

    /// Use `schedule` instead of the default `{1}`.
    #[must_use]
    pub fn with_schedule(self, schedule: FaultSchedule) -> Self {
        self.set_schedule(schedule);
        self
    }

    /// Value written on non-faulting calls.
    #[must_use]
    pub const fn with_good_value(mut self, value: u64) -> Self {
        self.good_value = value;
        self
    }

    /// Retry subject-less queries with the subject `resolver` returns.
    #[must_use]
    pub fn with_resolver(mut self, resolver: SubjectResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    fn lock(&self) -> MutexGuard<'_, ProxyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Field this proxy corrupts.
    #[must_use]
    pub const fn field(&self) -> StatField {
        self.field
    }

    /// Value written on non-faulting calls.
    #[must_use]
    pub const fn good_value(&self) -> u64 {
        self.good_value
    }

    /// Replace the schedule; takes effect on the next call.
    pub fn set_schedule(&self, schedule: FaultSchedule) {
        self.lock().schedule = schedule;
    }

    /// Current schedule.
    #[must_use]
    pub fn schedule(&self) -> FaultSchedule {
        self.lock().schedule.clone()
    }

    /// Mirror every call into `sink` from now on.
    pub fn bind_channel(&self, sink: Box<dyn ResultSink>) {
        self.lock().sink = Some(sink);
    }

    /// Stop mirroring; returns the previous sink.
    pub fn unbind_channel(&self) -> Option<Box<dyn ResultSink>> {
        self.lock().sink.take()
    }

    /// Forget all calls. Schedule and channel binding are kept.
    pub fn reset(&self) {
        let mut st = self.lock();
        st.call_count = 0;
        st.log.clear();
        st.invocations.clear();
    }

    /// Successful calls since the last reset.
    #[must_use]
    pub fn call_count(&self) -> u64 {
        self.lock().call_count
    }

    /// Records returned since the last reset.
    #[must_use]
    pub fn call_log(&self) -> Vec<MemoryInfo> {
        self.lock().log.clone()
    }

    /// Subject argument of every invocation since the last reset, failed
    /// ones included.
    #[must_use]
    pub fn invocations(&self) -> Vec<Option<Subject>> {
        self.lock().invocations.clone()
    }

    /// Counter and log read under one lock.
    #[must_use]
    pub fn snapshot(&self) -> ProxySnapshot {
        let st = self.lock();
        ProxySnapshot {
            call_count: st.call_count,
            records: st.log.clone(),
        }
    }

    /// Callable form for injection where a bare query function is expected.
    #[must_use]
    pub fn bind(self: &Arc<Self>) -> StatsQuery {
        let this = Arc::clone(self);
        Arc::new(move |subject| this.query(subject))
    }

    fn query_inner(&self, subject: Option<Subject>) -> Result<MemoryInfo, ProviderError> {
        match self.inner.query(subject) {
            Err(ProviderError::SubjectUnavailable) if subject.is_none() => {
                let Some(resolve) = &self.resolver else {
                    return Err(ProviderError::SubjectUnavailable);
                };
                let resolved = resolve();
                debug!(%resolved, "retrying query with resolved subject");
                self.inner.query(Some(resolved))
            }
            other => other,
        }
    }
}

impl StatsProvider for FaultInjectingProxy {
    fn query(&self, subject: Option<Subject>) -> Result<MemoryInfo, ProviderError> {
        let mut st = self.lock();
        st.invocations.push(subject);

        let real = self.query_inner(subject)?;

        st.call_count += 1;
        let n = st.call_count;
        let faulted = st.schedule.hits(n);
        let value = if faulted { None } else { Some(self.good_value) };
        let record = real.with_field(self.field, value);
        debug!(call = n, faulted, field = %self.field, "proxied memory query");

        st.log.push(record);
        if let Some(sink) = st.sink.as_mut() {
            if let Err(e) = sink.put(n, &record) {
                warn!(call = n, error = %e, "result channel write failed");
            }
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::channel::ChannelError;

    /// Returns a fixed record; fails without a subject.
    struct Fixed;

    impl StatsProvider for Fixed {
        fn query(&self, subject: Option<Subject>) -> Result<MemoryInfo, ProviderError> {
            subject.ok_or(ProviderError::SubjectUnavailable)?;
            Ok(MemoryInfo {
                rss: Some(1),
                vms: Some(2),
                uss: Some(3),
                pss: Some(4),
                swap: Some(5),
            })
        }
    }

    struct Broken;

    impl ResultSink for Broken {
        fn put(&mut self, _: u64, _: &MemoryInfo) -> Result<(), ChannelError> {
            Err(ChannelError::Closed)
        }
    }

    fn proxy(schedule: &[u64]) -> FaultInjectingProxy {
        FaultInjectingProxy::new(Arc::new(Fixed), StatField::Uss)
            .with_schedule(FaultSchedule::from_indices(schedule.iter().copied()).unwrap())
    }

    #[test]
    fn default_schedule_is_first_call() {
        let p = FaultInjectingProxy::new(Arc::new(Fixed), StatField::Uss);
        assert_eq!(p.schedule().iter().collect::<Vec<_>>(), vec![1]);
        assert_eq!(p.query(Some(Subject(1))).unwrap().uss, None);
        assert_eq!(p.query(Some(Subject(1))).unwrap().uss, Some(DEFAULT_GOOD_VALUE));
    }

    #[test]
    fn only_target_field_changes() {
        let p = proxy(&[1]).with_good_value(9);
        let bad = p.query(Some(Subject(1))).unwrap();
        let good = p.query(Some(Subject(1))).unwrap();
        assert_eq!(bad, Fixed.query(Some(Subject(1))).unwrap().with_field(StatField::Uss, None));
        assert_eq!(good.uss, Some(9));
        assert_eq!((good.rss, good.vms, good.pss, good.swap), (Some(1), Some(2), Some(4), Some(5)));
    }

    #[test]
    fn errors_pass_through_uncounted() {
        let p = proxy(&[1]);
        assert_eq!(p.query(None), Err(ProviderError::SubjectUnavailable));
        assert_eq!(p.call_count(), 0);
        assert!(p.call_log().is_empty());
        assert_eq!(p.invocations(), vec![None]);
        // The schedule counts successful calls only.
        assert_eq!(p.query(Some(Subject(1))).unwrap().uss, None);
    }

    #[test]
    fn resolver_supplies_missing_subject() {
        let p = proxy(&[]).with_resolver(Arc::new(|| Subject(77)));
        let rec = p.query(None).unwrap();
        assert_eq!(rec.uss, Some(DEFAULT_GOOD_VALUE));
        assert_eq!(p.call_count(), 1);
        assert_eq!(p.invocations(), vec![None]);
    }

    #[test]
    fn broken_sink_does_not_change_result() {
        let p = proxy(&[2]);
        p.bind_channel(Box::new(Broken));
        assert_eq!(p.query(Some(Subject(1))).unwrap().uss, Some(DEFAULT_GOOD_VALUE));
        assert_eq!(p.query(Some(Subject(1))).unwrap().uss, None);
        assert_eq!(p.call_count(), 2);
        assert!(p.unbind_channel().is_some());
    }

    #[test]
    fn reset_keeps_schedule_and_binding() {
        let p = proxy(&[2]);
        p.bind_channel(Box::new(Broken));
        p.query(Some(Subject(1))).unwrap();
        p.reset();
        p.reset();
        assert_eq!(p.snapshot(), ProxySnapshot::default());
        assert!(p.invocations().is_empty());
        assert_eq!(p.schedule().iter().collect::<Vec<_>>(), vec![2]);
        assert!(p.unbind_channel().is_some());
    }

    #[test]
    fn bound_form_routes_through_proxy() {
        let p = Arc::new(proxy(&[1]));
        let q = p.bind();
        assert_eq!(q(Some(Subject(3))).unwrap().uss, None);
        let handle = memfault_core::ProcessHandle::new(3, p.clone());
        assert_eq!(handle.memory_info().unwrap().uss, Some(DEFAULT_GOOD_VALUE));
        assert_eq!(p.invocations(), vec![Some(Subject(3)), Some(Subject(3))]);
    }
}
