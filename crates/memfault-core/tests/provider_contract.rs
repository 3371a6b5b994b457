//! Contract checks for the real provider and the handle/query forms.

use memfault_core::{
    query_fn, ProcessHandle, ProviderError, StatField, StatsProvider, Subject, SysinfoProvider,
};
use std::sync::Arc;

#[test]
fn handle_and_query_fn_agree_on_subject_requirements() {
    let provider = Arc::new(SysinfoProvider::new());

    let handle = ProcessHandle::new(Subject::current(), provider.clone());
    let info = handle.memory_info().expect("own process is visible");
    assert!(info.get(StatField::Rss).is_some());
    assert!(info.get(StatField::Vms).is_some());

    let q = query_fn(provider);
    assert_eq!(q(None), Err(ProviderError::SubjectUnavailable));
}

#[test]
fn unknown_process_is_reported() {
    let p = SysinfoProvider::new();
    // Far above any default pid_max.
    let ghost = Subject(u32::MAX - 7);
    assert_eq!(p.query(Some(ghost)), Err(ProviderError::ProcessNotFound(ghost)));
}

#[cfg(target_os = "linux")]
#[test]
fn linux_reports_private_memory() {
    let p = SysinfoProvider::new();
    let info = p.query(Some(Subject::current())).unwrap();
    assert!(info.uss.is_some(), "smaps should be readable for self: {info:?}");
}
