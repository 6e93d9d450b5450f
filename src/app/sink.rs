// LogSentinel - app/sink.rs
//
// Issue sink boundary. The tail engine holds a one-directional handle to a
// sink and calls it synchronously from the poll thread; sinks never hold a
// reference back to the engine.
//
// Provided sinks:
//   - `mpsc::Sender<EngineEvent>`: forwards issues and status messages to a
//     consumer thread (the CLI printer, tests).
//   - `IssueStore`: thread-safe bounded in-memory store that assigns ids.
//   - `Vec<Arc<dyn IssueSink>>`: fan-out to several sinks in order.

use crate::core::model::{FinalizedIssue, Severity};
use crate::util::constants;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};

/// Receiver of finalized issues and lifecycle status messages.
///
/// Called inline on the poll thread: implementations must return quickly.
pub trait IssueSink: Send + Sync {
    fn on_issue_detected(&self, issue: FinalizedIssue);

    /// Informational lifecycle message. No delivery guarantee.
    fn on_status_message(&self, _message: &str) {}
}

/// Message forwarded by the channel sink.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Issue(FinalizedIssue),
    Status(String),
}

impl IssueSink for mpsc::Sender<EngineEvent> {
    fn on_issue_detected(&self, issue: FinalizedIssue) {
        if self.send(EngineEvent::Issue(issue)).is_err() {
            tracing::trace!("Issue receiver dropped; issue discarded");
        }
    }

    fn on_status_message(&self, message: &str) {
        let _ = self.send(EngineEvent::Status(message.to_string()));
    }
}

impl<T: IssueSink + ?Sized> IssueSink for Arc<T> {
    fn on_issue_detected(&self, issue: FinalizedIssue) {
        (**self).on_issue_detected(issue);
    }

    fn on_status_message(&self, message: &str) {
        (**self).on_status_message(message);
    }
}

impl IssueSink for Vec<Arc<dyn IssueSink>> {
    fn on_issue_detected(&self, issue: FinalizedIssue) {
        if let Some((last, rest)) = self.split_last() {
            for sink in rest {
                sink.on_issue_detected(issue.clone());
            }
            last.on_issue_detected(issue);
        }
    }

    fn on_status_message(&self, message: &str) {
        for sink in self {
            sink.on_status_message(message);
        }
    }
}

// =============================================================================
// IssueStore
// =============================================================================

#[derive(Debug)]
struct StoreInner {
    issues: VecDeque<FinalizedIssue>,
    next_id: u64,
    capacity: usize,
    evicted: u64,
}

/// Bounded in-memory issue store.
///
/// Ids are assigned in arrival order starting at 1 and never reused. When
/// the store is full the oldest issue is evicted.
#[derive(Debug)]
pub struct IssueStore {
    inner: Mutex<StoreInner>,
}

impl IssueStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, constants::ABSOLUTE_MAX_STORED_ISSUES);
        Self {
            inner: Mutex::new(StoreInner {
                issues: VecDeque::new(),
                next_id: 1,
                capacity,
                evicted: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `issue`, assigning its id. Returns the id.
    pub fn insert(&self, mut issue: FinalizedIssue) -> u64 {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        issue.id = Some(id);
        if inner.issues.len() == inner.capacity {
            inner.issues.pop_front();
            inner.evicted += 1;
        }
        inner.issues.push_back(issue);
        id
    }

    /// Mark issue `id` acknowledged. Returns `false` if it is not stored.
    pub fn acknowledge(&self, id: u64) -> bool {
        let mut inner = self.lock();
        match inner.issues.iter_mut().find(|i| i.id == Some(id)) {
            Some(issue) => {
                issue.acknowledged = true;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: u64) -> Option<FinalizedIssue> {
        self.lock().issues.iter().find(|i| i.id == Some(id)).cloned()
    }

    /// Snapshot of all stored issues, oldest first.
    pub fn list(&self) -> Vec<FinalizedIssue> {
        self.lock().issues.iter().cloned().collect()
    }

    /// Snapshot of unacknowledged issues, oldest first.
    pub fn list_open(&self) -> Vec<FinalizedIssue> {
        self.lock()
            .issues
            .iter()
            .filter(|i| !i.acknowledged)
            .cloned()
            .collect()
    }

    pub fn counts_by_severity(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for issue in self.lock().issues.iter() {
            *counts.entry(issue.severity).or_insert(0) += 1;
        }
        counts
    }

    /// Number of issues dropped to stay within capacity.
    pub fn evicted(&self) -> u64 {
        self.lock().evicted
    }

    pub fn len(&self) -> usize {
        self.lock().issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().issues.is_empty()
    }

    /// Remove all issues. Ids keep increasing.
    pub fn clear(&self) {
        self.lock().issues.clear();
    }
}

impl Default for IssueStore {
    fn default() -> Self {
        Self::new(constants::DEFAULT_MAX_STORED_ISSUES)
    }
}

impl IssueSink for IssueStore {
    fn on_issue_detected(&self, issue: FinalizedIssue) {
        let id = self.insert(issue);
        tracing::trace!(id, "Issue stored");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn issue(severity: Severity, message: &str) -> FinalizedIssue {
        FinalizedIssue {
            id: None,
            server: "local".into(),
            file_name: "a.log".into(),
            path: PathBuf::from("/tmp/a.log"),
            line_number: 1,
            issue_type: severity.tag().into(),
            message: message.into(),
            captured_text: message.into(),
            detected_at: Utc::now(),
            severity,
            matched_pattern: "x".into(),
            acknowledged: false,
        }
    }

    #[test]
    fn test_store_assigns_ids_and_evicts_oldest() {
        let store = IssueStore::new(2);
        assert_eq!(store.insert(issue(Severity::Error, "a")), 1);
        assert_eq!(store.insert(issue(Severity::Error, "b")), 2);
        assert_eq!(store.insert(issue(Severity::Warning, "c")), 3);

        let all = store.list();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].message, "b");
        assert_eq!(store.evicted(), 1);
        assert!(store.get(1).is_none());
        assert_eq!(store.get(3).unwrap().message, "c");
    }

    #[test]
    fn test_acknowledge_and_counts() {
        let store = IssueStore::default();
        let a = store.insert(issue(Severity::Critical, "a"));
        store.insert(issue(Severity::Critical, "b"));
        store.insert(issue(Severity::Warning, "c"));

        assert!(store.acknowledge(a));
        assert!(!store.acknowledge(999));
        assert_eq!(store.list_open().len(), 2);

        let counts = store.counts_by_severity();
        assert_eq!(counts[&Severity::Critical], 2);
        assert_eq!(counts[&Severity::Warning], 1);
        assert!(!counts.contains_key(&Severity::Error));

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.insert(issue(Severity::Error, "d")), 4);
    }

    #[test]
    fn test_channel_and_fan_out_sinks() {
        let (tx, rx) = mpsc::channel();
        let store = Arc::new(IssueStore::default());
        let sinks: Vec<Arc<dyn IssueSink>> = vec![store.clone(), Arc::new(tx)];

        sinks.on_issue_detected(issue(Severity::Error, "boom"));
        sinks.on_status_message("hello");

        assert_eq!(store.len(), 1);
        match rx.recv().unwrap() {
            EngineEvent::Issue(i) => assert_eq!(i.id, None),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(rx.recv().unwrap(), EngineEvent::Status("hello".into()));
    }

    #[test]
    fn test_channel_sink_tolerates_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        tx.on_issue_detected(issue(Severity::Error, "lost"));
        tx.on_status_message("lost");
    }
}
