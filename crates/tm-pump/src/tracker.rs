//! Operation tracker
//!
//! Keeps the in-flight asynchronous operations of one command run in the
//! order they were started. Completions normally arrive in that order, so
//! removal checks the front first and only falls back to a scan when a
//! notification overtakes an earlier one.

use std::collections::VecDeque;
use tm_core::{OperationId, ResultCode, TrackerError};

/// One outstanding (or finished) asynchronous operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    pub id: OperationId,
    pub completed: bool,
    pub result: Option<ResultCode>,
    /// Bypass timestamp/size checks on the target
    pub forced: bool,
    /// Free-form description used in reports, e.g. the file path
    pub label: String,
}

impl OperationHandle {
    pub fn new(id: OperationId) -> Self {
        Self {
            id,
            completed: false,
            result: None,
            forced: false,
            label: String::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn forced(mut self, forced: bool) -> Self {
        self.forced = forced;
        self
    }

    /// Finished with a non-success status
    pub fn failed(&self) -> bool {
        matches!(self.result, Some(code) if !code.is_ok())
    }
}

/// How a completion was matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The operation was at the front of the queue
    Front,
    /// The operation was found further back
    Scanned,
    /// No such operation is in flight (duplicate or late notification)
    Unknown,
}

#[derive(Debug, Default)]
pub struct OperationTracker {
    pending: VecDeque<OperationHandle>,
    finished: Vec<OperationHandle>,
    fallback_scans: u64,
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an operation returned by a successful initiation
    pub fn begin(&mut self, id: OperationId) -> Result<(), TrackerError> {
        self.begin_handle(OperationHandle::new(id))
    }

    pub fn begin_handle(&mut self, handle: OperationHandle) -> Result<(), TrackerError> {
        if self.contains(handle.id) {
            return Err(TrackerError::DuplicateOperation(handle.id));
        }

        tracing::trace!("Tracking operation {}", handle.id);
        self.pending.push_back(handle);
        Ok(())
    }

    /// Record a completion notification
    ///
    /// Unknown ids are ignored.
    pub fn complete(&mut self, id: OperationId, result: ResultCode) -> Removal {
        let (mut handle, removal) = if self.pending.front().map(|h| h.id) == Some(id) {
            match self.pending.pop_front() {
                Some(handle) => (handle, Removal::Front),
                None => return Removal::Unknown,
            }
        } else {
            let Some(index) = self.pending.iter().position(|h| h.id == id) else {
                tracing::debug!("Ignoring completion for untracked operation {}", id);
                return Removal::Unknown;
            };
            self.fallback_scans += 1;
            tracing::debug!("Operation {} completed out of order", id);
            match self.pending.remove(index) {
                Some(handle) => (handle, Removal::Scanned),
                None => return Removal::Unknown,
            }
        };

        handle.completed = true;
        handle.result = Some(result);
        if !result.is_ok() {
            tracing::warn!("Operation {} ({}) failed: {}", id, handle.label, result);
        }
        self.finished.push(handle);
        removal
    }

    /// Stop tracking an operation without a completion, e.g. after cancelling it
    pub fn abandon(&mut self, id: OperationId) -> Option<OperationHandle> {
        let index = self.pending.iter().position(|h| h.id == id)?;
        self.pending.remove(index)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn contains(&self, id: OperationId) -> bool {
        self.pending.iter().any(|h| h.id == id)
    }

    /// Still in flight, oldest first
    pub fn pending(&self) -> impl Iterator<Item = &OperationHandle> {
        self.pending.iter()
    }

    pub fn pending_ids(&self) -> Vec<OperationId> {
        self.pending.iter().map(|h| h.id).collect()
    }

    /// Completed operations, in completion order
    pub fn finished(&self) -> &[OperationHandle] {
        &self.finished
    }

    /// Number of completions that needed the scan fallback
    pub fn fallback_scans(&self) -> u64 {
        self.fallback_scans
    }

    /// The most severe result seen so far
    ///
    /// Failures are negative, so the lowest code wins.
    pub fn worst_result(&self) -> Option<ResultCode> {
        self.finished.iter().filter_map(|h| h.result).min()
    }

    /// Forget everything still pending and return it
    pub fn drain_pending(&mut self) -> Vec<OperationHandle> {
        self.pending.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(tracker: &OperationTracker) -> Vec<u32> {
        tracker.pending_ids().into_iter().map(|id| id.0).collect()
    }

    #[test]
    fn test_out_of_order_completion_uses_scan() {
        let mut tracker = OperationTracker::new();
        for id in 1..=3 {
            tracker.begin(OperationId(id)).unwrap();
        }

        assert_eq!(tracker.complete(OperationId(1), ResultCode::OK), Removal::Front);
        assert_eq!(ids(&tracker), vec![2, 3]);

        assert_eq!(tracker.complete(OperationId(3), ResultCode::OK), Removal::Scanned);
        assert_eq!(ids(&tracker), vec![2]);

        assert_eq!(tracker.complete(OperationId(2), ResultCode::OK), Removal::Front);
        assert!(tracker.is_empty());
        assert_eq!(tracker.fallback_scans(), 1);
    }

    #[test]
    fn test_in_order_uses_front_only() {
        let mut tracker = OperationTracker::new();
        for id in 0..50 {
            tracker.begin(OperationId(id)).unwrap();
        }
        for id in 0..50 {
            assert_eq!(tracker.complete(OperationId(id), ResultCode::OK), Removal::Front);
        }
        assert!(tracker.is_empty());
        assert_eq!(tracker.fallback_scans(), 0);
        assert_eq!(tracker.finished().len(), 50);
    }

    #[test]
    fn test_duplicate_and_unknown_completions_are_noops() {
        let mut tracker = OperationTracker::new();
        tracker.begin(OperationId(1)).unwrap();
        tracker.begin(OperationId(2)).unwrap();

        assert_eq!(tracker.complete(OperationId(99), ResultCode::OK), Removal::Unknown);
        assert_eq!(tracker.complete(OperationId(1), ResultCode::OK), Removal::Front);
        assert_eq!(tracker.complete(OperationId(1), ResultCode::OK), Removal::Unknown);
        assert_eq!(tracker.len(), 1);

        tracker.complete(OperationId(2), ResultCode::OK);
        assert!(tracker.is_empty());
        assert_eq!(tracker.complete(OperationId(2), ResultCode::OK), Removal::Unknown);
        assert_eq!(tracker.finished().len(), 2);
    }

    #[test]
    fn test_duplicate_begin_rejected() {
        let mut tracker = OperationTracker::new();
        tracker.begin(OperationId(4)).unwrap();
        assert_eq!(
            tracker.begin(OperationId(4)),
            Err(TrackerError::DuplicateOperation(OperationId(4)))
        );
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_every_permutation_empties_tracker() {
        let orders: [[u32; 4]; 6] = [
            [0, 1, 2, 3],
            [3, 2, 1, 0],
            [1, 0, 3, 2],
            [2, 0, 3, 1],
            [0, 3, 1, 2],
            [3, 0, 2, 1],
        ];

        for order in orders {
            let mut tracker = OperationTracker::new();
            for id in 0..4 {
                tracker.begin(OperationId(id)).unwrap();
            }
            for id in order {
                assert_ne!(tracker.complete(OperationId(id), ResultCode::OK), Removal::Unknown);
            }
            assert!(tracker.is_empty(), "order {:?}", order);
            let mut done: Vec<u32> = tracker.finished().iter().map(|h| h.id.0).collect();
            done.sort_unstable();
            assert_eq!(done, vec![0, 1, 2, 3]);
        }
    }

    #[test]
    fn test_failure_recorded_not_fatal() {
        let mut tracker = OperationTracker::new();
        tracker
            .begin_handle(OperationHandle::new(OperationId(1)).with_label("/app_home/a.self"))
            .unwrap();
        tracker.begin(OperationId(2)).unwrap();

        tracker.complete(OperationId(1), ResultCode::NO_FILE);
        tracker.complete(OperationId(2), ResultCode::OK);

        assert!(tracker.is_empty());
        assert!(tracker.finished()[0].failed());
        assert!(!tracker.finished()[1].failed());
        assert_eq!(tracker.worst_result(), Some(ResultCode::NO_FILE));
    }

    #[test]
    fn test_abandon() {
        let mut tracker = OperationTracker::new();
        tracker.begin(OperationId(1)).unwrap();
        tracker.begin(OperationId(2)).unwrap();

        let handle = tracker.abandon(OperationId(2)).unwrap();
        assert!(!handle.completed);
        assert!(tracker.abandon(OperationId(2)).is_none());
        assert_eq!(ids(&tracker), vec![1]);
    }
}
