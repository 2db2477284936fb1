use core_types::{JobId, Priority};
use std::cmp::Ordering;
use vdom::UnitId;

/// A work unit that can be stepped now.
///
/// Heap order: higher priority first, then the job that arrived first, then
/// the most recently enqueued unit (depth-first within a job).
#[derive(Clone, Copy, Debug)]
pub(crate) struct ReadyUnit {
    pub(crate) priority: Priority,
    pub(crate) arrival: u64,
    pub(crate) seq: u64,
    pub(crate) job: JobId,
    pub(crate) unit: UnitId,
}

impl PartialEq for ReadyUnit {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReadyUnit {}

impl PartialOrd for ReadyUnit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyUnit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.arrival.cmp(&self.arrival))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}
