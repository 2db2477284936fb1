use commit::{CommitError, CommitStats, Committer, TargetMutator};
use core_types::{Priority, RenderVersion, TargetId};
use scheduler::{
    CompletedJob, HostClock, JobHandle, RenderRequest, Scheduler, SchedulerConfig,
    SchedulerError, SchedulerStats, SliceReport,
};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use vdom::{MountedNode, Node};

#[derive(Debug)]
pub enum EngineError {
    UnknownTarget(TargetId),
    DuplicateTarget(TargetId),
    /// A commit failed part-way; the target refuses renders until reset.
    TargetInconsistent(TargetId),
    Commit {
        target: TargetId,
        error: CommitError,
    },
    Scheduler(SchedulerError),
    /// Some finished passes could not be committed. `report` still describes
    /// the whole slice; jobs in `report.completed` without a failure entry
    /// were committed.
    SliceCommitFailed {
        report: SliceReport,
        failures: Vec<(JobHandle, EngineError)>,
    },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::UnknownTarget(target) => write!(f, "unknown target {target}"),
            EngineError::DuplicateTarget(target) => {
                write!(f, "target {target} is already registered")
            }
            EngineError::TargetInconsistent(target) => {
                write!(f, "target {target} is inconsistent and must be reset")
            }
            EngineError::Commit { target, error } => {
                write!(f, "commit to target {target} failed: {error}")
            }
            EngineError::Scheduler(error) => write!(f, "scheduler: {error}"),
            EngineError::SliceCommitFailed { failures, .. } => {
                write!(f, "{} commits failed", failures.len())?;
                if let Some((_, first)) = failures.first() {
                    write!(f, ", first: {first}")?;
                }
                Ok(())
            }
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EngineError::Commit { error, .. } => Some(error),
            EngineError::Scheduler(error) => Some(error),
            EngineError::SliceCommitFailed { failures, .. } => {
                failures.first().map(|(_, error)| error as &(dyn Error + 'static))
            }
            _ => None,
        }
    }
}

impl From<SchedulerError> for EngineError {
    fn from(error: SchedulerError) -> Self {
        EngineError::Scheduler(error)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub scheduler: SchedulerStats,
    pub commit: CommitStats,
    pub targets: usize,
    pub inconsistent_targets: usize,
}

struct TargetSlot<M: TargetMutator> {
    committer: Committer<M>,
    inconsistent: bool,
}

/// Host-facing driver: schedules render requests, runs diff slices and
/// commits every finished pass to its target.
pub struct Engine<M: TargetMutator> {
    scheduler: Scheduler,
    targets: HashMap<TargetId, TargetSlot<M>>,
}

impl<M: TargetMutator> Default for Engine<M> {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl<M: TargetMutator> Engine<M> {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            scheduler: Scheduler::new(config),
            targets: HashMap::new(),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn register_target(&mut self, id: TargetId, target: M) -> Result<(), EngineError> {
        if self.targets.contains_key(&id) {
            return Err(EngineError::DuplicateTarget(id));
        }
        self.targets.insert(
            id,
            TargetSlot {
                committer: Committer::new(target),
                inconsistent: false,
            },
        );
        log::debug!(target: "reconcile.engine", "target {id} registered");
        Ok(())
    }

    /// Drop the target together with its pending work and hand back the
    /// mutator. The host content is left as it is.
    pub fn unregister_target(&mut self, id: TargetId) -> Option<M> {
        let slot = self.targets.remove(&id)?;
        self.scheduler.forget_target(id);
        log::debug!(target: "reconcile.engine", "target {id} unregistered");
        Some(slot.committer.into_target())
    }

    pub fn render(
        &mut self,
        target: TargetId,
        tree: impl Into<Arc<Node>>,
        priority: Priority,
    ) -> Result<JobHandle, EngineError> {
        let slot = self
            .targets
            .get(&target)
            .ok_or(EngineError::UnknownTarget(target))?;
        if slot.inconsistent {
            log::warn!(
                target: "reconcile.engine",
                "render for inconsistent target {target} refused"
            );
            return Err(EngineError::TargetInconsistent(target));
        }
        Ok(self
            .scheduler
            .schedule(RenderRequest::new(target, tree), priority))
    }

    pub fn cancel(&mut self, handle: JobHandle) -> bool {
        self.scheduler.cancel(handle)
    }

    /// Run one slice of diff work, then commit every finished pass in
    /// completion order.
    ///
    /// A failed commit marks its target inconsistent; the remaining passes
    /// are still committed, and the failures come back together with the
    /// slice report as `EngineError::SliceCommitFailed`.
    pub fn run_slice(&mut self, clock: &mut dyn HostClock) -> Result<SliceReport, EngineError> {
        let report = self.scheduler.run_until_blocked_or_timeslice_expired(clock);
        for (handle, error) in &report.failed {
            log::warn!(
                target: "reconcile.engine",
                "render {} for target {} dropped: {error}",
                handle.id.0,
                handle.target
            );
        }

        let mut failures = Vec::new();
        for job in self.scheduler.take_completed() {
            if let Err(error) = self.commit_job(&job) {
                failures.push((job.handle, error));
            }
        }
        if failures.is_empty() {
            Ok(report)
        } else {
            Err(EngineError::SliceCommitFailed { report, failures })
        }
    }

    /// Run slices until no diff work is left.
    pub fn run_until_idle(&mut self, clock: &mut dyn HostClock) -> Result<usize, EngineError> {
        let mut slices = 0;
        loop {
            self.run_slice(clock)?;
            slices += 1;
            if self.scheduler.is_idle() {
                return Ok(slices);
            }
        }
    }

    pub fn committed_tree(&self, target: TargetId) -> Option<&Arc<MountedNode>> {
        self.scheduler.baseline(target)
    }

    pub fn version(&self, target: TargetId) -> RenderVersion {
        self.scheduler.version(target)
    }

    pub fn target(&self, id: TargetId) -> Option<&M> {
        self.targets.get(&id).map(|slot| slot.committer.target())
    }

    pub fn target_mut(&mut self, id: TargetId) -> Option<&mut M> {
        self.targets
            .get_mut(&id)
            .map(|slot| slot.committer.target_mut())
    }

    pub fn is_inconsistent(&self, id: TargetId) -> bool {
        self.targets.get(&id).is_some_and(|slot| slot.inconsistent)
    }

    /// Clear the target and forget its history; the next render mounts from
    /// scratch.
    pub fn reset_target(&mut self, id: TargetId) -> Result<(), EngineError> {
        let slot = self
            .targets
            .get_mut(&id)
            .ok_or(EngineError::UnknownTarget(id))?;
        slot.committer
            .reset()
            .map_err(|error| EngineError::Commit { target: id, error })?;
        slot.inconsistent = false;
        self.scheduler.forget_target(id);
        log::debug!(target: "reconcile.engine", "target {id} reset");
        Ok(())
    }

    pub fn stats(&self) -> EngineStats {
        let mut stats = EngineStats {
            scheduler: self.scheduler.stats(),
            targets: self.targets.len(),
            ..EngineStats::default()
        };
        for slot in self.targets.values() {
            let commit = slot.committer.stats();
            stats.commit.commits = stats.commit.commits.saturating_add(commit.commits);
            stats.commit.patches = stats.commit.patches.saturating_add(commit.patches);
            stats.commit.target_calls = stats.commit.target_calls.saturating_add(commit.target_calls);
            stats.commit.failures = stats.commit.failures.saturating_add(commit.failures);
            stats.commit.resets = stats.commit.resets.saturating_add(commit.resets);
            if slot.inconsistent {
                stats.inconsistent_targets += 1;
            }
        }
        stats
    }

    fn commit_job(&mut self, job: &CompletedJob) -> Result<(), EngineError> {
        let target = job.handle.target;
        let Some(slot) = self.targets.get_mut(&target) else {
            // Unregistered while the pass was in flight.
            self.scheduler.forget_target(target);
            return Err(EngineError::UnknownTarget(target));
        };
        for warning in &job.warnings {
            log::warn!(target: "reconcile.engine", "target {target}: {warning:?}");
        }
        match slot.committer.commit(job.from, job.to, &job.patches) {
            Ok(report) => {
                log::debug!(
                    target: "reconcile.engine",
                    "target {target} now at v{}: {} patches, {} target calls",
                    job.to.0,
                    report.applied,
                    report.target_calls
                );
            }
            Err(error) => {
                slot.inconsistent = true;
                self.scheduler.abandon_target(target);
                log::error!(
                    target: "reconcile.engine",
                    "target {target} is inconsistent after failed commit of job {}: {error}",
                    job.handle.id.0
                );
                return Err(EngineError::Commit { target, error });
            }
        }
        if let Err(error) = self.scheduler.finish_commit(job) {
            debug_assert!(false, "committed job rejected by scheduler: {error}");
            slot.inconsistent = true;
            self.scheduler.abandon_target(target);
            return Err(error.into());
        }
        Ok(())
    }
}
