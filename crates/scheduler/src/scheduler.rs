use crate::clock::HostClock;
use crate::queue::ReadyUnit;
use core_types::{JobId, Priority, RenderVersion, TargetId};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use vdom::{
    DiffConfig, DiffError, DiffPass, DiffStats, DiffWarning, KeyAllocator, MountedNode, Node,
    Patch, UnitId,
};

pub const DEFAULT_MAX_STEPS_PER_SLICE: usize = 16_384;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub diff: DiffConfig,
    /// Upper bound on unit steps in one slice, whatever the clock says.
    pub max_steps_per_slice: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            diff: DiffConfig::default(),
            max_steps_per_slice: DEFAULT_MAX_STEPS_PER_SLICE,
        }
    }
}

/// A freshly rendered tree for one target.
#[derive(Clone, Debug)]
pub struct RenderRequest {
    pub target: TargetId,
    pub tree: Arc<Node>,
}

impl RenderRequest {
    pub fn new(target: TargetId, tree: impl Into<Arc<Node>>) -> Self {
        Self {
            target,
            tree: tree.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub id: JobId,
    pub target: TargetId,
}

/// A finished diff pass waiting to be committed.
#[derive(Debug)]
pub struct CompletedJob {
    pub handle: JobHandle,
    pub priority: Priority,
    /// Version of the baseline the pass was diffed against.
    pub from: RenderVersion,
    /// Version the target reaches once `patches` are applied.
    pub to: RenderVersion,
    pub patches: Vec<Patch>,
    pub tree: Arc<MountedNode>,
    pub keys: KeyAllocator,
    pub warnings: Vec<DiffWarning>,
    pub stats: DiffStats,
}

/// Why a slice returned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SliceOutcome {
    /// No ready work is left.
    #[default]
    Idle,
    TimeExpired,
    Interrupted,
    /// `max_steps_per_slice` was reached with work still ready.
    StepLimit,
}

#[derive(Debug, Default)]
pub struct SliceReport {
    pub steps: usize,
    pub outcome: SliceOutcome,
    pub completed: Vec<JobHandle>,
    pub failed: Vec<(JobHandle, DiffError)>,
}

/// Minimal scheduler instrumentation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub slices: u64,
    pub steps: u64,
    pub jobs_scheduled: u64,
    pub jobs_completed: u64,
    pub jobs_cancelled: u64,
    pub jobs_superseded: u64,
    pub jobs_failed: u64,
    pub preemptions: u64,
    pub budget_exhaustions: u64,
    pub interrupts: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    /// The job was cancelled or superseded after it completed.
    StaleJob { job: JobId, target: TargetId },
    VersionMismatch {
        target: TargetId,
        expected: RenderVersion,
        actual: RenderVersion,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::StaleJob { job, target } => {
                write!(f, "job {} is no longer current for target {target}", job.0)
            }
            SchedulerError::VersionMismatch {
                target,
                expected,
                actual,
            } => write!(
                f,
                "target {target} is at version {}, job was diffed against {}",
                expected.0, actual.0
            ),
        }
    }
}

impl std::error::Error for SchedulerError {}

#[derive(Debug, Default)]
struct TargetState {
    baseline: Option<Arc<MountedNode>>,
    keys: KeyAllocator,
    version: RenderVersion,
    /// Running job, or completed job awaiting `finish_commit`.
    active: Option<JobId>,
}

#[derive(Debug)]
struct Job {
    handle: JobHandle,
    priority: Priority,
    arrival: u64,
    from: RenderVersion,
    pass: DiffPass,
}

/// Cooperative, priority-ordered driver of diff passes.
///
/// Invariants:
/// - A target has at most one active job; scheduling a new request for it
///   discards the previous uncommitted pass.
/// - Every entry in the ready heap belongs to a live job.
/// - Baselines change only through `finish_commit`.
#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    targets: HashMap<TargetId, TargetState>,
    jobs: HashMap<JobId, Job>,
    ready: BinaryHeap<ReadyUnit>,
    completed: VecDeque<CompletedJob>,
    next_job: u64,
    next_seq: u64,
    last_job: Option<JobId>,
    stats: SchedulerStats,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            targets: HashMap::new(),
            jobs: HashMap::new(),
            ready: BinaryHeap::new(),
            completed: VecDeque::new(),
            next_job: 0,
            next_seq: 0,
            last_job: None,
            stats: SchedulerStats::default(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn schedule(&mut self, request: RenderRequest, priority: Priority) -> JobHandle {
        let previous = self
            .targets
            .get_mut(&request.target)
            .and_then(|state| state.active.take());
        if let Some(previous) = previous
            && self.drop_job(previous)
        {
            self.stats.jobs_superseded = self.stats.jobs_superseded.saturating_add(1);
            log::debug!(
                target: "reconcile.scheduler",
                "job {} for target {} superseded",
                previous.0,
                request.target
            );
        }

        self.next_job += 1;
        let id = JobId(self.next_job);
        let handle = JobHandle {
            id,
            target: request.target,
        };
        let state = self.targets.entry(request.target).or_default();
        let pass = DiffPass::new(
            state.baseline.clone(),
            request.tree,
            state.keys.clone(),
            self.config.diff.clone(),
        );
        let from = state.version;
        state.active = Some(id);

        let root = pass.root();
        self.jobs.insert(
            id,
            Job {
                handle,
                priority,
                arrival: id.0,
                from,
                pass,
            },
        );
        self.push_ready(priority, id.0, id, root);
        self.stats.jobs_scheduled = self.stats.jobs_scheduled.saturating_add(1);
        log::debug!(
            target: "reconcile.scheduler",
            "job {} scheduled for target {} at {priority:?} (baseline v{})",
            id.0,
            request.target,
            from.0
        );
        handle
    }

    /// Discard a running or completed-but-uncommitted job. Committed state is
    /// never affected. Returns false if the job is no longer current.
    pub fn cancel(&mut self, handle: JobHandle) -> bool {
        let Some(state) = self.targets.get_mut(&handle.target) else {
            return false;
        };
        if state.active != Some(handle.id) {
            return false;
        }
        state.active = None;
        let dropped = self.drop_job(handle.id);
        if dropped {
            self.stats.jobs_cancelled = self.stats.jobs_cancelled.saturating_add(1);
            log::debug!(
                target: "reconcile.scheduler",
                "job {} for target {} cancelled",
                handle.id.0,
                handle.target
            );
        }
        dropped
    }

    /// Step ready units until none are left, the clock runs out, the host
    /// interrupts, or the per-slice step cap is hit. All pass state survives
    /// a suspension.
    pub fn run_until_blocked_or_timeslice_expired(
        &mut self,
        clock: &mut dyn HostClock,
    ) -> SliceReport {
        self.stats.slices = self.stats.slices.saturating_add(1);
        let max_steps = self.config.max_steps_per_slice.max(1);
        let mut report = SliceReport::default();
        loop {
            if report.steps >= max_steps && !self.ready.is_empty() {
                self.stats.budget_exhaustions = self.stats.budget_exhaustions.saturating_add(1);
                report.outcome = SliceOutcome::StepLimit;
                break;
            }
            let Some(entry) = self.ready.pop() else {
                report.outcome = SliceOutcome::Idle;
                break;
            };
            self.note_preemption(&entry);
            self.step_unit(entry, &mut report);
            report.steps += 1;
            self.stats.steps = self.stats.steps.saturating_add(1);

            if self.ready.is_empty() {
                report.outcome = SliceOutcome::Idle;
                break;
            }
            if clock.interrupted() {
                self.stats.interrupts = self.stats.interrupts.saturating_add(1);
                report.outcome = SliceOutcome::Interrupted;
                break;
            }
            if clock.time_remaining().is_zero() {
                report.outcome = SliceOutcome::TimeExpired;
                break;
            }
        }
        log::trace!(
            target: "reconcile.scheduler",
            "slice ended {:?} after {} steps ({} completed, {} failed, {} ready)",
            report.outcome,
            report.steps,
            report.completed.len(),
            report.failed.len(),
            self.ready.len()
        );
        report
    }

    /// Hand out finished passes in completion order.
    pub fn take_completed(&mut self) -> Vec<CompletedJob> {
        self.completed.drain(..).collect()
    }

    /// Install a committed job's tree as the target's new baseline.
    ///
    /// Must follow `take_completed` without scheduling for the same target in
    /// between; otherwise the job is stale and the baseline is left alone.
    pub fn finish_commit(&mut self, job: &CompletedJob) -> Result<(), SchedulerError> {
        let stale = SchedulerError::StaleJob {
            job: job.handle.id,
            target: job.handle.target,
        };
        let Some(state) = self.targets.get_mut(&job.handle.target) else {
            return Err(stale);
        };
        if state.active != Some(job.handle.id) {
            return Err(stale);
        }
        if state.version != job.from {
            return Err(SchedulerError::VersionMismatch {
                target: job.handle.target,
                expected: state.version,
                actual: job.from,
            });
        }
        state.baseline = Some(Arc::clone(&job.tree));
        state.keys = job.keys.clone();
        state.version = job.to;
        state.active = None;
        log::debug!(
            target: "reconcile.scheduler",
            "target {} baseline now v{} ({} keys issued)",
            job.handle.target,
            job.to.0,
            job.keys.peek().0.saturating_sub(1)
        );
        Ok(())
    }

    /// Drop the target's active job, keeping its committed baseline.
    pub fn abandon_target(&mut self, target: TargetId) -> bool {
        let active = self
            .targets
            .get_mut(&target)
            .and_then(|state| state.active.take());
        match active {
            Some(job) => self.drop_job(job),
            None => false,
        }
    }

    /// Drop every trace of the target: active job, baseline, keys, version.
    pub fn forget_target(&mut self, target: TargetId) {
        self.abandon_target(target);
        self.targets.remove(&target);
    }

    pub fn baseline(&self, target: TargetId) -> Option<&Arc<MountedNode>> {
        self.targets.get(&target)?.baseline.as_ref()
    }

    pub fn version(&self, target: TargetId) -> RenderVersion {
        self.targets
            .get(&target)
            .map(|state| state.version)
            .unwrap_or_default()
    }

    pub fn active_job(&self, target: TargetId) -> Option<JobId> {
        self.targets.get(&target)?.active
    }

    /// Jobs still diffing (completed jobs are not counted).
    pub fn pending_jobs(&self) -> usize {
        self.jobs.len()
    }

    pub fn ready_units(&self) -> usize {
        self.ready.len()
    }

    pub fn is_idle(&self) -> bool {
        self.ready.is_empty()
    }

    fn push_ready(&mut self, priority: Priority, arrival: u64, job: JobId, unit: UnitId) {
        self.next_seq += 1;
        self.ready.push(ReadyUnit {
            priority,
            arrival,
            seq: self.next_seq,
            job,
            unit,
        });
    }

    fn note_preemption(&mut self, entry: &ReadyUnit) {
        if let Some(last) = self.last_job
            && last != entry.job
            && self.jobs.contains_key(&last)
        {
            self.stats.preemptions = self.stats.preemptions.saturating_add(1);
            log::debug!(
                target: "reconcile.scheduler",
                "job {} preempted by job {} ({:?})",
                last.0,
                entry.job.0,
                entry.priority
            );
        }
        self.last_job = Some(entry.job);
    }

    fn step_unit(&mut self, entry: ReadyUnit, report: &mut SliceReport) {
        let Some(job) = self.jobs.get_mut(&entry.job) else {
            debug_assert!(false, "ready unit for a dropped job");
            return;
        };
        let priority = job.priority;
        let arrival = job.arrival;
        let handle = job.handle;
        let result = job.pass.step(entry.unit);
        let complete = job.pass.is_complete();

        match result {
            Ok(spawned) => {
                log::trace!(
                    target: "reconcile.scheduler",
                    "job {} unit {} spawned {}",
                    entry.job.0,
                    entry.unit.0,
                    spawned.len()
                );
                // Reverse so the first child has the highest sequence number.
                for unit in spawned.into_iter().rev() {
                    self.push_ready(priority, arrival, entry.job, unit);
                }
                if complete {
                    self.finish_job(entry.job, report);
                }
            }
            Err(error) => {
                self.jobs.remove(&entry.job);
                self.ready.retain(|ready| ready.job != entry.job);
                if let Some(state) = self.targets.get_mut(&handle.target)
                    && state.active == Some(handle.id)
                {
                    state.active = None;
                }
                self.stats.jobs_failed = self.stats.jobs_failed.saturating_add(1);
                log::warn!(
                    target: "reconcile.scheduler",
                    "job {} for target {} failed: {error}",
                    handle.id.0,
                    handle.target
                );
                report.failed.push((handle, error));
            }
        }
    }

    fn finish_job(&mut self, id: JobId, report: &mut SliceReport) {
        let Some(job) = self.jobs.remove(&id) else {
            return;
        };
        let Some(output) = job.pass.into_output() else {
            debug_assert!(false, "finished job without output");
            return;
        };
        self.stats.jobs_completed = self.stats.jobs_completed.saturating_add(1);
        log::debug!(
            target: "reconcile.scheduler",
            "job {} for target {} completed: {} patches, {} units",
            id.0,
            job.handle.target,
            output.patches.len(),
            output.stats.units
        );
        report.completed.push(job.handle);
        self.completed.push_back(CompletedJob {
            handle: job.handle,
            priority: job.priority,
            from: job.from,
            to: job.from.next(),
            patches: output.patches,
            tree: output.tree,
            keys: output.keys,
            warnings: output.warnings,
            stats: output.stats,
        });
    }

    fn drop_job(&mut self, id: JobId) -> bool {
        if self.jobs.remove(&id).is_some() {
            self.ready.retain(|ready| ready.job != id);
            if self.last_job == Some(id) {
                self.last_job = None;
            }
            return true;
        }
        if let Some(pos) = self.completed.iter().position(|job| job.handle.id == id) {
            self.completed.remove(pos);
            return true;
        }
        false
    }
}
