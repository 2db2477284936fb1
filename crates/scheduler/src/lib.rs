//! Cooperative scheduling of diff passes.
//!
//! Every render request becomes a job holding one resumable `DiffPass`. Ready
//! work units of all jobs share one priority heap; the host drives the
//! scheduler one time slice at a time and takes finished passes out for
//! commit.

mod clock;
mod queue;
mod scheduler;

pub use crate::clock::{HostClock, SliceClock, StepBudget, Unbounded};
pub use crate::scheduler::{
    CompletedJob, DEFAULT_MAX_STEPS_PER_SLICE, JobHandle, RenderRequest, Scheduler,
    SchedulerConfig, SchedulerError, SchedulerStats, SliceOutcome, SliceReport,
};
