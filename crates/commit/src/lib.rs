//! Synchronous application of patch streams to a host target.

mod committer;
mod memory;
mod mutator;

pub use crate::committer::{CommitError, CommitReport, CommitStats, Committer};
pub use crate::memory::{MemoryHandle, MemoryTarget, MemoryTargetError};
pub use crate::mutator::TargetMutator;
