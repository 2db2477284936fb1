#[cfg(any(test, feature = "snapshot"))]
pub mod snapshot;

mod diff;
mod mounted;
mod node;
mod patch;

pub use crate::diff::{
    DiffConfig, DiffError, DiffOutput, DiffPass, DiffStats, DiffWarning, DuplicateKeyPolicy,
    MoveHeuristic, UnitId,
};
pub use crate::diff::{diff, diff_attributes, diff_from_empty};
pub use crate::mounted::{KeyAllocator, MountedNode};
pub use crate::node::{AttrValue, Attributes, Node, NodeError, TEXT_VALUE};
pub use crate::patch::{AttrDiff, Patch, PatchKey, PatchKind, count_kind};
