//! Reconciliation patch protocol.
//!
//! This module defines the operations emitted by the differ and consumed by a
//! commit applier.
//!
//! Invariants:
//! - Patches are applied in order.
//! - References must point to live keys at the time they are used (except the
//!   keys created by `Insert` and `Replace`).
//! - `Insert` and `Replace` mount the whole `node` subtree. Keys of the mounted
//!   subtree are contiguous in pre-order: the root takes `key`/`new_key`, its
//!   first child the next key, and so on.
//! - For one parent, patches are ordered `Remove`, `Replace`, `Move`, `Insert`;
//!   moves and inserts are in ascending `index`.
//! - `index` is the position of the child once the whole batch has been
//!   applied; `after` names the sibling the child is placed behind at the time
//!   the patch is applied (`None` places it first).
//! - `PatchKey::INVALID` never appears in a patch stream.

use crate::node::{AttrValue, Node};
use std::fmt;
use std::sync::Arc;

/// Stable node identity within one target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchKey(pub u32);

impl PatchKey {
    /// Reserved sentinel for "unassigned/invalid" identity.
    pub const INVALID: PatchKey = PatchKey(0);

    /// Key of the `offset`-th node (pre-order) of a subtree mounted at `self`;
    /// `None` past the end of the key space.
    pub fn offset(self, offset: usize) -> Option<PatchKey> {
        let offset = u32::try_from(offset).ok()?;
        self.0.checked_add(offset).map(PatchKey)
    }
}

impl fmt::Display for PatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Changed attributes in name order; `None` removes the attribute.
pub type AttrDiff = Vec<(Arc<str>, Option<AttrValue>)>;

#[derive(Clone, Debug, PartialEq)]
pub enum Patch {
    /// Mount `node` (and its subtree) under `parent`; `None` mounts the root.
    Insert {
        parent: Option<PatchKey>,
        key: PatchKey,
        node: Arc<Node>,
        index: usize,
        after: Option<PatchKey>,
    },
    /// Drop a node and its entire subtree.
    ///
    /// Keys in the subtree are invalid for the rest of the stream.
    Remove { key: PatchKey },
    UpdateAttributes { key: PatchKey, diff: AttrDiff },
    /// Swap a node for a newly mounted subtree in the same slot.
    Replace {
        key: PatchKey,
        new_key: PatchKey,
        node: Arc<Node>,
    },
    /// Reposition an existing child within its parent.
    Move {
        key: PatchKey,
        parent: PatchKey,
        index: usize,
        after: Option<PatchKey>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PatchKind {
    Insert,
    Remove,
    UpdateAttributes,
    Replace,
    Move,
}

impl Patch {
    pub fn kind(&self) -> PatchKind {
        match self {
            Patch::Insert { .. } => PatchKind::Insert,
            Patch::Remove { .. } => PatchKind::Remove,
            Patch::UpdateAttributes { .. } => PatchKind::UpdateAttributes,
            Patch::Replace { .. } => PatchKind::Replace,
            Patch::Move { .. } => PatchKind::Move,
        }
    }

    /// Key of the node this patch acts on (the old node for `Replace`).
    pub fn target_key(&self) -> PatchKey {
        match self {
            Patch::Insert { key, .. }
            | Patch::Remove { key }
            | Patch::UpdateAttributes { key, .. }
            | Patch::Replace { key, .. }
            | Patch::Move { key, .. } => *key,
        }
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Patch::Insert {
                parent,
                key,
                node,
                index,
                ..
            } => {
                let label = node.kind().unwrap_or("#text");
                match parent {
                    Some(parent) => write!(f, "insert {key} <{label}> into {parent} at {index}"),
                    None => write!(f, "insert {key} <{label}> as root"),
                }
            }
            Patch::Remove { key } => write!(f, "remove {key}"),
            Patch::UpdateAttributes { key, diff } => {
                write!(f, "update {key}")?;
                for (name, value) in diff {
                    match value {
                        Some(value) => write!(f, " {name}={value}")?,
                        None => write!(f, " -{name}")?,
                    }
                }
                Ok(())
            }
            Patch::Replace { key, new_key, node } => {
                let label = node.kind().unwrap_or("#text");
                write!(f, "replace {key} with {new_key} <{label}>")
            }
            Patch::Move {
                key, parent, index, ..
            } => write!(f, "move {key} within {parent} to {index}"),
        }
    }
}

/// Count patches per kind; handy for assertions and stats.
pub fn count_kind(patches: &[Patch], kind: PatchKind) -> usize {
    patches.iter().filter(|patch| patch.kind() == kind).count()
}
