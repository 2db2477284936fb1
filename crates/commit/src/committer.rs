use crate::mutator::TargetMutator;
use core_types::RenderVersion;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use vdom::{Node, Patch, PatchKey};

#[derive(Debug)]
pub enum CommitError {
    /// An earlier commit failed part-way; the target must be reset.
    Poisoned,
    VersionMismatch {
        expected: RenderVersion,
        got: RenderVersion,
    },
    NonMonotonicVersion {
        from: RenderVersion,
        to: RenderVersion,
    },
    InvalidKey(PatchKey),
    UnknownKey(PatchKey),
    DuplicateKey(PatchKey),
    InvalidAnchor {
        parent: PatchKey,
        anchor: PatchKey,
    },
    NotAChild {
        parent: PatchKey,
        child: PatchKey,
    },
    RootExists(PatchKey),
    MissingRoot,
    /// The target refused the mutation produced by patch `index`.
    Rejected {
        index: usize,
        source: Box<dyn Error + Send + Sync>,
    },
    ResetFailed(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitError::Poisoned => f.write_str("target is poisoned by an earlier failed commit"),
            CommitError::VersionMismatch { expected, got } => write!(
                f,
                "commit is based on version {}, target is at {}",
                got.0, expected.0
            ),
            CommitError::NonMonotonicVersion { from, to } => {
                write!(f, "commit jumps from version {} to {}", from.0, to.0)
            }
            CommitError::InvalidKey(key) => write!(f, "invalid patch key {key}"),
            CommitError::UnknownKey(key) => write!(f, "patch key {key} is not live"),
            CommitError::DuplicateKey(key) => write!(f, "patch key {key} was already used"),
            CommitError::InvalidAnchor { parent, anchor } => {
                write!(f, "anchor {anchor} is not a child of {parent}")
            }
            CommitError::NotAChild { parent, child } => {
                write!(f, "{child} is not a child of {parent}")
            }
            CommitError::RootExists(key) => write!(f, "target already has root {key}"),
            CommitError::MissingRoot => f.write_str("target has no root"),
            CommitError::Rejected { index, source } => {
                write!(f, "target rejected patch {index}: {source}")
            }
            CommitError::ResetFailed(source) => write!(f, "target reset failed: {source}"),
        }
    }
}

impl Error for CommitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CommitError::Rejected { source, .. } | CommitError::ResetFailed(source) => {
                Some(source.as_ref())
            }
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub applied: usize,
    pub target_calls: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitStats {
    pub commits: u64,
    pub patches: u64,
    pub target_calls: u64,
    pub failures: u64,
    pub resets: u64,
}

/// Applies patch streams to one target.
///
/// Keeps a shadow of the target's structure (handle, parent and child order
/// per live key) so `after` anchors can be turned into live indices. Commits
/// run to completion or fail; a failure leaves the target half-updated and
/// poisons the committer until `reset`.
pub struct Committer<M: TargetMutator> {
    target: M,
    version: RenderVersion,
    shadow: Shadow<M::Handle>,
    poisoned: bool,
    stats: CommitStats,
}

impl<M: TargetMutator> Committer<M> {
    pub fn new(target: M) -> Self {
        Self {
            target,
            version: RenderVersion::INITIAL,
            shadow: Shadow::new(),
            poisoned: false,
            stats: CommitStats::default(),
        }
    }

    pub fn target(&self) -> &M {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut M {
        &mut self.target
    }

    pub fn into_target(self) -> M {
        self.target
    }

    pub fn version(&self) -> RenderVersion {
        self.version
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn stats(&self) -> CommitStats {
        self.stats
    }

    /// Key of the mounted root, if any.
    pub fn root(&self) -> Option<PatchKey> {
        self.shadow.root
    }

    pub fn handle(&self, key: PatchKey) -> Option<&M::Handle> {
        self.shadow.nodes.get(&key).map(|node| &node.handle)
    }

    pub fn live_nodes(&self) -> usize {
        self.shadow.nodes.len()
    }

    /// Versioned commit: `from` must be the current version and `to` its
    /// successor. An empty patch list only advances the version, poisoned
    /// or not.
    pub fn commit(
        &mut self,
        from: RenderVersion,
        to: RenderVersion,
        patches: &[Patch],
    ) -> Result<CommitReport, CommitError> {
        if self.poisoned && !patches.is_empty() {
            return Err(CommitError::Poisoned);
        }
        if self.version != from {
            return Err(CommitError::VersionMismatch {
                expected: self.version,
                got: from,
            });
        }
        if to != from.next() {
            return Err(CommitError::NonMonotonicVersion { from, to });
        }
        let report = self.apply(patches)?;
        self.version = to;
        log::debug!(
            target: "reconcile.commit",
            "committed v{} -> v{}: {} patches, {} target calls",
            from.0,
            to.0,
            report.applied,
            report.target_calls
        );
        Ok(report)
    }

    /// Apply `patches` in order without version bookkeeping.
    ///
    /// An empty list always succeeds, even on a poisoned committer.
    pub fn apply(&mut self, patches: &[Patch]) -> Result<CommitReport, CommitError> {
        let mut report = CommitReport::default();
        if patches.is_empty() {
            return Ok(report);
        }
        if self.poisoned {
            return Err(CommitError::Poisoned);
        }
        for (index, patch) in patches.iter().enumerate() {
            log::trace!(target: "reconcile.commit", "apply [{index}] {patch}");
            if let Err(err) = self.apply_one(index, patch, &mut report) {
                self.poisoned = true;
                self.stats.failures = self.stats.failures.saturating_add(1);
                self.stats.target_calls = self
                    .stats
                    .target_calls
                    .saturating_add(report.target_calls as u64);
                log::error!(
                    target: "reconcile.commit",
                    "commit failed at patch {index} after {} target calls: {err}",
                    report.target_calls
                );
                return Err(err);
            }
            report.applied += 1;
        }
        self.stats.commits = self.stats.commits.saturating_add(1);
        self.stats.patches = self.stats.patches.saturating_add(report.applied as u64);
        self.stats.target_calls = self
            .stats
            .target_calls
            .saturating_add(report.target_calls as u64);
        Ok(report)
    }

    /// Clear the target and forget all structure; the next commit must
    /// mount from scratch at `RenderVersion::INITIAL`.
    pub fn reset(&mut self) -> Result<(), CommitError> {
        self.target
            .clear()
            .map_err(|err| CommitError::ResetFailed(Box::new(err)))?;
        self.shadow = Shadow::new();
        self.version = RenderVersion::INITIAL;
        self.poisoned = false;
        self.stats.resets = self.stats.resets.saturating_add(1);
        log::debug!(target: "reconcile.commit", "target reset");
        Ok(())
    }

    fn apply_one(
        &mut self,
        index: usize,
        patch: &Patch,
        report: &mut CommitReport,
    ) -> Result<(), CommitError> {
        match patch {
            Patch::Insert {
                parent,
                key,
                node,
                after,
                ..
            } => {
                let position = match parent {
                    Some(parent) => {
                        self.shadow.ensure_live(*parent)?;
                        self.shadow.anchor_position(*parent, *after)?
                    }
                    None => {
                        if let Some(root) = self.shadow.root {
                            return Err(CommitError::RootExists(root));
                        }
                        0
                    }
                };
                let mut offset = 0;
                self.mount(index, *parent, position, *key, &mut offset, node, report)?;
            }
            Patch::Remove { key } => {
                self.shadow.ensure_live(*key)?;
                let (parent, position) = self.shadow.slot_of(*key)?;
                let handle = self.shadow.handle(*key)?;
                let parent_handle = parent.map(|p| self.shadow.handle(p)).transpose()?;
                report.target_calls += 1;
                self.target
                    .remove(parent_handle.as_ref(), position, &handle)
                    .map_err(|err| rejected(index, err))?;
                self.shadow.detach(*key);
                self.shadow.drop_subtree(*key);
            }
            Patch::UpdateAttributes { key, diff } => {
                let handle = self.shadow.handle(*key)?;
                report.target_calls += 1;
                self.target
                    .update_attributes(&handle, diff)
                    .map_err(|err| rejected(index, err))?;
            }
            Patch::Replace { key, new_key, node } => {
                self.shadow.ensure_live(*key)?;
                self.shadow.ensure_fresh(*new_key)?;
                let (parent, position) = self.shadow.slot_of(*key)?;
                let old = self.shadow.handle(*key)?;
                let parent_handle = parent.map(|p| self.shadow.handle(p)).transpose()?;
                report.target_calls += 1;
                let handle = self
                    .target
                    .replace(parent_handle.as_ref(), position, &old, &node.shallow())
                    .map_err(|err| rejected(index, err))?;
                self.shadow.drop_subtree(*key);
                self.shadow.register(*new_key, handle, parent);
                match parent {
                    Some(parent) => self.shadow.set_child(parent, position, *new_key),
                    None => self.shadow.root = Some(*new_key),
                }
                let mut offset = 1;
                for (i, child) in node.children().iter().enumerate() {
                    self.mount(index, Some(*new_key), i, *new_key, &mut offset, child, report)?;
                }
            }
            Patch::Move {
                key, parent, after, ..
            } => {
                self.shadow.ensure_live(*key)?;
                self.shadow.ensure_live(*parent)?;
                if self.shadow.parent_of(*key) != Some(*parent) {
                    return Err(CommitError::NotAChild {
                        parent: *parent,
                        child: *key,
                    });
                }
                if *after == Some(*key) {
                    return Err(CommitError::InvalidAnchor {
                        parent: *parent,
                        anchor: *key,
                    });
                }
                let (_, from) = self.shadow.slot_of(*key)?;
                self.shadow.detach(*key);
                let to = match self.shadow.anchor_position(*parent, *after) {
                    Ok(to) => to,
                    Err(err) => {
                        self.shadow.attach(*parent, from, *key);
                        return Err(err);
                    }
                };
                let parent_handle = self.shadow.handle(*parent)?;
                report.target_calls += 1;
                self.target
                    .move_child(&parent_handle, from, to)
                    .map_err(|err| rejected(index, err))?;
                self.shadow.attach(*parent, to, *key);
            }
        }
        Ok(())
    }

    /// Create `node` and its descendants in pre-order; keys are `first`
    /// offset by the running pre-order position.
    fn mount(
        &mut self,
        index: usize,
        parent: Option<PatchKey>,
        position: usize,
        first: PatchKey,
        offset: &mut usize,
        node: &Arc<Node>,
        report: &mut CommitReport,
    ) -> Result<(), CommitError> {
        let key = first.offset(*offset).ok_or(CommitError::InvalidKey(first))?;
        *offset += 1;
        self.shadow.ensure_fresh(key)?;
        let parent_handle = parent.map(|p| self.shadow.handle(p)).transpose()?;
        report.target_calls += 1;
        let handle = self
            .target
            .insert(parent_handle.as_ref(), position, &node.shallow())
            .map_err(|err| rejected(index, err))?;
        self.shadow.register(key, handle, parent);
        match parent {
            Some(parent) => self.shadow.attach(parent, position, key),
            None => self.shadow.root = Some(key),
        }
        for (i, child) in node.children().iter().enumerate() {
            self.mount(index, Some(key), i, first, offset, child, report)?;
        }
        Ok(())
    }
}

fn rejected<E: Error + Send + Sync + 'static>(index: usize, err: E) -> CommitError {
    CommitError::Rejected {
        index,
        source: Box::new(err),
    }
}

struct ShadowNode<H> {
    handle: H,
    parent: Option<PatchKey>,
    children: Vec<PatchKey>,
}

struct Shadow<H> {
    nodes: HashMap<PatchKey, ShadowNode<H>>,
    /// Every key ever registered, live or retired.
    allocated: KeyRanges,
    root: Option<PatchKey>,
}

impl<H: Clone> Shadow<H> {
    fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            allocated: KeyRanges::default(),
            root: None,
        }
    }

    fn ensure_live(&self, key: PatchKey) -> Result<(), CommitError> {
        if key == PatchKey::INVALID {
            return Err(CommitError::InvalidKey(key));
        }
        if !self.nodes.contains_key(&key) {
            return Err(CommitError::UnknownKey(key));
        }
        Ok(())
    }

    fn ensure_fresh(&self, key: PatchKey) -> Result<(), CommitError> {
        if key == PatchKey::INVALID {
            return Err(CommitError::InvalidKey(key));
        }
        if self.allocated.contains(key) {
            return Err(CommitError::DuplicateKey(key));
        }
        Ok(())
    }

    fn handle(&self, key: PatchKey) -> Result<H, CommitError> {
        self.nodes
            .get(&key)
            .map(|node| node.handle.clone())
            .ok_or(CommitError::UnknownKey(key))
    }

    fn parent_of(&self, key: PatchKey) -> Option<PatchKey> {
        self.nodes.get(&key)?.parent
    }

    fn children(&self, key: PatchKey) -> Result<&[PatchKey], CommitError> {
        self.nodes
            .get(&key)
            .map(|node| node.children.as_slice())
            .ok_or(CommitError::UnknownKey(key))
    }

    /// Live index right behind `after`, or 0 without an anchor.
    fn anchor_position(&self, parent: PatchKey, after: Option<PatchKey>) -> Result<usize, CommitError> {
        let Some(anchor) = after else {
            return Ok(0);
        };
        self.children(parent)?
            .iter()
            .position(|k| *k == anchor)
            .map(|pos| pos + 1)
            .ok_or(CommitError::InvalidAnchor { parent, anchor })
    }

    /// Parent and live index of `key`; roots sit at index 0 of no parent.
    fn slot_of(&self, key: PatchKey) -> Result<(Option<PatchKey>, usize), CommitError> {
        match self.parent_of(key) {
            Some(parent) => {
                let position = self
                    .children(parent)?
                    .iter()
                    .position(|k| *k == key)
                    .ok_or(CommitError::NotAChild { parent, child: key })?;
                Ok((Some(parent), position))
            }
            None if self.root == Some(key) => Ok((None, 0)),
            None => Err(CommitError::MissingRoot),
        }
    }

    fn register(&mut self, key: PatchKey, handle: H, parent: Option<PatchKey>) {
        self.allocated.insert(key);
        self.nodes.insert(
            key,
            ShadowNode {
                handle,
                parent,
                children: Vec::new(),
            },
        );
    }

    fn attach(&mut self, parent: PatchKey, position: usize, child: PatchKey) {
        if let Some(node) = self.nodes.get_mut(&parent) {
            let position = position.min(node.children.len());
            node.children.insert(position, child);
        }
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = Some(parent);
        }
    }

    fn set_child(&mut self, parent: PatchKey, position: usize, child: PatchKey) {
        if let Some(slot) = self
            .nodes
            .get_mut(&parent)
            .and_then(|node| node.children.get_mut(position))
        {
            *slot = child;
        }
    }

    /// Unlink `key` from its parent (or the root slot).
    fn detach(&mut self, key: PatchKey) {
        match self.parent_of(key) {
            Some(parent) => {
                if let Some(node) = self.nodes.get_mut(&parent) {
                    node.children.retain(|k| *k != key);
                }
            }
            None => {
                if self.root == Some(key) {
                    self.root = None;
                }
            }
        }
    }

    /// Forget `key` and all its descendants. Keys stay allocated.
    fn drop_subtree(&mut self, key: PatchKey) {
        let mut stack = vec![key];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.children);
            }
        }
    }
}

/// Set of keys stored as sorted, disjoint, non-adjacent inclusive ranges.
///
/// Subtrees are mounted under contiguous keys handed out in increasing order,
/// so the retired history of a long-lived target collapses into a handful of
/// ranges instead of one entry per key.
#[derive(Debug, Default)]
struct KeyRanges {
    ranges: Vec<(u32, u32)>,
}

impl KeyRanges {
    fn contains(&self, key: PatchKey) -> bool {
        let idx = self.ranges.partition_point(|range| range.1 < key.0);
        self.ranges.get(idx).is_some_and(|range| range.0 <= key.0)
    }

    fn insert(&mut self, key: PatchKey) {
        let k = key.0;
        let idx = self.ranges.partition_point(|range| range.1 < k);
        if self.ranges.get(idx).is_some_and(|range| range.0 <= k) {
            return;
        }
        // Neighbours are strictly below / above `k`, so the +1s cannot overflow.
        let joins_prev = idx > 0 && self.ranges[idx - 1].1 + 1 == k;
        let joins_next = idx < self.ranges.len() && k + 1 == self.ranges[idx].0;
        match (joins_prev, joins_next) {
            (true, true) => {
                let (_, end) = self.ranges.remove(idx);
                self.ranges[idx - 1].1 = end;
            }
            (true, false) => self.ranges[idx - 1].1 = k,
            (false, true) => self.ranges[idx].0 = k,
            (false, false) => self.ranges.insert(idx, (k, k)),
        }
    }
}
