//! Deterministic tree diffing to patch streams.
//!
//! Contract:
//! - Nodes are paired depth-first. Children are matched by `key` when present,
//!   otherwise by their position in the sibling list.
//! - A missing previous node mounts the whole new subtree with one `Insert`.
//!   A previous node without a counterpart is dropped with one `Remove`; its
//!   descendants are never visited.
//! - A type change emits one `Replace` and remounts the subtree without
//!   matching any descendants.
//! - Matching types emit `UpdateAttributes` for the shallow attribute
//!   difference and reconcile children.
//! - Move detection is a single O(n) heuristic (see `MoveHeuristic`), never a
//!   minimal edit script.
//!
//! A `DiffPass` performs this traversal one `WorkUnit` at a time so a scheduler
//! can suspend between units. `diff` drives a pass to completion.
//!
//! Complexity: O(n) in the number of visited nodes plus hash map storage per
//! sibling list.

use crate::mounted::{KeyAllocator, MountedNode};
use crate::node::{Attributes, Node, NodeError};
use crate::patch::{AttrDiff, Patch, PatchKey};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// How sibling lists with repeated keys are handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DuplicateKeyPolicy {
    /// Log, record a warning and match that sibling list by position.
    #[default]
    Positional,
    /// Fail the pass.
    Reject,
}

/// Which matched children are reported as moved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MoveHeuristic {
    /// A child moves when its rank among the surviving matched children changed.
    #[default]
    Displaced,
    /// A child moves when its old index is below the highest old index seen so
    /// far in new order.
    Watermark,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiffConfig {
    pub duplicate_keys: DuplicateKeyPolicy,
    pub moves: MoveHeuristic,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiffError {
    /// `path` lists child indices from the new root down to the bad node.
    Malformed { path: Vec<usize>, error: NodeError },
    DuplicateKey { parent: PatchKey, key: Arc<str> },
    InvalidUnit(UnitId),
    Incomplete,
    /// The target's patch keys ran out; reset the target to start over.
    KeySpaceExhausted { needed: usize },
}

impl fmt::Display for DiffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffError::Malformed { path, error } => {
                write!(f, "malformed node at {path:?}: {error}")
            }
            DiffError::DuplicateKey { parent, key } => {
                write!(f, "duplicate key {key:?} among children of {parent}")
            }
            DiffError::InvalidUnit(unit) => write!(f, "work unit {} is not ready", unit.0),
            DiffError::Incomplete => f.write_str("diff pass has unresolved work units"),
            DiffError::KeySpaceExhausted { needed } => {
                write!(f, "patch key space exhausted ({needed} keys needed)")
            }
        }
    }
}

impl std::error::Error for DiffError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiffWarning {
    DuplicateKey { parent: PatchKey, key: Arc<str> },
}

/// Minimal differ instrumentation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub units: u64,
    pub mounted: u64,
    pub removed: u64,
    pub replaced: u64,
    pub moved: u64,
    pub updated: u64,
    pub positional_fallbacks: u64,
}

#[derive(Clone, Debug)]
pub struct DiffOutput {
    pub patches: Vec<Patch>,
    pub tree: Arc<MountedNode>,
    pub keys: KeyAllocator,
    pub warnings: Vec<DiffWarning>,
    pub stats: DiffStats,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub u32);

#[derive(Clone, Copy, Debug)]
struct ParentSlot {
    unit: UnitId,
    slot: usize,
}

/// One pending comparison of an old mounted node against a new node.
#[derive(Debug)]
struct WorkUnit {
    old: Option<Arc<MountedNode>>,
    new: Arc<Node>,
    parent: Option<ParentSlot>,
    state: UnitState,
}

#[derive(Debug)]
enum UnitState {
    Ready,
    /// Compared; waiting for `pending` child units to fill their slots.
    Waiting {
        key: PatchKey,
        slots: Vec<Option<Arc<MountedNode>>>,
        pending: usize,
    },
}

enum ChildOutcome {
    Mounted(Arc<MountedNode>),
    Descend(Arc<MountedNode>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Identity<'a> {
    Key(&'a str),
    Position(usize),
}

/// A resumable diff of one previous tree against one next tree.
#[derive(Debug)]
pub struct DiffPass {
    config: DiffConfig,
    keys: KeyAllocator,
    units: Vec<Option<WorkUnit>>,
    live: usize,
    patches: Vec<Patch>,
    warnings: Vec<DiffWarning>,
    stats: DiffStats,
    result: Option<Arc<MountedNode>>,
}

impl DiffPass {
    pub fn new(
        previous: Option<Arc<MountedNode>>,
        next: Arc<Node>,
        keys: KeyAllocator,
        config: DiffConfig,
    ) -> Self {
        let root = WorkUnit {
            old: previous,
            new: next,
            parent: None,
            state: UnitState::Ready,
        };
        Self {
            config,
            keys,
            units: vec![Some(root)],
            live: 1,
            patches: Vec::new(),
            warnings: Vec::new(),
            stats: DiffStats::default(),
            result: None,
        }
    }

    pub fn root(&self) -> UnitId {
        UnitId(0)
    }

    pub fn is_complete(&self) -> bool {
        self.result.is_some()
    }

    /// Units created but not yet resolved (ready or waiting on children).
    pub fn live_units(&self) -> usize {
        self.live
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn warnings(&self) -> &[DiffWarning] {
        &self.warnings
    }

    pub fn stats(&self) -> DiffStats {
        self.stats
    }

    /// Compare one ready unit and return the child units it spawned, in
    /// sibling order.
    pub fn step(&mut self, id: UnitId) -> Result<Vec<UnitId>, DiffError> {
        let (old, new) = match self.unit(id) {
            Some(WorkUnit {
                old,
                new,
                state: UnitState::Ready,
                ..
            }) => (old.clone(), Arc::clone(new)),
            _ => return Err(DiffError::InvalidUnit(id)),
        };
        self.stats.units = self.stats.units.saturating_add(1);
        new.validate().map_err(|error| DiffError::Malformed {
            path: self.path_of(id),
            error,
        })?;

        let Some(old) = old else {
            let mounted = self.mount(&new, self.path_of(id))?;
            log::trace!(target: "reconcile.diff", "mount root {}", mounted.key());
            self.patches.push(Patch::Insert {
                parent: None,
                key: mounted.key(),
                node: Arc::clone(&new),
                index: 0,
                after: None,
            });
            self.complete(id, mounted);
            return Ok(Vec::new());
        };

        if old.node().kind() != new.kind() {
            let mounted = self.mount(&new, self.path_of(id))?;
            log::trace!(
                target: "reconcile.diff",
                "replace {} with {}",
                old.key(),
                mounted.key()
            );
            self.stats.replaced = self.stats.replaced.saturating_add(1);
            self.patches.push(Patch::Replace {
                key: old.key(),
                new_key: mounted.key(),
                node: Arc::clone(&new),
            });
            self.complete(id, mounted);
            return Ok(Vec::new());
        }

        let attr_diff = diff_attributes(old.node().attributes(), new.attributes());
        if !attr_diff.is_empty() {
            self.stats.updated = self.stats.updated.saturating_add(1);
            self.patches.push(Patch::UpdateAttributes {
                key: old.key(),
                diff: attr_diff,
            });
        }

        let outcomes = self.reconcile_children(id, &old, &new)?;
        let mut slots = Vec::with_capacity(outcomes.len());
        let mut spawned = Vec::new();
        for (slot, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                ChildOutcome::Mounted(mounted) => slots.push(Some(mounted)),
                ChildOutcome::Descend(old_child) => {
                    slots.push(None);
                    let child_new = Arc::clone(&new.children()[slot]);
                    spawned.push(self.push_unit(WorkUnit {
                        old: Some(old_child),
                        new: child_new,
                        parent: Some(ParentSlot { unit: id, slot }),
                        state: UnitState::Ready,
                    }));
                }
            }
        }
        log::trace!(
            target: "reconcile.diff",
            "compared {} <{}> spawned={}",
            old.key(),
            new.kind().unwrap_or("#text"),
            spawned.len()
        );

        if spawned.is_empty() {
            let children = slots.into_iter().flatten().collect();
            let mounted = Arc::new(MountedNode::from_parts(old.key(), new, children));
            self.complete(id, mounted);
        } else if let Some(unit) = self.unit_mut(id) {
            unit.state = UnitState::Waiting {
                key: old.key(),
                pending: spawned.len(),
                slots,
            };
        }
        Ok(spawned)
    }

    /// Output of a finished pass; `None` while units are still unresolved.
    pub fn into_output(self) -> Option<DiffOutput> {
        let tree = self.result?;
        Some(DiffOutput {
            patches: self.patches,
            tree,
            keys: self.keys,
            warnings: self.warnings,
            stats: self.stats,
        })
    }

    fn unit(&self, id: UnitId) -> Option<&WorkUnit> {
        self.units.get(id.0 as usize).and_then(Option::as_ref)
    }

    fn unit_mut(&mut self, id: UnitId) -> Option<&mut WorkUnit> {
        self.units.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    fn push_unit(&mut self, unit: WorkUnit) -> UnitId {
        let id = UnitId(self.units.len() as u32);
        self.units.push(Some(unit));
        self.live += 1;
        id
    }

    fn path_of(&self, id: UnitId) -> Vec<usize> {
        let mut path = Vec::new();
        let mut current = self.unit(id).and_then(|unit| unit.parent);
        while let Some(parent) = current {
            path.push(parent.slot);
            current = self.unit(parent.unit).and_then(|unit| unit.parent);
        }
        path.reverse();
        path
    }

    fn mount(&mut self, node: &Arc<Node>, mut path: Vec<usize>) -> Result<Arc<MountedNode>, DiffError> {
        validate_subtree(node, &mut path)?;
        let needed = node.subtree_len();
        let mounted = MountedNode::mount(node, &mut self.keys)
            .ok_or(DiffError::KeySpaceExhausted { needed })?;
        self.stats.mounted = self.stats.mounted.saturating_add(needed as u64);
        Ok(mounted)
    }

    /// Free a resolved unit and hand its mounted subtree to its parent,
    /// finalizing ancestors whose last pending child this was.
    fn complete(&mut self, id: UnitId, mounted: Arc<MountedNode>) {
        let mut id = id;
        let mut mounted = mounted;
        loop {
            let Some(unit) = self.units.get_mut(id.0 as usize).and_then(Option::take) else {
                debug_assert!(false, "completed unit must be live");
                return;
            };
            self.live -= 1;
            let Some(parent) = unit.parent else {
                self.result = Some(mounted);
                return;
            };
            let Some(parent_unit) = self.unit_mut(parent.unit) else {
                debug_assert!(false, "parent unit must outlive its children");
                return;
            };
            let UnitState::Waiting {
                key,
                slots,
                pending,
            } = &mut parent_unit.state
            else {
                debug_assert!(false, "parent unit must be waiting");
                return;
            };
            slots[parent.slot] = Some(mounted);
            *pending -= 1;
            if *pending > 0 {
                return;
            }
            let children = std::mem::take(slots).into_iter().flatten().collect();
            mounted = Arc::new(MountedNode::from_parts(
                *key,
                Arc::clone(&parent_unit.new),
                children,
            ));
            id = parent.unit;
        }
    }

    fn reconcile_children(
        &mut self,
        id: UnitId,
        parent: &MountedNode,
        next: &Node,
    ) -> Result<Vec<ChildOutcome>, DiffError> {
        let old = parent.children();
        let new = next.children();
        let keyed = self.keyed_matching(parent.key(), old, new)?;

        let mut old_positions = HashMap::with_capacity(old.len());
        for (i, child) in old.iter().enumerate() {
            old_positions.insert(identity(child.node(), i, keyed), i);
        }
        let mut old_matched = vec![false; old.len()];
        let matches = new
            .iter()
            .enumerate()
            .map(|(j, child)| {
                let found = old_positions.get(&identity(child, j, keyed)).copied();
                if let Some(i) = found {
                    old_matched[i] = true;
                }
                found
            })
            .collect::<Vec<_>>();

        for (child, matched) in old.iter().zip(&old_matched) {
            if !matched {
                self.stats.removed = self.stats.removed.saturating_add(1);
                self.patches.push(Patch::Remove { key: child.key() });
            }
        }

        let moved = detect_moves(self.config.moves, &matches, &old_matched);
        let base_path = self.path_of(id);
        let mut outcomes = Vec::with_capacity(new.len());
        let mut final_keys = Vec::with_capacity(new.len());
        let mut inserts = Vec::new();
        for (j, child) in new.iter().enumerate() {
            let mut path = base_path.clone();
            path.push(j);
            match matches[j] {
                Some(i) if old[i].node().kind() == child.kind() => {
                    final_keys.push(old[i].key());
                    outcomes.push(ChildOutcome::Descend(Arc::clone(&old[i])));
                }
                Some(i) => {
                    let mounted = self.mount(child, path)?;
                    self.stats.replaced = self.stats.replaced.saturating_add(1);
                    self.patches.push(Patch::Replace {
                        key: old[i].key(),
                        new_key: mounted.key(),
                        node: Arc::clone(child),
                    });
                    final_keys.push(mounted.key());
                    outcomes.push(ChildOutcome::Mounted(mounted));
                }
                None => {
                    let mounted = self.mount(child, path)?;
                    final_keys.push(mounted.key());
                    inserts.push(j);
                    outcomes.push(ChildOutcome::Mounted(mounted));
                }
            }
        }

        let mut previous_matched = None;
        for (j, matched) in matches.iter().enumerate() {
            if matched.is_none() {
                continue;
            }
            if moved[j] {
                self.stats.moved = self.stats.moved.saturating_add(1);
                self.patches.push(Patch::Move {
                    key: final_keys[j],
                    parent: parent.key(),
                    index: j,
                    after: previous_matched,
                });
            }
            previous_matched = Some(final_keys[j]);
        }

        for j in inserts {
            self.patches.push(Patch::Insert {
                parent: Some(parent.key()),
                key: final_keys[j],
                node: Arc::clone(&new[j]),
                index: j,
                after: j.checked_sub(1).map(|prev| final_keys[prev]),
            });
        }

        Ok(outcomes)
    }

    /// Whether keys can be used for this sibling pair, or position must be.
    fn keyed_matching(
        &mut self,
        parent: PatchKey,
        old: &[Arc<MountedNode>],
        new: &[Arc<Node>],
    ) -> Result<bool, DiffError> {
        let duplicate = first_duplicate_key(old.iter().map(|child| child.node().key()))
            .or_else(|| first_duplicate_key(new.iter().map(|child| child.key())));
        let Some(key) = duplicate else {
            return Ok(true);
        };
        match self.config.duplicate_keys {
            DuplicateKeyPolicy::Reject => Err(DiffError::DuplicateKey { parent, key }),
            DuplicateKeyPolicy::Positional => {
                log::warn!(
                    target: "reconcile.diff",
                    "duplicate key {key:?} among children of {parent}; matching by position"
                );
                self.stats.positional_fallbacks = self.stats.positional_fallbacks.saturating_add(1);
                self.warnings.push(DiffWarning::DuplicateKey { parent, key });
                Ok(false)
            }
        }
    }
}

/// Run a pass to completion. `keys` is advanced past every key the pass
/// allocated.
pub fn diff(
    previous: Option<&Arc<MountedNode>>,
    next: &Arc<Node>,
    keys: &mut KeyAllocator,
    config: &DiffConfig,
) -> Result<DiffOutput, DiffError> {
    let mut pass = DiffPass::new(
        previous.cloned(),
        Arc::clone(next),
        keys.clone(),
        config.clone(),
    );
    let mut stack = vec![pass.root()];
    while let Some(unit) = stack.pop() {
        let spawned = pass.step(unit)?;
        stack.extend(spawned.into_iter().rev());
    }
    let output = pass.into_output().ok_or(DiffError::Incomplete)?;
    *keys = output.keys.clone();
    Ok(output)
}

/// Mount `next` into an empty target.
pub fn diff_from_empty(next: &Arc<Node>) -> Result<DiffOutput, DiffError> {
    diff(None, next, &mut KeyAllocator::new(), &DiffConfig::default())
}

/// Shallow attribute difference in name order.
pub fn diff_attributes(old: &Attributes, new: &Attributes) -> AttrDiff {
    let mut out = AttrDiff::new();
    for (name, value) in new {
        if old.get(name) != Some(value) {
            out.push((Arc::clone(name), Some(value.clone())));
        }
    }
    for name in old.keys() {
        if !new.contains_key(name) {
            out.push((Arc::clone(name), None));
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

fn identity(node: &Node, position: usize, keyed: bool) -> Identity<'_> {
    match node.key() {
        Some(key) if keyed => Identity::Key(key),
        _ => Identity::Position(position),
    }
}

fn first_duplicate_key<'a>(keys: impl Iterator<Item = Option<&'a str>>) -> Option<Arc<str>> {
    let mut seen = HashSet::new();
    keys.flatten()
        .find(|key| !seen.insert(*key))
        .map(Arc::from)
}

/// `moved[j]` for every new child `j`; unmatched children are never moved.
///
/// Both heuristics leave the unmoved children in increasing old order, which
/// is what lets `Move::after` anchors reproduce the new order.
fn detect_moves(heuristic: MoveHeuristic, matches: &[Option<usize>], old_matched: &[bool]) -> Vec<bool> {
    let mut moved = vec![false; matches.len()];
    match heuristic {
        MoveHeuristic::Displaced => {
            let mut old_rank = vec![0usize; old_matched.len()];
            let mut rank = 0;
            for (i, matched) in old_matched.iter().enumerate() {
                if *matched {
                    old_rank[i] = rank;
                    rank += 1;
                }
            }
            let mut new_rank = 0;
            for (j, found) in matches.iter().enumerate() {
                if let Some(i) = found {
                    moved[j] = old_rank[*i] != new_rank;
                    new_rank += 1;
                }
            }
        }
        MoveHeuristic::Watermark => {
            let mut watermark = None;
            for (j, found) in matches.iter().enumerate() {
                let Some(i) = *found else {
                    continue;
                };
                match watermark {
                    Some(highest) if i < highest => moved[j] = true,
                    _ => watermark = Some(i),
                }
            }
        }
    }
    moved
}

fn validate_subtree(node: &Node, path: &mut Vec<usize>) -> Result<(), DiffError> {
    node.validate().map_err(|error| DiffError::Malformed {
        path: path.clone(),
        error,
    })?;
    for (i, child) in node.children().iter().enumerate() {
        path.push(i);
        validate_subtree(child, path)?;
        path.pop();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::AttrValue;
    use crate::patch::{PatchKind, count_kind};

    fn mount(node: Node) -> (Arc<MountedNode>, KeyAllocator) {
        let output = diff_from_empty(&Arc::new(node)).expect("mount failed");
        (output.tree, output.keys)
    }

    fn run(prev: Node, next: Node) -> DiffOutput {
        run_with(prev, next, &DiffConfig::default())
    }

    fn run_with(prev: Node, next: Node, config: &DiffConfig) -> DiffOutput {
        let (tree, mut keys) = mount(prev);
        diff(Some(&tree), &Arc::new(next), &mut keys, config).expect("diff failed")
    }

    fn item(key: &str, text: &str) -> Node {
        Node::element("li").with_key(key).with_child(Node::text(text))
    }

    fn list(items: &[(&str, &str)]) -> Node {
        Node::element("ul").with_children(items.iter().map(|(k, t)| item(k, t)))
    }

    /// Minimal patch applier over `(node, children)` records.
    #[derive(Default)]
    struct TestArena {
        nodes: HashMap<PatchKey, (Node, Vec<PatchKey>)>,
        parents: HashMap<PatchKey, PatchKey>,
        root: Option<PatchKey>,
    }

    impl TestArena {
        fn apply(&mut self, patches: &[Patch]) {
            for patch in patches {
                match patch {
                    Patch::Insert {
                        parent,
                        key,
                        node,
                        after,
                        ..
                    } => {
                        self.mount(node, *key, &mut 0);
                        match parent {
                            Some(parent) => self.place(*parent, *key, *after),
                            None => self.root = Some(*key),
                        }
                    }
                    Patch::Remove { key } => self.detach(*key),
                    Patch::UpdateAttributes { key, diff } => {
                        let (node, _) = self.nodes.get_mut(key).expect("missing node");
                        let mut attrs = node.attributes().clone();
                        for (name, value) in diff {
                            match value {
                                Some(value) => attrs.insert(Arc::clone(name), value.clone()),
                                None => attrs.remove(name),
                            };
                        }
                        *node = Node::from_parts(
                            node.kind().map(Arc::from),
                            node.key().map(Arc::from),
                            attrs,
                            Vec::new(),
                        );
                    }
                    Patch::Replace { key, new_key, node } => {
                        self.mount(node, *new_key, &mut 0);
                        match self.parents.remove(key) {
                            Some(parent) => {
                                let siblings = &mut self.nodes.get_mut(&parent).expect("parent").1;
                                let pos = siblings.iter().position(|k| k == key).expect("slot");
                                siblings[pos] = *new_key;
                                self.parents.insert(*new_key, parent);
                            }
                            None => self.root = Some(*new_key),
                        }
                    }
                    Patch::Move {
                        key, parent, after, ..
                    } => {
                        self.detach(*key);
                        self.place(*parent, *key, *after);
                    }
                }
            }
        }

        fn mount(&mut self, node: &Arc<Node>, first: PatchKey, offset: &mut usize) {
            let key = first.offset(*offset).expect("key in range");
            *offset += 1;
            let mut children = Vec::new();
            for child in node.children() {
                let child_key = first.offset(*offset).expect("key in range");
                self.mount(child, first, offset);
                self.parents.insert(child_key, key);
                children.push(child_key);
            }
            self.nodes.insert(key, (node.shallow(), children));
        }

        fn detach(&mut self, key: PatchKey) {
            if let Some(parent) = self.parents.remove(&key) {
                self.nodes.get_mut(&parent).expect("parent").1.retain(|k| *k != key);
            }
        }

        fn place(&mut self, parent: PatchKey, key: PatchKey, after: Option<PatchKey>) {
            let siblings = &mut self.nodes.get_mut(&parent).expect("parent").1;
            let pos = match after {
                Some(after) => siblings.iter().position(|k| *k == after).expect("anchor") + 1,
                None => 0,
            };
            siblings.insert(pos, key);
            self.parents.insert(key, parent);
        }

        fn materialize(&self, key: PatchKey) -> Node {
            let (node, children) = &self.nodes[&key];
            Node::from_parts(
                node.kind().map(Arc::from),
                node.key().map(Arc::from),
                node.attributes().clone(),
                children.iter().map(|child| self.materialize(*child)).collect(),
            )
        }
    }

    fn assert_roundtrip(prev: Node, next: Node, config: &DiffConfig) {
        let mount_out = diff_from_empty(&Arc::new(prev)).expect("mount failed");
        let mut arena = TestArena::default();
        arena.apply(&mount_out.patches);
        let mut keys = mount_out.keys.clone();
        let next = Arc::new(next);
        let out = diff(Some(&mount_out.tree), &next, &mut keys, config).expect("diff failed");
        arena.apply(&out.patches);
        let root = arena.root.expect("root");
        assert_eq!(arena.materialize(root), *next);
        assert_eq!(out.tree.key(), root);
    }

    #[test]
    fn identical_trees_produce_no_patches() {
        let tree = Node::element("div")
            .with_attr("id", "app")
            .with_child(list(&[("a", "1"), ("b", "2")]))
            .with_child(Node::text("tail"));
        let out = run(tree.clone(), tree);
        assert!(out.patches.is_empty(), "unexpected patches: {:?}", out.patches);
    }

    #[test]
    fn mount_emits_single_root_insert() {
        let out = diff_from_empty(&Arc::new(list(&[("a", "1"), ("b", "2")]))).expect("diff");
        assert_eq!(out.patches.len(), 1);
        assert!(matches!(
            out.patches[0],
            Patch::Insert {
                parent: None,
                key: PatchKey(1),
                index: 0,
                after: None,
                ..
            }
        ));
        assert_eq!(out.keys.peek(), PatchKey(6));
        assert_eq!(out.stats.mounted, 5);
    }

    #[test]
    fn root_type_change_is_one_replace() {
        let prev = Node::element("div").with_child(Node::element("span").with_child(Node::text("x")));
        let next = Node::element("section").with_child(Node::element("span").with_child(Node::text("x")));
        let out = run(prev, next);
        assert_eq!(out.patches.len(), 1);
        assert!(matches!(
            out.patches[0],
            Patch::Replace {
                key: PatchKey(1),
                new_key: PatchKey(4),
                ..
            }
        ));
    }

    #[test]
    fn attribute_changes_are_shallow_and_ordered() {
        let prev = Node::element("div").with_attr("a", 1).with_attr("b", "x").with_attr("c", true);
        let next = Node::element("div").with_attr("a", 1).with_attr("b", "y").with_attr("d", 2.5);
        let out = run(prev, next);
        assert_eq!(
            out.patches,
            vec![Patch::UpdateAttributes {
                key: PatchKey(1),
                diff: vec![
                    (Arc::from("b"), Some(AttrValue::from("y"))),
                    (Arc::from("c"), None),
                    (Arc::from("d"), Some(AttrValue::Float(2.5))),
                ],
            }]
        );
    }

    #[test]
    fn attribute_equality_is_strict() {
        let prev = Node::element("input").with_attr("value", 1);
        let next = Node::element("input").with_attr("value", 1.0);
        assert_eq!(count_kind(&run(prev, next).patches, PatchKind::UpdateAttributes), 1);
    }

    #[test]
    fn keyed_swap_moves_both_children() {
        let prev = Node::element("div")
            .with_child(Node::element("p").with_key("a").with_child(Node::text("X")))
            .with_child(Node::element("p").with_key("b").with_child(Node::text("Y")));
        let next = Node::element("div")
            .with_child(Node::element("p").with_key("b").with_child(Node::text("Y")))
            .with_child(Node::element("p").with_key("a").with_child(Node::text("X")));
        let out = run(prev.clone(), next.clone());
        assert_eq!(count_kind(&out.patches, PatchKind::Move), 2);
        assert_eq!(out.patches.len(), 2);
        // Same keys as the mounted children: a = #2, b = #4.
        assert_eq!(
            out.patches,
            vec![
                Patch::Move {
                    key: PatchKey(4),
                    parent: PatchKey(1),
                    index: 0,
                    after: None,
                },
                Patch::Move {
                    key: PatchKey(2),
                    parent: PatchKey(1),
                    index: 1,
                    after: Some(PatchKey(4)),
                },
            ]
        );
        assert_roundtrip(prev, next, &DiffConfig::default());
    }

    #[test]
    fn watermark_heuristic_moves_only_displaced_tail() {
        let config = DiffConfig {
            moves: MoveHeuristic::Watermark,
            ..DiffConfig::default()
        };
        let prev = list(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let next = list(&[("c", "3"), ("a", "1"), ("b", "2")]);
        let out = run_with(prev.clone(), next.clone(), &config);
        assert_eq!(count_kind(&out.patches, PatchKind::Move), 2);
        assert_eq!(out.patches.len(), 2);
        assert_roundtrip(prev, next, &config);

        let swap = run_with(
            list(&[("a", "1"), ("b", "2")]),
            list(&[("b", "2"), ("a", "1")]),
            &config,
        );
        assert_eq!(count_kind(&swap.patches, PatchKind::Move), 1);
    }

    #[test]
    fn unkeyed_reorder_updates_in_place() {
        let prev = Node::element("div")
            .with_child(Node::element("a").with_attr("n", 1))
            .with_child(Node::element("b"))
            .with_child(Node::element("c"));
        let next = Node::element("div")
            .with_child(Node::element("c"))
            .with_child(Node::element("b"))
            .with_child(Node::element("a").with_attr("n", 1));
        let out = run(prev.clone(), next.clone());
        assert_eq!(count_kind(&out.patches, PatchKind::Move), 0);
        assert_eq!(count_kind(&out.patches, PatchKind::Replace), 2);
        assert_eq!(count_kind(&out.patches, PatchKind::Insert), 0);
        assert_eq!(count_kind(&out.patches, PatchKind::Remove), 0);
        assert_roundtrip(prev, next, &DiffConfig::default());

        let prev = Node::element("ul").with_children((0..3).map(|i| Node::element("li").with_attr("n", i)));
        let next = Node::element("ul").with_children((0..3).rev().map(|i| Node::element("li").with_attr("n", i)));
        let out = run(prev, next);
        assert_eq!(count_kind(&out.patches, PatchKind::Move), 0);
        assert_eq!(count_kind(&out.patches, PatchKind::UpdateAttributes), 2);
    }

    #[test]
    fn unkeyed_front_insert_shifts_every_sibling() {
        let prev = Node::element("ul")
            .with_child(Node::element("li").with_child(Node::text("b")))
            .with_child(Node::element("li").with_child(Node::text("c")));
        let next = Node::element("ul")
            .with_child(Node::element("li").with_child(Node::text("a")))
            .with_child(Node::element("li").with_child(Node::text("b")))
            .with_child(Node::element("li").with_child(Node::text("c")));
        let out = run(prev.clone(), next.clone());
        assert_eq!(count_kind(&out.patches, PatchKind::UpdateAttributes), 2);
        assert_eq!(count_kind(&out.patches, PatchKind::Insert), 1);
        assert_roundtrip(prev, next, &DiffConfig::default());
    }

    #[test]
    fn keyed_insert_and_remove_keep_survivors() {
        let prev = list(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let next = list(&[("z", "0"), ("a", "1"), ("c", "3")]);
        let out = run(prev.clone(), next.clone());
        assert_eq!(count_kind(&out.patches, PatchKind::Remove), 1);
        assert_eq!(count_kind(&out.patches, PatchKind::Insert), 1);
        assert_eq!(count_kind(&out.patches, PatchKind::Move), 0);
        assert_eq!(out.patches[0], Patch::Remove { key: PatchKey(4) });
        assert_roundtrip(prev, next, &DiffConfig::default());
    }

    #[test]
    fn removal_does_not_visit_descendants() {
        let prev = Node::element("div").with_child(list(&[("a", "1"), ("b", "2"), ("c", "3")]));
        let next = Node::element("div");
        let out = run(prev, next);
        assert_eq!(out.patches, vec![Patch::Remove { key: PatchKey(2) }]);
        assert_eq!(out.stats.units, 1);
    }

    #[test]
    fn patches_for_one_parent_follow_protocol_order() {
        let prev = Node::element("ul")
            .with_child(item("a", "1"))
            .with_child(item("b", "2"))
            .with_child(Node::element("hr").with_key("c"))
            .with_child(item("d", "4"));
        let next = Node::element("ul")
            .with_child(item("d", "4"))
            .with_child(Node::element("li").with_key("new").with_child(Node::text("n")))
            .with_child(item("c", "3"))
            .with_child(item("a", "1"));
        let out = run(prev.clone(), next.clone());
        let kinds = out.patches.iter().map(Patch::kind).collect::<Vec<_>>();
        let rank = |kind: &PatchKind| match kind {
            PatchKind::Remove => 0,
            PatchKind::Replace => 1,
            PatchKind::Move => 2,
            PatchKind::Insert => 3,
            PatchKind::UpdateAttributes => 4,
        };
        let ranks = kinds.iter().map(rank).collect::<Vec<_>>();
        let mut sorted = ranks.clone();
        sorted.sort();
        assert_eq!(ranks, sorted, "unexpected order: {kinds:?}");
        assert_roundtrip(prev, next, &DiffConfig::default());
    }

    #[test]
    fn duplicate_keys_fall_back_to_positions() {
        let prev = list(&[("a", "1"), ("a", "2")]);
        let next = list(&[("a", "2"), ("a", "1")]);
        let out = run(prev.clone(), next.clone());
        assert_eq!(
            out.warnings,
            vec![DiffWarning::DuplicateKey {
                parent: PatchKey(1),
                key: Arc::from("a"),
            }]
        );
        assert_eq!(count_kind(&out.patches, PatchKind::Move), 0);
        assert_eq!(count_kind(&out.patches, PatchKind::UpdateAttributes), 2);
        assert_eq!(out.stats.positional_fallbacks, 1);
        assert_roundtrip(prev, next, &DiffConfig::default());
    }

    #[test]
    fn duplicate_keys_can_be_rejected() {
        let config = DiffConfig {
            duplicate_keys: DuplicateKeyPolicy::Reject,
            ..DiffConfig::default()
        };
        let (tree, mut keys) = mount(list(&[("a", "1")]));
        let err = diff(
            Some(&tree),
            &Arc::new(list(&[("a", "1"), ("a", "2")])),
            &mut keys,
            &config,
        )
        .expect_err("duplicate keys must fail");
        assert_eq!(
            err,
            DiffError::DuplicateKey {
                parent: PatchKey(1),
                key: Arc::from("a"),
            }
        );
    }

    #[test]
    fn malformed_node_reports_path() {
        let prev = list(&[("a", "1")]);
        let next = Node::element("ul").with_child(
            Node::element("li")
                .with_key("a")
                .with_child(Node::element("bad type")),
        );
        let (tree, mut keys) = mount(prev);
        let err = diff(Some(&tree), &Arc::new(next), &mut keys, &DiffConfig::default())
            .expect_err("malformed node must fail");
        assert_eq!(
            err,
            DiffError::Malformed {
                path: vec![0, 0],
                error: NodeError::InvalidType(Arc::from("bad type")),
            }
        );
    }

    #[test]
    fn step_rejects_units_that_are_not_ready() {
        let (tree, keys) = mount(list(&[("a", "1"), ("b", "2")]));
        let next = Arc::new(list(&[("a", "1"), ("b", "3")]));
        let mut pass = DiffPass::new(Some(tree), next, keys, DiffConfig::default());
        let root = pass.root();
        let spawned = pass.step(root).expect("root step");
        assert_eq!(spawned.len(), 2);
        assert_eq!(pass.step(root), Err(DiffError::InvalidUnit(root)));
        assert_eq!(pass.live_units(), 3);
        assert!(!pass.is_complete());
        for unit in spawned {
            let grandchildren = pass.step(unit).expect("child step");
            for grandchild in grandchildren {
                assert!(pass.step(grandchild).expect("leaf step").is_empty());
            }
        }
        assert!(pass.is_complete());
        assert_eq!(pass.live_units(), 0);
        let out = pass.into_output().expect("complete");
        assert_eq!(count_kind(&out.patches, PatchKind::UpdateAttributes), 1);
    }

    #[test]
    fn nan_attribute_diffs_clean_against_itself() {
        let tree = Node::element("div")
            .with_attr("x", f64::NAN)
            .with_child(Node::text(f64::NAN));
        let out = run(tree.clone(), tree);
        assert!(out.patches.is_empty(), "{:?}", out.patches);

        let out = run(
            Node::element("div").with_attr("x", 0.0),
            Node::element("div").with_attr("x", -0.0),
        );
        assert_eq!(count_kind(&out.patches, PatchKind::UpdateAttributes), 1);
    }

    #[test]
    fn exhausted_key_space_fails_the_pass() {
        let (tree, mut keys) = mount(Node::element("div"));
        keys.reserve(u32::MAX as usize - 3).expect("bulk reservation");
        let next = Arc::new(
            Node::element("section")
                .with_child(Node::text("a"))
                .with_child(Node::text("b")),
        );
        assert_eq!(
            diff(Some(&tree), &next, &mut keys.clone(), &DiffConfig::default()).err(),
            Some(DiffError::KeySpaceExhausted { needed: 3 })
        );

        let mut pass = DiffPass::new(Some(tree), next, keys, DiffConfig::default());
        let root = pass.root();
        assert_eq!(pass.step(root), Err(DiffError::KeySpaceExhausted { needed: 3 }));
        assert!(pass.into_output().is_none());
    }
}
