//! In-memory reference target.

use crate::mutator::TargetMutator;
use std::fmt;
use std::sync::Arc;
use vdom::{AttrValue, Node};

/// Slot index plus the slot's generation, so handles to freed nodes stay
/// stale after their slot is reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MemoryHandle {
    index: usize,
    generation: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemoryTargetError {
    StaleHandle,
    IndexOutOfRange { index: usize, len: usize },
    RootOccupied,
    NotAtIndex { index: usize },
    /// Failure requested through `fail_after`.
    Injected { call: usize },
}

impl fmt::Display for MemoryTargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryTargetError::StaleHandle => f.write_str("stale node handle"),
            MemoryTargetError::IndexOutOfRange { index, len } => {
                write!(f, "index {index} out of range for {len} children")
            }
            MemoryTargetError::RootOccupied => f.write_str("target already has a root"),
            MemoryTargetError::NotAtIndex { index } => {
                write!(f, "node is not the child at index {index}")
            }
            MemoryTargetError::Injected { call } => write!(f, "injected failure on call {call}"),
        }
    }
}

impl std::error::Error for MemoryTargetError {}

struct Record {
    node: Node,
    children: Vec<MemoryHandle>,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    record: Option<Record>,
}

/// Arena-backed target that records nodes exactly as the mutator calls
/// describe them. Freed slots are reused, so the arena is bounded by the
/// largest tree it has held.
#[derive(Default)]
pub struct MemoryTarget {
    slots: Vec<Slot>,
    free: Vec<usize>,
    root: Option<MemoryHandle>,
    calls: usize,
    fail_after: Option<usize>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call after the first `calls` successful ones fail.
    pub fn fail_after(&mut self, calls: usize) {
        self.fail_after = Some(self.calls.saturating_add(calls));
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn live_nodes(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Arena slots ever created, live or free.
    pub fn slots(&self) -> usize {
        self.slots.len()
    }

    /// Rebuild the current tree; `None` when nothing is mounted.
    pub fn materialize(&self) -> Option<Node> {
        self.root.and_then(|root| self.materialize_node(root))
    }

    fn materialize_node(&self, handle: MemoryHandle) -> Option<Node> {
        let record = self.record(handle)?;
        let children = record
            .children
            .iter()
            .map(|child| self.materialize_node(*child))
            .collect::<Option<Vec<_>>>()?;
        Some(Node::from_parts(
            record.node.kind().map(Arc::from),
            record.node.key().map(Arc::from),
            record.node.attributes().clone(),
            children,
        ))
    }

    fn begin_call(&mut self) -> Result<(), MemoryTargetError> {
        self.calls += 1;
        match self.fail_after {
            Some(limit) if self.calls > limit => {
                Err(MemoryTargetError::Injected { call: self.calls })
            }
            _ => Ok(()),
        }
    }

    fn record(&self, handle: MemoryHandle) -> Option<&Record> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)?
            .record
            .as_ref()
    }

    fn record_mut(&mut self, handle: MemoryHandle) -> Result<&mut Record, MemoryTargetError> {
        self.slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.record.as_mut())
            .ok_or(MemoryTargetError::StaleHandle)
    }

    fn alloc(&mut self, node: &Node) -> MemoryHandle {
        let record = Record {
            node: node.shallow(),
            children: Vec::new(),
        };
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[index];
        slot.record = Some(record);
        MemoryHandle {
            index,
            generation: slot.generation,
        }
    }

    fn free_subtree(&mut self, handle: MemoryHandle) {
        let mut stack = vec![handle];
        while let Some(current) = stack.pop() {
            let Some(slot) = self
                .slots
                .get_mut(current.index)
                .filter(|slot| slot.generation == current.generation)
            else {
                continue;
            };
            if let Some(record) = slot.record.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(current.index);
                stack.extend(record.children);
            }
        }
    }

    fn check_slot(
        &mut self,
        parent: Option<&MemoryHandle>,
        index: usize,
        node: MemoryHandle,
    ) -> Result<(), MemoryTargetError> {
        let at_index = match parent {
            Some(parent) => self.record_mut(*parent)?.children.get(index).copied(),
            None => self.root.filter(|_| index == 0),
        };
        if at_index != Some(node) {
            return Err(MemoryTargetError::NotAtIndex { index });
        }
        Ok(())
    }
}

impl TargetMutator for MemoryTarget {
    type Handle = MemoryHandle;
    type Error = MemoryTargetError;

    fn insert(
        &mut self,
        parent: Option<&MemoryHandle>,
        index: usize,
        node: &Node,
    ) -> Result<MemoryHandle, MemoryTargetError> {
        self.begin_call()?;
        match parent {
            Some(parent) => {
                let len = self.record_mut(*parent)?.children.len();
                if index > len {
                    return Err(MemoryTargetError::IndexOutOfRange { index, len });
                }
                let handle = self.alloc(node);
                self.record_mut(*parent)?.children.insert(index, handle);
                Ok(handle)
            }
            None => {
                if self.root.is_some() {
                    return Err(MemoryTargetError::RootOccupied);
                }
                let handle = self.alloc(node);
                self.root = Some(handle);
                Ok(handle)
            }
        }
    }

    fn remove(
        &mut self,
        parent: Option<&MemoryHandle>,
        index: usize,
        node: &MemoryHandle,
    ) -> Result<(), MemoryTargetError> {
        self.begin_call()?;
        self.check_slot(parent, index, *node)?;
        match parent {
            Some(parent) => {
                self.record_mut(*parent)?.children.remove(index);
            }
            None => self.root = None,
        }
        self.free_subtree(*node);
        Ok(())
    }

    fn update_attributes(
        &mut self,
        node: &MemoryHandle,
        diff: &[(Arc<str>, Option<AttrValue>)],
    ) -> Result<(), MemoryTargetError> {
        self.begin_call()?;
        let record = self.record_mut(*node)?;
        let mut attributes = record.node.attributes().clone();
        for (name, value) in diff {
            match value {
                Some(value) => {
                    attributes.insert(Arc::clone(name), value.clone());
                }
                None => {
                    attributes.remove(name);
                }
            }
        }
        record.node = Node::from_parts(
            record.node.kind().map(Arc::from),
            record.node.key().map(Arc::from),
            attributes,
            Vec::new(),
        );
        Ok(())
    }

    fn replace(
        &mut self,
        parent: Option<&MemoryHandle>,
        index: usize,
        old: &MemoryHandle,
        node: &Node,
    ) -> Result<MemoryHandle, MemoryTargetError> {
        self.begin_call()?;
        self.check_slot(parent, index, *old)?;
        let handle = self.alloc(node);
        match parent {
            Some(parent) => self.record_mut(*parent)?.children[index] = handle,
            None => self.root = Some(handle),
        }
        self.free_subtree(*old);
        Ok(handle)
    }

    fn move_child(
        &mut self,
        parent: &MemoryHandle,
        from: usize,
        to: usize,
    ) -> Result<(), MemoryTargetError> {
        self.begin_call()?;
        let children = &mut self.record_mut(*parent)?.children;
        let len = children.len();
        if from >= len {
            return Err(MemoryTargetError::IndexOutOfRange { index: from, len });
        }
        if to >= len {
            return Err(MemoryTargetError::IndexOutOfRange { index: to, len });
        }
        let child = children.remove(from);
        children.insert(to, child);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), MemoryTargetError> {
        self.slots.clear();
        self.free.clear();
        self.root = None;
        self.fail_after = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_and_edits_a_tree() {
        let mut target = MemoryTarget::new();
        let root = target.insert(None, 0, &Node::element("ul")).expect("root");
        let a = target.insert(Some(&root), 0, &Node::element("li").with_key("a")).expect("a");
        let b = target.insert(Some(&root), 1, &Node::element("li").with_key("b")).expect("b");
        target.insert(Some(&a), 0, &Node::text("x")).expect("text");
        target.move_child(&root, 1, 0).expect("move");
        target
            .update_attributes(&b, &[(Arc::from("class"), Some(AttrValue::from("on")))])
            .expect("update");

        let expected = Node::element("ul")
            .with_child(Node::element("li").with_key("b").with_attr("class", "on"))
            .with_child(Node::element("li").with_key("a").with_child(Node::text("x")));
        assert_eq!(target.materialize(), Some(expected));
        assert_eq!(target.calls(), 6);

        target.remove(Some(&root), 1, &a).expect("remove");
        assert_eq!(target.live_nodes(), 2);
        assert_eq!(
            target.remove(Some(&root), 0, &a),
            Err(MemoryTargetError::NotAtIndex { index: 0 })
        );
    }

    #[test]
    fn replace_keeps_the_slot() {
        let mut target = MemoryTarget::new();
        let root = target.insert(None, 0, &Node::element("div")).expect("root");
        let old = target.insert(Some(&root), 0, &Node::element("p")).expect("p");
        target.insert(Some(&root), 1, &Node::element("hr")).expect("hr");
        target
            .replace(Some(&root), 0, &old, &Node::element("h1"))
            .expect("replace");
        let expected = Node::element("div")
            .with_child(Node::element("h1"))
            .with_child(Node::element("hr"));
        assert_eq!(target.materialize(), Some(expected));
    }

    #[test]
    fn freed_slots_are_reused_and_old_handles_go_stale() {
        let mut target = MemoryTarget::new();
        let root = target.insert(None, 0, &Node::element("ul")).expect("root");
        let mut last = None;
        for i in 0..100 {
            let li = target.insert(Some(&root), 0, &Node::element("li")).expect("li");
            target.insert(Some(&li), 0, &Node::text(i)).expect("text");
            target.remove(Some(&root), 0, &li).expect("remove");
            last = Some(li);
        }
        assert_eq!(target.slots(), 3);
        assert_eq!(target.live_nodes(), 1);

        let reused = target.insert(Some(&root), 0, &Node::element("p")).expect("p");
        let stale = last.expect("inserted");
        assert_ne!(reused, stale);
        assert_eq!(
            target.update_attributes(&stale, &[]),
            Err(MemoryTargetError::StaleHandle)
        );
        assert_eq!(
            target.materialize(),
            Some(Node::element("ul").with_child(Node::element("p")))
        );
    }

    #[test]
    fn injected_failures_start_after_the_budget() {
        let mut target = MemoryTarget::new();
        target.fail_after(1);
        let root = target.insert(None, 0, &Node::element("div")).expect("first call");
        assert_eq!(
            target.insert(Some(&root), 0, &Node::element("p")),
            Err(MemoryTargetError::Injected { call: 2 })
        );
        target.clear().expect("clear");
        assert!(target.materialize().is_none());
        target.insert(None, 0, &Node::element("div")).expect("after clear");
    }
}
