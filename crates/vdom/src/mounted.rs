//! Node trees annotated with the patch keys they were mounted under.

use crate::node::Node;
use crate::patch::PatchKey;
use std::sync::Arc;

/// Hands out fresh, never reused patch keys for one target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyAllocator {
    next: u32,
}

impl KeyAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Reserve `count` contiguous keys and return the first one, or `None`
    /// (reserving nothing) when the key space cannot hold them.
    pub fn reserve(&mut self, count: usize) -> Option<PatchKey> {
        let first = PatchKey(self.next);
        let count = u32::try_from(count).ok()?;
        self.next = self.next.checked_add(count)?;
        Some(first)
    }

    /// First key that has not been handed out yet.
    pub fn peek(&self) -> PatchKey {
        PatchKey(self.next)
    }
}

impl Default for KeyAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MountedNode {
    key: PatchKey,
    node: Arc<Node>,
    children: Vec<Arc<MountedNode>>,
}

impl MountedNode {
    pub(crate) fn from_parts(
        key: PatchKey,
        node: Arc<Node>,
        children: Vec<Arc<MountedNode>>,
    ) -> Self {
        debug_assert_eq!(node.children().len(), children.len());
        Self {
            key,
            node,
            children,
        }
    }

    /// Assign keys to a whole subtree in pre-order; `None` once the
    /// allocator cannot hold the subtree.
    pub fn mount(node: &Arc<Node>, keys: &mut KeyAllocator) -> Option<Arc<MountedNode>> {
        let first = keys.reserve(node.subtree_len())?;
        let mut offset = 0;
        Self::mount_at(node, first, &mut offset)
    }

    /// Rebuild the mounted tree for a subtree whose keys start at `first`.
    pub fn mount_at(
        node: &Arc<Node>,
        first: PatchKey,
        offset: &mut usize,
    ) -> Option<Arc<MountedNode>> {
        let key = first.offset(*offset)?;
        *offset += 1;
        let children = node
            .children()
            .iter()
            .map(|child| Self::mount_at(child, first, offset))
            .collect::<Option<Vec<_>>>()?;
        Some(Arc::new(Self {
            key,
            node: Arc::clone(node),
            children,
        }))
    }

    pub fn key(&self) -> PatchKey {
        self.key
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn children(&self) -> &[Arc<MountedNode>] {
        &self.children
    }

    pub fn find(&self, key: PatchKey) -> Option<&MountedNode> {
        if self.key == key {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(key))
    }

    pub fn keys(&self) -> Vec<PatchKey> {
        let mut out = Vec::new();
        self.collect_keys(&mut out);
        out
    }

    fn collect_keys(&self, out: &mut Vec<PatchKey>) {
        out.push(self.key);
        for child in &self.children {
            child.collect_keys(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_assigns_contiguous_preorder_keys() {
        let node = Arc::new(
            Node::element("div")
                .with_child(Node::element("p").with_child(Node::text("a")))
                .with_child(Node::text("b")),
        );
        let mut keys = KeyAllocator::new();
        keys.reserve(3).expect("room for three keys");
        let mounted = MountedNode::mount(&node, &mut keys).expect("room for the subtree");
        assert_eq!(
            mounted.keys(),
            vec![PatchKey(4), PatchKey(5), PatchKey(6), PatchKey(7)]
        );
        assert_eq!(keys.peek(), PatchKey(8));
        assert_eq!(mounted.children()[0].children()[0].key(), PatchKey(6));
        assert_eq!(
            mounted.find(PatchKey(7)).map(|m| m.node().is_text()),
            Some(true)
        );
    }

    #[test]
    fn exhausted_key_space_reserves_nothing() {
        let mut keys = KeyAllocator::new();
        keys.reserve(u32::MAX as usize - 3).expect("bulk reservation");
        assert_eq!(keys.peek(), PatchKey(u32::MAX - 2));

        let node = Arc::new(Node::element("ul").with_children((0..3).map(Node::text)));
        assert!(MountedNode::mount(&node, &mut keys).is_none());
        assert_eq!(keys.peek(), PatchKey(u32::MAX - 2));

        assert_eq!(keys.reserve(2), Some(PatchKey(u32::MAX - 2)));
        assert_eq!(keys.reserve(1), None);
        assert_eq!(keys.reserve(usize::MAX), None);
    }
}
