use std::sync::Arc;
use vdom::{AttrValue, Node};

/// Host-side operations a commit is expressed in.
///
/// All positions are live child indices at the time of the call. Nodes handed
/// to `insert` and `replace` are shallow: their children follow as separate
/// `insert` calls in pre-order. Calls arrive strictly in patch order and are
/// never interleaved with another commit to the same target.
pub trait TargetMutator {
    type Handle: Clone;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create `node` at `index` among `parent`'s children; `None` makes it
    /// the root.
    fn insert(
        &mut self,
        parent: Option<&Self::Handle>,
        index: usize,
        node: &Node,
    ) -> Result<Self::Handle, Self::Error>;

    /// Detach `node` (the child at `index` of `parent`) and drop its subtree.
    fn remove(
        &mut self,
        parent: Option<&Self::Handle>,
        index: usize,
        node: &Self::Handle,
    ) -> Result<(), Self::Error>;

    /// `None` values remove the attribute.
    fn update_attributes(
        &mut self,
        node: &Self::Handle,
        diff: &[(Arc<str>, Option<AttrValue>)],
    ) -> Result<(), Self::Error>;

    /// Drop `old` with its subtree and create `node` in the same slot.
    fn replace(
        &mut self,
        parent: Option<&Self::Handle>,
        index: usize,
        old: &Self::Handle,
        node: &Node,
    ) -> Result<Self::Handle, Self::Error>;

    /// Move the child at `from` so it ends up at `to`; `to` counts positions
    /// after the child has been taken out.
    fn move_child(&mut self, parent: &Self::Handle, from: usize, to: usize)
    -> Result<(), Self::Error>;

    /// Drop everything; the next commit starts from an empty target.
    fn clear(&mut self) -> Result<(), Self::Error>;
}
