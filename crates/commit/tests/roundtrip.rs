use commit::{Committer, MemoryTarget, TargetMutator};
use core_types::RenderVersion;
use proptest::prelude::*;
use std::sync::Arc;
use vdom::{
    AttrValue, DiffConfig, DiffOutput, KeyAllocator, MountedNode, MoveHeuristic, Node, diff,
    diff_from_empty,
};
use vdom_test_support::corpus::{fixtures_root, load_diff_corpus};
use vdom_test_support::strategies::{keyed_edit, keyed_list, tree};
use vdom_test_support::{assert_same_tree, init_test_logging};

/// Mutator that only records which operations were requested.
#[derive(Default)]
struct Recorder {
    next: u32,
    ops: Vec<&'static str>,
}

impl TargetMutator for Recorder {
    type Handle = u32;
    type Error = std::convert::Infallible;

    fn insert(&mut self, _: Option<&u32>, _: usize, _: &Node) -> Result<u32, Self::Error> {
        self.ops.push("insert");
        self.next += 1;
        Ok(self.next)
    }

    fn remove(&mut self, _: Option<&u32>, _: usize, _: &u32) -> Result<(), Self::Error> {
        self.ops.push("remove");
        Ok(())
    }

    fn update_attributes(
        &mut self,
        _: &u32,
        _: &[(Arc<str>, Option<AttrValue>)],
    ) -> Result<(), Self::Error> {
        self.ops.push("update");
        Ok(())
    }

    fn replace(&mut self, _: Option<&u32>, _: usize, _: &u32, _: &Node) -> Result<u32, Self::Error> {
        self.ops.push("replace");
        self.next += 1;
        Ok(self.next)
    }

    fn move_child(&mut self, _: &u32, _: usize, _: usize) -> Result<(), Self::Error> {
        self.ops.push("move");
        Ok(())
    }

    fn clear(&mut self) -> Result<(), Self::Error> {
        self.ops.clear();
        Ok(())
    }
}

struct Session<M: TargetMutator> {
    committer: Committer<M>,
    tree: Option<Arc<MountedNode>>,
    keys: KeyAllocator,
}

impl<M: TargetMutator> Session<M> {
    fn new(target: M) -> Self {
        Self {
            committer: Committer::new(target),
            tree: None,
            keys: KeyAllocator::new(),
        }
    }

    fn render(&mut self, next: &Arc<Node>, config: &DiffConfig) -> DiffOutput {
        let out = diff(self.tree.as_ref(), next, &mut self.keys, config).expect("diff");
        let from = self.committer.version();
        self.committer
            .commit(from, from.next(), &out.patches)
            .unwrap_or_else(|err| panic!("commit failed: {err}\npatches: {:#?}", out.patches));
        self.tree = Some(Arc::clone(&out.tree));
        out
    }
}

#[test]
fn div_swap_issues_exactly_two_moves() {
    let t0 = Arc::new(
        Node::element("div")
            .with_child(Node::element("p").with_key("a").with_child(Node::text("X")))
            .with_child(Node::element("p").with_key("b").with_child(Node::text("Y"))),
    );
    let t1 = Arc::new(
        Node::element("div")
            .with_child(Node::element("p").with_key("b").with_child(Node::text("Y")))
            .with_child(Node::element("p").with_key("a").with_child(Node::text("X"))),
    );
    let mut session = Session::new(Recorder::default());
    session.render(&t0, &DiffConfig::default());
    assert_eq!(session.committer.target().ops.len(), 5);

    session.committer.target_mut().ops.clear();
    session.render(&t1, &DiffConfig::default());
    assert_eq!(session.committer.target().ops, vec!["move", "move"]);
}

#[test]
fn corpus_round_trips_through_memory_target() {
    init_test_logging();
    for case in load_diff_corpus(&fixtures_root()) {
        let config = DiffConfig {
            moves: case.moves,
            ..DiffConfig::default()
        };
        let mut session = Session::new(MemoryTarget::new());
        if let Some(before) = &case.before {
            session.render(&Arc::new(before.clone()), &config);
            let mounted = session.committer.target().materialize().expect("mounted");
            assert_same_tree(before, &mounted, &case.id);
        }
        session.render(&Arc::new(case.after.clone()), &config);
        let actual = session.committer.target().materialize().expect("mounted");
        assert_same_tree(&case.after, &actual, &case.id);
        assert_eq!(
            session.committer.live_nodes(),
            case.after.subtree_len(),
            "[{}] shadow leaked nodes",
            case.id
        );
    }
}

#[test]
fn mount_then_remount_after_reset() {
    let tree = Arc::new(Node::element("main").with_child(Node::text("hi")));
    let out = diff_from_empty(&tree).expect("mount");
    let mut committer = Committer::new(MemoryTarget::new());
    committer
        .commit(RenderVersion::INITIAL, RenderVersion(1), &out.patches)
        .expect("commit");
    committer.reset().expect("reset");
    committer
        .commit(RenderVersion::INITIAL, RenderVersion(1), &out.patches)
        .expect("remount");
    assert_eq!(committer.target().materialize().as_ref(), Some(&*tree));
}

proptest! {
    #[test]
    fn prop_patches_reproduce_next_tree(
        trees in prop::collection::vec(tree(), 2..5),
        watermark in any::<bool>(),
    ) {
        let config = DiffConfig {
            moves: if watermark { MoveHeuristic::Watermark } else { MoveHeuristic::Displaced },
            ..DiffConfig::default()
        };
        let mut session = Session::new(MemoryTarget::new());
        for next in trees {
            let next = Arc::new(next);
            session.render(&next, &config);
            let actual = session.committer.target().materialize();
            prop_assert_eq!(actual.as_ref(), Some(&*next));
            prop_assert_eq!(session.committer.live_nodes(), next.subtree_len());
        }
    }

    #[test]
    fn prop_keyed_edits_round_trip((before, after) in keyed_edit()) {
        let mut session = Session::new(MemoryTarget::new());
        session.render(&Arc::new(keyed_list(&before)), &DiffConfig::default());
        let next = Arc::new(keyed_list(&after));
        session.render(&next, &DiffConfig::default());
        let got = session.committer.target().materialize();
        prop_assert_eq!(got.as_ref(), Some(&*next));
    }
}
