#![no_main]

mod common;

use commit::{Committer, MemoryTarget};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use vdom::{DiffConfig, DuplicateKeyPolicy, KeyAllocator, MountedNode, MoveHeuristic, diff};

const MAX_RENDERS: usize = 4;

fuzz_target!(|data: &[u8]| {
    let mut bytes = common::Bytes::new(data);
    let flags = bytes.next();
    let config = DiffConfig {
        moves: if flags & 1 == 0 {
            MoveHeuristic::Displaced
        } else {
            MoveHeuristic::Watermark
        },
        duplicate_keys: DuplicateKeyPolicy::Positional,
    };

    let mut committer = Committer::new(MemoryTarget::new());
    let mut keys = KeyAllocator::new();
    let mut previous: Option<Arc<MountedNode>> = None;
    for _ in 0..MAX_RENDERS {
        if bytes.exhausted() {
            break;
        }
        let next = Arc::new(common::tree(&mut bytes));
        let out = match diff(previous.as_ref(), &next, &mut keys, &config) {
            Ok(out) => out,
            Err(err) => panic!("diff rejected a well-formed tree: {err}"),
        };
        let from = committer.version();
        if let Err(err) = committer.commit(from, from.next(), &out.patches) {
            panic!("commit failed: {err}\n{:#?}", out.patches);
        }
        assert_eq!(committer.target().materialize().as_ref(), Some(&*next));
        assert_eq!(committer.live_nodes(), next.subtree_len());
        previous = Some(out.tree);
    }
});
