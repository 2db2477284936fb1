#![no_main]

mod common;

use commit::MemoryTarget;
use core_types::Priority;
use engine::Engine;
use libfuzzer_sys::fuzz_target;
use scheduler::{SliceOutcome, StepBudget};
use std::collections::HashMap;
use vdom::Node;

const TARGETS: u64 = 3;
const MAX_OPS: usize = 32;

// Interleaves renders, cancels and small slices across a few targets; once
// drained, every target must hold its last rendered tree.
fuzz_target!(|data: &[u8]| {
    let mut bytes = common::Bytes::new(data);
    let mut engine = Engine::default();
    for id in 0..TARGETS {
        if engine.register_target(id, MemoryTarget::new()).is_err() {
            return;
        }
    }

    let mut latest: HashMap<u64, Node> = HashMap::new();
    let mut pending = Vec::new();
    for _ in 0..MAX_OPS {
        if bytes.exhausted() {
            break;
        }
        let op = bytes.next();
        let target = u64::from(op >> 4) % TARGETS;
        match op % 4 {
            0 | 1 => {
                let tree = common::tree(&mut bytes);
                let priority = Priority::ALL[usize::from(op >> 2) % Priority::ALL.len()];
                if let Ok(handle) = engine.render(target, tree.clone(), priority) {
                    pending.push((handle, tree));
                }
            }
            2 => {
                if let Some(index) = pending.iter().rposition(|(h, _)| h.target == target) {
                    let (handle, _) = pending.remove(index);
                    engine.cancel(handle);
                }
            }
            _ => {
                let steps = usize::from(bytes.next() % 8) + 1;
                let report = engine
                    .run_slice(&mut StepBudget::new(steps))
                    .unwrap_or_else(|err| panic!("slice failed: {err}"));
                for handle in report.completed {
                    if let Some(index) = pending.iter().position(|(h, _)| *h == handle) {
                        let (_, tree) = pending.remove(index);
                        latest.insert(handle.target, tree);
                    }
                }
                if report.outcome == SliceOutcome::Idle {
                    pending.clear();
                }
            }
        }
    }

    loop {
        let report = engine
            .run_slice(&mut StepBudget::new(4))
            .unwrap_or_else(|err| panic!("slice failed: {err}"));
        for handle in report.completed {
            if let Some(index) = pending.iter().position(|(h, _)| *h == handle) {
                let (_, tree) = pending.remove(index);
                latest.insert(handle.target, tree);
            }
        }
        if report.outcome == SliceOutcome::Idle {
            break;
        }
    }

    for id in 0..TARGETS {
        let committed = engine.target(id).and_then(MemoryTarget::materialize);
        assert_eq!(committed.as_ref(), latest.get(&id), "target {id}");
    }
});
