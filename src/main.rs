use commit::MemoryTarget;
use core_types::{Priority, TargetId};
use engine::Engine;
use mimalloc::MiMalloc;
use scheduler::{DEFAULT_MAX_STEPS_PER_SLICE, SchedulerConfig, SliceClock, SliceOutcome};
use std::time::Duration;
use vdom::Node;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const DEFAULT_SLICE_US: u64 = 4_000;
const LIST: TargetId = 1;
const STATUS: TargetId = 2;
const FRAMES: usize = 12;
const ROWS: usize = 2_000;

struct DemoConfig {
    slice: Duration,
    max_steps: usize,
}

impl DemoConfig {
    fn from_env() -> Self {
        Self {
            slice: Duration::from_micros(env_or("RECONCILE_SLICE_US", DEFAULT_SLICE_US)),
            max_steps: env_or("RECONCILE_MAX_STEPS", DEFAULT_MAX_STEPS_PER_SLICE),
        }
    }
}

fn env_or<T: std::str::FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("ignoring {name}={raw:?}, using {default}");
            default
        }),
        Err(_) => default,
    }
}

/// Keyed rows rotated by `frame`, with every seventh row highlighted.
fn list_frame(frame: usize) -> Node {
    let rows = (0..ROWS).map(|i| {
        let id = (i + frame * 3) % ROWS;
        let mut row = Node::element("li")
            .with_key(format!("row-{id}"))
            .with_child(Node::text(format!("row {id}")));
        if (id + frame) % 7 == 0 {
            row = row.with_attr("class", "hot");
        }
        row
    });
    Node::element("ul").with_attr("id", "rows").with_children(rows)
}

fn status_frame(frame: usize) -> Node {
    Node::element("footer")
        .with_attr("frame", frame as i64)
        .with_child(Node::text(format!("frame {frame} of {FRAMES}")))
}

fn main() {
    env_logger::Builder::from_default_env()
        .format_timestamp_millis()
        .init();

    let config = DemoConfig::from_env();
    log::info!(
        "slice {:?}, at most {} steps per slice",
        config.slice,
        config.max_steps
    );

    let mut engine = Engine::new(SchedulerConfig {
        max_steps_per_slice: config.max_steps,
        ..SchedulerConfig::default()
    });
    for id in [LIST, STATUS] {
        if let Err(err) = engine.register_target(id, MemoryTarget::new()) {
            log::error!("{err}");
            std::process::exit(1);
        }
    }

    let mut slices = 0usize;
    let mut expired = 0usize;
    for frame in 0..FRAMES {
        let renders = engine
            .render(LIST, list_frame(frame), Priority::Background)
            .and_then(|_| engine.render(STATUS, status_frame(frame), Priority::Immediate));
        if let Err(err) = renders {
            log::error!("frame {frame}: {err}");
            std::process::exit(1);
        }
        loop {
            let report = match engine.run_slice(&mut SliceClock::new(config.slice)) {
                Ok(report) => report,
                Err(err) => {
                    log::error!("frame {frame}: {err}");
                    std::process::exit(1);
                }
            };
            slices += 1;
            if report.outcome != SliceOutcome::Idle {
                expired += 1;
                continue;
            }
            break;
        }
        log::debug!(
            "frame {frame} committed: list v{}, status v{}",
            engine.version(LIST).0,
            engine.version(STATUS).0
        );
    }

    let stats = engine.stats();
    let consistent = engine.target(LIST).and_then(MemoryTarget::materialize)
        == Some(list_frame(FRAMES - 1));
    println!(
        "{FRAMES} frames in {slices} slices ({expired} yielded): {} units, {} commits, {} patches, {} target calls, {} preemptions, target matches last frame: {consistent}",
        stats.scheduler.steps,
        stats.commit.commits,
        stats.commit.patches,
        stats.commit.target_calls,
        stats.scheduler.preemptions,
    );
}
