//! Render-to-commit driver tying the differ, the scheduler and the committer
//! together for any number of targets.

mod engine;

pub use crate::engine::{Engine, EngineError, EngineStats};
