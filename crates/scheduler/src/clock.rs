//! Host time sources consulted between work units.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Polled by the scheduler after every unit step.
///
/// A slice ends once `time_remaining` returns zero or `interrupted` returns
/// true. The scheduler always performs at least one step per slice when work
/// is ready, so a clock that is already exhausted still makes progress.
pub trait HostClock {
    fn time_remaining(&mut self) -> Duration;

    /// The host wants control back now (input pending, frame due, ...).
    fn interrupted(&self) -> bool {
        false
    }
}

/// Wall-clock slice with an optional shared interrupt flag.
#[derive(Clone, Debug)]
pub struct SliceClock {
    deadline: Instant,
    interrupt: Arc<AtomicBool>,
}

impl SliceClock {
    pub fn new(budget: Duration) -> Self {
        Self::with_interrupt(budget, Arc::new(AtomicBool::new(false)))
    }

    pub fn with_interrupt(budget: Duration, interrupt: Arc<AtomicBool>) -> Self {
        let now = Instant::now();
        let deadline = now.checked_add(budget).unwrap_or(now);
        Self {
            deadline,
            interrupt,
        }
    }

    /// Flag another thread can set to end the slice early.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }
}

impl HostClock for SliceClock {
    fn time_remaining(&mut self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }
}

/// Deterministic clock: every poll consumes one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepBudget {
    remaining: usize,
}

impl StepBudget {
    pub fn new(steps: usize) -> Self {
        Self { remaining: steps }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl HostClock for StepBudget {
    fn time_remaining(&mut self) -> Duration {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            Duration::ZERO
        } else {
            Duration::MAX
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Unbounded;

impl HostClock for Unbounded {
    fn time_remaining(&mut self) -> Duration {
        Duration::MAX
    }
}
