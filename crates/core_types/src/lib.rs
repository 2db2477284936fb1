pub type TargetId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

/// Urgency of a render request. Ordering follows urgency: `Immediate` is the greatest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    Background,
    UserInteraction,
    Immediate,
}

impl Priority {
    pub const ALL: [Priority; 3] = [
        Priority::Background,
        Priority::UserInteraction,
        Priority::Immediate,
    ];
}

/// Monotonic counter of commits applied to one target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderVersion(pub u64);

impl RenderVersion {
    pub const INITIAL: RenderVersion = RenderVersion(0);

    pub fn next(self) -> Self {
        RenderVersion(self.0.wrapping_add(1))
    }
}
