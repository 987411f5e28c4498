use super::{PartitionId, SimTime};

/// Protocol violations. All of these are fatal to the run that hits them:
/// they point at a workload or synchronization bug, not a runtime hiccup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// An event was scheduled before the current clock.
    CausalityViolation { event_time: SimTime, now: SimTime },
    /// The agreed global minimum fell behind this partition's clock.
    GlobalMinBehindClock { global_min: SimTime, now: SimTime },
    /// The target is neither registered locally nor routed to a peer.
    UnknownEntity(String),
    /// The name is already registered locally or routed to a peer.
    DuplicateEntity(String),
    /// A peer delivered an event for an entity owned by a third partition.
    MisroutedEvent { target: String, owner: PartitionId },
    /// A cross-partition event was stamped inside the current lookahead window.
    LookaheadViolation {
        event_time: SimTime,
        now: SimTime,
        lookahead: u64,
    },
    /// Lookahead must be at least one tick.
    InvalidLookahead,
    /// Partition id out of range for the declared partition count.
    InvalidPartition { id: PartitionId, count: usize },
}

impl std::fmt::Display for KernelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelError::CausalityViolation { event_time, now } => write!(
                f,
                "Causality violation: event at {} scheduled at time {}",
                event_time, now
            ),
            KernelError::GlobalMinBehindClock { global_min, now } => write!(
                f,
                "Global minimum {} is behind local clock {}",
                global_min, now
            ),
            KernelError::UnknownEntity(name) => write!(f, "Unknown entity: {}", name),
            KernelError::DuplicateEntity(name) => write!(f, "Entity already registered: {}", name),
            KernelError::MisroutedEvent { target, owner } => write!(
                f,
                "Received event for {} which is owned by partition {}",
                target, owner.0
            ),
            KernelError::LookaheadViolation {
                event_time,
                now,
                lookahead,
            } => write!(
                f,
                "Lookahead violation: remote event at {} from time {} (lookahead {})",
                event_time, now, lookahead
            ),
            KernelError::InvalidLookahead => write!(f, "Lookahead must be at least 1"),
            KernelError::InvalidPartition { id, count } => {
                write!(f, "Partition {} out of range for {} partitions", id.0, count)
            }
        }
    }
}

impl std::error::Error for KernelError {}
