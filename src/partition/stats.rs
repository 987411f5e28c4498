use crate::kernel::{PartitionId, SimTime};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Read-only snapshot of a partition's counters. Monitoring only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionStats {
    pub id: PartitionId,
    pub current_time: u64,
    /// Earliest event still in the local queue; `u64::MAX` when empty.
    pub top_time: u64,
    /// Last agreed global minimum; `u64::MAX` means nothing pending anywhere.
    pub global_min: u64,
    /// Windows executed
    pub sync_rounds: u64,
    /// Exchanges performed, including the final one that detected termination
    pub exchange_rounds: u64,
    pub events_executed: u64,
    pub events_scheduled: u64,
    pub events_sent: u64,
    pub events_exchanged: u64,
    pub queue_depth: usize,
    pub buffered_events: usize,
    pub computing_time: Duration,
    pub communication_time: Duration,
}

impl std::fmt::Display for PartitionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "partition={} now={} next={} rounds={} executed={} sent={} exchanged={} queued={} compute={:.3}s comm={:.3}s",
            self.id.0,
            self.current_time,
            SimTime(self.top_time),
            self.sync_rounds,
            self.events_executed,
            self.events_sent,
            self.events_exchanged,
            self.queue_depth,
            self.computing_time.as_secs_f64(),
            self.communication_time.as_secs_f64(),
        )
    }
}
