mod error;
mod partition;
mod router;
mod stats;

pub use error::PartitionError;
pub use partition::{ExchangePolicy, Partition, RoundOutcome};
pub use router::Router;
pub use stats::PartitionStats;
