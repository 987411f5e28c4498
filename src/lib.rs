pub mod config;
pub mod kernel;
pub mod partition;
pub mod rng;
pub mod transport;
pub mod wire;
pub mod workload;

pub use config::{ConfigError, SimulationConfig};
pub use kernel::{Entity, EntityRef, Event, KernelError, PartitionId, Scheduler, SimTime, Timeline};
pub use partition::{Partition, PartitionError, PartitionStats};
pub use workload::{run_phold, SimulationReport};
