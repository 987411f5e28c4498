//! PHOLD synthetic workload and its threaded harness.

mod node;
mod runner;

pub use node::{NodeCounters, PholdMessage, WorkloadNode};
pub use runner::{node_name, run_phold, SimulationError, SimulationReport};
