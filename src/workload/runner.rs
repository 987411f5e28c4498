//! Threaded PHOLD harness.
//!
//! Builds one partition per configured thread, assigns nodes to partitions
//! in contiguous blocks, runs every partition to convergence and aggregates
//! the per-partition counters into a [`SimulationReport`].

use super::node::{NodeCounters, PholdMessage, WorkloadNode};
use crate::config::{ConfigError, SimulationConfig, TransportKind};
use crate::kernel::{KernelError, PartitionId, SimTime};
use crate::partition::{ExchangePolicy, Partition, PartitionError, PartitionStats};
use crate::rng::DeterministicRng;
use crate::transport::{
    CancellationToken, Channel, FlakyChannel, MailboxNetwork, MemoryNetwork,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

type PholdPartition = Partition<PholdMessage, Box<dyn Channel>>;

/// Seed offset for fault-injection streams, so they never coincide with a
/// node stream.
const FAULT_STREAM_OFFSET: u64 = 1 << 32;

#[derive(Debug)]
pub enum SimulationError {
    Config(ConfigError),
    /// Building the partitions failed before any thread started.
    Setup(KernelError),
    Spawn(std::io::Error),
    Partition {
        id: PartitionId,
        source: PartitionError,
    },
    Panicked(PartitionId),
}

impl std::fmt::Display for SimulationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimulationError::Config(e) => write!(f, "{}", e),
            SimulationError::Setup(e) => write!(f, "setup failed: {}", e),
            SimulationError::Spawn(e) => write!(f, "failed to spawn partition thread: {}", e),
            SimulationError::Partition { id, source } => {
                write!(f, "partition {} failed: {}", id.0, source)
            }
            SimulationError::Panicked(id) => write!(f, "partition {} panicked", id.0),
        }
    }
}

impl std::error::Error for SimulationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimulationError::Config(e) => Some(e),
            SimulationError::Setup(e) => Some(e),
            SimulationError::Spawn(e) => Some(e),
            SimulationError::Partition { source, .. } => Some(source),
            SimulationError::Panicked(_) => None,
        }
    }
}

impl From<ConfigError> for SimulationError {
    fn from(e: ConfigError) -> Self {
        SimulationError::Config(e)
    }
}

impl From<KernelError> for SimulationError {
    fn from(e: KernelError) -> Self {
        SimulationError::Setup(e)
    }
}

/// Aggregated result of a threaded run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub config: SimulationConfig,
    pub partitions: Vec<PartitionStats>,
    /// Σ events generated by all nodes, including `init`
    pub generated: u64,
    /// Σ events received by all nodes
    pub received: u64,
    pub wall_time: Duration,
}

impl SimulationReport {
    pub fn init_work(&self) -> u64 {
        self.config.workload.init_work
    }

    pub fn events_executed(&self) -> u64 {
        self.partitions.iter().map(|p| p.events_executed).sum()
    }

    pub fn events_exchanged(&self) -> u64 {
        self.partitions.iter().map(|p| p.events_exchanged).sum()
    }

    pub fn queue_depth(&self) -> usize {
        self.partitions.iter().map(|p| p.queue_depth).sum()
    }

    pub fn events_per_second(&self) -> f64 {
        let secs = self.wall_time.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.events_executed() as f64 / secs
    }

    /// Cross-partition checks that only hold once every partition halted.
    pub fn check_invariants(&self) -> Result<(), String> {
        let first = match self.partitions.first() {
            Some(p) => p.global_min,
            None => return Err("report has no partitions".to_string()),
        };
        if let Some(p) = self.partitions.iter().find(|p| p.global_min != first) {
            return Err(format!(
                "partition {} halted at global_min {} but partition 0 at {}",
                p.id.0, p.global_min, first
            ));
        }
        if first < self.config.stop_time {
            return Err(format!(
                "halted at global_min {} before stop_time {}",
                first, self.config.stop_time
            ));
        }
        if let Some(p) = self.partitions.iter().find(|p| p.top_time < first) {
            return Err(format!(
                "partition {} still holds an event at {} below global_min {}",
                p.id.0, p.top_time, first
            ));
        }
        if let Some(p) = self.partitions.iter().find(|p| p.buffered_events != 0) {
            return Err(format!(
                "partition {} halted with {} undelivered events",
                p.id.0, p.buffered_events
            ));
        }
        if self.queue_depth() as u64 != self.init_work() {
            return Err(format!(
                "in-flight events not conserved: queued {} != init_work {}",
                self.queue_depth(),
                self.init_work()
            ));
        }
        if self.events_executed() != self.received {
            return Err(format!(
                "executed {} != received {}",
                self.events_executed(),
                self.received
            ));
        }
        if self.generated.checked_sub(self.received) != Some(self.init_work()) {
            return Err(format!(
                "generated {} - received {} != init_work {}",
                self.generated,
                self.received,
                self.init_work()
            ));
        }
        Ok(())
    }
}

impl std::fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{:>4} {:>10} {:>10} {:>8} {:>12} {:>10} {:>8} {:>10} {:>10}",
            "id", "now", "next", "rounds", "executed", "exchanged", "queued", "compute", "comm"
        )?;
        for p in &self.partitions {
            writeln!(
                f,
                "{:>4} {:>10} {:>10} {:>8} {:>12} {:>10} {:>8} {:>9.3}s {:>9.3}s",
                p.id.0,
                p.current_time,
                SimTime(p.top_time).to_string(),
                p.sync_rounds,
                p.events_executed,
                p.events_exchanged,
                p.queue_depth,
                p.computing_time.as_secs_f64(),
                p.communication_time.as_secs_f64(),
            )?;
        }
        write!(
            f,
            "total: executed={} exchanged={} wall={:.3}s rate={:.0} events/s",
            self.events_executed(),
            self.events_exchanged(),
            self.wall_time.as_secs_f64(),
            self.events_per_second(),
        )
    }
}

pub fn node_name(index: usize) -> String {
    format!("node-{}", index)
}

/// Initial events for node `index`; the remainder goes to the lowest indices.
fn node_init_work(config: &SimulationConfig, index: usize) -> u64 {
    let nodes = config.workload.total_nodes as u64;
    let base = config.workload.init_work / nodes;
    let extra = u64::from((index as u64) < config.workload.init_work % nodes);
    base + extra
}

fn build_channels(config: &SimulationConfig) -> Vec<Box<dyn Channel>> {
    let n = config.partitions;
    let exchange = &config.exchange;
    match exchange.transport {
        TransportKind::Memory => MemoryNetwork::mesh(n, exchange.poll_interval())
            .into_iter()
            .map(|c| Box::new(c) as Box<dyn Channel>)
            .collect(),
        TransportKind::Mailbox => MailboxNetwork::new()
            .endpoints(n)
            .into_iter()
            .map(|c| Box::new(c) as Box<dyn Channel>)
            .collect(),
        TransportKind::Flaky => MailboxNetwork::new()
            .endpoints(n)
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                let seed = config.seed.wrapping_add(FAULT_STREAM_OFFSET + i as u64);
                Box::new(FlakyChannel::new(c, seed, exchange.fault_rate)) as Box<dyn Channel>
            })
            .collect(),
    }
}

/// Build and initialize every partition. Nothing runs yet.
fn build_partitions(
    config: &SimulationConfig,
    cancel: &CancellationToken,
) -> Result<(Vec<PholdPartition>, Vec<Arc<NodeCounters>>), SimulationError> {
    let n = config.partitions;
    let policy = ExchangePolicy {
        max_retries: config.exchange.max_retries,
        retry_backoff: config.exchange.retry_backoff(),
    };

    let mut partitions = Vec::with_capacity(n);
    for (i, channel) in build_channels(config).into_iter().enumerate() {
        let partition = Partition::new(
            PartitionId(i),
            n,
            config.lookahead,
            SimTime::from_ticks(config.stop_time),
            channel,
        )?
        .with_cancellation(cancel.clone())
        .with_exchange_policy(policy);
        partitions.push(partition);
    }

    let names: Vec<String> = (0..config.workload.total_nodes).map(node_name).collect();
    let mut counters = Vec::with_capacity(names.len());
    for (index, name) in names.iter().enumerate() {
        let owner = config.partition_of(index);
        let node = WorkloadNode::new(
            name.clone(),
            node_init_work(config, index),
            config.lookahead,
            names.clone(),
            DeterministicRng::derive(config.seed, index as u64),
        );
        counters.push(node.counters());
        partitions[owner].add_entity(Box::new(node))?;
        for (other, partition) in partitions.iter_mut().enumerate() {
            if other != owner {
                partition.add_foreign_entity(name.clone(), PartitionId(owner))?;
            }
        }
    }

    for partition in partitions.iter_mut() {
        partition.init()?;
    }
    Ok((partitions, counters))
}

/// Run every partition on its own named thread and collect their stats in
/// partition order.
///
/// The first partition that fails for a reason other than cancellation
/// cancels `cancel`, so peers blocked in an exchange unwind. That failure
/// is reported in preference to the `Cancelled` results it causes.
fn run_partitions(
    partitions: Vec<PholdPartition>,
    cancel: &CancellationToken,
) -> Result<Vec<PartitionStats>, SimulationError> {
    let mut handles = Vec::with_capacity(partitions.len());
    let mut spawn_error = None;
    for mut partition in partitions {
        let id = partition.id();
        let worker_cancel = cancel.clone();
        let spawned = thread::Builder::new()
            .name(format!("partition-{}", id.0))
            .spawn(move || {
                let result = partition.run();
                if let Err(e) = &result {
                    if !e.is_cancelled() {
                        error!(partition = id.0, error = %e, "partition failed");
                        worker_cancel.cancel();
                    }
                }
                result
            });
        match spawned {
            Ok(handle) => handles.push((id, handle)),
            Err(e) => {
                error!(partition = id.0, error = %e, "failed to spawn partition thread");
                cancel.cancel();
                spawn_error = Some(SimulationError::Spawn(e));
                break;
            }
        }
    }

    let mut stats = Vec::with_capacity(handles.len());
    let mut first_error = spawn_error;
    let mut cancelled = None;
    for (id, handle) in handles {
        match handle.join() {
            Ok(Ok(s)) => stats.push(s),
            Ok(Err(e)) if e.is_cancelled() => {
                cancelled.get_or_insert(SimulationError::Partition { id, source: e });
            }
            Ok(Err(e)) => {
                first_error.get_or_insert(SimulationError::Partition { id, source: e });
            }
            Err(_) => {
                cancel.cancel();
                first_error.get_or_insert(SimulationError::Panicked(id));
            }
        }
    }
    match first_error.or(cancelled) {
        Some(e) => Err(e),
        None => Ok(stats),
    }
}

/// Run the PHOLD benchmark described by `config` with one OS thread per
/// partition.
///
/// If any partition fails, the shared token is cancelled so blocked peers
/// unwind, and the first non-cancellation error is returned.
pub fn run_phold(config: &SimulationConfig) -> Result<SimulationReport, SimulationError> {
    config.validate()?;
    let cancel = CancellationToken::new();
    let (partitions, counters) = build_partitions(config, &cancel)?;

    info!(
        partitions = config.partitions,
        nodes = config.workload.total_nodes,
        init_work = config.workload.init_work,
        lookahead = config.lookahead,
        stop_time = config.stop_time,
        transport = ?config.exchange.transport,
        "starting PHOLD run"
    );

    let start = Instant::now();
    let stats = run_partitions(partitions, &cancel)?;
    let wall_time = start.elapsed();

    let report = SimulationReport {
        config: config.clone(),
        partitions: stats,
        generated: counters.iter().map(|c| c.generated()).sum(),
        received: counters.iter().map(|c| c.received()).sum(),
        wall_time,
    };
    info!(
        executed = report.events_executed(),
        exchanged = report.events_exchanged(),
        wall_ms = wall_time.as_millis() as u64,
        "PHOLD run complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_work_split_evenly() {
        let mut config = SimulationConfig::test();
        config.workload.total_nodes = 4;
        config.workload.init_work = 10;
        let split: Vec<u64> = (0..4).map(|i| node_init_work(&config, i)).collect();
        assert_eq!(split, vec![3, 3, 2, 2]);
    }

    #[test]
    fn test_nodes_registered_everywhere() {
        let mut config = SimulationConfig::test();
        config.partitions = 3;
        config.workload.total_nodes = 7;
        let (partitions, counters) = build_partitions(&config, &CancellationToken::new()).unwrap();

        assert_eq!(counters.len(), 7);
        let local: Vec<usize> = partitions.iter().map(|p| p.entities().len()).collect();
        assert_eq!(local, vec![3, 3, 1]);
        for p in &partitions {
            assert_eq!(p.stop_time(), SimTime::from_ticks(config.stop_time));
            for i in 0..7 {
                let r = p.resolve(&node_name(i)).unwrap();
                assert_eq!(r.is_local(), config.partition_of(i) == p.id().0);
            }
        }
        // init already ran: every initial event is either queued or buffered
        let pending: usize = partitions
            .iter()
            .map(|p| p.queue_depth() + p.buffered_events())
            .sum();
        assert_eq!(pending as u64, config.workload.init_work);
    }

    #[test]
    fn test_small_run_satisfies_invariants() {
        let report = run_phold(&SimulationConfig::test()).unwrap();
        report.check_invariants().unwrap();
        assert_eq!(report.partitions.len(), 2);
        assert!(report.events_executed() > 0);
        assert!(report.to_string().contains("total: executed="));
        assert!(report.to_string().contains("next"));
        for p in &report.partitions {
            assert!(p.top_time >= report.config.stop_time);
        }
    }

    #[test]
    fn test_invariant_check_catches_disagreement() {
        let mut report = run_phold(&SimulationConfig::test()).unwrap();
        report.partitions[1].global_min += 1;
        assert!(report.check_invariants().is_err());

        let mut report = run_phold(&SimulationConfig::test()).unwrap();
        report.received += 1;
        assert!(report.check_invariants().is_err());

        let mut report = run_phold(&SimulationConfig::test()).unwrap();
        report.partitions[0].top_time = 3;
        let violation = report.check_invariants().unwrap_err();
        assert!(violation.contains("still holds an event at 3"), "{}", violation);
    }

    #[test]
    fn test_timeout_reported_as_partition_error() {
        let mut config = SimulationConfig::test();
        config.exchange.transport = TransportKind::Flaky;
        config.exchange.fault_rate = 0.9;
        config.exchange.max_retries = Some(0);
        match run_phold(&config) {
            Err(SimulationError::Partition { source, .. }) => {
                assert!(matches!(source, PartitionError::ExchangeTimeout { .. }));
            }
            other => panic!("expected exchange timeout, got {:?}", other.map(|r| r.events_executed())),
        }
    }

    #[test]
    fn test_failing_partition_cancels_the_rest() {
        let mut config = SimulationConfig::test();
        config.partitions = 3;
        config.workload.total_nodes = 6;
        config.exchange.transport = TransportKind::Mailbox;
        config.exchange.max_retries = None;
        let cancel = CancellationToken::new();
        let (mut partitions, _) = build_partitions(&config, &cancel).unwrap();

        // Partition 2 never starts. Partition 1 gives up on it quickly and
        // partition 0 would wait forever unless the failure cancels it.
        partitions.truncate(2);
        let impatient = partitions.pop().unwrap().with_exchange_policy(ExchangePolicy {
            max_retries: Some(3),
            retry_backoff: Duration::ZERO,
        });
        partitions.push(impatient);

        match run_partitions(partitions, &cancel) {
            Err(SimulationError::Partition { id, source }) => {
                assert_eq!(id, PartitionId(1));
                assert!(matches!(source, PartitionError::ExchangeTimeout { .. }));
            }
            other => panic!("expected partition 1 to time out, got {:?}", other.map(|s| s.len())),
        }
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_cancelled_before_start_reports_cancelled() {
        let config = SimulationConfig::test();
        let cancel = CancellationToken::new();
        let (partitions, _) = build_partitions(&config, &cancel).unwrap();
        cancel.cancel();

        match run_partitions(partitions, &cancel) {
            Err(SimulationError::Partition { id, source }) => {
                assert_eq!(id, PartitionId(0));
                assert!(source.is_cancelled());
            }
            other => panic!("expected cancellation, got {:?}", other.map(|s| s.len())),
        }
    }
}
