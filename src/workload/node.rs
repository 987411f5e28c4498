//! PHOLD workload node.
//!
//! Every received unit of work is replaced by exactly one new unit sent to a
//! random neighbour, so the number of in-flight events stays at the sum of
//! the nodes' `init_work` for the whole run.

use crate::kernel::{Entity, EntityRef, KernelError, Scheduler, SimTime};
use crate::rng::DeterministicRng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The only action a workload node exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PholdMessage {
    Receive,
}

/// Counters a harness can read after the node has moved into a partition.
#[derive(Debug, Default)]
pub struct NodeCounters {
    generated: AtomicU64,
    received: AtomicU64,
}

impl NodeCounters {
    pub fn generated(&self) -> u64 {
        self.generated.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

pub struct WorkloadNode {
    name: String,
    init_work: u64,
    lookahead: u64,
    neighbors: Vec<String>,
    resolved: Vec<EntityRef>,
    rng: DeterministicRng,
    counters: Arc<NodeCounters>,
}

impl WorkloadNode {
    pub fn new(
        name: impl Into<String>,
        init_work: u64,
        lookahead: u64,
        neighbors: Vec<String>,
        rng: DeterministicRng,
    ) -> Self {
        WorkloadNode {
            name: name.into(),
            init_work,
            lookahead,
            neighbors,
            resolved: Vec::new(),
            rng,
            counters: Arc::new(NodeCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<NodeCounters> {
        self.counters.clone()
    }

    pub fn init_work(&self) -> u64 {
        self.init_work
    }

    /// Pick a random neighbour and a delivery time of
    /// `now + lookahead + floor(Exp(mean = lookahead))`.
    pub fn generate_event(&mut self, now: SimTime) -> (&EntityRef, SimTime) {
        debug_assert!(!self.resolved.is_empty(), "Precondition: neighbours resolved");
        let idx = self.rng.gen_range(0, self.resolved.len() as u64) as usize;
        let offset = self.lookahead + self.rng.exp_ticks(self.lookahead as f64);
        (&self.resolved[idx], now + offset)
    }

    fn resolve_neighbors(&mut self, ctx: &dyn Scheduler<PholdMessage>) -> Result<(), KernelError> {
        if !self.resolved.is_empty() {
            return Ok(());
        }
        if self.neighbors.is_empty() {
            return Err(KernelError::UnknownEntity(format!("{} has no neighbours", self.name)));
        }
        self.resolved = self
            .neighbors
            .iter()
            .map(|name| {
                ctx.resolve(name)
                    .ok_or_else(|| KernelError::UnknownEntity(name.clone()))
            })
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    /// Replace one unit of received work with exactly one new event.
    pub fn on_receive(&mut self, ctx: &mut dyn Scheduler<PholdMessage>) -> Result<(), KernelError> {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        self.resolve_neighbors(ctx)?;
        self.emit(ctx)
    }

    fn emit(&mut self, ctx: &mut dyn Scheduler<PholdMessage>) -> Result<(), KernelError> {
        let (target, time) = self.generate_event(ctx.now());
        ctx.schedule_to(target, time, PholdMessage::Receive)?;
        self.counters.generated.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Entity<PholdMessage> for WorkloadNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, ctx: &mut dyn Scheduler<PholdMessage>) -> Result<(), KernelError> {
        self.resolve_neighbors(ctx)?;
        for _ in 0..self.init_work {
            self.emit(ctx)?;
        }
        Ok(())
    }

    fn handle(
        &mut self,
        message: PholdMessage,
        ctx: &mut dyn Scheduler<PholdMessage>,
    ) -> Result<(), KernelError> {
        match message {
            PholdMessage::Receive => self.on_receive(ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Timeline;

    fn node(name: &str, init_work: u64, neighbors: &[&str], seed: u64) -> WorkloadNode {
        WorkloadNode::new(
            name,
            init_work,
            5,
            neighbors.iter().map(|s| s.to_string()).collect(),
            DeterministicRng::new(seed),
        )
    }

    #[test]
    fn test_closed_workload_invariant_single_node() {
        let mut tl = Timeline::new(SimTime(10_000));
        let n = node("n0", 8, &["n0"], 1);
        let counters = n.counters();
        tl.add_entity(Box::new(n)).unwrap();

        tl.init().unwrap();
        assert_eq!(counters.generated(), 8);
        assert_eq!(tl.queue_depth(), 8);

        for horizon in [100u64, 1_000, 5_000, 10_000] {
            tl.run_until(SimTime(horizon)).unwrap();
            assert_eq!(counters.generated() - counters.received(), 8);
            assert_eq!(tl.queue_depth(), 8);
        }
        assert_eq!(counters.received(), tl.events_executed());
        assert!(counters.received() > 100);
    }

    #[test]
    fn test_event_offsets_respect_lookahead() {
        let mut n = node("n0", 0, &["a", "b", "c"], 9);
        n.resolved = vec![
            EntityRef::Local("a".into()),
            EntityRef::Local("b".into()),
            EntityRef::Local("c".into()),
        ];

        let mut targets = std::collections::HashSet::new();
        for _ in 0..500 {
            let (target, time) = n.generate_event(SimTime(100));
            assert!(time >= SimTime(105));
            targets.insert(target.name().to_string());
        }
        assert_eq!(targets.len(), 3);
    }

    #[test]
    fn test_same_seed_same_run() {
        fn run(seed: u64) -> (u64, SimTime) {
            let mut tl = Timeline::new(SimTime(2_000));
            for i in 0..4 {
                let name = format!("n{}", i);
                let node = node(&name, 3, &["n0", "n1", "n2", "n3"], seed + i);
                tl.add_entity(Box::new(node)).unwrap();
            }
            tl.init().unwrap();
            tl.run().unwrap();
            (tl.events_executed(), tl.now())
        }
        assert_eq!(run(11), run(11));
    }

    #[test]
    fn test_unknown_neighbour_fails_at_init() {
        let mut tl = Timeline::new(SimTime(100));
        tl.add_entity(Box::new(node("n0", 1, &["ghost"], 1))).unwrap();
        assert_eq!(
            tl.init().unwrap_err(),
            KernelError::UnknownEntity("ghost".to_string())
        );
    }
}
