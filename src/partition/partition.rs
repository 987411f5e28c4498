//! Partitioned kernel: conservative windowed synchronization.
//!
//! ## Round
//!
//! ```text
//! candidate_min = min(pending_min, top_time)
//!        │
//!        ▼
//! send buffer+sentinel to every peer ──► receive one buffer from every peer
//!        │
//!        ▼
//! global_min = min(candidate_min, peer sentinels); merge peer events
//!        │
//!        ├── global_min >= stop_time ──► halt
//!        ▼
//! execute local events with time < min(global_min + lookahead, stop_time)
//! ```
//!
//! Every partition computes `global_min` from the same N sentinels, so all
//! of them halt in the same round.

use super::router::Router;
use super::{PartitionError, PartitionStats};
use crate::kernel::{
    Clock, Entity, EntityRef, Event, KernelError, PartitionId, Registry, RegistryView, Scheduler,
    SimTime,
};
use crate::transport::{CancellationToken, Channel, TransportError};
use crate::wire::ExchangeBuffer;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Retries logged at warn level every this many attempts.
const RETRY_WARN_INTERVAL: u64 = 100_000;

/// How the exchange step treats "not ready yet" from the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangePolicy {
    /// `None` retries forever.
    pub max_retries: Option<u64>,
    /// Sleep between attempts; zero yields the thread instead.
    pub retry_backoff: Duration,
}

impl Default for ExchangePolicy {
    fn default() -> Self {
        ExchangePolicy {
            max_retries: None,
            retry_backoff: Duration::from_micros(50),
        }
    }
}

/// Result of one synchronization round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// A window up to `horizon` was executed.
    Window { horizon: SimTime, executed: u64 },
    /// `global_min` reached the stop time.
    Halted,
}

pub struct Partition<M, C> {
    id: PartitionId,
    lookahead: u64,
    entities: Registry<M>,
    clock: Clock<M>,
    router: Router<M>,
    channel: C,
    cancel: CancellationToken,
    policy: ExchangePolicy,
    global_min: SimTime,
    round: u64,
    sync_rounds: u64,
    events_exchanged: u64,
    halted: bool,
    computing_time: Duration,
    communication_time: Duration,
}

impl<M, C> Partition<M, C>
where
    M: Serialize + DeserializeOwned,
    C: Channel,
{
    pub fn new(
        id: PartitionId,
        partitions: usize,
        lookahead: u64,
        stop_time: SimTime,
        channel: C,
    ) -> Result<Self, KernelError> {
        if lookahead == 0 {
            return Err(KernelError::InvalidLookahead);
        }
        if id.0 >= partitions {
            return Err(KernelError::InvalidPartition {
                id,
                count: partitions,
            });
        }
        Ok(Partition {
            id,
            lookahead,
            entities: Registry::new(),
            clock: Clock::new(stop_time),
            router: Router::new(id, partitions),
            channel,
            cancel: CancellationToken::new(),
            policy: ExchangePolicy::default(),
            global_min: SimTime::ZERO,
            round: 0,
            sync_rounds: 0,
            events_exchanged: 0,
            halted: false,
            computing_time: Duration::ZERO,
            communication_time: Duration::ZERO,
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_exchange_policy(mut self, policy: ExchangePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn add_entity(&mut self, entity: Box<dyn Entity<M>>) -> Result<(), KernelError> {
        if self.router.owner(entity.name()).is_some() {
            return Err(KernelError::DuplicateEntity(entity.name().to_string()));
        }
        self.entities.register(entity)
    }

    /// Record that `name` lives on partition `owner`.
    pub fn add_foreign_entity(
        &mut self,
        name: impl Into<String>,
        owner: PartitionId,
    ) -> Result<(), KernelError> {
        let name = name.into();
        if self.entities.contains(&name) {
            return Err(KernelError::DuplicateEntity(name));
        }
        self.router.add_route(name, owner)
    }

    /// Schedule from outside any handler, e.g. to seed the run.
    pub fn schedule(&mut self, event: Event<M>) -> Result<(), KernelError> {
        let mut ctx = PartitionContext {
            clock: &mut self.clock,
            names: self.entities.view(),
            router: &mut self.router,
            lookahead: self.lookahead,
            in_window: false,
        };
        ctx.schedule(event)
    }

    /// Invoke every local entity's `init` hook in registration order.
    pub fn init(&mut self) -> Result<(), KernelError> {
        let clock = &mut self.clock;
        let router = &mut self.router;
        let lookahead = self.lookahead;
        self.entities.for_each_split(|entity, names| {
            let mut ctx = PartitionContext {
                clock: &mut *clock,
                names,
                router: &mut *router,
                lookahead,
                in_window: false,
            };
            entity.init(&mut ctx)
        })
    }

    /// Run rounds until the agreed global minimum reaches the stop time.
    pub fn run(&mut self) -> Result<PartitionStats, PartitionError> {
        info!(
            partition = self.id.0,
            partitions = self.router.partitions(),
            lookahead = self.lookahead,
            stop_time = %self.clock.stop_time(),
            entities = self.entities.len(),
            "partition starting"
        );
        while !self.halted {
            self.step()?;
        }
        info!(
            partition = self.id.0,
            rounds = self.sync_rounds,
            executed = self.clock.events_executed(),
            exchanged = self.events_exchanged,
            now = %self.clock.now(),
            "partition halted"
        );
        Ok(self.stats())
    }

    /// One synchronization round.
    pub fn step(&mut self) -> Result<RoundOutcome, PartitionError> {
        if self.halted {
            return Ok(RoundOutcome::Halted);
        }
        if self.cancel.is_cancelled() {
            return Err(PartitionError::Cancelled);
        }

        let tick = Instant::now();
        let candidate_min = self.router.pending_min().min(self.clock.top_time());
        let inbox = self.exchange(candidate_min)?;
        self.communication_time += tick.elapsed();

        let global_min = inbox
            .iter()
            .map(|buffer| buffer.candidate_min)
            .fold(candidate_min, SimTime::min);
        if global_min < self.clock.now() {
            return Err(KernelError::GlobalMinBehindClock {
                global_min,
                now: self.clock.now(),
            }
            .into());
        }

        self.merge(inbox)?;
        self.global_min = global_min;
        self.round += 1;

        let stop_time = self.clock.stop_time();
        if global_min >= stop_time {
            self.halted = true;
            debug!(partition = self.id.0, round = self.round, global_min = %global_min, "termination");
            return Ok(RoundOutcome::Halted);
        }

        self.sync_rounds += 1;
        let horizon = (global_min + self.lookahead).min(stop_time);
        self.clock.advance_to(global_min);

        let tick = Instant::now();
        let executed = self.execute_window(horizon)?;
        self.computing_time += tick.elapsed();

        debug!(
            partition = self.id.0,
            round = self.round,
            candidate_min = %candidate_min,
            global_min = %global_min,
            horizon = %horizon,
            executed,
            "window"
        );
        Ok(RoundOutcome::Window { horizon, executed })
    }

    /// Send this round's buffer to every peer, then collect one from each.
    fn exchange(&mut self, candidate_min: SimTime) -> Result<Vec<ExchangeBuffer<M>>, PartitionError> {
        let outgoing = self.router.drain();
        for (peer, events) in outgoing.into_iter().enumerate() {
            let peer = PartitionId(peer);
            if peer == self.id {
                continue;
            }
            let buffer = ExchangeBuffer::new(self.id, self.round, events, candidate_min);
            let data = buffer.encode()?;
            self.channel
                .send(peer, data)
                .map_err(|e| self.transport_failure(e))?;
        }

        let mut inbox = Vec::with_capacity(self.router.partitions().saturating_sub(1));
        for peer in (0..self.router.partitions()).map(PartitionId) {
            if peer == self.id {
                continue;
            }
            let data = self.receive_from(peer)?;
            let buffer = ExchangeBuffer::<M>::decode(&data)?;
            if buffer.round != self.round || buffer.sender != peer {
                return Err(PartitionError::RoundMismatch {
                    peer,
                    expected: self.round,
                    actual: buffer.round,
                });
            }
            inbox.push(buffer);
        }
        Ok(inbox)
    }

    /// Receive from `peer`, retrying transient "not ready" results.
    fn receive_from(&mut self, peer: PartitionId) -> Result<bytes::Bytes, PartitionError> {
        let mut attempts: u64 = 0;
        loop {
            match self.channel.receive(peer, &self.cancel) {
                Ok(data) => return Ok(data),
                Err(e) if e.is_transient() => {
                    attempts += 1;
                    if let Some(max) = self.policy.max_retries {
                        if attempts > max {
                            return Err(PartitionError::ExchangeTimeout { peer, attempts });
                        }
                    }
                    if attempts % RETRY_WARN_INTERVAL == 0 {
                        warn!(partition = self.id.0, peer = peer.0, attempts, "still waiting on peer");
                    }
                    if self.policy.retry_backoff.is_zero() {
                        std::thread::yield_now();
                    } else {
                        std::thread::sleep(self.policy.retry_backoff);
                    }
                }
                Err(e) => return Err(self.transport_failure(e)),
            }
        }
    }

    /// Once the run is cancelled, any transport failure is a consequence of
    /// a peer unwinding and is reported as `Cancelled`.
    fn transport_failure(&self, e: TransportError) -> PartitionError {
        if self.cancel.is_cancelled() {
            PartitionError::Cancelled
        } else {
            e.into()
        }
    }

    /// Enqueue received events. A peer only ever sends events for entities
    /// this partition owns.
    fn merge(&mut self, inbox: Vec<ExchangeBuffer<M>>) -> Result<(), KernelError> {
        for buffer in inbox {
            for event in buffer.events {
                if let Some(owner) = self.router.owner(event.target()) {
                    return Err(KernelError::MisroutedEvent {
                        target: event.target().clone(),
                        owner,
                    });
                }
                self.events_exchanged += 1;
                self.schedule(event)?;
            }
        }
        Ok(())
    }

    fn execute_window(&mut self, horizon: SimTime) -> Result<u64, KernelError> {
        let entities = &mut self.entities;
        let router = &mut self.router;
        let lookahead = self.lookahead;
        self.clock.execute_until(horizon, |clock, event| {
            let (target, message) = event.into_parts();
            let (entity, names) = entities.split(&target)?;
            let mut ctx = PartitionContext {
                clock,
                names,
                router: &mut *router,
                lookahead,
                in_window: true,
            };
            entity.handle(message, &mut ctx)
        })
    }
}

impl<M, C> Partition<M, C> {
    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn lookahead(&self) -> u64 {
        self.lookahead
    }

    pub fn current_time(&self) -> SimTime {
        self.clock.now()
    }

    pub fn stop_time(&self) -> SimTime {
        self.clock.stop_time()
    }

    pub fn global_min(&self) -> SimTime {
        self.global_min
    }

    pub fn sync_rounds(&self) -> u64 {
        self.sync_rounds
    }

    pub fn events_executed(&self) -> u64 {
        self.clock.events_executed()
    }

    pub fn events_scheduled(&self) -> u64 {
        self.clock.events_scheduled()
    }

    pub fn events_exchanged(&self) -> u64 {
        self.events_exchanged
    }

    pub fn queue_depth(&self) -> usize {
        self.clock.queue().len()
    }

    pub fn buffered_events(&self) -> usize {
        self.router.buffered()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn entities(&self) -> &Registry<M> {
        &self.entities
    }

    pub fn resolve(&self, name: &str) -> Option<EntityRef> {
        resolve(self.entities.view(), &self.router, name)
    }

    pub fn stats(&self) -> PartitionStats {
        PartitionStats {
            id: self.id,
            current_time: self.clock.now().as_ticks(),
            top_time: self.clock.top_time().as_ticks(),
            global_min: self.global_min.as_ticks(),
            sync_rounds: self.sync_rounds,
            exchange_rounds: self.round,
            events_executed: self.clock.events_executed(),
            events_scheduled: self.clock.events_scheduled(),
            events_sent: self.router.events_sent(),
            events_exchanged: self.events_exchanged,
            queue_depth: self.clock.queue().len(),
            buffered_events: self.router.buffered(),
            computing_time: self.computing_time,
            communication_time: self.communication_time,
        }
    }
}

fn resolve<M>(names: RegistryView<'_>, router: &Router<M>, name: &str) -> Option<EntityRef> {
    if names.contains(name) {
        return Some(EntityRef::Local(name.to_string()));
    }
    router.owner(name).map(|partition| EntityRef::Remote {
        partition,
        name: name.to_string(),
    })
}

/// Routing-aware scheduler handed to entities of a partition.
struct PartitionContext<'a, M> {
    clock: &'a mut Clock<M>,
    names: RegistryView<'a>,
    router: &'a mut Router<M>,
    lookahead: u64,
    in_window: bool,
}

impl<M> PartitionContext<'_, M> {
    /// Remote events scheduled while a window runs must clear the lookahead.
    fn buffer_remote(&mut self, owner: PartitionId, event: Event<M>) -> Result<(), KernelError> {
        let now = self.clock.now();
        if self.in_window && event.time() < now + self.lookahead {
            return Err(KernelError::LookaheadViolation {
                event_time: event.time(),
                now,
                lookahead: self.lookahead,
            });
        }
        self.router.buffer(owner, event);
        Ok(())
    }
}

impl<M> Scheduler<M> for PartitionContext<'_, M> {
    fn now(&self) -> SimTime {
        self.clock.now()
    }

    fn schedule(&mut self, event: Event<M>) -> Result<(), KernelError> {
        if let Some(owner) = self.router.owner(event.target()) {
            return self.buffer_remote(owner, event);
        }
        if !self.names.contains(event.target()) {
            return Err(KernelError::UnknownEntity(event.target().clone()));
        }
        self.clock.schedule(event)
    }

    fn schedule_to(&mut self, target: &EntityRef, time: SimTime, message: M) -> Result<(), KernelError> {
        match target {
            EntityRef::Local(name) => self.clock.schedule(Event::new(time, name.clone(), message)),
            EntityRef::Remote { partition, name } => {
                self.router.check_peer(*partition)?;
                self.buffer_remote(*partition, Event::new(time, name.clone(), message))
            }
        }
    }

    fn resolve(&self, name: &str) -> Option<EntityRef> {
        resolve(self.names, self.router, name)
    }
}
