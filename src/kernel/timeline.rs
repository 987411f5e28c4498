//! Single-partition kernel.
//!
//! `Clock` owns the queue and the monotonic current time; `Timeline` pairs
//! it with an entity registry and drives the run loop. The partitioned
//! kernel reuses `Clock::execute_until` unchanged for its windows.

use super::registry::RegistryView;
use super::{Entity, EntityRef, Event, EventQueue, KernelError, Registry, Scheduler, SimTime};
use tracing::trace;

pub struct Clock<M> {
    now: SimTime,
    stop_time: SimTime,
    queue: EventQueue<M>,
    next_seq: u64,
    events_executed: u64,
    events_scheduled: u64,
}

impl<M> Clock<M> {
    pub fn new(stop_time: SimTime) -> Self {
        Clock {
            now: SimTime::ZERO,
            stop_time,
            queue: EventQueue::new(),
            next_seq: 0,
            events_executed: 0,
            events_scheduled: 0,
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn stop_time(&self) -> SimTime {
        self.stop_time
    }

    pub fn queue(&self) -> &EventQueue<M> {
        &self.queue
    }

    pub fn top_time(&self) -> SimTime {
        self.queue.top_time()
    }

    pub fn events_executed(&self) -> u64 {
        self.events_executed
    }

    pub fn events_scheduled(&self) -> u64 {
        self.events_scheduled
    }

    /// Stamp the insertion sequence and enqueue. Events in the past are
    /// rejected here rather than tripping the dispatch assertion later.
    pub fn schedule(&mut self, mut event: Event<M>) -> Result<(), KernelError> {
        if event.time() < self.now {
            return Err(KernelError::CausalityViolation {
                event_time: event.time(),
                now: self.now,
            });
        }
        event.set_seq(self.next_seq);
        self.next_seq += 1;
        self.events_scheduled += 1;
        self.queue.push(event);
        Ok(())
    }

    /// Move the clock forward to `time`. Never moves it backwards.
    pub(crate) fn advance_to(&mut self, time: SimTime) {
        debug_assert!(time >= self.now, "Precondition: clock only moves forward");
        if time > self.now {
            self.now = time;
        }
    }

    /// Pop and dispatch every event strictly before `horizon`.
    ///
    /// Invalid events are dropped without touching the clock. Returns the
    /// number of events dispatched.
    pub fn execute_until<F>(&mut self, horizon: SimTime, mut dispatch: F) -> Result<u64, KernelError>
    where
        F: FnMut(&mut Clock<M>, Event<M>) -> Result<(), KernelError>,
    {
        let mut executed = 0;
        while !self.queue.is_empty() && self.queue.top_time() < horizon {
            let event = self.queue.pop_min();
            if !event.is_valid() {
                continue;
            }
            assert!(
                self.now <= event.time(),
                "invalid event time {} for entity {} at clock {}",
                event.time(),
                event.target(),
                self.now
            );
            self.now = event.time();
            self.events_executed += 1;
            executed += 1;
            trace!(time = %self.now, entity = %event.target(), "dispatch");
            dispatch(self, event)?;
        }
        Ok(executed)
    }
}

/// Baseline kernel: one queue, one clock, every entity local.
pub struct Timeline<M> {
    entities: Registry<M>,
    clock: Clock<M>,
}

impl<M> Timeline<M> {
    pub fn new(stop_time: SimTime) -> Self {
        Timeline {
            entities: Registry::new(),
            clock: Clock::new(stop_time),
        }
    }

    pub fn add_entity(&mut self, entity: Box<dyn Entity<M>>) -> Result<(), KernelError> {
        self.entities.register(entity)
    }

    pub fn entities(&self) -> &Registry<M> {
        &self.entities
    }

    pub fn now(&self) -> SimTime {
        self.clock.now()
    }

    pub fn stop_time(&self) -> SimTime {
        self.clock.stop_time()
    }

    pub fn queue_depth(&self) -> usize {
        self.clock.queue().len()
    }

    pub fn events_executed(&self) -> u64 {
        self.clock.events_executed()
    }

    pub fn events_scheduled(&self) -> u64 {
        self.clock.events_scheduled()
    }

    pub fn schedule(&mut self, event: Event<M>) -> Result<(), KernelError> {
        let mut ctx = LocalContext {
            clock: &mut self.clock,
            names: self.entities.view(),
        };
        ctx.schedule(event)
    }

    /// Invoke every entity's `init` hook in registration order.
    pub fn init(&mut self) -> Result<(), KernelError> {
        let clock = &mut self.clock;
        self.entities.for_each_split(|entity, names| {
            let mut ctx = LocalContext {
                clock: &mut *clock,
                names,
            };
            entity.init(&mut ctx)
        })
    }

    pub fn run(&mut self) -> Result<u64, KernelError> {
        let stop_time = self.clock.stop_time();
        self.run_until(stop_time)
    }

    /// Run with an explicit bound; the stop time still caps it.
    pub fn run_until(&mut self, horizon: SimTime) -> Result<u64, KernelError> {
        let horizon = horizon.min(self.clock.stop_time());
        let entities = &mut self.entities;
        self.clock.execute_until(horizon, |clock, event| {
            let (target, message) = event.into_parts();
            let (entity, names) = entities.split(&target)?;
            let mut ctx = LocalContext { clock, names };
            entity.handle(message, &mut ctx)
        })
    }
}

struct LocalContext<'a, M> {
    clock: &'a mut Clock<M>,
    names: RegistryView<'a>,
}

impl<M> Scheduler<M> for LocalContext<'_, M> {
    fn now(&self) -> SimTime {
        self.clock.now()
    }

    fn schedule(&mut self, event: Event<M>) -> Result<(), KernelError> {
        if !self.names.contains(event.target()) {
            return Err(KernelError::UnknownEntity(event.target().clone()));
        }
        self.clock.schedule(event)
    }

    fn schedule_to(&mut self, target: &EntityRef, time: SimTime, message: M) -> Result<(), KernelError> {
        match target {
            EntityRef::Local(name) => self.clock.schedule(Event::new(time, name.clone(), message)),
            EntityRef::Remote { partition, .. } => Err(KernelError::InvalidPartition {
                id: *partition,
                count: 1,
            }),
        }
    }

    fn resolve(&self, name: &str) -> Option<EntityRef> {
        self.names
            .contains(name)
            .then(|| EntityRef::Local(name.to_string()))
    }
}
