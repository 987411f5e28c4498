use super::{EntityName, SimTime};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared validity flag. Clones of an event point at the same flag, so
/// whoever kept a clone can cancel the copy sitting in a queue.
#[derive(Debug, Clone)]
pub struct ValidFlag(Arc<AtomicBool>);

impl Default for ValidFlag {
    fn default() -> Self {
        ValidFlag(Arc::new(AtomicBool::new(true)))
    }
}

impl ValidFlag {
    fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// A scheduled action: deliver `message` to `target` at `time`.
///
/// Ordering key is `(time, priority, seq)`. `seq` is stamped by the kernel
/// that accepts the event; a freshly built event carries 0.
///
/// The validity flag is never serialized: an event decoded from the wire
/// always starts valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<M> {
    time: SimTime,
    priority: u32,
    seq: u64,
    target: EntityName,
    message: M,
    #[serde(skip)]
    valid: ValidFlag,
}

impl<M> Event<M> {
    pub fn new(time: SimTime, target: impl Into<EntityName>, message: M) -> Self {
        Event {
            time,
            priority: 0,
            seq: 0,
            target: target.into(),
            message,
            valid: ValidFlag::default(),
        }
    }

    /// Lower priority values run first among events with equal time.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn time(&self) -> SimTime {
        self.time
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn target(&self) -> &EntityName {
        &self.target
    }

    pub fn message(&self) -> &M {
        &self.message
    }

    pub fn is_valid(&self) -> bool {
        self.valid.get()
    }

    /// Soft-cancel. Idempotent, and a no-op in effect once the event has
    /// already been dispatched.
    pub fn invalidate(&self) {
        self.valid.clear();
    }

    pub(crate) fn set_seq(&mut self, seq: u64) {
        self.seq = seq;
    }

    pub(crate) fn key(&self) -> (SimTime, u32, u64) {
        (self.time, self.priority, self.seq)
    }

    pub(crate) fn into_parts(self) -> (EntityName, M) {
        (self.target, self.message)
    }
}

impl<M: PartialEq> PartialEq for Event<M> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key() && self.target == other.target && self.message == other.message
    }
}

impl<M: Eq> Eq for Event<M> {}
