mod error;
mod event;
mod queue;
mod registry;
mod time;
mod timeline;

pub use error::KernelError;
pub use event::Event;
pub use queue::EventQueue;
pub use registry::{Registry, RegistryView};
pub use time::SimTime;
pub use timeline::{Clock, Timeline};

use serde::{Deserialize, Serialize};

/// Entity names are unique across the whole simulation, not per partition.
pub type EntityName = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId(pub usize);

/// A name resolved once at setup, before it is used in the hot loop.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Local(EntityName),
    Remote {
        partition: PartitionId,
        name: EntityName,
    },
}

impl EntityRef {
    pub fn name(&self) -> &str {
        match self {
            EntityRef::Local(name) => name,
            EntityRef::Remote { name, .. } => name,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, EntityRef::Local(_))
    }
}

/// The capability an entity gets while one of its actions runs.
pub trait Scheduler<M> {
    /// Time of the event currently being dispatched.
    fn now(&self) -> SimTime;

    /// Schedule by name. The target is looked up on every call.
    fn schedule(&mut self, event: Event<M>) -> Result<(), KernelError>;

    /// Schedule for a target returned by [`Scheduler::resolve`]. Routing
    /// follows the reference and never consults the name tables.
    fn schedule_to(&mut self, target: &EntityRef, time: SimTime, message: M) -> Result<(), KernelError>;

    fn resolve(&self, name: &str) -> Option<EntityRef>;
}

/// A simulated object. Messages of type `M` name its actions.
///
/// Handlers may schedule any number of events but must not block.
pub trait Entity<M>: Send {
    fn name(&self) -> &str;

    /// Called once before the run starts.
    fn init(&mut self, _ctx: &mut dyn Scheduler<M>) -> Result<(), KernelError> {
        Ok(())
    }

    fn handle(&mut self, message: M, ctx: &mut dyn Scheduler<M>) -> Result<(), KernelError>;
}
