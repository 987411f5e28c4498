use crate::kernel::{EntityName, Event, KernelError, PartitionId, SimTime};
use ahash::AHashMap;

/// Routing table plus the per-peer outgoing buffers it feeds.
///
/// The table is filled during setup and only read once the run starts.
pub struct Router<M> {
    id: PartitionId,
    routes: AHashMap<EntityName, PartitionId>,
    outgoing: Vec<Vec<Event<M>>>,
    pending_min: SimTime,
    events_sent: u64,
}

impl<M> Router<M> {
    pub fn new(id: PartitionId, partitions: usize) -> Self {
        Router {
            id,
            routes: AHashMap::new(),
            outgoing: (0..partitions).map(|_| Vec::new()).collect(),
            pending_min: SimTime::INFINITY,
            events_sent: 0,
        }
    }

    pub fn partitions(&self) -> usize {
        self.outgoing.len()
    }

    /// `peer` must be another partition of this run.
    pub fn check_peer(&self, peer: PartitionId) -> Result<(), KernelError> {
        if peer == self.id || peer.0 >= self.outgoing.len() {
            return Err(KernelError::InvalidPartition {
                id: peer,
                count: self.outgoing.len(),
            });
        }
        Ok(())
    }

    pub fn add_route(&mut self, name: EntityName, owner: PartitionId) -> Result<(), KernelError> {
        self.check_peer(owner)?;
        if self.routes.contains_key(&name) {
            return Err(KernelError::DuplicateEntity(name));
        }
        self.routes.insert(name, owner);
        Ok(())
    }

    pub fn owner(&self, name: &str) -> Option<PartitionId> {
        self.routes.get(name).copied()
    }

    /// Queue an event for `peer`. Nothing moves until the next exchange.
    pub fn buffer(&mut self, peer: PartitionId, event: Event<M>) {
        debug_assert!(peer != self.id, "Precondition: self slot is never buffered");
        self.pending_min = self.pending_min.min(event.time());
        self.events_sent += 1;
        self.outgoing[peer.0].push(event);
    }

    /// Earliest timestamp among buffered events, `INFINITY` when empty.
    pub fn pending_min(&self) -> SimTime {
        self.pending_min
    }

    pub fn buffered(&self) -> usize {
        self.outgoing.iter().map(Vec::len).sum()
    }

    pub fn events_sent(&self) -> u64 {
        self.events_sent
    }

    /// Hand over every buffer and reset `pending_min`. Invalidated events
    /// are dropped here, so a cancellation before the exchange never
    /// crosses the wire.
    pub fn drain(&mut self) -> Vec<Vec<Event<M>>> {
        self.pending_min = SimTime::INFINITY;
        self.outgoing
            .iter_mut()
            .map(|buf| std::mem::take(buf).into_iter().filter(Event::is_valid).collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_min_tracks_buffered_events() {
        let mut router: Router<()> = Router::new(PartitionId(0), 3);
        assert_eq!(router.pending_min(), SimTime::INFINITY);

        router.buffer(PartitionId(1), Event::new(SimTime(9), "x", ()));
        router.buffer(PartitionId(2), Event::new(SimTime(4), "y", ()));
        router.buffer(PartitionId(1), Event::new(SimTime(6), "x", ()));
        assert_eq!(router.pending_min(), SimTime(4));
        assert_eq!(router.buffered(), 3);

        let drained = router.drain();
        assert_eq!(drained[0].len(), 0);
        assert_eq!(drained[1].len(), 2);
        assert_eq!(drained[2].len(), 1);
        assert_eq!(router.pending_min(), SimTime::INFINITY);
        assert_eq!(router.buffered(), 0);
        assert_eq!(router.events_sent(), 3);
    }

    #[test]
    fn test_drain_drops_invalidated() {
        let mut router: Router<()> = Router::new(PartitionId(0), 2);
        let cancelled = Event::new(SimTime(3), "x", ());
        router.buffer(PartitionId(1), cancelled.clone());
        router.buffer(PartitionId(1), Event::new(SimTime(5), "x", ()));
        cancelled.invalidate();

        let drained = router.drain();
        assert_eq!(drained[1].len(), 1);
        assert_eq!(drained[1][0].time(), SimTime(5));
    }

    #[test]
    fn test_route_validation() {
        let mut router: Router<()> = Router::new(PartitionId(1), 2);
        assert!(matches!(
            router.add_route("a".into(), PartitionId(1)),
            Err(KernelError::InvalidPartition { .. })
        ));
        assert!(matches!(
            router.add_route("a".into(), PartitionId(5)),
            Err(KernelError::InvalidPartition { .. })
        ));
        router.add_route("a".into(), PartitionId(0)).unwrap();
        assert_eq!(router.owner("a"), Some(PartitionId(0)));
        assert!(matches!(
            router.add_route("a".into(), PartitionId(0)),
            Err(KernelError::DuplicateEntity(_))
        ));
    }
}
