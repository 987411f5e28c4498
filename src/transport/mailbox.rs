use super::{CancellationToken, Channel, TransportError};
use crate::kernel::PartitionId;
use ahash::AHashMap;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

type Slots = AHashMap<(usize, usize), VecDeque<Bytes>>;

/// Shared mailbox every partition reads and writes under one lock.
///
/// This is a polling resource: an empty slot reports `WouldBlock` instead
/// of waiting, and the exchange step retries. Each read or write of one
/// whole message happens under the lock, so a reader never sees a partial
/// buffer.
#[derive(Clone, Default)]
pub struct MailboxNetwork {
    slots: Arc<Mutex<Slots>>,
}

impl MailboxNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoints(&self, partitions: usize) -> Vec<MailboxChannel> {
        (0..partitions)
            .map(|id| MailboxChannel {
                id: PartitionId(id),
                partitions,
                slots: self.slots.clone(),
            })
            .collect()
    }

    /// Messages written but not yet read, across all pairs.
    pub fn pending(&self) -> usize {
        self.slots.lock().values().map(VecDeque::len).sum()
    }
}

pub struct MailboxChannel {
    id: PartitionId,
    partitions: usize,
    slots: Arc<Mutex<Slots>>,
}

impl MailboxChannel {
    fn check_peer(&self, peer: PartitionId) -> Result<(), TransportError> {
        if peer.0 >= self.partitions || peer == self.id {
            return Err(TransportError::UnknownPeer(peer));
        }
        Ok(())
    }
}

impl Channel for MailboxChannel {
    fn send(&mut self, peer: PartitionId, data: Bytes) -> Result<(), TransportError> {
        self.check_peer(peer)?;
        self.slots
            .lock()
            .entry((self.id.0, peer.0))
            .or_default()
            .push_back(data);
        Ok(())
    }

    fn receive(
        &mut self,
        peer: PartitionId,
        cancel: &CancellationToken,
    ) -> Result<Bytes, TransportError> {
        self.check_peer(peer)?;
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        self.slots
            .lock()
            .get_mut(&(peer.0, self.id.0))
            .and_then(VecDeque::pop_front)
            .ok_or(TransportError::WouldBlock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_slot_would_block() {
        let network = MailboxNetwork::new();
        let mut endpoints = network.endpoints(2);
        let token = CancellationToken::new();

        let err = endpoints[0].receive(PartitionId(1), &token).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_message_read_exactly_once() {
        let network = MailboxNetwork::new();
        let mut endpoints = network.endpoints(3);
        let token = CancellationToken::new();

        endpoints[2].send(PartitionId(0), Bytes::from_static(b"one")).unwrap();
        endpoints[2].send(PartitionId(0), Bytes::from_static(b"two")).unwrap();
        assert_eq!(network.pending(), 2);

        assert_eq!(endpoints[0].receive(PartitionId(2), &token).unwrap().as_ref(), b"one");
        assert_eq!(endpoints[0].receive(PartitionId(2), &token).unwrap().as_ref(), b"two");
        assert!(endpoints[0].receive(PartitionId(2), &token).is_err());
        // Nothing crossed over to the other pair
        assert!(endpoints[1].receive(PartitionId(2), &token).is_err());
        assert_eq!(network.pending(), 0);
    }

    #[test]
    fn test_cancelled_before_poll() {
        let network = MailboxNetwork::new();
        let mut endpoints = network.endpoints(2);
        endpoints[1].send(PartitionId(0), Bytes::from_static(b"x")).unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let err = endpoints[0].receive(PartitionId(1), &token).unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
    }

    #[test]
    fn test_cloned_network_shares_slots_per_direction() {
        let network = MailboxNetwork::new();
        let mut a = network.endpoints(2);
        let mut b = network.clone().endpoints(2);
        let token = CancellationToken::new();

        a[0].send(PartitionId(1), Bytes::from_static(b"to-1")).unwrap();
        b[1].send(PartitionId(0), Bytes::from_static(b"to-0")).unwrap();
        assert_eq!(network.pending(), 2);

        assert_eq!(b[1].receive(PartitionId(0), &token).unwrap().as_ref(), b"to-1");
        assert_eq!(a[0].receive(PartitionId(1), &token).unwrap().as_ref(), b"to-0");
        assert_eq!(network.pending(), 0);
    }
}
