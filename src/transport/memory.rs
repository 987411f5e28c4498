use super::{CancellationToken, Channel, TransportError};
use crate::kernel::PartitionId;
use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// Full mesh of crossbeam channels for partitions running as threads of
/// one process.
pub struct MemoryNetwork;

impl MemoryNetwork {
    /// Build one endpoint per partition. Endpoint `i` belongs to partition `i`.
    pub fn mesh(partitions: usize, poll_interval: Duration) -> Vec<MemoryChannel> {
        // links[from][to]
        let mut senders: Vec<Vec<Option<Sender<Bytes>>>> = vec![vec![None; partitions]; partitions];
        let mut receivers: Vec<Vec<Option<Receiver<Bytes>>>> =
            (0..partitions).map(|_| vec![None; partitions]).collect();

        for (from, row) in senders.iter_mut().enumerate() {
            for (to, slot) in row.iter_mut().enumerate() {
                if from == to {
                    continue;
                }
                let (tx, rx) = unbounded();
                *slot = Some(tx);
                receivers[to][from] = Some(rx);
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(id, (outgoing, incoming))| MemoryChannel {
                id: PartitionId(id),
                outgoing,
                incoming,
                poll_interval,
            })
            .collect()
    }
}

/// One partition's end of a `MemoryNetwork`.
pub struct MemoryChannel {
    id: PartitionId,
    outgoing: Vec<Option<Sender<Bytes>>>,
    incoming: Vec<Option<Receiver<Bytes>>>,
    poll_interval: Duration,
}

impl MemoryChannel {
    pub fn id(&self) -> PartitionId {
        self.id
    }
}

impl Channel for MemoryChannel {
    fn send(&mut self, peer: PartitionId, data: Bytes) -> Result<(), TransportError> {
        let tx = self
            .outgoing
            .get(peer.0)
            .and_then(Option::as_ref)
            .ok_or(TransportError::UnknownPeer(peer))?;
        tx.send(data).map_err(|_| TransportError::Disconnected(peer))
    }

    fn receive(
        &mut self,
        peer: PartitionId,
        cancel: &CancellationToken,
    ) -> Result<Bytes, TransportError> {
        let rx = self
            .incoming
            .get(peer.0)
            .and_then(Option::as_ref)
            .ok_or(TransportError::UnknownPeer(peer))?;
        loop {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            match rx.recv_timeout(self.poll_interval) {
                Ok(data) => return Ok(data),
                Err(RecvTimeoutError::Timeout) => continue,
                // A peer that was cancelled may hang up before this side
                // notices the token.
                Err(RecvTimeoutError::Disconnected) if cancel.is_cancelled() => {
                    return Err(TransportError::Cancelled)
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TransportError::Disconnected(peer))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fifo_per_peer() {
        let mut mesh = MemoryNetwork::mesh(2, Duration::from_millis(5));
        let mut b = mesh.pop().unwrap();
        let mut a = mesh.pop().unwrap();
        let token = CancellationToken::new();

        for i in 0..5u8 {
            a.send(PartitionId(1), Bytes::from(vec![i])).unwrap();
        }
        for i in 0..5u8 {
            assert_eq!(b.receive(PartitionId(0), &token).unwrap().as_ref(), &[i]);
        }
    }

    #[test]
    fn test_no_self_link() {
        let mut mesh = MemoryNetwork::mesh(3, Duration::from_millis(5));
        let err = mesh[1].send(PartitionId(1), Bytes::new()).unwrap_err();
        assert!(matches!(err, TransportError::UnknownPeer(PartitionId(1))));
        let err = mesh[1].send(PartitionId(7), Bytes::new()).unwrap_err();
        assert!(matches!(err, TransportError::UnknownPeer(PartitionId(7))));
    }

    #[test]
    fn test_receive_observes_cancellation() {
        let mut mesh = MemoryNetwork::mesh(2, Duration::from_millis(2));
        let token = CancellationToken::new();
        let canceller = token.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        // Keep peer 1 alive so the receive does not see a disconnect
        let _peer = mesh.pop().unwrap();
        let err = mesh[0].receive(PartitionId(1), &token).unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
        handle.join().unwrap();
    }

    #[test]
    fn test_disconnect_reported() {
        let mut mesh = MemoryNetwork::mesh(2, Duration::from_millis(2));
        drop(mesh.pop());
        let token = CancellationToken::new();
        let err = mesh[0].receive(PartitionId(1), &token).unwrap_err();
        assert!(matches!(err, TransportError::Disconnected(PartitionId(1))));
    }
}
