use super::{CancellationToken, Channel, TransportError};
use crate::kernel::PartitionId;
use crate::rng::DeterministicRng;
use bytes::Bytes;

/// Fault-injecting wrapper: each `receive` reports `WouldBlock` with
/// probability `fault_rate` before touching the inner channel, so no data
/// is ever lost, only delayed.
pub struct FlakyChannel<C> {
    inner: C,
    rng: DeterministicRng,
    fault_rate: f64,
    injected: u64,
}

impl<C: Channel> FlakyChannel<C> {
    pub fn new(inner: C, seed: u64, fault_rate: f64) -> Self {
        FlakyChannel {
            inner,
            rng: DeterministicRng::new(seed),
            fault_rate: fault_rate.clamp(0.0, 1.0),
            injected: 0,
        }
    }

    /// Faults injected so far.
    pub fn injected(&self) -> u64 {
        self.injected
    }
}

impl<C: Channel> Channel for FlakyChannel<C> {
    fn send(&mut self, peer: PartitionId, data: Bytes) -> Result<(), TransportError> {
        self.inner.send(peer, data)
    }

    fn receive(
        &mut self,
        peer: PartitionId,
        cancel: &CancellationToken,
    ) -> Result<Bytes, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        if self.rng.gen_bool(self.fault_rate) {
            self.injected += 1;
            return Err(TransportError::WouldBlock);
        }
        self.inner.receive(peer, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MailboxNetwork;

    #[test]
    fn test_faults_delay_but_never_drop() {
        let network = MailboxNetwork::new();
        let mut endpoints = network.endpoints(2);
        let b = endpoints.pop().unwrap();
        let mut a = endpoints.pop().unwrap();
        let mut flaky = FlakyChannel::new(b, 3, 0.5);
        let token = CancellationToken::new();

        for i in 0..20u8 {
            a.send(PartitionId(1), Bytes::from(vec![i])).unwrap();
        }

        let mut got = Vec::new();
        while got.len() < 20 {
            match flaky.receive(PartitionId(0), &token) {
                Ok(data) => got.push(data[0]),
                Err(e) => assert!(e.is_transient()),
            }
        }
        assert_eq!(got, (0..20).collect::<Vec<_>>());
        assert!(flaky.injected() > 0);
    }

    #[test]
    fn test_zero_rate_is_transparent() {
        let network = MailboxNetwork::new();
        let mut endpoints = network.endpoints(2);
        endpoints[0].send(PartitionId(1), Bytes::from_static(b"hi")).unwrap();
        let b = endpoints.pop().unwrap();
        let mut flaky = FlakyChannel::new(b, 3, 0.0);

        let token = CancellationToken::new();
        assert_eq!(flaky.receive(PartitionId(0), &token).unwrap().as_ref(), b"hi");
        assert_eq!(flaky.injected(), 0);
    }
}
