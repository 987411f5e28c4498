use crate::kernel::{KernelError, PartitionId};
use crate::transport::TransportError;
use crate::wire::WireError;

/// Anything that stops a partition's run loop.
#[derive(Debug)]
pub enum PartitionError {
    /// Protocol violation
    Kernel(KernelError),
    /// Permanent transport failure
    Transport(TransportError),
    /// Undecodable exchange buffer
    Wire(WireError),
    /// Retries for a peer's buffer ran out
    ExchangeTimeout { peer: PartitionId, attempts: u64 },
    /// A peer's buffer belongs to a different round or sender
    RoundMismatch {
        peer: PartitionId,
        expected: u64,
        actual: u64,
    },
    /// Shutdown requested through the cancellation token
    Cancelled,
}

impl PartitionError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PartitionError::Cancelled)
    }
}

impl std::fmt::Display for PartitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionError::Kernel(e) => write!(f, "Protocol violation: {}", e),
            PartitionError::Transport(e) => write!(f, "Transport failure: {}", e),
            PartitionError::Wire(e) => write!(f, "Wire error: {}", e),
            PartitionError::ExchangeTimeout { peer, attempts } => write!(
                f,
                "Exchange with partition {} timed out after {} attempts",
                peer.0, attempts
            ),
            PartitionError::RoundMismatch {
                peer,
                expected,
                actual,
            } => write!(
                f,
                "Partition {} sent round {} while expecting round {}",
                peer.0, actual, expected
            ),
            PartitionError::Cancelled => write!(f, "Partition run cancelled"),
        }
    }
}

impl std::error::Error for PartitionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PartitionError::Kernel(e) => Some(e),
            PartitionError::Transport(e) => Some(e),
            PartitionError::Wire(e) => Some(e),
            _ => None,
        }
    }
}

impl From<KernelError> for PartitionError {
    fn from(e: KernelError) -> Self {
        PartitionError::Kernel(e)
    }
}

impl From<TransportError> for PartitionError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Cancelled => PartitionError::Cancelled,
            other => PartitionError::Transport(other),
        }
    }
}

impl From<WireError> for PartitionError {
    fn from(e: WireError) -> Self {
        PartitionError::Wire(e)
    }
}
