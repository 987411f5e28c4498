//! Byte transport between partitions.
//!
//! The kernel depends only on `Channel`: a reliable, in-order,
//! point-to-point byte pipe per peer pair. Implementations:
//! - `MemoryChannel`: crossbeam channels between threads of one process
//! - `MailboxChannel`: a shared, lock-guarded polling mailbox
//! - `FlakyChannel`: wraps another channel and injects "not ready" faults

mod flaky;
mod mailbox;
mod memory;

pub use flaky::FlakyChannel;
pub use mailbox::{MailboxChannel, MailboxNetwork};
pub use memory::{MemoryChannel, MemoryNetwork};

use crate::kernel::PartitionId;
use bytes::Bytes;
use std::io::{Error as IoError, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Error type for transport operations
#[derive(Debug)]
pub enum TransportError {
    /// Peer data not ready yet; the caller retries
    WouldBlock,
    /// The other end went away
    Disconnected(PartitionId),
    /// No endpoint for this peer
    UnknownPeer(PartitionId),
    /// Shutdown requested through the cancellation token
    Cancelled,
    /// I/O error
    Io(IoError),
}

impl TransportError {
    /// Transient failures are retried by the exchange step; anything else
    /// aborts the partition.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::WouldBlock)
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::WouldBlock => write!(f, "Peer data not ready"),
            TransportError::Disconnected(peer) => write!(f, "Peer {} disconnected", peer.0),
            TransportError::UnknownPeer(peer) => write!(f, "No channel to peer {}", peer.0),
            TransportError::Cancelled => write!(f, "Transport cancelled"),
            TransportError::Io(e) => write!(f, "Transport I/O error: {}", e),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<IoError> for TransportError {
    fn from(e: IoError) -> Self {
        match e.kind() {
            ErrorKind::WouldBlock => TransportError::WouldBlock,
            _ => TransportError::Io(e),
        }
    }
}

/// Shared shutdown flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Point-to-point byte transport owned by one partition.
pub trait Channel: Send {
    /// Hand one serialized buffer to `peer`. Ordering per peer is preserved.
    fn send(&mut self, peer: PartitionId, data: Bytes) -> Result<(), TransportError>;

    /// Take the next complete buffer from `peer`.
    ///
    /// Blocking implementations wait; polling implementations may return
    /// `WouldBlock`. A cancelled token yields `Cancelled`.
    fn receive(
        &mut self,
        peer: PartitionId,
        cancel: &CancellationToken,
    ) -> Result<Bytes, TransportError>;
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn send(&mut self, peer: PartitionId, data: Bytes) -> Result<(), TransportError> {
        (**self).send(peer, data)
    }

    fn receive(
        &mut self,
        peer: PartitionId,
        cancel: &CancellationToken,
    ) -> Result<Bytes, TransportError> {
        (**self).receive(peer, cancel)
    }
}
