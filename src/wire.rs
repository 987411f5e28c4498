//! Exchange buffer wire format.
//!
//! One buffer per (sender, receiver, round). The payload is a bincode list
//! of frames: the events for the receiver in buffer order, then exactly one
//! `Horizon` frame carrying the sender's `candidate_min`. Receivers pop the
//! horizon before reading the events.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │ Header (30 bytes)                │
//! │ - magic: "PXCH" (4 bytes)        │
//! │ - version: u8                    │
//! │ - flags: u8 (reserved, 0)        │
//! │ - sender: u32 LE                 │
//! │ - round: u64 LE                  │
//! │ - frame_count: u32 LE            │
//! │ - payload_len: u32 LE            │
//! │ - checksum: u32 LE (CRC32)       │
//! ├──────────────────────────────────┤
//! │ Payload                          │
//! │ - bincode(Vec<Frame>)            │
//! └──────────────────────────────────┘
//! ```

use crate::kernel::{Event, PartitionId, SimTime};
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Exchange buffer magic number
pub const EXCHANGE_MAGIC: [u8; 4] = *b"PXCH";
/// Current wire format version
pub const EXCHANGE_VERSION: u8 = 1;
/// Header size in bytes
pub const EXCHANGE_HEADER_SIZE: usize = 30;

/// Wire error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Invalid magic number
    InvalidMagic,
    /// Unsupported version
    UnsupportedVersion(u8),
    /// Payload checksum mismatch
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Buffer shorter than the header claims
    Truncated { expected: usize, actual: usize },
    /// Header frame count disagrees with the payload
    FrameCountMismatch { expected: u32, actual: usize },
    /// Last frame is not the horizon sentinel
    MissingHorizon,
    /// A horizon frame appeared before the end
    UnexpectedHorizon(usize),
    /// Serialization error
    Serialization(String),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::InvalidMagic => write!(f, "Invalid exchange buffer magic"),
            WireError::UnsupportedVersion(v) => write!(f, "Unsupported exchange version: {}", v),
            WireError::ChecksumMismatch { expected, actual } => write!(
                f,
                "Checksum mismatch: expected {}, got {}",
                expected, actual
            ),
            WireError::Truncated { expected, actual } => write!(
                f,
                "Truncated exchange buffer: expected {} bytes, got {}",
                expected, actual
            ),
            WireError::FrameCountMismatch { expected, actual } => write!(
                f,
                "Frame count mismatch: header says {}, payload has {}",
                expected, actual
            ),
            WireError::MissingHorizon => write!(f, "Exchange buffer does not end with a horizon"),
            WireError::UnexpectedHorizon(idx) => write!(f, "Horizon frame at position {}", idx),
            WireError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for WireError {}

impl From<bincode::Error> for WireError {
    fn from(e: bincode::Error) -> Self {
        WireError::Serialization(e.to_string())
    }
}

/// Borrowing twin of `Frame` used on the encode side; bincode lays both
/// out identically.
#[derive(Serialize)]
enum FrameRef<'a, M> {
    Event(&'a Event<M>),
    Horizon(SimTime),
}

#[derive(Deserialize)]
enum Frame<M> {
    Event(Event<M>),
    Horizon(SimTime),
}

/// Events bound for one receiver plus the sender's local horizon.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeBuffer<M> {
    pub sender: PartitionId,
    pub round: u64,
    pub events: Vec<Event<M>>,
    pub candidate_min: SimTime,
}

impl<M> ExchangeBuffer<M> {
    pub fn new(sender: PartitionId, round: u64, events: Vec<Event<M>>, candidate_min: SimTime) -> Self {
        ExchangeBuffer {
            sender,
            round,
            events,
            candidate_min,
        }
    }
}

impl<M: Serialize> ExchangeBuffer<M> {
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let frames: Vec<FrameRef<'_, M>> = self
            .events
            .iter()
            .map(FrameRef::Event)
            .chain(std::iter::once(FrameRef::Horizon(self.candidate_min)))
            .collect();
        let payload = bincode::serialize(&frames)?;
        let checksum = crc32fast::hash(&payload);

        let mut buf = BytesMut::with_capacity(EXCHANGE_HEADER_SIZE + payload.len());
        buf.put_slice(&EXCHANGE_MAGIC);
        buf.put_u8(EXCHANGE_VERSION);
        buf.put_u8(0);
        buf.put_u32_le(self.sender.0 as u32);
        buf.put_u64_le(self.round);
        buf.put_u32_le(frames.len() as u32);
        buf.put_u32_le(payload.len() as u32);
        buf.put_u32_le(checksum);
        buf.put_slice(&payload);

        debug_assert_eq!(
            buf.len(),
            EXCHANGE_HEADER_SIZE + payload.len(),
            "Postcondition: encoded size must match header + payload"
        );

        Ok(buf.freeze())
    }
}

impl<M: DeserializeOwned> ExchangeBuffer<M> {
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < EXCHANGE_HEADER_SIZE {
            return Err(WireError::Truncated {
                expected: EXCHANGE_HEADER_SIZE,
                actual: data.len(),
            });
        }
        if data[0..4] != EXCHANGE_MAGIC {
            return Err(WireError::InvalidMagic);
        }
        if data[4] != EXCHANGE_VERSION {
            return Err(WireError::UnsupportedVersion(data[4]));
        }

        let sender = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
        let round = u64::from_le_bytes([
            data[10], data[11], data[12], data[13], data[14], data[15], data[16], data[17],
        ]);
        let frame_count = u32::from_le_bytes([data[18], data[19], data[20], data[21]]);
        let payload_len = u32::from_le_bytes([data[22], data[23], data[24], data[25]]) as usize;
        let checksum = u32::from_le_bytes([data[26], data[27], data[28], data[29]]);

        let total = EXCHANGE_HEADER_SIZE + payload_len;
        if data.len() != total {
            return Err(WireError::Truncated {
                expected: total,
                actual: data.len(),
            });
        }
        let payload = &data[EXCHANGE_HEADER_SIZE..];
        let actual = crc32fast::hash(payload);
        if actual != checksum {
            return Err(WireError::ChecksumMismatch {
                expected: checksum,
                actual,
            });
        }

        let mut frames: Vec<Frame<M>> = bincode::deserialize(payload)?;
        if frames.len() != frame_count as usize {
            return Err(WireError::FrameCountMismatch {
                expected: frame_count,
                actual: frames.len(),
            });
        }

        let candidate_min = match frames.pop() {
            Some(Frame::Horizon(t)) => t,
            _ => return Err(WireError::MissingHorizon),
        };

        let mut events = Vec::with_capacity(frames.len());
        for (idx, frame) in frames.into_iter().enumerate() {
            match frame {
                Frame::Event(event) => events.push(event),
                Frame::Horizon(_) => return Err(WireError::UnexpectedHorizon(idx)),
            }
        }

        Ok(ExchangeBuffer {
            sender: PartitionId(sender),
            round,
            events,
            candidate_min,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(k: u64) -> ExchangeBuffer<String> {
        let events = (0..k)
            .map(|i| Event::new(SimTime(10 + i), format!("node-{}", i % 3), format!("m{}", i)).with_priority(i as u32 % 2))
            .collect();
        ExchangeBuffer::new(PartitionId(2), 17, events, SimTime(10))
    }

    #[test]
    fn test_roundtrip_preserves_events_and_sentinel() {
        let buffer = sample(25);
        let encoded = buffer.encode().unwrap();
        let decoded = ExchangeBuffer::<String>::decode(&encoded).unwrap();

        assert_eq!(decoded.sender, PartitionId(2));
        assert_eq!(decoded.round, 17);
        assert_eq!(decoded.candidate_min, SimTime(10));
        assert_eq!(decoded.events.len(), 25);
        for (a, b) in buffer.events.iter().zip(&decoded.events) {
            assert_eq!(a.time(), b.time());
            assert_eq!(a.priority(), b.priority());
            assert_eq!(a.target(), b.target());
            assert_eq!(a.message(), b.message());
        }
    }

    #[test]
    fn test_empty_buffer_still_carries_horizon() {
        let buffer: ExchangeBuffer<u8> = ExchangeBuffer::new(PartitionId(0), 0, Vec::new(), SimTime::INFINITY);
        let decoded = ExchangeBuffer::<u8>::decode(&buffer.encode().unwrap()).unwrap();
        assert!(decoded.events.is_empty());
        assert_eq!(decoded.candidate_min, SimTime::INFINITY);
    }

    #[test]
    fn test_corrupted_payload_rejected() {
        let mut encoded = sample(4).encode().unwrap().to_vec();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(matches!(
            ExchangeBuffer::<String>::decode(&encoded),
            Err(WireError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_and_bad_header_rejected() {
        let encoded = sample(4).encode().unwrap();
        assert!(matches!(
            ExchangeBuffer::<String>::decode(&encoded[..10]),
            Err(WireError::Truncated { .. })
        ));
        assert!(matches!(
            ExchangeBuffer::<String>::decode(&encoded[..encoded.len() - 1]),
            Err(WireError::Truncated { .. })
        ));

        let mut bad_magic = encoded.to_vec();
        bad_magic[0] = b'X';
        assert_eq!(
            ExchangeBuffer::<String>::decode(&bad_magic),
            Err(WireError::InvalidMagic)
        );

        let mut bad_version = encoded.to_vec();
        bad_version[4] = 9;
        assert_eq!(
            ExchangeBuffer::<String>::decode(&bad_version),
            Err(WireError::UnsupportedVersion(9))
        );
    }

    #[test]
    fn test_payload_without_horizon_rejected() {
        // Hand-build a payload whose last frame is an event
        let event = Event::new(SimTime(1), "a", 5u8);
        let frames = vec![FrameRef::Event(&event)];
        let payload = bincode::serialize(&frames).unwrap();

        let mut buf = BytesMut::new();
        buf.put_slice(&EXCHANGE_MAGIC);
        buf.put_u8(EXCHANGE_VERSION);
        buf.put_u8(0);
        buf.put_u32_le(0);
        buf.put_u64_le(0);
        buf.put_u32_le(1);
        buf.put_u32_le(payload.len() as u32);
        buf.put_u32_le(crc32fast::hash(&payload));
        buf.put_slice(&payload);

        assert_eq!(
            ExchangeBuffer::<u8>::decode(&buf),
            Err(WireError::MissingHorizon)
        );
    }
}
