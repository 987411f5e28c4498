use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// Simulation timestamp in integer ticks.
///
/// `SimTime::INFINITY` doubles as the "nothing pending" horizon of an empty
/// queue or an empty outgoing buffer. Arithmetic saturates so the sentinel
/// survives `global_min + lookahead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimTime(pub u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);
    pub const INFINITY: SimTime = SimTime(u64::MAX);

    pub fn from_ticks(ticks: u64) -> Self {
        SimTime(ticks)
    }

    pub fn as_ticks(&self) -> u64 {
        self.0
    }

    pub fn is_infinite(&self) -> bool {
        *self == SimTime::INFINITY
    }
}

impl Add<u64> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: u64) -> Self::Output {
        SimTime(self.0.saturating_add(rhs))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            write!(f, "inf")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
