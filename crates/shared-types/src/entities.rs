//! Core vocabulary types shared across subsystems.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 32-byte digest, the universal identifier format on this network.
pub type Hash = [u8; 32];

/// 64-bit request identifier.
///
/// Assigned when a request or insert enters the network and carried on every
/// message belonging to that exchange, so replies can be matched regardless
/// of arrival order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(pub u64);

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalized routing coordinate on the [0,1) ring.
///
/// Keys and nodes both map onto the ring; routing greedily reduces the
/// circular distance between a node's location and the key's location.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Location(f64);

impl Location {
    /// Wraps an arbitrary coordinate onto [0,1).
    pub fn new(value: f64) -> Self {
        Self(value.rem_euclid(1.0))
    }

    /// Derives a location from a digest: the first eight bytes interpreted as
    /// a big-endian integer, scaled into [0,1).
    pub fn from_hash(hash: &Hash) -> Self {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash[..8]);
        // Keep 53 bits so the quotient is exact and strictly below 1.0.
        let bits = u64::from_be_bytes(prefix) >> 11;
        Self(bits as f64 / (1u64 << 53) as f64)
    }

    /// Circular distance to another location, in [0, 0.5].
    pub fn distance(self, other: Location) -> f64 {
        let direct = (self.0 - other.0).abs();
        direct.min(1.0 - direct)
    }

    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.0)
    }
}
