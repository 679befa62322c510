//! Core types for the Lightning DNS Seed
//!
//! A node record is what the seed knows about one Lightning peer: who it is,
//! where it listens, which network it belongs to and when it was last confirmed
//! by the upstream lightningd.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

// =============================================================================
// PRIMITIVE TYPES
// =============================================================================

/// 33-byte compressed secp256k1 public key identifying a Lightning node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub [u8; 33]);

impl NodeId {
    /// Parse a hex-encoded node id as returned by lightningd
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 33] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Short hex prefix for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Logical network a node belongs to (0 = bitcoin mainnet, 1 = testnet)
pub type Realm = u8;

/// Unix timestamp in seconds
pub type Timestamp = u64;

// =============================================================================
// ADDRESSES
// =============================================================================

/// IP version of an advertised address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Bit used for this family in a BOLT-10 `a<N>` address-type bitfield
    pub fn bolt10_bit(self) -> u32 {
        match self {
            AddressFamily::Ipv4 => 1 << 1,
            AddressFamily::Ipv6 => 1 << 2,
        }
    }
}

/// A reachable endpoint advertised by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn family(&self) -> AddressFamily {
        match self.ip {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }
}

// =============================================================================
// NODE RECORD
// =============================================================================

/// A discovered peer as stored in the network view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    /// Stable identity used for de-duplication
    pub node_id: NodeId,

    /// Advertised endpoints, in the order the upstream reported them
    pub addresses: Vec<NodeAddress>,

    /// Network the node was observed on
    pub realm: Realm,

    /// Last confirmation from the upstream source
    pub last_seen: Timestamp,
}

impl NodeRecord {
    pub fn new(node_id: NodeId, addresses: Vec<NodeAddress>, realm: Realm, last_seen: Timestamp) -> Self {
        Self {
            node_id,
            addresses,
            realm,
            last_seen,
        }
    }

    /// Check if the record has aged out of the freshness window
    pub fn is_stale(&self, now: Timestamp, window_secs: u64) -> bool {
        now.saturating_sub(self.last_seen) > window_secs
    }

    /// Whether any advertised address belongs to one of `families`
    pub fn has_any_family(&self, families: &[AddressFamily]) -> bool {
        self.addresses.iter().any(|a| families.contains(&a.family()))
    }

    /// First advertised address of the given family
    pub fn first_address(&self, family: AddressFamily) -> Option<&NodeAddress> {
        self.addresses.iter().find(|a| a.family() == family)
    }
}
