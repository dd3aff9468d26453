//! # Core Identifier Types
//!
//! Strongly typed identifiers shared by every Meridian component. Peers and
//! entities are both addressed by random UUIDs, wrapped in newtypes so that a
//! peer id can never be passed where an entity id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Peer and Entity Identifiers
// ============================================================================

/// Unique identifier for a host or a connected peer.
///
/// Every host generates one id at construction. The id travels in the
/// handshake so that both ends of a link know who they are talking to, and it
/// is stamped as the `sender_id` of every message received over that link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub Uuid);

impl PeerId {
    /// Creates a new random peer id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Unique identifier for a replicated entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Creates a new random entity id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ============================================================================
// Authority Roles
// ============================================================================

/// Authority role of the local side of a link.
///
/// The master side owns entity state and is the only side allowed to spawn,
/// mutate and send components. The slave side mirrors what it is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Master,
    Slave,
}

impl Role {
    /// Whether this role owns authoritative state.
    pub fn is_authoritative(self) -> bool {
        matches!(self, Role::Master)
    }

    /// The role implied for the other end of a link.
    pub fn opposite(self) -> Role {
        match self {
            Role::Master => Role::Slave,
            Role::Slave => Role::Master,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Slave => write!(f, "slave"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "master" => Ok(Role::Master),
            "slave" => Ok(Role::Slave),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_parses_its_own_display() {
        let id = PeerId::new();
        let parsed: PeerId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<PeerId>().is_err());
    }

    #[test]
    fn roles_are_complementary() {
        assert!(Role::Master.is_authoritative());
        assert!(!Role::Slave.is_authoritative());
        assert_eq!(Role::Master.opposite(), Role::Slave);
        assert_eq!("Slave".parse::<Role>().unwrap(), Role::Slave);
    }
}
