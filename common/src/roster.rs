//! Rosters: the ordered authority sets that sign blocks

use crate::crypto::PublicKey;
use crate::hash::RosterId;
use serde::{Deserialize, Serialize};

/// A single authority in a roster
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, minicbor::Encode, minicbor::Decode,
)]
pub struct ServerIdentity {
    #[n(0)]
    pub public_key: PublicKey,
    #[n(1)]
    pub address: String,
    #[n(2)]
    pub description: String,
}

impl ServerIdentity {
    pub fn new(public_key: PublicKey, address: impl Into<String>) -> Self {
        Self {
            public_key,
            address: address.into(),
            description: String::new(),
        }
    }
}

/// Ordered set of authorities valid for signing a chain segment.
///
/// Order matters: collective signatures carry one slot per member in roster
/// order.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    minicbor::Encode,
    minicbor::Decode,
)]
pub struct Roster {
    #[n(0)]
    pub list: Vec<ServerIdentity>,
}

impl Roster {
    /// Build a roster, dropping any repeated public key after its first
    /// occurrence
    pub fn new(list: Vec<ServerIdentity>) -> Self {
        let mut unique: Vec<ServerIdentity> = Vec::with_capacity(list.len());
        for identity in list {
            if !unique.iter().any(|known| known.public_key == identity.public_key) {
                unique.push(identity);
            }
        }
        Self { list: unique }
    }

    /// Digest of the ordered member keys
    pub fn id(&self) -> RosterId {
        RosterId::digest(self.list.iter().map(|identity| identity.public_key))
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn public_keys(&self) -> impl Iterator<Item = &PublicKey> {
        self.list.iter().map(|identity| &identity.public_key)
    }

    /// Position of `key` in the roster, if it is a member
    pub fn position(&self, key: &PublicKey) -> Option<usize> {
        self.list.iter().position(|identity| &identity.public_key == key)
    }

    /// A roster keeping only the first `count` members
    pub fn truncated(&self, count: usize) -> Self {
        Self {
            list: self.list.iter().take(count).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn identity(seed: u8) -> ServerIdentity {
        ServerIdentity::new(
            KeyPair::from_seed(&[seed; 32]).public(),
            format!("tcp://127.0.0.1:{}", 7000 + seed as u16),
        )
    }

    #[test]
    fn duplicate_members_are_dropped() {
        let roster = Roster::new(vec![identity(1), identity(2), identity(1)]);
        assert_eq!(roster.len(), 2);
        assert_eq!(roster.position(&identity(2).public_key), Some(1));
    }

    #[test]
    fn id_depends_on_order() {
        let forward = Roster::new(vec![identity(1), identity(2)]);
        let backward = Roster::new(vec![identity(2), identity(1)]);
        assert_ne!(forward.id(), backward.id());
        assert_eq!(forward.id(), Roster::new(vec![identity(1), identity(2)]).id());
    }

    #[test]
    fn truncated_keeps_prefix() {
        let roster = Roster::new(vec![identity(1), identity(2), identity(3)]);
        let smaller = roster.truncated(2);
        assert_eq!(smaller.list, roster.list[..2].to_vec());
    }
}
