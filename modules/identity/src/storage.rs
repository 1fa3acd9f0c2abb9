//! Persisted state of the identity service

use serde::{Deserialize, Serialize};
use skipchain_common::{
    KeyPair, PublicKey, Roster, Signature, SkipBlock, SkipchainError, SkipchainResult,
};
use std::collections::{BTreeMap, BTreeSet};

/// One version of an identity: the devices that control it and the
/// key/value data they agreed on. Carried on the identity's data chain as a
/// CBOR block payload.
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
#[serde(rename_all = "kebab-case")]
pub struct Data {
    /// Number of device votes a new version needs
    #[n(0)]
    pub threshold: u32,
    #[n(1)]
    pub devices: BTreeMap<String, PublicKey>,
    #[n(2)]
    pub storage: BTreeMap<String, String>,
    /// Device name to its signature over the proposed version
    #[n(3)]
    pub votes: BTreeMap<String, Signature>,
    #[n(4)]
    pub roster: Option<Roster>,
}

impl Data {
    pub fn to_payload(&self) -> SkipchainResult<Vec<u8>> {
        minicbor::to_vec(self).map_err(SkipchainError::storage)
    }

    pub fn from_payload(payload: &[u8]) -> SkipchainResult<Self> {
        minicbor::decode(payload).map_err(|e| SkipchainError::CorruptStorage {
            reason: format!("identity payload: {e}"),
        })
    }
}

/// Who may create identities on this service
#[derive(Debug, Clone, PartialEq, Eq, Default, minicbor::Encode, minicbor::Decode)]
pub struct AuthData {
    #[n(0)]
    pub pins: BTreeSet<String>,
    #[n(1)]
    pub keys: Vec<PublicKey>,
}

/// State of one identity
#[derive(Debug, Clone, PartialEq, Eq, Default, minicbor::Encode, minicbor::Decode)]
pub struct IdBlock {
    #[n(0)]
    pub latest: Option<Data>,
    #[n(1)]
    pub proposed: Option<Data>,
    #[n(2)]
    pub latest_skipblock: Option<SkipBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, minicbor::Encode, minicbor::Decode)]
pub struct Storage {
    /// Identities by the hex id of their data chain
    #[n(0)]
    pub identities: BTreeMap<String, IdBlock>,
    /// Key the service authenticates new blocks with
    #[n(1)]
    pub skipchain_key_pair: Option<KeyPair>,
    #[n(2)]
    pub auth: Option<AuthData>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use skipchain_test_utils::fixture_roster;

    #[test]
    fn payload_is_byte_identical_after_decode() {
        let (keys, roster) = fixture_roster(2);
        let data = Data {
            threshold: 2,
            devices: [
                ("laptop".to_string(), keys[0].public()),
                ("phone".to_string(), keys[1].public()),
            ]
            .into(),
            storage: [("ssh".to_string(), "ssh-ed25519 AAAA".to_string())].into(),
            votes: [("laptop".to_string(), keys[0].sign(b"version 1"))].into(),
            roster: Some(roster),
        };
        let payload = data.to_payload().unwrap();
        let decoded = Data::from_payload(&payload).unwrap();
        assert_eq!(decoded, data);
        assert_eq!(decoded.to_payload().unwrap(), payload);
    }

    #[test]
    fn garbage_payload_is_corrupt() {
        assert!(matches!(
            Data::from_payload(&[0xff, 0x01]),
            Err(SkipchainError::CorruptStorage { .. })
        ));
    }

    #[test]
    fn data_serialises_with_hex_keys() {
        let (keys, _) = fixture_roster(1);
        let data = Data {
            threshold: 1,
            devices: [("laptop".to_string(), keys[0].public())].into(),
            ..Data::default()
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["devices"]["laptop"], keys[0].public().to_string());
        assert_eq!(json["threshold"], 1);
    }
}
