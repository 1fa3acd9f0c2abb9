//! Collective signatures and the signing collaborator contract
//!
//! The signing protocol itself lives outside this crate. All the skipchain
//! needs is a round-trip that either returns a signature reaching the
//! threshold or an error, never a partial result.

use crate::crypto::Signature;
use crate::roster::Roster;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// How many roster members must take part for a collective signature to count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SigningThreshold {
    /// Every member
    #[default]
    All,
    /// At least two thirds, rounded up
    TwoThirds,
    /// Strictly more than half
    Majority,
}

impl SigningThreshold {
    /// Number of signatures required from a roster of `members`
    pub fn required(&self, members: usize) -> usize {
        match self {
            SigningThreshold::All => members,
            SigningThreshold::TwoThirds => (2 * members).div_ceil(3),
            SigningThreshold::Majority => members / 2 + 1,
        }
    }
}

/// One optional signature per roster member, in roster order
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
pub struct CollectiveSignature {
    #[n(0)]
    pub signatures: Vec<Option<Signature>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("empty roster cannot sign")]
    EmptyRoster,

    #[error("signature has {got} slots for a roster of {expected}")]
    RosterMismatch { expected: usize, got: usize },

    #[error("invalid signature from member {index}")]
    InvalidSignature { index: usize },

    #[error("{signed} of {required} required signatures")]
    BelowThreshold { signed: usize, required: usize },
}

impl CollectiveSignature {
    /// Number of members that contributed
    pub fn signers(&self) -> usize {
        self.signatures.iter().filter(|slot| slot.is_some()).count()
    }

    /// Check every contributed signature against its member's key and the
    /// contributor count against `threshold`
    pub fn verify(
        &self,
        roster: &Roster,
        message: &[u8],
        threshold: SigningThreshold,
    ) -> Result<(), SignatureError> {
        if roster.is_empty() {
            return Err(SignatureError::EmptyRoster);
        }
        if self.signatures.len() != roster.len() {
            return Err(SignatureError::RosterMismatch {
                expected: roster.len(),
                got: self.signatures.len(),
            });
        }

        for (index, (slot, key)) in self.signatures.iter().zip(roster.public_keys()).enumerate() {
            if let Some(signature) = slot {
                if !key.verify(message, signature) {
                    return Err(SignatureError::InvalidSignature { index });
                }
            }
        }

        let signed = self.signers();
        let required = threshold.required(roster.len());
        if signed < required {
            return Err(SignatureError::BelowThreshold { signed, required });
        }
        Ok(())
    }
}

/// Failure of a signing round
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    #[error("signing round timed out after {0:?}")]
    Timeout(Duration),

    #[error("insufficient participation: {signed} of {required}")]
    Insufficient { signed: usize, required: usize },

    #[error("signing round failed: {0}")]
    Round(String),
}

/// The collective-signing collaborator.
///
/// Implementations run one round over `message` with the members of
/// `roster` and must return an error, not a partial signature, when
/// participation stays below `threshold` or `timeout` expires.
#[async_trait]
pub trait CollectiveSigner: Send + Sync {
    async fn collective_sign(
        &self,
        roster: &Roster,
        message: &[u8],
        threshold: SigningThreshold,
        timeout: Duration,
    ) -> Result<CollectiveSignature, SigningError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::roster::ServerIdentity;

    fn members(count: u8) -> (Vec<KeyPair>, Roster) {
        let pairs: Vec<KeyPair> = (1..=count).map(|seed| KeyPair::from_seed(&[seed; 32])).collect();
        let roster = Roster::new(
            pairs.iter().map(|pair| ServerIdentity::new(pair.public(), "local")).collect(),
        );
        (pairs, roster)
    }

    #[test]
    fn thresholds() {
        assert_eq!(SigningThreshold::All.required(5), 5);
        assert_eq!(SigningThreshold::TwoThirds.required(5), 4);
        assert_eq!(SigningThreshold::TwoThirds.required(3), 2);
        assert_eq!(SigningThreshold::Majority.required(4), 3);
        assert_eq!(SigningThreshold::Majority.required(5), 3);
    }

    #[test]
    fn full_signature_verifies() {
        let (pairs, roster) = members(3);
        let signature = CollectiveSignature {
            signatures: pairs.iter().map(|pair| Some(pair.sign(b"msg"))).collect(),
        };
        assert_eq!(signature.verify(&roster, b"msg", SigningThreshold::All), Ok(()));
        assert_eq!(
            signature.verify(&roster, b"other", SigningThreshold::All),
            Err(SignatureError::InvalidSignature { index: 0 })
        );
    }

    #[test]
    fn missing_member_depends_on_threshold() {
        let (pairs, roster) = members(3);
        let mut signatures: Vec<Option<Signature>> =
            pairs.iter().map(|pair| Some(pair.sign(b"msg"))).collect();
        signatures[1] = None;
        let signature = CollectiveSignature { signatures };
        assert_eq!(
            signature.verify(&roster, b"msg", SigningThreshold::All),
            Err(SignatureError::BelowThreshold {
                signed: 2,
                required: 3
            })
        );
        assert_eq!(signature.verify(&roster, b"msg", SigningThreshold::Majority), Ok(()));
    }

    #[test]
    fn slot_count_must_match_roster() {
        let (pairs, roster) = members(3);
        let signature = CollectiveSignature {
            signatures: vec![Some(pairs[0].sign(b"msg"))],
        };
        assert_eq!(
            signature.verify(&roster, b"msg", SigningThreshold::Majority),
            Err(SignatureError::RosterMismatch {
                expected: 3,
                got: 1
            })
        );
    }
}
