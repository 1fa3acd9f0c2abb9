//! Collective signing: the in-process signer and the threshold/timeout policy
//! every signing round goes through

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use skipchain_common::{
    CollectiveSignature, CollectiveSigner, KeyPair, PublicKey, Roster, Signature, SignatureError,
    SigningError, SigningThreshold, SkipchainError, SkipchainResult,
};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, warn};

/// Signer holding the private keys of the roster members run by this
/// process.
///
/// Members can be taken offline and every round can be slowed down, which is
/// how tests reproduce partial participation, timeouts and proposal races.
#[derive(Default)]
pub struct LocalCollectiveSigner {
    keys: DashMap<PublicKey, KeyPair>,
    offline: DashSet<PublicKey>,
    latency_ms: AtomicU64,
}

impl LocalCollectiveSigner {
    pub fn new(keys: impl IntoIterator<Item = KeyPair>) -> Self {
        let signer = Self::default();
        for key in keys {
            signer.add_key(key);
        }
        signer
    }

    pub fn add_key(&self, key: KeyPair) {
        self.keys.insert(key.public(), key);
    }

    pub fn set_offline(&self, member: PublicKey, offline: bool) {
        if offline {
            self.offline.insert(member);
        } else {
            self.offline.remove(&member);
        }
    }

    /// Delay applied to every round before members answer
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    fn answer(&self, member: &PublicKey, message: &[u8]) -> Option<Signature> {
        if self.offline.contains(member) {
            return None;
        }
        self.keys.get(member).map(|key| key.sign(message))
    }

    async fn round(
        &self,
        roster: &Roster,
        message: &[u8],
        threshold: SigningThreshold,
    ) -> Result<CollectiveSignature, SigningError> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let signature = CollectiveSignature {
            signatures: roster.public_keys().map(|member| self.answer(member, message)).collect(),
        };
        let signed = signature.signers();
        let required = threshold.required(roster.len());
        if roster.is_empty() || signed < required {
            return Err(SigningError::Insufficient { signed, required });
        }
        Ok(signature)
    }
}

#[async_trait]
impl CollectiveSigner for LocalCollectiveSigner {
    async fn collective_sign(
        &self,
        roster: &Roster,
        message: &[u8],
        threshold: SigningThreshold,
        timeout: Duration,
    ) -> Result<CollectiveSignature, SigningError> {
        tokio::time::timeout(timeout, self.round(roster, message, threshold))
            .await
            .map_err(|_| SigningError::Timeout(timeout))?
    }
}

/// Signing policy shared by every component: which collaborator to ask, how
/// many members must answer and how long to wait
#[derive(Clone)]
pub struct CollectiveSigning {
    signer: Arc<dyn CollectiveSigner>,
    threshold: SigningThreshold,
    timeout: Duration,
}

impl CollectiveSigning {
    pub fn new(
        signer: Arc<dyn CollectiveSigner>,
        threshold: SigningThreshold,
        timeout: Duration,
    ) -> Self {
        Self {
            signer,
            threshold,
            timeout,
        }
    }

    pub fn threshold(&self) -> SigningThreshold {
        self.threshold
    }

    /// Run one round over `message` with `roster`.
    ///
    /// The result is checked before it is returned: a collaborator that hands
    /// back a short or invalid signature is treated like one that failed.
    pub async fn sign(
        &self,
        roster: &Roster,
        message: &[u8],
    ) -> SkipchainResult<CollectiveSignature> {
        let round = self.signer.collective_sign(roster, message, self.threshold, self.timeout);
        let signature = match tokio::time::timeout(self.timeout, round).await {
            Ok(Ok(signature)) => signature,
            Ok(Err(error)) => {
                warn!(roster = %roster.id().short(), "Signing round failed: {error}");
                return Err(SkipchainError::SignatureThresholdNotMet {
                    timed_out: matches!(error, SigningError::Timeout(_)),
                    reason: error.to_string(),
                });
            }
            Err(_) => {
                warn!(roster = %roster.id().short(), "Signing round timed out");
                return Err(SkipchainError::SignatureThresholdNotMet {
                    reason: SigningError::Timeout(self.timeout).to_string(),
                    timed_out: true,
                });
            }
        };

        self.verify(roster, message, &signature).map_err(|error| {
            SkipchainError::SignatureThresholdNotMet {
                reason: error.to_string(),
                timed_out: false,
            }
        })?;
        debug!(
            roster = %roster.id().short(),
            signers = signature.signers(),
            "Collective signature gathered"
        );
        Ok(signature)
    }

    pub fn verify(
        &self,
        roster: &Roster,
        message: &[u8],
        signature: &CollectiveSignature,
    ) -> Result<(), SignatureError> {
        signature.verify(roster, message, self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skipchain_test_utils::fixture_roster;

    fn signing(
        signer: Arc<LocalCollectiveSigner>,
        threshold: SigningThreshold,
    ) -> CollectiveSigning {
        CollectiveSigning::new(signer, threshold, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn every_member_signs() {
        let (keys, roster) = fixture_roster(3);
        let signer = Arc::new(LocalCollectiveSigner::new(keys));
        let signature =
            signing(signer, SigningThreshold::All).sign(&roster, b"message").await.unwrap();
        assert_eq!(signature.signers(), 3);
        assert!(signature.verify(&roster, b"message", SigningThreshold::All).is_ok());
    }

    #[tokio::test]
    async fn offline_member_depends_on_threshold() {
        let (keys, roster) = fixture_roster(3);
        let signer = Arc::new(LocalCollectiveSigner::new(keys));
        signer.set_offline(roster.list[2].public_key, true);

        let error = signing(signer.clone(), SigningThreshold::All)
            .sign(&roster, b"message")
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            SkipchainError::SignatureThresholdNotMet {
                timed_out: false,
                ..
            }
        ));

        let signature = signing(signer, SigningThreshold::Majority)
            .sign(&roster, b"message")
            .await
            .unwrap();
        assert_eq!(signature.signers(), 2);
        assert_eq!(signature.signatures[2], None);
    }

    #[tokio::test]
    async fn unknown_members_do_not_sign() {
        let (keys, roster) = fixture_roster(2);
        let signer = Arc::new(LocalCollectiveSigner::new(keys.into_iter().take(1)));
        let result = signing(signer, SigningThreshold::All).sign(&roster, b"message").await;
        assert!(result.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn slow_round_times_out() {
        let (keys, roster) = fixture_roster(2);
        let signer = Arc::new(LocalCollectiveSigner::new(keys));
        signer.set_latency(Duration::from_secs(2));
        let error = signing(signer, SigningThreshold::All)
            .sign(&roster, b"message")
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            SkipchainError::SignatureThresholdNotMet {
                timed_out: true,
                ..
            }
        ));
    }
}
