//! Roster changes must be endorsed by the roster being replaced

use crate::signing::CollectiveSigning;
use skipchain_common::{
    roster_transition_message, CollectiveSignature, Roster, SkipBlockHash, SkipchainError,
    SkipchainResult,
};
use tracing::{info, warn};

#[derive(Clone)]
pub struct RosterTransition {
    signing: CollectiveSigning,
}

impl RosterTransition {
    pub fn new(signing: CollectiveSigning) -> Self {
        Self { signing }
    }

    /// Ask `old` to endorse `new` as the roster of the block following
    /// `predecessor`
    pub async fn authorize(
        &self,
        old: &Roster,
        new: &Roster,
        predecessor: &SkipBlockHash,
    ) -> SkipchainResult<CollectiveSignature> {
        if new.is_empty() {
            return Err(SkipchainError::RosterTransitionUnauthorized {
                reason: "new roster is empty".to_string(),
            });
        }

        let message = roster_transition_message(old, new, predecessor);
        let signature = self.signing.sign(old, &message).await.map_err(|error| {
            warn!(
                from = %old.id().short(),
                to = %new.id().short(),
                "Roster transition refused: {error}"
            );
            SkipchainError::RosterTransitionUnauthorized {
                reason: error.to_string(),
            }
        })?;

        info!(
            from = %old.id().short(),
            to = %new.id().short(),
            members = new.len(),
            "Roster transition endorsed"
        );
        Ok(signature)
    }

    /// Check an endorsement carried by a block
    pub fn verify(
        &self,
        old: &Roster,
        new: &Roster,
        predecessor: &SkipBlockHash,
        signature: &CollectiveSignature,
    ) -> SkipchainResult<()> {
        let message = roster_transition_message(old, new, predecessor);
        self.signing.verify(old, &message, signature).map_err(|error| {
            SkipchainError::RosterTransitionUnauthorized {
                reason: error.to_string(),
            }
        })
    }
}
