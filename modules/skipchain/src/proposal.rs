//! Extending a chain: the only path by which a chain grows past genesis.
//!
//! A proposal is built, endorsed, verified and signed entirely off to the
//! side. It touches the store once, through an atomic commit guarded by a
//! compare-and-set on the chain head, so a proposal that fails at any step
//! leaves nothing behind.

use crate::block_store::{BlockCommit, BlockStore};
use crate::forward_linker::ForwardLinker;
use crate::roster_transition::RosterTransition;
use crate::signing::CollectiveSigning;
use crate::verification::VerifierRegistry;
use skipchain_common::{Roster, SkipBlock, SkipBlockHash, SkipchainError, SkipchainResult};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ProposalProtocol {
    store: Arc<dyn BlockStore>,
    signing: CollectiveSigning,
    verifiers: Arc<VerifierRegistry>,
    linker: ForwardLinker,
    transition: RosterTransition,
}

impl ProposalProtocol {
    pub fn new(
        store: Arc<dyn BlockStore>,
        signing: CollectiveSigning,
        verifiers: Arc<VerifierRegistry>,
    ) -> Self {
        Self {
            linker: ForwardLinker::new(store.clone(), signing.clone()),
            transition: RosterTransition::new(signing.clone()),
            store,
            signing,
            verifiers,
        }
    }

    /// Append a block after `predecessor`, optionally handing the chain to
    /// `new_roster`.
    ///
    /// The head check up front only saves a wasted signing round; losing a
    /// race after it still ends in `ForkConflict` at commit.
    pub async fn propose(
        &self,
        predecessor: &SkipBlockHash,
        data: Vec<u8>,
        new_roster: Option<Roster>,
    ) -> SkipchainResult<SkipBlock> {
        let previous = self.store.get(predecessor)?;
        let chain = previous.chain_id();
        match self.store.head(&chain)? {
            Some(head) if head == previous.hash => {}
            head => {
                return Err(SkipchainError::NotLatest {
                    hash: previous.hash,
                    head: head.unwrap_or(chain),
                })
            }
        }

        let roster = new_roster.unwrap_or_else(|| previous.roster.clone());
        let mut candidate = previous.successor(data, roster);
        candidate.back_links = self.linker.back_links(&candidate)?;

        if candidate.roster != previous.roster {
            let endorsement = self
                .transition
                .authorize(&previous.roster, &candidate.roster, &previous.hash)
                .await?;
            candidate.roster_transition = Some(endorsement);
        }

        self.verifiers.verify(&candidate, Some(&previous))?;

        candidate.seal();
        candidate.signature =
            Some(self.signing.sign(&candidate.roster, &candidate.commit_message()).await?);
        let forward_links = self.linker.sign_links(&candidate).await?;

        let commit = BlockCommit {
            block: candidate.clone(),
            expected_head: Some(previous.hash),
            forward_links,
            child_of: None,
        };
        if let Err(error) = self.store.commit(commit) {
            if error.is_fork_conflict() {
                warn!(
                    chain = %chain.short(),
                    index = candidate.index,
                    "Lost the race for the chain head: {error}"
                );
            }
            return Err(error);
        }

        info!(
            chain = %chain.short(),
            index = candidate.index,
            hash = %candidate.hash.short(),
            roster_change = candidate.roster_transition.is_some(),
            "Block committed"
        );
        Ok(candidate)
    }

    /// New payload, same roster
    pub async fn propose_data(
        &self,
        latest: &SkipBlockHash,
        data: Vec<u8>,
    ) -> SkipchainResult<SkipBlock> {
        self.propose(latest, data, None).await
    }

    /// New roster; the payload of `latest` is carried over
    pub async fn propose_roster(
        &self,
        latest: &SkipBlockHash,
        roster: Roster,
    ) -> SkipchainResult<SkipBlock> {
        let data = self.store.get(latest)?.data;
        self.propose(latest, data, Some(roster)).await
    }

    /// Check the endorsement a block carries for its roster
    pub fn verify_transition(
        &self,
        previous: &SkipBlock,
        block: &SkipBlock,
    ) -> SkipchainResult<()> {
        match &block.roster_transition {
            None if block.roster == previous.roster => Ok(()),
            None => Err(SkipchainError::RosterTransitionUnauthorized {
                reason: format!("block {} changes roster without endorsement", block.hash),
            }),
            Some(signature) => {
                self.transition.verify(&previous.roster, &block.roster, &previous.hash, signature)
            }
        }
    }
}
