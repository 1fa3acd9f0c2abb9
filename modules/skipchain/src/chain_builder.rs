//! Genesis blocks and the nesting of chains under existing blocks

use crate::block_store::{BlockCommit, BlockStore};
use crate::signing::CollectiveSigning;
use crate::verification::VerifierRegistry;
use skipchain_common::{
    GenesisOptions, Roster, SkipBlock, SkipBlockHash, SkipchainError, SkipchainResult, VerifierId,
};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct ChainBuilder {
    store: Arc<dyn BlockStore>,
    signing: CollectiveSigning,
    verifiers: Arc<VerifierRegistry>,
}

impl ChainBuilder {
    pub fn new(
        store: Arc<dyn BlockStore>,
        signing: CollectiveSigning,
        verifiers: Arc<VerifierRegistry>,
    ) -> Self {
        Self {
            store,
            signing,
            verifiers,
        }
    }

    /// Start a root chain
    pub async fn create_genesis(
        &self,
        roster: Roster,
        options: &GenesisOptions,
        data: Vec<u8>,
    ) -> SkipchainResult<SkipBlock> {
        let block = SkipBlock::genesis(roster, options, data, None);
        self.commit_genesis(block, None).await
    }

    /// Start a chain nested under `parent`, which anchors it through its
    /// `child_sl`. A block anchors at most one chain.
    pub async fn create_child(
        &self,
        parent: &SkipBlockHash,
        roster: Roster,
        options: &GenesisOptions,
        data: Vec<u8>,
    ) -> SkipchainResult<SkipBlock> {
        let anchor = self.store.get(parent)?;
        if let Some(child) = anchor.child_sl {
            return Err(SkipchainError::ChildAlreadyExists {
                parent: *parent,
                child,
            });
        }
        let block = SkipBlock::genesis(roster, options, data, Some(*parent));
        self.commit_genesis(block, Some(*parent)).await
    }

    /// A root chain with an intermediate chain nested under its genesis.
    /// The returned root carries the anchor.
    pub async fn create_root_interm(
        &self,
        root_roster: Roster,
        interm_roster: Roster,
        base_height: u32,
        max_height: u32,
        verifiers: Vec<VerifierId>,
    ) -> SkipchainResult<(SkipBlock, SkipBlock)> {
        let options = GenesisOptions {
            base_height,
            max_height,
            verifiers,
        };
        let root = self.create_genesis(root_roster, &options, Vec::new()).await?;
        let interm = self.create_child(&root.hash, interm_roster, &options, Vec::new()).await?;
        let root = self.store.get(&root.hash)?;
        Ok((root, interm))
    }

    /// A data chain under the intermediate block `interm`, run by the same
    /// roster. Returns the anchoring block and the new genesis.
    pub async fn create_data(
        &self,
        interm: &SkipBlockHash,
        base_height: u32,
        max_height: u32,
        data: Vec<u8>,
        verifiers: Vec<VerifierId>,
    ) -> SkipchainResult<(SkipBlock, SkipBlock)> {
        let anchor = self.store.get(interm)?;
        let options = GenesisOptions {
            base_height,
            max_height,
            verifiers,
        };
        let genesis = self.create_child(interm, anchor.roster, &options, data).await?;
        let anchor = self.store.get(interm)?;
        Ok((anchor, genesis))
    }

    async fn commit_genesis(
        &self,
        mut block: SkipBlock,
        child_of: Option<SkipBlockHash>,
    ) -> SkipchainResult<SkipBlock> {
        self.verifiers.verify(&block, None)?;
        block.signature = Some(self.signing.sign(&block.roster, &block.commit_message()).await?);

        self.store.commit(BlockCommit {
            block: block.clone(),
            expected_head: None,
            forward_links: Vec::new(),
            child_of,
        })?;

        match child_of {
            Some(parent) => info!(
                chain = %block.hash.short(),
                parent = %parent.short(),
                "Nested chain created"
            ),
            None => info!(chain = %block.hash.short(), "Root chain created"),
        }
        Ok(block)
    }
}
