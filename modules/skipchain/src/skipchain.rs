//! Skipchain module
//! Stores collectively signed block chains, extends them through roster
//! endorsed proposals and answers update-chain queries over forward links

pub mod block_store;
pub mod chain_builder;
pub mod configuration;
pub mod forward_linker;
pub mod proposal;
pub mod roster_transition;
pub mod signing;
pub mod stores;
pub mod update_chain;
pub mod verification;

use anyhow::Result;
use config::Config;
use skipchain_common::{
    CollectiveSigner, GenesisOptions, Roster, SkipBlock, SkipBlockHash, SkipchainResult,
    VerifierId,
};
use std::sync::Arc;
use tracing::info;

use crate::block_store::BlockStore;
use crate::chain_builder::ChainBuilder;
use crate::configuration::SkipchainConfig;
use crate::proposal::ProposalProtocol;
use crate::signing::CollectiveSigning;
use crate::update_chain::UpdateChainResolver;
use crate::verification::VerifierRegistry;

/// One skipchain service: a block store and the components operating on it,
/// all sharing the same signing policy and verifier registry
#[derive(Clone)]
pub struct Skipchain {
    config: SkipchainConfig,
    store: Arc<dyn BlockStore>,
    verifiers: Arc<VerifierRegistry>,
    builder: ChainBuilder,
    proposals: ProposalProtocol,
    resolver: UpdateChainResolver,
}

impl Skipchain {
    pub fn new(
        config: SkipchainConfig,
        store: Arc<dyn BlockStore>,
        signer: Arc<dyn CollectiveSigner>,
        verifiers: Arc<VerifierRegistry>,
    ) -> Self {
        let signing =
            CollectiveSigning::new(signer, config.signing_threshold, config.signing_timeout());
        Self {
            builder: ChainBuilder::new(store.clone(), signing.clone(), verifiers.clone()),
            proposals: ProposalProtocol::new(store.clone(), signing.clone(), verifiers.clone()),
            resolver: UpdateChainResolver::new(store.clone(), signing),
            config,
            store,
            verifiers,
        }
    }

    /// Load configuration over the module defaults and open the configured
    /// store
    pub fn from_config(config: &Config, signer: Arc<dyn CollectiveSigner>) -> Result<Self> {
        let config = SkipchainConfig::try_load(config)?;
        let store = stores::open_store(&config)?;
        info!(
            store = ?config.store,
            threshold = ?config.signing_threshold,
            base_height = config.base_height,
            max_height = config.max_height,
            "Skipchain service ready"
        );
        Ok(Self::new(config, store, signer, Arc::new(VerifierRegistry::new())))
    }

    pub fn config(&self) -> &SkipchainConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    pub fn verifiers(&self) -> &VerifierRegistry {
        &self.verifiers
    }

    /// Chain options with the configured skip-list shape
    pub fn genesis_options(&self, verifiers: Vec<VerifierId>) -> GenesisOptions {
        self.config.genesis_options(verifiers)
    }

    pub async fn create_genesis(
        &self,
        roster: Roster,
        options: &GenesisOptions,
        data: Vec<u8>,
    ) -> SkipchainResult<SkipBlock> {
        self.builder.create_genesis(roster, options, data).await
    }

    pub async fn create_child(
        &self,
        parent: &SkipBlockHash,
        roster: Roster,
        options: &GenesisOptions,
        data: Vec<u8>,
    ) -> SkipchainResult<SkipBlock> {
        self.builder.create_child(parent, roster, options, data).await
    }

    pub async fn create_root_interm(
        &self,
        root_roster: Roster,
        interm_roster: Roster,
        verifiers: Vec<VerifierId>,
    ) -> SkipchainResult<(SkipBlock, SkipBlock)> {
        self.builder
            .create_root_interm(
                root_roster,
                interm_roster,
                self.config.base_height,
                self.config.max_height,
                verifiers,
            )
            .await
    }

    pub async fn create_data(
        &self,
        interm: &SkipBlockHash,
        data: Vec<u8>,
        verifiers: Vec<VerifierId>,
    ) -> SkipchainResult<(SkipBlock, SkipBlock)> {
        self.builder
            .create_data(
                interm,
                self.config.base_height,
                self.config.max_height,
                data,
                verifiers,
            )
            .await
    }

    pub async fn propose(
        &self,
        latest: &SkipBlockHash,
        data: Vec<u8>,
        roster: Option<Roster>,
    ) -> SkipchainResult<SkipBlock> {
        self.proposals.propose(latest, data, roster).await
    }

    pub async fn propose_data(
        &self,
        latest: &SkipBlockHash,
        data: Vec<u8>,
    ) -> SkipchainResult<SkipBlock> {
        self.proposals.propose_data(latest, data).await
    }

    pub async fn propose_roster(
        &self,
        latest: &SkipBlockHash,
        roster: Roster,
    ) -> SkipchainResult<SkipBlock> {
        self.proposals.propose_roster(latest, roster).await
    }

    pub fn get_block(&self, hash: &SkipBlockHash) -> SkipchainResult<SkipBlock> {
        self.store.get(hash)
    }

    pub fn head(&self, chain: &SkipBlockHash) -> SkipchainResult<SkipBlock> {
        self.store.head_block(chain)
    }

    pub fn get_update_chain(&self, start: &SkipBlockHash) -> SkipchainResult<Vec<SkipBlock>> {
        self.resolver.get_update_chain(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::LocalCollectiveSigner;
    use skipchain_common::SkipchainError;
    use skipchain_test_utils::fixture_roster;

    fn service() -> (Roster, Skipchain) {
        let (keys, roster) = fixture_roster(3);
        let skipchain =
            Skipchain::from_config(&Config::default(), Arc::new(LocalCollectiveSigner::new(keys)))
                .unwrap();
        (roster, skipchain)
    }

    #[tokio::test]
    async fn genesis_and_one_update() {
        let (roster, skipchain) = service();
        let options = skipchain.genesis_options(vec![VerifierId::structure()]);
        let genesis = skipchain.create_genesis(roster, &options, b"first".to_vec()).await.unwrap();
        let update = skipchain.propose_data(&genesis.hash, b"second".to_vec()).await.unwrap();

        let chain = skipchain.get_update_chain(&genesis.hash).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].hash, update.hash);
        assert_eq!(chain[1].data, b"second");
        assert_eq!(skipchain.head(&genesis.hash).unwrap().hash, update.hash);
    }

    #[tokio::test]
    async fn nested_data_chain_round_trips_payload() {
        let (roster, skipchain) = service();
        let (root, interm) = skipchain
            .create_root_interm(roster.clone(), roster, vec![VerifierId::none()])
            .await
            .unwrap();
        let payload = vec![0u8, 1, 2, 255, 254];
        let (interm_after, data) = skipchain
            .create_data(&interm.hash, payload.clone(), vec![VerifierId::structure()])
            .await
            .unwrap();

        assert_eq!(skipchain.get_block(&root.hash).unwrap().child_sl, Some(interm.hash));
        assert_eq!(interm_after.child_sl, Some(data.hash));
        assert_eq!(skipchain.get_block(&data.hash).unwrap().data, payload);
    }

    #[tokio::test]
    async fn roster_change_then_stale_proposal() {
        let (roster, skipchain) = service();
        let options = skipchain.genesis_options(vec![VerifierId::structure()]);
        let genesis = skipchain.create_genesis(roster.clone(), &options, Vec::new()).await.unwrap();

        let smaller = roster.truncated(2);
        let changed = skipchain.propose_roster(&genesis.hash, smaller.clone()).await.unwrap();
        assert_eq!(changed.roster, smaller);
        assert!(changed.roster_transition.is_some());

        let stale = skipchain.propose_data(&genesis.hash, b"late".to_vec()).await.unwrap_err();
        assert!(stale.is_fork_conflict());

        let next = skipchain.propose_data(&changed.hash, b"next".to_vec()).await.unwrap();
        let previous = skipchain.get_block(&changed.hash).unwrap();
        assert_eq!(previous.forward_links[0].to, next.hash);
    }

    #[tokio::test]
    async fn missing_head_is_not_found() {
        let (_, skipchain) = service();
        let chain = SkipBlockHash::new([4; 32]);
        assert_eq!(
            skipchain.head(&chain).map(|block| block.hash),
            Err(SkipchainError::NotFound { hash: chain })
        );
    }
}
