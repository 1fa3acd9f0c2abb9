//! Skip-list linking: which ancestors a new block links back to, and the
//! signed forward links those ancestors receive in return

use crate::block_store::BlockStore;
use crate::signing::CollectiveSigning;
use futures::future::try_join_all;
use skipchain_common::{
    back_link_indices, ForwardLink, SkipBlock, SkipBlockHash, SkipchainError, SkipchainResult,
};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct ForwardLinker {
    store: Arc<dyn BlockStore>,
    signing: CollectiveSigning,
}

impl ForwardLinker {
    pub fn new(store: Arc<dyn BlockStore>, signing: CollectiveSigning) -> Self {
        Self { store, signing }
    }

    /// Hashes of the blocks `candidate` links back to, level 0 first.
    ///
    /// Level `k` names the block `base_height^k` positions earlier, which is
    /// always a block of height greater than `k`.
    pub fn back_links(&self, candidate: &SkipBlock) -> SkipchainResult<Vec<SkipBlockHash>> {
        let chain = candidate.chain_id();
        back_link_indices(candidate.index, candidate.height, candidate.base_height)
            .into_iter()
            .map(|index| {
                self.store
                    .get_by_index(&chain, index)?
                    .map(|block| block.hash)
                    .ok_or_else(|| {
                        SkipchainError::storage(format!("chain {chain} has no block {index}"))
                    })
            })
            .collect()
    }

    /// Forward links the ancestors of a sealed candidate must receive, each
    /// signed by the roster of the ancestor holding it
    pub async fn sign_links(
        &self,
        candidate: &SkipBlock,
    ) -> SkipchainResult<Vec<(SkipBlockHash, ForwardLink)>> {
        let rounds = candidate.back_links.iter().enumerate().map(|(level, ancestor)| {
            let level = level as u32;
            async move {
                let ancestor = self.store.get(ancestor)?;
                if let Some(existing) = ancestor.forward_link(level) {
                    // Someone else's block already took this level
                    return Err(SkipchainError::ForkConflict {
                        chain: candidate.chain_id(),
                        expected: Some(ancestor.hash),
                        actual: Some(existing.to),
                    });
                }
                let message = ForwardLink::message(&ancestor.hash, &candidate.hash, level);
                let signature = self.signing.sign(&ancestor.roster, &message).await?;
                debug!(
                    from = ancestor.index,
                    to = candidate.index,
                    link_level = level,
                    "Forward link signed"
                );
                Ok::<_, SkipchainError>((
                    ancestor.hash,
                    ForwardLink {
                        to: candidate.hash,
                        level,
                        signature,
                    },
                ))
            }
        });
        try_join_all(rounds).await
    }

    /// Check a link held by `from` against the roster of `from`
    pub fn verify_link(&self, from: &SkipBlock, link: &ForwardLink) -> SkipchainResult<()> {
        link.verify(&from.hash, &from.roster, self.signing.threshold()).map_err(|error| {
            SkipchainError::verification(format!(
                "forward link {} -> {} at level {}: {error}",
                from.hash, link.to, link.level
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_store::BlockCommit;
    use crate::signing::LocalCollectiveSigner;
    use crate::stores::InMemoryBlockStore;
    use skipchain_common::{GenesisOptions, SigningThreshold};
    use skipchain_test_utils::fixture_roster;
    use std::time::Duration;

    struct Fixture {
        store: Arc<InMemoryBlockStore>,
        signing: CollectiveSigning,
        linker: ForwardLinker,
    }

    fn fixture() -> Fixture {
        let (keys, _) = fixture_roster(3);
        let store = Arc::new(InMemoryBlockStore::new());
        let signing = CollectiveSigning::new(
            Arc::new(LocalCollectiveSigner::new(keys)),
            SigningThreshold::All,
            Duration::from_secs(1),
        );
        let linker = ForwardLinker::new(store.clone(), signing.clone());
        Fixture {
            store,
            signing,
            linker,
        }
    }

    /// Grow a chain of `count` blocks past genesis directly through the store
    async fn grow(fixture: &Fixture, count: u64) -> Vec<SkipBlock> {
        let (_, roster) = fixture_roster(3);
        let mut genesis =
            SkipBlock::genesis(roster, &GenesisOptions::default(), Vec::new(), None);
        genesis.signature =
            Some(fixture.signing.sign(&genesis.roster, &genesis.commit_message()).await.unwrap());
        fixture
            .store
            .commit(BlockCommit {
                block: genesis.clone(),
                expected_head: None,
                forward_links: Vec::new(),
                child_of: None,
            })
            .unwrap();

        let mut blocks = vec![genesis];
        for _ in 0..count {
            let previous = blocks.last().unwrap().clone();
            let mut block = previous.successor(Vec::new(), previous.roster.clone());
            block.back_links = fixture.linker.back_links(&block).unwrap();
            block.seal();
            block.signature =
                Some(fixture.signing.sign(&block.roster, &block.commit_message()).await.unwrap());
            let forward_links = fixture.linker.sign_links(&block).await.unwrap();
            fixture
                .store
                .commit(BlockCommit {
                    block: block.clone(),
                    expected_head: Some(previous.hash),
                    forward_links,
                    child_of: None,
                })
                .unwrap();
            blocks.push(block);
        }
        blocks
    }

    #[tokio::test]
    async fn back_links_skip_by_powers_of_base() {
        let fixture = fixture();
        let blocks = grow(&fixture, 8).await;
        let hashes: Vec<SkipBlockHash> = blocks.iter().map(|block| block.hash).collect();
        assert_eq!(blocks[8].back_links, vec![hashes[7], hashes[6], hashes[4]]);
        assert_eq!(blocks[6].back_links, vec![hashes[5], hashes[4]]);
        assert_eq!(blocks[5].back_links, vec![hashes[4]]);
    }

    #[tokio::test]
    async fn ancestors_receive_one_link_per_level() {
        let fixture = fixture();
        let blocks = grow(&fixture, 8).await;
        let genesis = fixture.store.get(&blocks[0].hash).unwrap();
        let targets: Vec<(u32, SkipBlockHash)> =
            genesis.forward_links.iter().map(|link| (link.level, link.to)).collect();
        assert_eq!(
            targets,
            vec![(0, blocks[1].hash), (1, blocks[2].hash), (2, blocks[4].hash)]
        );

        let fourth = fixture.store.get(&blocks[4].hash).unwrap();
        let targets: Vec<(u32, SkipBlockHash)> =
            fourth.forward_links.iter().map(|link| (link.level, link.to)).collect();
        assert_eq!(
            targets,
            vec![(0, blocks[5].hash), (1, blocks[6].hash), (2, blocks[8].hash)]
        );

        for link in &genesis.forward_links {
            fixture.linker.verify_link(&genesis, link).unwrap();
        }
    }

    #[tokio::test]
    async fn tampered_link_does_not_verify() {
        let fixture = fixture();
        let blocks = grow(&fixture, 1).await;
        let genesis = fixture.store.get(&blocks[0].hash).unwrap();
        let mut link = genesis.forward_links[0].clone();
        link.level = 1;
        assert!(matches!(
            fixture.linker.verify_link(&genesis, &link),
            Err(SkipchainError::VerificationFailed { .. })
        ));
    }
}
