//! Walking a chain from any block to its head over verified forward links

use crate::block_store::BlockStore;
use crate::forward_linker::ForwardLinker;
use crate::signing::CollectiveSigning;
use skipchain_common::{SkipBlock, SkipBlockHash, SkipchainError, SkipchainResult};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct UpdateChainResolver {
    store: Arc<dyn BlockStore>,
    signing: CollectiveSigning,
    linker: ForwardLinker,
}

impl UpdateChainResolver {
    pub fn new(store: Arc<dyn BlockStore>, signing: CollectiveSigning) -> Self {
        Self {
            linker: ForwardLinker::new(store.clone(), signing.clone()),
            store,
            signing,
        }
    }

    /// Blocks from `start` to the head of its chain, each reached through the
    /// highest verified link that does not pass the head.
    ///
    /// Every step strictly increases the index and never passes the head, so
    /// the walk ends even over corrupt links. Any failure discards the
    /// partial path.
    pub fn get_update_chain(&self, start: &SkipBlockHash) -> SkipchainResult<Vec<SkipBlock>> {
        let mut current = self.store.get(start)?;
        let chain = current.chain_id();
        let mut head_index = self.head_index(&chain)?;

        let mut path = vec![current.clone()];
        while let Some(next) = self.next_hop(&current, &chain, &mut head_index)? {
            path.push(next.clone());
            current = next;
        }

        debug!(
            chain = %chain.short(),
            from = path[0].index,
            to = current.index,
            hops = path.len() - 1,
            "Update chain resolved"
        );
        Ok(path)
    }

    fn head_index(&self, chain: &SkipBlockHash) -> SkipchainResult<u64> {
        Ok(self.store.head_block(chain)?.index)
    }

    fn next_hop(
        &self,
        current: &SkipBlock,
        chain: &SkipBlockHash,
        head_index: &mut u64,
    ) -> SkipchainResult<Option<SkipBlock>> {
        for link in current.forward_links.iter().rev() {
            self.linker.verify_link(current, link)?;
            let target = self.store.get(&link.to)?;
            if target.hash != link.to || !target.hash_is_valid() {
                return Err(SkipchainError::verification(format!(
                    "block {} does not hash to its id",
                    link.to
                )));
            }
            target.verify_signature(self.signing.threshold()).map_err(|reason| {
                SkipchainError::verification(format!("block {}: {reason}", target.hash))
            })?;
            if target.chain_id() != *chain || target.index <= current.index {
                return Err(SkipchainError::verification(format!(
                    "forward link {} -> {} does not move forward on chain {chain}",
                    current.hash, target.hash
                )));
            }

            if target.index > *head_index {
                // The head moved since the walk started
                *head_index = self.head_index(chain)?;
            }
            if target.index <= *head_index {
                return Ok(Some(target));
            }
        }
        Ok(None)
    }
}
