//! In-memory block store using DashMap
// Records, heads, indices, links and anchors live in separate maps so that
// no shard lock is ever taken twice in one operation

use crate::block_store::{
    check_child, check_committed, check_link_level, check_same_link, check_same_record,
    BlockCommit, BlockStore,
};
use dashmap::DashMap;
use skipchain_common::{ForwardLink, SkipBlock, SkipBlockHash, SkipchainError, SkipchainResult};
use std::sync::{Mutex, MutexGuard};
use tracing::info;

#[derive(Default)]
pub struct InMemoryBlockStore {
    /// Immutable records, stored without links or child anchor
    blocks: DashMap<SkipBlockHash, SkipBlock>,
    heads: DashMap<SkipBlockHash, SkipBlockHash>,
    indices: DashMap<(SkipBlockHash, u64), SkipBlockHash>,
    forward_links: DashMap<(SkipBlockHash, u32), ForwardLink>,
    children: DashMap<SkipBlockHash, SkipBlockHash>,
    /// Serialises structural writes; never held across an await
    commit_guard: Mutex<()>,
}

impl InMemoryBlockStore {
    pub fn new() -> Self {
        info!("Storing skipblocks in memory (DashMap)");
        Self::default()
    }

    fn lock(&self) -> SkipchainResult<MutexGuard<'_, ()>> {
        self.commit_guard.lock().map_err(|_| SkipchainError::storage("commit guard poisoned"))
    }

    fn record(&self, hash: &SkipBlockHash) -> Option<SkipBlock> {
        // Clone so no shard guard outlives the lookup
        self.blocks.get(hash).map(|record| record.clone())
    }

    fn check_head(
        &self,
        chain: &SkipBlockHash,
        expected: Option<SkipBlockHash>,
    ) -> SkipchainResult<()> {
        let actual = self.heads.get(chain).map(|head| *head);
        if actual != expected {
            return Err(SkipchainError::ForkConflict {
                chain: *chain,
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn insert_record(&self, block: &SkipBlock) {
        if !self.blocks.contains_key(&block.hash) {
            self.blocks.insert(block.hash, block.without_links());
        }
    }

    /// Only head-advancing writes index a block, so a stored block that never
    /// became head cannot shadow the one that did
    fn index_head(&self, block: &SkipBlock) {
        self.indices.insert((block.chain_id(), block.index), block.hash);
    }

    fn link_source(&self, from: &SkipBlockHash, link: &ForwardLink) -> SkipchainResult<()> {
        let source = self.record(from).ok_or(SkipchainError::NotFound { hash: *from })?;
        check_link_level(&source, link)?;
        check_same_link(from, self.forward_links.get(&(*from, link.level)).as_deref(), link)
    }
}

impl BlockStore for InMemoryBlockStore {
    fn put(&self, block: &SkipBlock) -> SkipchainResult<()> {
        check_committed(block)?;
        let _guard = self.lock()?;
        check_same_record(self.record(&block.hash).as_ref(), block)?;
        self.insert_record(block);
        Ok(())
    }

    fn get(&self, hash: &SkipBlockHash) -> SkipchainResult<SkipBlock> {
        let mut block = self.record(hash).ok_or(SkipchainError::NotFound { hash: *hash })?;
        block.forward_links = (0..block.height)
            .filter_map(|level| self.forward_links.get(&(*hash, level)).map(|link| link.clone()))
            .collect();
        block.child_sl = self.children.get(hash).map(|child| *child);
        Ok(block)
    }

    fn contains(&self, hash: &SkipBlockHash) -> SkipchainResult<bool> {
        Ok(self.blocks.contains_key(hash))
    }

    fn head(&self, chain: &SkipBlockHash) -> SkipchainResult<Option<SkipBlockHash>> {
        Ok(self.heads.get(chain).map(|head| *head))
    }

    fn compare_and_set_head(
        &self,
        chain: &SkipBlockHash,
        expected: Option<SkipBlockHash>,
        new: SkipBlockHash,
    ) -> SkipchainResult<()> {
        let _guard = self.lock()?;
        self.check_head(chain, expected)?;
        let block = self.record(&new).ok_or(SkipchainError::NotFound { hash: new })?;
        if block.chain_id() != *chain {
            return Err(SkipchainError::verification(format!(
                "block {new} is not on chain {chain}"
            )));
        }
        self.index_head(&block);
        self.heads.insert(*chain, new);
        Ok(())
    }

    fn get_by_index(
        &self,
        chain: &SkipBlockHash,
        index: u64,
    ) -> SkipchainResult<Option<SkipBlock>> {
        let Some(hash) = self.indices.get(&(*chain, index)).map(|hash| *hash) else {
            return Ok(None);
        };
        self.get(&hash).map(Some)
    }

    fn append_forward_link(&self, from: &SkipBlockHash, link: ForwardLink) -> SkipchainResult<()> {
        let _guard = self.lock()?;
        self.link_source(from, &link)?;
        self.forward_links.insert((*from, link.level), link);
        Ok(())
    }

    fn set_child(&self, parent: &SkipBlockHash, child: &SkipBlockHash) -> SkipchainResult<()> {
        let _guard = self.lock()?;
        if !self.blocks.contains_key(parent) {
            return Err(SkipchainError::NotFound { hash: *parent });
        }
        check_child(parent, self.children.get(parent).map(|c| *c), child)?;
        self.children.insert(*parent, *child);
        Ok(())
    }

    fn commit(&self, commit: BlockCommit) -> SkipchainResult<()> {
        let block = &commit.block;
        check_committed(block)?;
        let chain = commit.chain();

        let _guard = self.lock()?;

        // Validate everything before the first write
        self.check_head(&chain, commit.expected_head)?;
        check_same_record(self.record(&block.hash).as_ref(), block)?;
        for (from, link) in &commit.forward_links {
            self.link_source(from, link)?;
        }
        if let Some(parent) = &commit.child_of {
            if !self.blocks.contains_key(parent) {
                return Err(SkipchainError::NotFound { hash: *parent });
            }
            check_child(parent, self.children.get(parent).map(|c| *c), &block.hash)?;
        }

        self.insert_record(block);
        self.index_head(block);
        for (from, link) in commit.forward_links {
            self.forward_links.insert((from, link.level), link);
        }
        if let Some(parent) = commit.child_of {
            self.children.insert(parent, block.hash);
        }
        // Head last, so readers never see a head without its links
        self.heads.insert(chain, block.hash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_store::tests as shared;

    #[test]
    fn put_is_idempotent() {
        shared::put_is_idempotent(&InMemoryBlockStore::new());
    }

    #[test]
    fn pending_blocks_are_refused() {
        shared::pending_blocks_are_refused(&InMemoryBlockStore::new());
    }

    #[test]
    fn oversized_block_is_refused() {
        shared::oversized_block_is_refused(&InMemoryBlockStore::new());
    }

    #[test]
    fn unknown_hash_is_not_found() {
        shared::unknown_hash_is_not_found(&InMemoryBlockStore::new());
    }

    #[test]
    fn head_moves_by_compare_and_set() {
        shared::head_moves_by_compare_and_set(&InMemoryBlockStore::new());
    }

    #[test]
    fn commit_applies_everything() {
        shared::commit_applies_everything(&InMemoryBlockStore::new());
    }

    #[test]
    fn losing_commit_leaves_no_trace() {
        shared::losing_commit_leaves_no_trace(&InMemoryBlockStore::new());
    }

    #[test]
    fn forward_links_are_append_only() {
        shared::forward_links_are_append_only(&InMemoryBlockStore::new());
    }

    #[test]
    fn child_is_set_once() {
        shared::child_is_set_once(&InMemoryBlockStore::new());
    }

    #[test]
    fn stray_block_is_not_indexed() {
        shared::stray_block_is_not_indexed(&InMemoryBlockStore::new());
    }

    #[test]
    fn out_of_range_level_is_refused() {
        shared::out_of_range_level_is_refused(&InMemoryBlockStore::new());
    }
}
