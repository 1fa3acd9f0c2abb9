use std::{
    fs,
    path::Path,
    sync::{Mutex, MutexGuard},
};

use anyhow::Result;
use fjall::{Database, Keyspace, OwnedWriteBatch, PersistMode};
use skipchain_common::{ForwardLink, SkipBlock, SkipBlockHash, SkipchainError, SkipchainResult};
use tracing::info;

use crate::block_store::{
    check_child, check_committed, check_link_level, check_same_link, check_same_record,
    BlockCommit, BlockStore,
};
use crate::configuration::SkipchainConfig;

const BLOCKS_KEYSPACE: &str = "blocks";
const HEADS_KEYSPACE: &str = "heads";
const BLOCK_HASHES_BY_INDEX_KEYSPACE: &str = "block-hashes-by-index";
const FORWARD_LINKS_KEYSPACE: &str = "forward-links";
const CHILDREN_KEYSPACE: &str = "children";

pub struct FjallBlockStore {
    database: Database,
    blocks: Keyspace,
    heads: Keyspace,
    block_hashes_by_index: Keyspace,
    forward_links: Keyspace,
    children: Keyspace,
    commit_guard: Mutex<()>,
}

impl FjallBlockStore {
    pub fn new(config: &SkipchainConfig) -> Result<Self> {
        let path = Path::new(&config.database_path);
        if config.clear_on_start && path.exists() {
            fs::remove_dir_all(path)?;
        }
        info!("Storing skipblocks with Fjall on disk ({})", path.display());

        let database = Database::builder(path).open()?;
        let blocks = database.keyspace(BLOCKS_KEYSPACE, fjall::KeyspaceCreateOptions::default)?;
        let heads = database.keyspace(HEADS_KEYSPACE, fjall::KeyspaceCreateOptions::default)?;
        let block_hashes_by_index = database.keyspace(
            BLOCK_HASHES_BY_INDEX_KEYSPACE,
            fjall::KeyspaceCreateOptions::default,
        )?;
        let forward_links =
            database.keyspace(FORWARD_LINKS_KEYSPACE, fjall::KeyspaceCreateOptions::default)?;
        let children =
            database.keyspace(CHILDREN_KEYSPACE, fjall::KeyspaceCreateOptions::default)?;

        Ok(Self {
            database,
            blocks,
            heads,
            block_hashes_by_index,
            forward_links,
            children,
            commit_guard: Mutex::new(()),
        })
    }

    fn persist(&self) -> SkipchainResult<()> {
        self.database.persist(PersistMode::Buffer).map_err(SkipchainError::storage)
    }

    fn lock(&self) -> SkipchainResult<MutexGuard<'_, ()>> {
        self.commit_guard.lock().map_err(|_| SkipchainError::storage("commit guard poisoned"))
    }

    fn record(&self, hash: &SkipBlockHash) -> SkipchainResult<Option<SkipBlock>> {
        let Some(bytes) = self.blocks.get(hash.as_ref()).map_err(SkipchainError::storage)? else {
            return Ok(None);
        };
        let block = minicbor::decode(&bytes).map_err(|e| SkipchainError::CorruptStorage {
            reason: format!("block {hash}: {e}"),
        })?;
        Ok(Some(block))
    }

    fn has_record(&self, hash: &SkipBlockHash) -> SkipchainResult<bool> {
        self.blocks.contains_key(hash.as_ref()).map_err(SkipchainError::storage)
    }

    fn read_hash(&self, keyspace: &Keyspace, key: &[u8]) -> SkipchainResult<Option<SkipBlockHash>> {
        let Some(bytes) = keyspace.get(key).map_err(SkipchainError::storage)? else {
            return Ok(None);
        };
        let hash = SkipBlockHash::try_from(bytes.as_ref()).map_err(|e| {
            SkipchainError::CorruptStorage {
                reason: format!("stored hash: {e}"),
            }
        })?;
        Ok(Some(hash))
    }

    fn link(&self, from: &SkipBlockHash, level: u32) -> SkipchainResult<Option<ForwardLink>> {
        let Some(bytes) =
            self.forward_links.get(link_key(from, level)).map_err(SkipchainError::storage)?
        else {
            return Ok(None);
        };
        decode_link(&bytes).map(Some)
    }

    fn links(&self, from: &SkipBlockHash) -> SkipchainResult<Vec<ForwardLink>> {
        let mut links = Vec::new();
        for entry in self.forward_links.prefix(from.as_ref()) {
            let (_, value) = entry.into_inner().map_err(SkipchainError::storage)?;
            links.push(decode_link(&value)?);
        }
        Ok(links)
    }

    fn check_head(
        &self,
        chain: &SkipBlockHash,
        expected: Option<SkipBlockHash>,
    ) -> SkipchainResult<()> {
        let actual = self.read_hash(&self.heads, chain.as_ref())?;
        if actual != expected {
            return Err(SkipchainError::ForkConflict {
                chain: *chain,
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn insert_record(&self, batch: &mut OwnedWriteBatch, block: &SkipBlock) -> SkipchainResult<()> {
        let encoded = minicbor::to_vec(block.without_links()).map_err(SkipchainError::storage)?;
        batch.insert(&self.blocks, block.hash.to_vec(), encoded);
        Ok(())
    }

    /// Index and head move together; a stored block that never became head
    /// is reachable by hash only
    fn advance_head(&self, batch: &mut OwnedWriteBatch, block: &SkipBlock) {
        let chain = block.chain_id();
        batch.insert(
            &self.block_hashes_by_index,
            index_key(&chain, block.index),
            block.hash.to_vec(),
        );
        batch.insert(&self.heads, chain.to_vec(), block.hash.to_vec());
    }

    fn check_link_source(&self, from: &SkipBlockHash, link: &ForwardLink) -> SkipchainResult<()> {
        let source = self.record(from)?.ok_or(SkipchainError::NotFound { hash: *from })?;
        check_link_level(&source, link)?;
        check_same_link(from, self.link(from, link.level)?.as_ref(), link)
    }
}

fn index_key(chain: &SkipBlockHash, index: u64) -> Vec<u8> {
    let mut key = chain.to_vec();
    key.extend_from_slice(&index.to_be_bytes());
    key
}

fn link_key(from: &SkipBlockHash, level: u32) -> Vec<u8> {
    let mut key = from.to_vec();
    key.extend_from_slice(&level.to_be_bytes());
    key
}

fn decode_link(bytes: &[u8]) -> SkipchainResult<ForwardLink> {
    minicbor::decode(bytes).map_err(|e| SkipchainError::CorruptStorage {
        reason: format!("forward link: {e}"),
    })
}

impl BlockStore for FjallBlockStore {
    fn put(&self, block: &SkipBlock) -> SkipchainResult<()> {
        check_committed(block)?;
        let _guard = self.lock()?;
        check_same_record(self.record(&block.hash)?.as_ref(), block)?;

        let mut batch = self.database.batch();
        self.insert_record(&mut batch, block)?;
        batch.commit().map_err(SkipchainError::storage)?;
        self.persist()
    }

    fn get(&self, hash: &SkipBlockHash) -> SkipchainResult<SkipBlock> {
        let mut block = self.record(hash)?.ok_or(SkipchainError::NotFound { hash: *hash })?;
        block.forward_links = self.links(hash)?;
        block.child_sl = self.read_hash(&self.children, hash.as_ref())?;
        Ok(block)
    }

    fn contains(&self, hash: &SkipBlockHash) -> SkipchainResult<bool> {
        self.has_record(hash)
    }

    fn head(&self, chain: &SkipBlockHash) -> SkipchainResult<Option<SkipBlockHash>> {
        self.read_hash(&self.heads, chain.as_ref())
    }

    fn compare_and_set_head(
        &self,
        chain: &SkipBlockHash,
        expected: Option<SkipBlockHash>,
        new: SkipBlockHash,
    ) -> SkipchainResult<()> {
        let _guard = self.lock()?;
        self.check_head(chain, expected)?;
        let block = self.record(&new)?.ok_or(SkipchainError::NotFound { hash: new })?;
        if block.chain_id() != *chain {
            return Err(SkipchainError::verification(format!(
                "block {new} is not on chain {chain}"
            )));
        }
        let mut batch = self.database.batch();
        self.advance_head(&mut batch, &block);
        batch.commit().map_err(SkipchainError::storage)?;
        self.persist()
    }

    fn get_by_index(
        &self,
        chain: &SkipBlockHash,
        index: u64,
    ) -> SkipchainResult<Option<SkipBlock>> {
        let Some(hash) = self.read_hash(&self.block_hashes_by_index, &index_key(chain, index))?
        else {
            return Ok(None);
        };
        self.get(&hash).map(Some)
    }

    fn append_forward_link(&self, from: &SkipBlockHash, link: ForwardLink) -> SkipchainResult<()> {
        let _guard = self.lock()?;
        self.check_link_source(from, &link)?;
        let encoded = minicbor::to_vec(&link).map_err(SkipchainError::storage)?;
        self.forward_links
            .insert(link_key(from, link.level), encoded)
            .map_err(SkipchainError::storage)
    }

    fn set_child(&self, parent: &SkipBlockHash, child: &SkipBlockHash) -> SkipchainResult<()> {
        let _guard = self.lock()?;
        if !self.has_record(parent)? {
            return Err(SkipchainError::NotFound { hash: *parent });
        }
        check_child(parent, self.read_hash(&self.children, parent.as_ref())?, child)?;
        self.children.insert(parent.to_vec(), child.to_vec()).map_err(SkipchainError::storage)
    }

    fn commit(&self, commit: BlockCommit) -> SkipchainResult<()> {
        let block = &commit.block;
        check_committed(block)?;
        let chain = commit.chain();

        let _guard = self.lock()?;

        self.check_head(&chain, commit.expected_head)?;
        check_same_record(self.record(&block.hash)?.as_ref(), block)?;
        for (from, link) in &commit.forward_links {
            self.check_link_source(from, link)?;
        }
        if let Some(parent) = &commit.child_of {
            if !self.has_record(parent)? {
                return Err(SkipchainError::NotFound { hash: *parent });
            }
            check_child(parent, self.read_hash(&self.children, parent.as_ref())?, &block.hash)?;
        }

        let mut batch = self.database.batch();
        self.insert_record(&mut batch, block)?;
        for (from, link) in &commit.forward_links {
            let encoded = minicbor::to_vec(link).map_err(SkipchainError::storage)?;
            batch.insert(&self.forward_links, link_key(from, link.level), encoded);
        }
        if let Some(parent) = &commit.child_of {
            batch.insert(&self.children, parent.to_vec(), block.hash.to_vec());
        }
        self.advance_head(&mut batch, block);
        batch.commit().map_err(SkipchainError::storage)?;
        self.persist()
    }
}
