//! Content-addressed, append-only block storage with per-chain heads

use skipchain_common::{
    ForwardLink, SkipBlock, SkipBlockHash, SkipchainError, SkipchainResult, MAX_HEIGHT_LIMIT,
};

/// Everything a successful proposal writes, applied as one unit
#[derive(Debug, Clone)]
pub struct BlockCommit {
    /// Signed block that becomes the new head of its chain
    pub block: SkipBlock,
    /// Head the proposer built on; `None` for a genesis block
    pub expected_head: Option<SkipBlockHash>,
    /// Signed links for ancestors of `block`, keyed by the ancestor hash
    pub forward_links: Vec<(SkipBlockHash, ForwardLink)>,
    /// Block of the enclosing chain anchoring `block` as its child
    pub child_of: Option<SkipBlockHash>,
}

impl BlockCommit {
    pub fn chain(&self) -> SkipBlockHash {
        self.block.chain_id()
    }
}

/// Block repository.
///
/// Stored records are immutable. The only mutations after a block is stored
/// are forward links appended to it and the one-time child anchor, which
/// is why `get` returns a freshly assembled block rather than the record as
/// put.
pub trait BlockStore: Send + Sync {
    /// Store a committed block. Storing identical content again is a no-op.
    /// Forward links and `child_sl` on the argument are not stored, and the
    /// block is not indexed: `get_by_index` only sees blocks that became head.
    fn put(&self, block: &SkipBlock) -> SkipchainResult<()>;

    fn get(&self, hash: &SkipBlockHash) -> SkipchainResult<SkipBlock>;

    fn contains(&self, hash: &SkipBlockHash) -> SkipchainResult<bool>;

    /// Hash of the most recently committed block of `chain`
    fn head(&self, chain: &SkipBlockHash) -> SkipchainResult<Option<SkipBlockHash>>;

    /// Move the head of `chain` from `expected` to `new`, failing with
    /// `ForkConflict` if it is no longer `expected`
    fn compare_and_set_head(
        &self,
        chain: &SkipBlockHash,
        expected: Option<SkipBlockHash>,
        new: SkipBlockHash,
    ) -> SkipchainResult<()>;

    fn get_by_index(&self, chain: &SkipBlockHash, index: u64)
        -> SkipchainResult<Option<SkipBlock>>;

    /// Append a forward link to `from`. Re-appending the same link is a no-op,
    /// a different link on an occupied level is refused, and so is a level at
    /// or above the height of `from`.
    fn append_forward_link(&self, from: &SkipBlockHash, link: ForwardLink) -> SkipchainResult<()>;

    /// Record `child` as the chain nested under `parent`
    fn set_child(&self, parent: &SkipBlockHash, child: &SkipBlockHash) -> SkipchainResult<()>;

    /// Apply a proposal: head compare-and-set, block, index entry, ancestor
    /// links and child anchor all take effect together or not at all
    fn commit(&self, commit: BlockCommit) -> SkipchainResult<()>;

    /// Head of `chain` as a block
    fn head_block(&self, chain: &SkipBlockHash) -> SkipchainResult<SkipBlock> {
        match self.head(chain)? {
            Some(head) => self.get(&head),
            None => Err(SkipchainError::NotFound { hash: *chain }),
        }
    }
}

/// Checks shared by every backend before a block record is written
pub(crate) fn check_committed(block: &SkipBlock) -> SkipchainResult<()> {
    if !block.is_committed() {
        return Err(SkipchainError::BlockNotSigned { hash: block.hash });
    }
    if !block.hash_is_valid() {
        return Err(SkipchainError::verification(format!(
            "block {} does not hash to its id",
            block.hash
        )));
    }
    if block.max_height > MAX_HEIGHT_LIMIT || block.height > block.max_height {
        return Err(SkipchainError::verification(format!(
            "block {} has height {} of {}, limit {MAX_HEIGHT_LIMIT}",
            block.hash, block.height, block.max_height
        )));
    }
    Ok(())
}

/// Whether `incoming` may be written where `existing` is stored
pub(crate) fn check_same_record(
    existing: Option<&SkipBlock>,
    incoming: &SkipBlock,
) -> SkipchainResult<()> {
    match existing {
        Some(existing) if !existing.same_commit(incoming) => {
            Err(SkipchainError::AlreadyExists {
                hash: incoming.hash,
            })
        }
        _ => Ok(()),
    }
}

/// Whether `incoming` may be appended where `existing` occupies its level
pub(crate) fn check_same_link(
    from: &SkipBlockHash,
    existing: Option<&ForwardLink>,
    incoming: &ForwardLink,
) -> SkipchainResult<()> {
    match existing {
        Some(existing) if existing != incoming => {
            Err(SkipchainError::AlreadyExists { hash: *from })
        }
        _ => Ok(()),
    }
}

/// Whether `from` has a level for `link`
pub(crate) fn check_link_level(from: &SkipBlock, link: &ForwardLink) -> SkipchainResult<()> {
    if link.level >= from.height {
        return Err(SkipchainError::verification(format!(
            "forward link level {} on block {} of height {}",
            link.level, from.hash, from.height
        )));
    }
    Ok(())
}

/// Whether `parent` may anchor `child`
pub(crate) fn check_child(
    parent: &SkipBlockHash,
    existing: Option<SkipBlockHash>,
    child: &SkipBlockHash,
) -> SkipchainResult<()> {
    match existing {
        Some(existing) if existing != *child => Err(SkipchainError::ChildAlreadyExists {
            parent: *parent,
            child: existing,
        }),
        _ => Ok(()),
    }
}
