//! Skipblocks and forward links
//!
//! A block is pending until it carries a collective signature and immutable
//! from then on. The only later changes are appended forward links and, on an
//! anchor block, the one-time `child_sl` reference; neither is covered by the
//! block hash.

use crate::cosi::{CollectiveSignature, SignatureError, SigningThreshold};
use crate::hash::SkipBlockHash;
use crate::roster::Roster;
use minicbor::bytes::ByteSlice;
use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as};
use std::fmt;

const COMMIT_DOMAIN: &[u8] = b"skipchain.block.commit";
const FORWARD_LINK_DOMAIN: &[u8] = b"skipchain.block.forward-link";
const ROSTER_TRANSITION_DOMAIN: &[u8] = b"skipchain.roster.transition";

/// Name of a verification policy run on every block of a chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerifierId(pub String);

impl VerifierId {
    pub const NONE: &'static str = "none";
    pub const STRUCTURE: &'static str = "structure";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Accepts every block
    pub fn none() -> Self {
        Self::new(Self::NONE)
    }

    /// Index, height and back-link consistency
    pub fn structure() -> Self {
        Self::new(Self::STRUCTURE)
    }
}

impl<C> minicbor::Encode<C> for VerifierId {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.str(&self.0)?.ok()
    }
}

impl<'a, C> minicbor::Decode<'a, C> for VerifierId {
    fn decode(
        d: &mut minicbor::Decoder<'a>,
        _ctx: &mut C,
    ) -> Result<Self, minicbor::decode::Error> {
        Ok(Self(d.str()?.to_owned()))
    }
}

impl fmt::Display for VerifierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signed pointer from an earlier block to a later one at a skip-list level
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, minicbor::Encode, minicbor::Decode,
)]
pub struct ForwardLink {
    #[n(0)]
    pub to: SkipBlockHash,
    #[n(1)]
    pub level: u32,
    /// Made by the roster of the block holding the link
    #[n(2)]
    pub signature: CollectiveSignature,
}

impl ForwardLink {
    /// Statement signed by the source block's roster
    pub fn message(from: &SkipBlockHash, to: &SkipBlockHash, level: u32) -> Vec<u8> {
        SkipBlockHash::digest([
            FORWARD_LINK_DOMAIN,
            from.as_ref(),
            to.as_ref(),
            level.to_be_bytes().as_slice(),
        ])
        .to_vec()
    }

    /// Verify the link as held by `from`, whose roster is `roster`
    pub fn verify(
        &self,
        from: &SkipBlockHash,
        roster: &Roster,
        threshold: SigningThreshold,
    ) -> Result<(), SignatureError> {
        self.signature.verify(roster, &Self::message(from, &self.to, self.level), threshold)
    }
}

/// Statement the outgoing roster signs to endorse its successor
pub fn roster_transition_message(
    old: &Roster,
    new: &Roster,
    predecessor: &SkipBlockHash,
) -> Vec<u8> {
    SkipBlockHash::digest([
        ROSTER_TRANSITION_DOMAIN,
        old.id().as_ref(),
        new.id().as_ref(),
        predecessor.as_ref(),
    ])
    .to_vec()
}

/// Most levels a chain may have. A `u64` index never needs more.
pub const MAX_HEIGHT_LIMIT: u32 = 64;

/// `max_height` as a chain actually uses it
pub fn bounded_max_height(max_height: u32) -> u32 {
    max_height.clamp(1, MAX_HEIGHT_LIMIT)
}

/// Number of skip-list levels a block at `index` takes part in.
///
/// Genesis gets every level; block `i` gets one more level for each power of
/// `base_height` dividing `i`, capped at `max_height` and never above
/// [`MAX_HEIGHT_LIMIT`]. A base below two disables skipping.
pub fn block_height(index: u64, base_height: u32, max_height: u32) -> u32 {
    let max_height = bounded_max_height(max_height);
    if base_height < 2 {
        return 1;
    }
    if index == 0 {
        return max_height;
    }
    let base = base_height as u64;
    let mut height = 1;
    let mut step = base;
    while height < max_height && index % step == 0 {
        height += 1;
        match step.checked_mul(base) {
            Some(next) => step = next,
            None => break,
        }
    }
    height
}

/// Indices of the blocks `index` links back to, one per level
pub fn back_link_indices(index: u64, height: u32, base_height: u32) -> Vec<u64> {
    if index == 0 {
        return Vec::new();
    }
    let base = base_height.max(1) as u64;
    (0..height)
        .map_while(|level| base.checked_pow(level).and_then(|distance| index.checked_sub(distance)))
        .collect()
}

/// Fields covered by the block hash
#[derive(minicbor::Encode)]
struct HashedContent<'a> {
    #[n(0)]
    index: u64,
    #[n(1)]
    height: u32,
    #[n(2)]
    max_height: u32,
    #[n(3)]
    base_height: u32,
    #[n(4)]
    back_links: &'a [SkipBlockHash],
    #[n(5)]
    verifiers: &'a [VerifierId],
    #[n(6)]
    parent_block: &'a Option<SkipBlockHash>,
    #[n(7)]
    genesis: &'a Option<SkipBlockHash>,
    #[n(8)]
    data: &'a ByteSlice,
    #[n(9)]
    roster: &'a Roster,
    #[n(10)]
    roster_transition: &'a Option<CollectiveSignature>,
}

/// A block of a skipchain
#[serde_as]
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, minicbor::Encode, minicbor::Decode,
)]
pub struct SkipBlock {
    /// Position in its own chain, 0 for genesis
    #[n(0)]
    pub index: u64,
    #[n(1)]
    pub height: u32,
    #[n(2)]
    pub max_height: u32,
    #[n(3)]
    pub base_height: u32,
    /// `back_links[k]` is the block at `index - base_height^k`
    #[n(4)]
    pub back_links: Vec<SkipBlockHash>,
    #[n(5)]
    pub verifiers: Vec<VerifierId>,
    /// Block of the enclosing chain that spawned this chain
    #[n(6)]
    pub parent_block: Option<SkipBlockHash>,
    /// Chain id; `None` on the genesis block itself
    #[n(7)]
    pub genesis: Option<SkipBlockHash>,
    #[serde_as(as = "Hex")]
    #[cbor(n(8), with = "minicbor::bytes")]
    pub data: Vec<u8>,
    #[n(9)]
    pub roster: Roster,
    /// Endorsement of `roster` by the predecessor's roster
    #[n(10)]
    pub roster_transition: Option<CollectiveSignature>,

    #[n(11)]
    pub hash: SkipBlockHash,
    /// Genesis of the chain nested under this block
    #[n(12)]
    pub child_sl: Option<SkipBlockHash>,
    #[n(13)]
    pub forward_links: Vec<ForwardLink>,
    #[n(14)]
    pub signature: Option<CollectiveSignature>,
}

/// Skip-list and policy settings of a new chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisOptions {
    pub base_height: u32,
    pub max_height: u32,
    pub verifiers: Vec<VerifierId>,
}

impl Default for GenesisOptions {
    fn default() -> Self {
        Self {
            base_height: 2,
            max_height: 3,
            verifiers: vec![VerifierId::none()],
        }
    }
}

impl SkipBlock {
    /// Pending genesis block with its hash already sealed
    pub fn genesis(
        roster: Roster,
        options: &GenesisOptions,
        data: Vec<u8>,
        parent_block: Option<SkipBlockHash>,
    ) -> Self {
        let mut block = Self {
            index: 0,
            height: block_height(0, options.base_height, options.max_height),
            max_height: bounded_max_height(options.max_height),
            base_height: options.base_height,
            back_links: Vec::new(),
            verifiers: options.verifiers.clone(),
            parent_block,
            genesis: None,
            data,
            roster,
            roster_transition: None,
            hash: SkipBlockHash::default(),
            child_sl: None,
            forward_links: Vec::new(),
            signature: None,
        };
        block.seal();
        block
    }

    /// Pending successor of `self`. Back links and the hash are filled in by
    /// the proposer once the ancestors are known.
    pub fn successor(&self, data: Vec<u8>, roster: Roster) -> Self {
        let index = self.index + 1;
        Self {
            index,
            height: block_height(index, self.base_height, self.max_height),
            max_height: self.max_height,
            base_height: self.base_height,
            back_links: Vec::new(),
            verifiers: self.verifiers.clone(),
            parent_block: self.parent_block,
            genesis: Some(self.chain_id()),
            data,
            roster,
            roster_transition: None,
            hash: SkipBlockHash::default(),
            child_sl: None,
            forward_links: Vec::new(),
            signature: None,
        }
    }

    /// Hash of the chain's genesis block
    pub fn chain_id(&self) -> SkipBlockHash {
        self.genesis.unwrap_or(self.hash)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    pub fn is_committed(&self) -> bool {
        self.signature.is_some()
    }

    /// Digest over the immutable content
    pub fn compute_hash(&self) -> SkipBlockHash {
        let content = HashedContent {
            index: self.index,
            height: self.height,
            max_height: self.max_height,
            base_height: self.base_height,
            back_links: &self.back_links,
            verifiers: &self.verifiers,
            parent_block: &self.parent_block,
            genesis: &self.genesis,
            data: self.data.as_slice().into(),
            roster: &self.roster,
            roster_transition: &self.roster_transition,
        };
        let encoded = minicbor::to_vec(&content).expect("infallible");
        SkipBlockHash::digest([encoded])
    }

    /// Fix the hash from the current content
    pub fn seal(&mut self) {
        self.hash = self.compute_hash();
    }

    pub fn hash_is_valid(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Statement the block's roster signs to commit it
    pub fn commit_message(&self) -> Vec<u8> {
        SkipBlockHash::digest([
            COMMIT_DOMAIN,
            self.hash.as_ref(),
            self.roster.id().as_ref(),
        ])
        .to_vec()
    }

    /// Check the hash and the commit signature against the block's roster
    pub fn verify_signature(&self, threshold: SigningThreshold) -> Result<(), String> {
        if !self.hash_is_valid() {
            return Err(format!("block {} does not hash to its id", self.hash));
        }
        let Some(signature) = &self.signature else {
            return Err(format!("block {} is not signed", self.hash));
        };
        signature
            .verify(&self.roster, &self.commit_message(), threshold)
            .map_err(|e| format!("block {}: {e}", self.hash))
    }

    pub fn forward_link(&self, level: u32) -> Option<&ForwardLink> {
        self.forward_links.iter().find(|link| link.level == level)
    }

    /// The link that skips furthest
    pub fn highest_forward_link(&self) -> Option<&ForwardLink> {
        self.forward_links.iter().max_by_key(|link| link.level)
    }

    /// Equality of everything fixed at commit time
    pub fn same_commit(&self, other: &SkipBlock) -> bool {
        self.hash == other.hash
            && self.signature == other.signature
            && self.index == other.index
            && self.height == other.height
            && self.max_height == other.max_height
            && self.base_height == other.base_height
            && self.back_links == other.back_links
            && self.verifiers == other.verifiers
            && self.parent_block == other.parent_block
            && self.genesis == other.genesis
            && self.data == other.data
            && self.roster == other.roster
            && self.roster_transition == other.roster_transition
    }

    /// Copy without the appendable parts, as stored in the immutable record
    pub fn without_links(&self) -> SkipBlock {
        SkipBlock {
            child_sl: None,
            forward_links: Vec::new(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::roster::ServerIdentity;

    fn roster() -> Roster {
        Roster::new(vec![ServerIdentity::new(
            KeyPair::from_seed(&[9u8; 32]).public(),
            "local",
        )])
    }

    #[test]
    fn heights_follow_base_powers() {
        let heights: Vec<u32> = (0..=8).map(|i| block_height(i, 2, 3)).collect();
        assert_eq!(heights, vec![3, 1, 2, 1, 3, 1, 2, 1, 3]);
        assert_eq!(block_height(0, 1, 1), 1);
        assert_eq!(block_height(12, 4, 1), 1);
        assert_eq!(block_height(16, 4, 5), 3);
    }

    #[test]
    fn oversized_max_height_is_capped() {
        assert_eq!(block_height(0, 2, u32::MAX), MAX_HEIGHT_LIMIT);
        assert_eq!(block_height(1 << 63, 2, u32::MAX), MAX_HEIGHT_LIMIT);

        let options = GenesisOptions {
            max_height: 20_000_000,
            ..GenesisOptions::default()
        };
        let genesis = SkipBlock::genesis(roster(), &options, Vec::new(), None);
        assert_eq!((genesis.height, genesis.max_height), (MAX_HEIGHT_LIMIT, MAX_HEIGHT_LIMIT));
    }

    #[test]
    fn back_links_point_at_powers() {
        assert_eq!(back_link_indices(8, 3, 2), vec![7, 6, 4]);
        assert_eq!(back_link_indices(6, 2, 2), vec![5, 4]);
        assert!(back_link_indices(0, 3, 2).is_empty());
    }

    #[test]
    fn hash_ignores_appendable_parts() {
        let mut block =
            SkipBlock::genesis(roster(), &GenesisOptions::default(), b"data".to_vec(), None);
        let original = block.hash;
        block.child_sl = Some(SkipBlockHash::new([1; 32]));
        block.forward_links.push(ForwardLink {
            to: SkipBlockHash::new([2; 32]),
            level: 0,
            signature: CollectiveSignature::default(),
        });
        assert_eq!(block.compute_hash(), original);
        block.data.push(0);
        assert_ne!(block.compute_hash(), original);
    }

    #[test]
    fn successor_inherits_chain_settings() {
        let parent = SkipBlockHash::new([5; 32]);
        let genesis =
            SkipBlock::genesis(roster(), &GenesisOptions::default(), Vec::new(), Some(parent));
        let next = genesis.successor(b"next".to_vec(), genesis.roster.clone());
        assert_eq!(next.index, 1);
        assert_eq!(next.parent_block, Some(parent));
        assert_eq!(next.chain_id(), genesis.hash);
        assert_eq!(next.verifiers, genesis.verifiers);
        assert_eq!(genesis.chain_id(), genesis.hash);
    }

    #[test]
    fn cbor_preserves_payload() {
        let block =
            SkipBlock::genesis(roster(), &GenesisOptions::default(), vec![0, 1, 2, 255], None);
        let bytes = minicbor::to_vec(&block).unwrap();
        let decoded: SkipBlock = minicbor::decode(&bytes).unwrap();
        assert_eq!(decoded, block);
        assert!(decoded.hash_is_valid());
    }

    #[test]
    fn unsigned_block_does_not_verify() {
        let block = SkipBlock::genesis(roster(), &GenesisOptions::default(), Vec::new(), None);
        assert!(block.verify_signature(SigningThreshold::All).is_err());
    }
}
