//! Verification policies, looked up by the names a chain lists in its blocks

use dashmap::DashMap;
use skipchain_common::{
    block_height, bounded_max_height, SkipBlock, SkipchainError, SkipchainResult, VerifierId,
    MAX_HEIGHT_LIMIT,
};
use std::sync::Arc;
use tracing::debug;

/// A policy sees the candidate and, except for genesis blocks, its
/// predecessor. `Err` carries the reason for the veto.
pub type VerificationPolicy =
    Arc<dyn Fn(&SkipBlock, Option<&SkipBlock>) -> Result<(), String> + Send + Sync>;

pub struct VerifierRegistry {
    policies: DashMap<VerifierId, VerificationPolicy>,
}

impl Default for VerifierRegistry {
    fn default() -> Self {
        let registry = Self {
            policies: DashMap::new(),
        };
        registry.register(VerifierId::none(), |_, _| Ok(()));
        registry.register(VerifierId::structure(), verify_structure);
        registry
    }
}

impl VerifierRegistry {
    /// Registry holding the built-in `none` and `structure` policies
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the policy named `id`
    pub fn register<F>(&self, id: VerifierId, policy: F)
    where
        F: Fn(&SkipBlock, Option<&SkipBlock>) -> Result<(), String> + Send + Sync + 'static,
    {
        self.policies.insert(id, Arc::new(policy));
    }

    pub fn contains(&self, id: &VerifierId) -> bool {
        self.policies.contains_key(id)
    }

    /// Run every policy the candidate names, stopping at the first veto
    pub fn verify(
        &self,
        candidate: &SkipBlock,
        previous: Option<&SkipBlock>,
    ) -> SkipchainResult<()> {
        for id in &candidate.verifiers {
            let policy = self
                .policies
                .get(id)
                .map(|policy| policy.clone())
                .ok_or_else(|| SkipchainError::verification(format!("unknown verifier {id}")))?;
            policy(candidate, previous)
                .map_err(|reason| SkipchainError::verification(format!("{id}: {reason}")))?;
            debug!(verifier = %id, index = candidate.index, "Block accepted");
        }
        Ok(())
    }
}

/// Index continuity, skip-list shape and inheritance from the predecessor
fn verify_structure(candidate: &SkipBlock, previous: Option<&SkipBlock>) -> Result<(), String> {
    if candidate.max_height != bounded_max_height(candidate.max_height) {
        return Err(format!(
            "max height {} is outside 1..={MAX_HEIGHT_LIMIT}",
            candidate.max_height
        ));
    }
    let expected_height =
        block_height(candidate.index, candidate.base_height, candidate.max_height);
    if candidate.height != expected_height {
        return Err(format!(
            "height {} at index {}, expected {expected_height}",
            candidate.height, candidate.index
        ));
    }

    let Some(previous) = previous else {
        if candidate.index != 0 || candidate.genesis.is_some() || !candidate.back_links.is_empty()
        {
            return Err("genesis block must have index 0 and no back links".to_string());
        }
        return Ok(());
    };

    if candidate.index != previous.index + 1 {
        return Err(format!(
            "index {} does not follow {}",
            candidate.index, previous.index
        ));
    }
    if candidate.genesis != Some(previous.chain_id()) {
        return Err("block names a different chain than its predecessor".to_string());
    }
    if candidate.parent_block != previous.parent_block {
        return Err("parent block differs from predecessor".to_string());
    }
    if (candidate.base_height, candidate.max_height)
        != (previous.base_height, previous.max_height)
    {
        return Err("skip-list parameters differ from predecessor".to_string());
    }
    if candidate.back_links.len() != candidate.height as usize {
        return Err(format!(
            "{} back links for height {}",
            candidate.back_links.len(),
            candidate.height
        ));
    }
    if candidate.back_links.first() != Some(&previous.hash) {
        return Err("first back link does not name the predecessor".to_string());
    }
    Ok(())
}
