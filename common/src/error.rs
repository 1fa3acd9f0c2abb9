//! Error taxonomy for skipchain operations

use crate::hash::SkipBlockHash;
use thiserror::Error;

/// Errors returned by block store, chain building, proposal and traversal
/// operations.
///
/// No variant is produced after partial state has been written: a block is
/// either signed, persisted and linked, or absent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipchainError {
    /// No block is stored under the hash.
    #[error("block not found: {hash}")]
    NotFound { hash: SkipBlockHash },

    /// A different block is already stored under the hash.
    #[error("a different block is already stored as {hash}")]
    AlreadyExists { hash: SkipBlockHash },

    /// Pending blocks never reach the store.
    #[error("block {hash} carries no collective signature")]
    BlockNotSigned { hash: SkipBlockHash },

    /// The predecessor had already been extended when the proposal started.
    #[error("block {hash} is not the head of its chain (head is {head})")]
    NotLatest {
        hash: SkipBlockHash,
        head: SkipBlockHash,
    },

    /// The chain head moved between proposal and commit.
    #[error("fork conflict on chain {chain}: expected head {expected:?}, found {actual:?}")]
    ForkConflict {
        chain: SkipBlockHash,
        expected: Option<SkipBlockHash>,
        actual: Option<SkipBlockHash>,
    },

    /// The anchor block already has a nested chain.
    #[error("block {parent} already anchors child chain {child}")]
    ChildAlreadyExists {
        parent: SkipBlockHash,
        child: SkipBlockHash,
    },

    /// A verification policy or a signature check rejected a block.
    #[error("verification failed: {reason}")]
    VerificationFailed { reason: String },

    /// The signing round failed, fell short of the threshold or timed out.
    #[error("signature threshold not met: {reason}")]
    SignatureThresholdNotMet { reason: String, timed_out: bool },

    /// The outgoing roster did not endorse the new roster.
    #[error("roster transition unauthorized: {reason}")]
    RosterTransitionUnauthorized { reason: String },

    /// Persisted state could not be decoded by any known schema.
    #[error("corrupt storage: {reason}")]
    CorruptStorage { reason: String },

    /// Backend failure below the block model.
    #[error("storage backend: {0}")]
    Storage(String),
}

impl SkipchainError {
    pub fn verification(reason: impl Into<String>) -> Self {
        SkipchainError::VerificationFailed {
            reason: reason.into(),
        }
    }

    pub fn storage(error: impl std::fmt::Display) -> Self {
        SkipchainError::Storage(error.to_string())
    }

    /// Either flavour of losing a race for the chain head
    pub fn is_fork_conflict(&self) -> bool {
        matches!(
            self,
            SkipchainError::ForkConflict { .. } | SkipchainError::NotLatest { .. }
        )
    }

    /// Expected races the caller may retry against the current head
    pub fn is_retryable(&self) -> bool {
        self.is_fork_conflict() || matches!(self, SkipchainError::SignatureThresholdNotMet { .. })
    }
}

pub type SkipchainResult<T> = Result<T, SkipchainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy() {
        let hash = SkipBlockHash::default();
        assert!(SkipchainError::NotLatest { hash, head: hash }.is_retryable());
        assert!(SkipchainError::ForkConflict {
            chain: hash,
            expected: None,
            actual: Some(hash)
        }
        .is_fork_conflict());
        assert!(SkipchainError::SignatureThresholdNotMet {
            reason: "timeout".into(),
            timed_out: true
        }
        .is_retryable());
        assert!(!SkipchainError::verification("policy").is_retryable());
        assert!(!SkipchainError::CorruptStorage {
            reason: "decoders".into()
        }
        .is_retryable());
    }

    #[test]
    fn messages_name_the_block() {
        let hash = SkipBlockHash::new([0x11; 32]);
        let message = SkipchainError::NotFound { hash }.to_string();
        assert!(message.contains(&"11".repeat(32)));
    }
}
