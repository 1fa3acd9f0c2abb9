// Skipchain common library - main library exports

mod byte_array;
pub mod cosi;
pub mod crypto;
pub mod error;
pub mod hash;
pub mod roster;
pub mod skipblock;

// Flattened re-exports
pub use self::cosi::{
    CollectiveSignature, CollectiveSigner, SignatureError, SigningError, SigningThreshold,
};
pub use self::crypto::{KeyPair, PublicKey, Signature};
pub use self::error::{SkipchainError, SkipchainResult};
pub use self::hash::{Hash, RosterId, SkipBlockHash};
pub use self::roster::{Roster, ServerIdentity};
pub use self::skipblock::{
    back_link_indices, block_height, bounded_max_height, roster_transition_message, ForwardLink,
    GenesisOptions, SkipBlock, VerifierId, MAX_HEIGHT_LIMIT,
};
