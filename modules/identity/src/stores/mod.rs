use std::sync::Arc;

use anyhow::Result;
use skipchain_common::{SkipBlockHash, SkipchainError, SkipchainResult};

use crate::configuration::{IdentityConfig, StoreKind};

mod fjall;
mod in_memory;

pub use self::fjall::FjallContextDb;
pub use self::in_memory::InMemoryContextDb;

/// Length of the type header in front of every value saved with
/// [`ContextDb::save`]
pub const TYPE_TAG_LEN: usize = 16;

/// Identifies the schema of a saved value
pub type TypeTag = [u8; TYPE_TAG_LEN];

/// Tag for the type called `name`: the leading bytes of its Blake2b digest
pub fn type_tag(name: &str) -> TypeTag {
    let digest = SkipBlockHash::digest([name.as_bytes()]).into_inner();
    let mut tag = [0u8; TYPE_TAG_LEN];
    tag.copy_from_slice(&digest[..TYPE_TAG_LEN]);
    tag
}

/// Byte-oriented key/value storage of one service, plus the schema version of
/// what it holds.
///
/// Values are stored as a type header followed by the payload. `load` strips
/// the header, `load_raw` returns the bytes as stored.
pub trait ContextDb: Send + Sync {
    fn load_raw(&self, key: &[u8]) -> SkipchainResult<Option<Vec<u8>>>;

    fn save(&self, key: &[u8], tag: TypeTag, payload: &[u8]) -> SkipchainResult<()>;

    /// Stored schema version, 0 when none was ever saved
    fn load_version(&self) -> SkipchainResult<u32>;

    fn save_version(&self, version: u32) -> SkipchainResult<()>;

    fn load(&self, key: &[u8]) -> SkipchainResult<Option<Vec<u8>>> {
        let Some(raw) = self.load_raw(key)? else {
            return Ok(None);
        };
        match raw.get(TYPE_TAG_LEN..) {
            Some(payload) => Ok(Some(payload.to_vec())),
            None => Err(SkipchainError::CorruptStorage {
                reason: format!("value of {} bytes has no type header", raw.len()),
            }),
        }
    }
}

/// Header and payload as stored
pub(crate) fn frame(tag: TypeTag, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(TYPE_TAG_LEN + payload.len());
    bytes.extend_from_slice(&tag);
    bytes.extend_from_slice(payload);
    bytes
}

pub(crate) fn encode_version(version: u32) -> [u8; 4] {
    version.to_be_bytes()
}

pub(crate) fn decode_version(bytes: &[u8]) -> SkipchainResult<u32> {
    let bytes: [u8; 4] = bytes.try_into().map_err(|_| SkipchainError::CorruptStorage {
        reason: format!("version of {} bytes", bytes.len()),
    })?;
    Ok(u32::from_be_bytes(bytes))
}

/// Open the backend selected by `store`
pub fn open_db(config: &IdentityConfig) -> Result<Arc<dyn ContextDb>> {
    Ok(match config.store {
        StoreKind::Memory => Arc::new(InMemoryContextDb::new()),
        StoreKind::Fjall => Arc::new(FjallContextDb::new(config)?),
    })
}
