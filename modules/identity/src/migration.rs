//! Versioned loading of the identity storage.
//!
//! The current schema is saved together with `DB_VERSION`. Databases written
//! before versioning carry no version and hold one of two incompatible
//! layouts, `storage0a` and `storage0b`. Both are decoded with pure functions
//! and converted into the current [`Storage`]; `storage0a` is tried first.

use minicbor::bytes::ByteVec;
use minicbor::{Decode, Decoder, Encode, Encoder};
use skipchain_common::{KeyPair, SkipBlock, SkipchainError, SkipchainResult};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

use crate::storage::{AuthData, Data, IdBlock, Storage};
use crate::stores::{type_tag, ContextDb, TYPE_TAG_LEN};

pub const DB_VERSION: u32 = 1;
pub const STORAGE_KEY: &[u8] = b"storage";
pub const STORAGE_TYPE: &str = "identity.Storage";

/// Read the storage, converting from a legacy schema when the database
/// predates `DB_VERSION`. An empty database yields an empty storage.
pub fn load_storage(db: &dyn ContextDb) -> SkipchainResult<Storage> {
    let version = db.load_version()?;
    if version < DB_VERSION {
        return load_unversioned(db);
    }
    if version > DB_VERSION {
        return Err(SkipchainError::CorruptStorage {
            reason: format!("storage version {version} is newer than {DB_VERSION}"),
        });
    }

    match db.load(STORAGE_KEY)? {
        Some(payload) if !payload.is_empty() => {
            minicbor::decode(&payload).map_err(|e| SkipchainError::CorruptStorage {
                reason: format!("storage version {version}: {e}"),
            })
        }
        _ => Ok(Storage::default()),
    }
}

/// Write `storage` in the current schema and stamp the version
pub fn save_storage(db: &dyn ContextDb, storage: &Storage) -> SkipchainResult<()> {
    let payload = minicbor::to_vec(storage).map_err(SkipchainError::storage)?;
    db.save(STORAGE_KEY, type_tag(STORAGE_TYPE), &payload)?;
    db.save_version(DB_VERSION)
}

fn load_unversioned(db: &dyn ContextDb) -> SkipchainResult<Storage> {
    let Some(raw) = db.load_raw(STORAGE_KEY)? else {
        return Ok(Storage::default());
    };
    if raw.len() <= TYPE_TAG_LEN {
        return Ok(Storage::default());
    }
    let payload = &raw[TYPE_TAG_LEN..];

    let error_a = match minicbor::decode::<Storage0a>(payload) {
        Ok(legacy) => {
            info!(identities = legacy.identities.len(), "Loaded storage0a");
            return Ok(legacy.into());
        }
        Err(e) => e,
    };
    warn!("storage0a does not decode ({error_a}), trying storage0b");

    match minicbor::decode::<Storage0b>(payload) {
        Ok(legacy) => {
            info!(identities = legacy.identities.len(), "Loaded storage0b");
            Ok(legacy.into())
        }
        Err(error_b) => {
            error!("Unversioned storage matches no known schema");
            Err(SkipchainError::CorruptStorage {
                reason: format!("storage0a: {error_a}; storage0b: {error_b}"),
            })
        }
    }
}

/// Stand-in for the lock the oldest entries carried inline, persisted as an
/// empty map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct LegacyLock;

impl<C> Encode<C> for LegacyLock {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.map(0)?.ok()
    }
}

impl<'a, C> Decode<'a, C> for LegacyLock {
    fn decode(d: &mut Decoder<'a>, _ctx: &mut C) -> Result<Self, minicbor::decode::Error> {
        match d.map()? {
            Some(0) => Ok(LegacyLock),
            _ => Err(minicbor::decode::Error::message("legacy lock is not an empty map")),
        }
    }
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct IdBlock0 {
    #[n(0)]
    pub lock: LegacyLock,
    #[n(1)]
    pub latest: Option<Data>,
    #[n(2)]
    pub proposed: Option<Data>,
    #[n(3)]
    pub latest_skipblock: Option<SkipBlock>,
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct Storage0a {
    #[n(0)]
    pub identities: BTreeMap<String, IdBlock0>,
    /// Key of an even older format, kept readable and never used
    #[n(1)]
    pub old_skipchain_key: Option<ByteVec>,
    #[n(2)]
    pub skipchain_key_pair: Option<KeyPair>,
    #[n(3)]
    pub auth: Option<AuthData>,
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub(crate) struct Storage0b {
    #[n(0)]
    pub identities: BTreeMap<String, IdBlock>,
    #[n(1)]
    pub old_skipchain_key: Option<ByteVec>,
    #[n(2)]
    pub skipchain_key_pair: Option<KeyPair>,
    #[n(3)]
    pub auth: Option<AuthData>,
}

// storage0a never had working authentication, so its auth is dropped
impl From<Storage0a> for Storage {
    fn from(legacy: Storage0a) -> Self {
        let identities = legacy
            .identities
            .into_iter()
            .map(|(id, block)| {
                let block = IdBlock {
                    latest: block.latest,
                    proposed: block.proposed,
                    latest_skipblock: block.latest_skipblock,
                };
                (id, block)
            })
            .collect();
        Storage {
            identities,
            skipchain_key_pair: legacy.skipchain_key_pair,
            auth: None,
        }
    }
}

impl From<Storage0b> for Storage {
    fn from(legacy: Storage0b) -> Self {
        Storage {
            identities: legacy.identities,
            skipchain_key_pair: legacy.skipchain_key_pair,
            auth: legacy.auth,
        }
    }
}
