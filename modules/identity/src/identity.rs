//! Identity module
//! Keeps the identity service's state on a versioned key/value store. Each
//! identity lives on its own data chain; this crate only records what the
//! service knows about those chains.

pub mod configuration;
pub mod migration;
pub mod storage;
pub mod stores;

use anyhow::Result;
use config::Config;
use skipchain_common::{SkipBlock, SkipchainResult};
use std::sync::Arc;
use tracing::info;

use crate::configuration::IdentityConfig;
use crate::migration::{load_storage, save_storage, DB_VERSION};
use crate::storage::{Data, IdBlock, Storage};
use crate::stores::ContextDb;

/// Loaded identity state bound to the database it came from
pub struct IdentityStore {
    db: Arc<dyn ContextDb>,
    storage: Storage,
}

impl IdentityStore {
    /// Load the state, writing it back in the current schema if it was
    /// migrated from an older one
    pub fn open(db: Arc<dyn ContextDb>) -> SkipchainResult<Self> {
        let version = db.load_version()?;
        let storage = load_storage(db.as_ref())?;
        if version < DB_VERSION {
            save_storage(db.as_ref(), &storage)?;
            info!(
                from = version,
                to = DB_VERSION,
                identities = storage.identities.len(),
                "Identity storage upgraded"
            );
        }
        Ok(Self { db, storage })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let config = IdentityConfig::try_load(config)?;
        let db = stores::open_db(&config)?;
        Ok(Self::open(db)?)
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn identity(&self, id: &str) -> Option<&IdBlock> {
        self.storage.identities.get(id)
    }

    /// Record `block` as the latest state of identity `id`, its payload
    /// decoded as identity data
    pub fn record_block(&mut self, id: &str, block: SkipBlock) -> SkipchainResult<&IdBlock> {
        let latest = Data::from_payload(&block.data)?;
        let entry = self.storage.identities.entry(id.to_string()).or_default();
        entry.latest = Some(latest);
        entry.proposed = None;
        entry.latest_skipblock = Some(block);
        Ok(entry)
    }

    pub fn save(&self) -> SkipchainResult<()> {
        save_storage(self.db.as_ref(), &self.storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::STORAGE_KEY;
    use crate::stores::{type_tag, InMemoryContextDb};
    use skipchain_common::GenesisOptions;
    use skipchain_test_utils::fixture_roster;

    fn block_with(data: &Data) -> SkipBlock {
        let (_, roster) = fixture_roster(2);
        SkipBlock::genesis(roster, &GenesisOptions::default(), data.to_payload().unwrap(), None)
    }

    #[test]
    fn recorded_block_survives_reopen() {
        let db: Arc<dyn ContextDb> = Arc::new(InMemoryContextDb::new());
        let data = Data {
            threshold: 1,
            storage: [("web".to_string(), "https://example.org".to_string())].into(),
            ..Data::default()
        };
        let block = block_with(&data);

        let mut store = IdentityStore::open(db.clone()).unwrap();
        store.record_block("alice", block.clone()).unwrap();
        store.save().unwrap();

        let reopened = IdentityStore::open(db).unwrap();
        let alice = reopened.identity("alice").unwrap();
        assert_eq!(alice.latest, Some(data));
        assert_eq!(alice.latest_skipblock, Some(block));
    }

    #[test]
    fn unversioned_state_is_upgraded_on_open() {
        let db: Arc<dyn ContextDb> = Arc::new(InMemoryContextDb::new());
        let payload = minicbor::to_vec(Storage::default()).unwrap();
        db.save(STORAGE_KEY, type_tag("identity.storage0b"), &payload).unwrap();
        assert_eq!(db.load_version().unwrap(), 0);

        IdentityStore::open(db.clone()).unwrap();
        assert_eq!(db.load_version().unwrap(), DB_VERSION);
    }

    #[test]
    fn undecodable_payload_is_not_recorded() {
        let mut store = IdentityStore::open(Arc::new(InMemoryContextDb::new())).unwrap();
        let (_, roster) = fixture_roster(1);
        let block = SkipBlock::genesis(roster, &GenesisOptions::default(), vec![0xff], None);
        assert!(store.record_block("bob", block).is_err());
        assert!(store.identity("bob").is_none());
    }
}
