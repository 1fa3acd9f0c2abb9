use std::{fs, path::Path};

use anyhow::Result;
use fjall::{Database, Keyspace, PersistMode};
use skipchain_common::{SkipchainError, SkipchainResult};
use tracing::info;

use super::{decode_version, encode_version, frame, ContextDb, TypeTag};
use crate::configuration::IdentityConfig;

const VALUES_KEYSPACE: &str = "values";
const META_KEYSPACE: &str = "meta";
const VERSION_KEY: &[u8] = b"version";

/// Values and the schema version live in separate keyspaces, so a value
/// saved under `version` never shadows the schema version
pub struct FjallContextDb {
    database: Database,
    values: Keyspace,
    meta: Keyspace,
}

impl FjallContextDb {
    pub fn new(config: &IdentityConfig) -> Result<Self> {
        let path = Path::new(&config.database_path);
        if config.clear_on_start && path.exists() {
            fs::remove_dir_all(path)?;
        }
        info!("Storing identity state with Fjall on disk ({})", path.display());

        let database = Database::builder(path).open()?;
        let values = database.keyspace(VALUES_KEYSPACE, fjall::KeyspaceCreateOptions::default)?;
        let meta = database.keyspace(META_KEYSPACE, fjall::KeyspaceCreateOptions::default)?;
        Ok(Self {
            database,
            values,
            meta,
        })
    }

    fn persist(&self) -> SkipchainResult<()> {
        self.database.persist(PersistMode::Buffer).map_err(SkipchainError::storage)
    }
}

impl ContextDb for FjallContextDb {
    fn load_raw(&self, key: &[u8]) -> SkipchainResult<Option<Vec<u8>>> {
        let value = self.values.get(key).map_err(SkipchainError::storage)?;
        Ok(value.map(|bytes| bytes.to_vec()))
    }

    fn save(&self, key: &[u8], tag: TypeTag, payload: &[u8]) -> SkipchainResult<()> {
        self.values.insert(key, frame(tag, payload)).map_err(SkipchainError::storage)?;
        self.persist()
    }

    fn load_version(&self) -> SkipchainResult<u32> {
        match self.meta.get(VERSION_KEY).map_err(SkipchainError::storage)? {
            Some(bytes) => decode_version(&bytes),
            None => Ok(0),
        }
    }

    fn save_version(&self, version: u32) -> SkipchainResult<()> {
        self.meta
            .insert(VERSION_KEY, encode_version(version).to_vec())
            .map_err(SkipchainError::storage)?;
        self.persist()
    }
}
