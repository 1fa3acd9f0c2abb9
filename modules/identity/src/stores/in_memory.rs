//! In-memory context database using DashMap

use dashmap::DashMap;
use skipchain_common::SkipchainResult;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::info;

use super::{frame, ContextDb, TypeTag};

#[derive(Default)]
pub struct InMemoryContextDb {
    values: DashMap<Vec<u8>, Vec<u8>>,
    version: AtomicU32,
}

impl InMemoryContextDb {
    pub fn new() -> Self {
        info!("Storing identity state in memory (DashMap)");
        Self::default()
    }
}

impl ContextDb for InMemoryContextDb {
    fn load_raw(&self, key: &[u8]) -> SkipchainResult<Option<Vec<u8>>> {
        Ok(self.values.get(key).map(|value| value.clone()))
    }

    fn save(&self, key: &[u8], tag: TypeTag, payload: &[u8]) -> SkipchainResult<()> {
        self.values.insert(key.to_vec(), frame(tag, payload));
        Ok(())
    }

    fn load_version(&self) -> SkipchainResult<u32> {
        Ok(self.version.load(Ordering::Acquire))
    }

    fn save_version(&self, version: u32) -> SkipchainResult<()> {
        self.version.store(version, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::tests as shared;

    #[test]
    fn header_is_stripped_by_load() {
        shared::header_is_stripped_by_load(&InMemoryContextDb::new());
    }

    #[test]
    fn version_defaults_to_zero() {
        shared::version_defaults_to_zero(&InMemoryContextDb::new());
    }
}
