use std::sync::Arc;

use anyhow::Result;

use crate::block_store::BlockStore;
use crate::configuration::{SkipchainConfig, StoreKind};

mod fjall;
mod in_memory;

pub use self::fjall::FjallBlockStore;
pub use self::in_memory::InMemoryBlockStore;

/// Open the backend selected by `store`
pub fn open_store(config: &SkipchainConfig) -> Result<Arc<dyn BlockStore>> {
    Ok(match config.store {
        StoreKind::Memory => Arc::new(InMemoryBlockStore::new()),
        StoreKind::Fjall => Arc::new(FjallBlockStore::new(config)?),
    })
}
