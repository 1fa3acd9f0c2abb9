use anyhow::{bail, Result};
use config::Config;
use serde::Deserialize;
use skipchain_common::{GenesisOptions, SigningThreshold, VerifierId, MAX_HEIGHT_LIMIT};
use std::time::Duration;

/// Which [`BlockStore`](crate::block_store::BlockStore) backend to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Fjall,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SkipchainConfig {
    pub store: StoreKind,
    pub database_path: String,
    pub clear_on_start: bool,
    pub signing_timeout_ms: u64,
    pub signing_threshold: SigningThreshold,
    pub base_height: u32,
    pub max_height: u32,
}

impl SkipchainConfig {
    pub fn try_load(config: &Config) -> Result<Self> {
        let full_config = Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config.default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config.clone())
            .build()?;
        let config: Self = full_config.try_deserialize()?;
        if !(1..=MAX_HEIGHT_LIMIT).contains(&config.max_height) {
            bail!("max-height {} is outside 1..={MAX_HEIGHT_LIMIT}", config.max_height);
        }
        Ok(config)
    }

    pub fn signing_timeout(&self) -> Duration {
        Duration::from_millis(self.signing_timeout_ms)
    }

    /// Options for a new chain using the configured skip-list shape
    pub fn genesis_options(&self, verifiers: Vec<VerifierId>) -> GenesisOptions {
        GenesisOptions {
            base_height: self.base_height,
            max_height: self.max_height,
            verifiers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let config = SkipchainConfig::try_load(&Config::default()).unwrap();
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.signing_threshold, SigningThreshold::All);
        assert_eq!(config.signing_timeout(), Duration::from_secs(5));
        assert_eq!((config.base_height, config.max_height), (2, 3));
    }

    #[test]
    fn overrides_win() {
        let overrides = Config::builder()
            .set_override("store", "fjall")
            .unwrap()
            .set_override("signing-threshold", "two-thirds")
            .unwrap()
            .set_override("max-height", 1)
            .unwrap()
            .build()
            .unwrap();
        let config = SkipchainConfig::try_load(&overrides).unwrap();
        assert_eq!(config.store, StoreKind::Fjall);
        assert_eq!(config.signing_threshold, SigningThreshold::TwoThirds);
        assert_eq!(config.max_height, 1);
        assert_eq!(config.genesis_options(vec![VerifierId::none()]).max_height, 1);
    }

    #[test]
    fn max_height_is_bounded() {
        for max_height in [0, MAX_HEIGHT_LIMIT + 1, 20_000_000] {
            let overrides =
                Config::builder().set_override("max-height", max_height).unwrap().build().unwrap();
            let error = SkipchainConfig::try_load(&overrides).unwrap_err();
            assert!(error.to_string().contains("max-height"));
        }
        let overrides = Config::builder()
            .set_override("max-height", MAX_HEIGHT_LIMIT)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(SkipchainConfig::try_load(&overrides).unwrap().max_height, MAX_HEIGHT_LIMIT);
    }
}
