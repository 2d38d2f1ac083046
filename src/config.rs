//! Engine configuration.
//!
//! Layered with the `config` crate, later sources overriding earlier ones:
//!
//! 1. built-in defaults
//! 2. an optional file (`chainbook.toml` or any format `config` reads)
//! 3. `CHAINBOOK__*` environment variables, `__` separating sections
//!    (`CHAINBOOK__STORE__BACKEND=sled`)

use std::path::PathBuf;

use primitive_types::U256;
use serde::Deserialize;
use tracing::info;

use crate::engine::ProcessorConfig;
use crate::error::{Result, StoreError};
use crate::settlement::BASE_FEE;
use crate::store::{AnyBackend, AnyStore, MemoryBackend, SledBackend, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Sled,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    pub backend: BackendKind,

    /// Database directory, required for sled
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MatchingConfig {
    pub base_fee: u64,

    /// Flat per-trade relayer fee, in units of the quote token
    pub relayer_fee: u64,

    pub max_trades_per_order: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SnapshotConfig {
    /// Snapshots kept behind the current block, 0 keeps all
    pub keep: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub matching: MatchingConfig,
    pub snapshot: SnapshotConfig,
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                backend: BackendKind::Memory,
                path: None,
            },
            matching: MatchingConfig {
                base_fee: BASE_FEE,
                relayer_fee: 0,
                max_trades_per_order: 0,
            },
            snapshot: SnapshotConfig { keep: 16 },
            log_filter: "chainbook=info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = ::config::Config::builder()
            .set_default("store.backend", "memory")?
            .set_default("matching.base_fee", defaults.matching.base_fee)?
            .set_default("matching.relayer_fee", defaults.matching.relayer_fee)?
            .set_default("matching.max_trades_per_order", defaults.matching.max_trades_per_order as u64)?
            .set_default("snapshot.keep", defaults.snapshot.keep)?
            .set_default("log_filter", defaults.log_filter)?;

        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path).required(false));
        }
        let settings = builder
            .add_source(::config::Environment::with_prefix("CHAINBOOK").separator("__"))
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        Ok(config)
    }

    pub fn processor(&self) -> ProcessorConfig {
        ProcessorConfig {
            base_fee: U256::from(self.matching.base_fee),
            relayer_fee: U256::from(self.matching.relayer_fee),
            max_trades_per_order: self.matching.max_trades_per_order,
        }
    }

    /// Open the configured backend.
    pub fn open_store(&self) -> Result<AnyStore> {
        let backend = match self.store.backend {
            BackendKind::Memory => AnyBackend::Memory(MemoryBackend::default()),
            BackendKind::Sled => {
                let path = self
                    .store
                    .path
                    .as_ref()
                    .ok_or_else(|| StoreError::Config("sled backend needs store.path".into()))?;
                AnyBackend::Sled(SledBackend::open(path)?)
            }
        };
        info!(backend = ?self.store.backend, "store opened");
        Ok(Store::new(backend))
    }
}
