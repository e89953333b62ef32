//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 3am) 🦆
//!
//! Three layers, lowest to highest:
//!
//! 1. serde defaults (an empty config is a valid config)
//! 2. `INGESTD_*` environment variables, nested with `__`
//!    (`INGESTD_RUNTIME__WORKER_COUNT=4`)
//! 3. an optional TOML file
//!
//! The CLI then stamps its flags on top with [`ConfigOverrides`].
//!
//! ```toml
//! no_persistence = false
//!
//! [runtime]
//! worker_count = 4
//! saver_count = 2
//! cache_threshold = 25000
//!
//! [proxy]
//! port = 50000
//! token = "ingestbackend"
//!
//! [extractor]
//! kind = "capitalized"
//!
//! [store.Elasticsearch]
//! url = "http://127.0.0.1:9200"
//! ```

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::extractors::ExtractorConfig;
use crate::proxy::ProxyConfig;
use crate::stores::StoreConfig;

/// 🧊 Cores we leave alone for the rest of the machine (the search cluster, the OS,
/// the browser with 400 tabs) when sizing pools by default.
const RESERVED_CORES: usize = 7;

/// 📦 One struct to rule them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// 🕳️ Savers drain into a noop store, whatever `store` says.
    #[serde(default)]
    pub no_persistence: bool,
}

/// ⚙️ Pool sizes, flush threshold, queue bounds. Fixed at startup.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    #[serde(default = "default_pool_size", alias = "iproc_num")]
    pub worker_count: usize,
    #[serde(default = "default_pool_size", alias = "oproc_num")]
    pub saver_count: usize,
    /// 🚦 Records a worker merges before it flushes its cache downstream.
    #[serde(default = "default_cache_threshold", alias = "cache_size")]
    pub cache_threshold: usize,
    /// 📏 Bound for both queues. Unset means unbounded.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
}

fn default_pool_size() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus.saturating_sub(RESERVED_CORES).max(1)
}

fn default_cache_threshold() -> usize {
    25_000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_count: default_pool_size(),
            saver_count: default_pool_size(),
            cache_threshold: default_cache_threshold(),
            queue_capacity: None,
        }
    }
}

/// 🎛️ Command-line knobs. `None` means "leave whatever the file and env said".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub worker_count: Option<usize>,
    pub saver_count: Option<usize>,
    pub port: Option<u16>,
    pub cache_threshold: Option<usize>,
    pub no_persistence: bool,
}

impl AppConfig {
    /// 🎛️ Flags beat files. `no_persistence` can only be switched on from here, never off.
    pub fn with_overrides(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(worker_count) = overrides.worker_count {
            self.runtime.worker_count = worker_count;
        }
        if let Some(saver_count) = overrides.saver_count {
            self.runtime.saver_count = saver_count;
        }
        if let Some(port) = overrides.port {
            self.proxy.port = port;
        }
        if let Some(cache_threshold) = overrides.cache_threshold {
            self.runtime.cache_threshold = cache_threshold;
        }
        self.no_persistence |= overrides.no_persistence;
        self
    }
}

/// 🚀 Load the config: env vars, plus the TOML file if one was given. TOML wins.
///
/// - `None` → env vars and defaults only.
/// - `Some(path)` → env vars + that file. A missing file is not an error to figment,
///   so the CLI checks existence before it gets here.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {}",
        config_file_name
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "(env only)".to_string())
    );

    let config = Figment::new().merge(Env::prefixed("INGESTD_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (INGESTD_*). \
             Check the section names and the types.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (INGESTD_*). \
                 No file was provided, so this one's all on the environment."
            .to_string(),
    };

    config.extract().context(context_msg)
}
