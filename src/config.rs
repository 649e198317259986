//! Process-wide defaults, loaded via `figment` (TOML + environment
//! overlay), in the style of `server/src/configs/config_provider.rs`.
//!
//! Nothing here overrides per-queue configuration: `create_queue`'s
//! explicit arguments always win (spec.md §4.1). This only supplies the
//! defaults spec.md §6 already names, so a caller doesn't have to repeat
//! them at every call site.

use crate::error::{QueueError, QueueResult};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub partitions: u32,
    pub backup_hours: u32,
    pub bucket_minutes: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        DefaultsConfig {
            partitions: 1,
            backup_hours: 48,
            bucket_minutes: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerDefaultsConfig {
    pub auto_ack: bool,
    pub poll_latest: bool,
}

impl Default for ConsumerDefaultsConfig {
    fn default() -> Self {
        ConsumerDefaultsConfig {
            auto_ack: true,
            poll_latest: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanInDefaultsConfig {
    pub poll_timeout_ms: u64,
}

impl Default for FanInDefaultsConfig {
    fn default() -> Self {
        FanInDefaultsConfig {
            poll_timeout_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogDefaultsConfig {
    /// `K` in spec.md §4.4's open-next-segment algorithm: how many
    /// segments `get_logs` looks ahead by.
    pub lookahead: usize,
}

impl Default for CatalogDefaultsConfig {
    fn default() -> Self {
        CatalogDefaultsConfig { lookahead: 5 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RootConfig {
    pub defaults: DefaultsConfig,
    pub consumer: ConsumerDefaultsConfig,
    pub fan_in: FanInDefaultsConfig,
    pub catalog: CatalogDefaultsConfig,
}

impl RootConfig {
    /// Load from an optional TOML file, overlaid with `QUEUE_`-prefixed
    /// environment variables. The section/field separator is `__` (a
    /// single `_` is a legal character inside a field name, e.g.
    /// `bucket_minutes`, so it can't double as the separator) — e.g.
    /// `QUEUE_DEFAULTS__BUCKET_MINUTES=10`, `QUEUE_CONSUMER__AUTO_ACK=false`,
    /// `QUEUE_FAN_IN__POLL_TIMEOUT_MS=50`.
    /// Falls back to built-in defaults when no file is present.
    pub fn load(path: Option<&str>) -> QueueResult<Self> {
        let mut figment = Figment::from(figment::providers::Serialized::defaults(
            RootConfig::default(),
        ));
        if let Some(path) = path {
            if std::path::Path::new(path).is_file() {
                figment = figment.merge(Toml::file(path));
            }
        }
        figment = figment.merge(Env::prefixed("QUEUE_").split("__"));
        figment
            .extract()
            .map_err(|err| QueueError::ConfigError(format!("failed to load configuration: {err}")))
    }
}
