use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::application::ServiceOptions;
use crate::storage::StoreOptions;

/// Default configuration file name, looked up without extension (`azell.toml`).
pub const DEFAULT_CONFIG_FILE: &str = "azell";

#[derive(Debug, Clone, Deserialize)]
pub struct Database {
    pub path: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Engine {
    pub scope_timeout_ms: u64,
    pub notify_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    pub filter: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: Database,
    pub engine: Engine,
    pub log: Log,
}

impl Settings {
    /// Load settings from defaults, then the config file, then `AZELL__*` environment variables.
    /// An explicitly named file must exist; the default one is optional.
    pub fn new(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("database.path", "azell.db")?
            .set_default("database.max_connections", 8)?
            .set_default("database.busy_timeout_ms", 5000)?
            .set_default("database.acquire_timeout_ms", 5000)?
            .set_default("engine.scope_timeout_ms", 10000)?
            .set_default("engine.notify_timeout_ms", 2000)?
            .set_default("log.filter", "info")?
            .add_source(
                File::with_name(config_file.unwrap_or(DEFAULT_CONFIG_FILE))
                    .required(config_file.is_some()),
            )
            .add_source(
                Environment::with_prefix("AZELL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            max_connections: self.database.max_connections,
            busy_timeout: Duration::from_millis(self.database.busy_timeout_ms),
            acquire_timeout: Duration::from_millis(self.database.acquire_timeout_ms),
        }
    }

    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            scope_timeout: Duration::from_millis(self.engine.scope_timeout_ms),
            notify_timeout: Duration::from_millis(self.engine.notify_timeout_ms),
        }
    }
}
