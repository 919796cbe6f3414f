//! Server settings
//!
//! Layered in order: built-in defaults, the TOML file (optional), then
//! `TRUSTBRIDGE__SECTION__KEY` environment variables.

use config::{Config, ConfigError, Environment, File};
use escrow_engine::node::EscrowNodeConfig;
use serde::Deserialize;

pub const ENV_PREFIX: &str = "TRUSTBRIDGE";
pub const DEFAULT_CONFIG_PATH: &str = "trustbridge.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    /// Seconds between keep-alive frames on the push channel
    pub keepalive_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            keepalive_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub node: EscrowNodeConfig,
    pub log: LogSettings,
}

impl Settings {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_engine::node::StoreConfig;

    #[test]
    fn test_missing_file_yields_defaults() {
        let settings = Settings::load("does-not-exist.toml").unwrap();
        assert_eq!(settings.server.keepalive_secs, 30);
        assert_eq!(settings.log.level, "info");
        assert_eq!(settings.node.store, StoreConfig::Memory);
        assert_eq!(settings.node.escrow.default_currency, "USD");
    }
}
