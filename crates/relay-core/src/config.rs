use std::collections::HashMap;
use std::path::Path;

use figment::providers::{Env, Format, Json};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// The one relational-store driver this implementation actually ships.
/// `database.json`'s `driverName` is validated against this at load time —
/// the abstract "relational store" boundary of spec.md §4.7/§6 is the
/// `relay_store::Store` trait; this is the concrete backend behind it.
pub const SUPPORTED_DRIVER: &str = "sqlite";

/// Per-bot configuration, one JSON file per bot under `bot_config/<name>.json`.
/// Field names mirror spec.md §6 exactly (serde renames the wire names).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(rename = "Token")]
    pub token: String,

    #[serde(rename = "ChanID")]
    pub chan_id: String,

    #[serde(rename = "Enabled", default = "bool_true")]
    pub enabled: bool,

    #[serde(rename = "MaxFileSize")]
    pub max_file_size: u64,

    #[serde(rename = "SessionTimeout")]
    pub session_timeout_secs: u64,

    #[serde(rename = "TimeoutCheckInterval")]
    pub timeout_check_interval_secs: u64,

    #[serde(rename = "ThreadsPerPage")]
    pub threads_per_page: u32,

    #[serde(rename = "AllowCommandsInChannel", default)]
    pub allow_commands_in_channel: bool,

    #[serde(rename = "Lang", default)]
    pub lang: HashMap<String, String>,
}

fn bool_true() -> bool {
    true
}

impl BotConfig {
    /// Load a single bot config file, applying `RELAY_<NAME>_*` env overrides.
    ///
    /// `name` is the bot's name (the filename stem) — used only to build the
    /// env-var prefix, the way `SkynetConfig::load` merges `SKYNET_*`.
    pub fn load_file(path: impl AsRef<Path>, name: &str) -> Result<Self> {
        let path = path.as_ref();
        let prefix = format!("RELAY_{}_", name.to_uppercase());
        let config: BotConfig = Figment::new()
            .merge(Json::file(path))
            .merge(Env::prefixed(&prefix))
            .extract()
            .map_err(|e| RelayError::Fatal(format!("{}: {e}", path.display())))?;
        Ok(config)
    }

    /// Derive the bot's name from its config file path (the filename stem),
    /// per spec.md §6 ("name is derived from filename").
    pub fn name_from_path(path: impl AsRef<Path>) -> Option<String> {
        path.as_ref()
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
    }

    pub fn session_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.session_timeout_secs)
    }

    pub fn timeout_check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_check_interval_secs)
    }
}

/// Separate `database.json`, per spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(rename = "driverName")]
    pub driver_name: String,

    #[serde(rename = "dataSource")]
    pub data_source: String,

    #[serde(rename = "connMaxLifetime")]
    pub conn_max_lifetime_minutes: u64,

    #[serde(rename = "maxIdleConns")]
    pub max_idle_conns: u32,
}

impl DatabaseConfig {
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: DatabaseConfig = Figment::new()
            .merge(Json::file(path))
            .merge(Env::prefixed("RELAY_DATABASE_"))
            .extract()
            .map_err(|e| RelayError::Fatal(format!("{}: {e}", path.display())))?;

        if config.driver_name != SUPPORTED_DRIVER {
            return Err(RelayError::Fatal(format!(
                "unsupported database driver {:?}; this build only ships {:?}",
                config.driver_name, SUPPORTED_DRIVER
            )));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_bot_config_with_defaults() {
        let f = write_tmp(
            r#"{
                "Token": "xoxb-test",
                "ChanID": "C123",
                "MaxFileSize": 5242880,
                "SessionTimeout": 3600,
                "TimeoutCheckInterval": 60,
                "ThreadsPerPage": 10
            }"#,
        );
        let cfg = BotConfig::load_file(f.path(), "acme").unwrap();
        assert!(cfg.enabled);
        assert!(!cfg.allow_commands_in_channel);
        assert_eq!(cfg.chan_id, "C123");
        assert_eq!(cfg.session_timeout().as_secs(), 3600);
    }

    #[test]
    fn disabled_bot_is_parsed_not_rejected() {
        let f = write_tmp(
            r#"{
                "Token": "xoxb-test",
                "ChanID": "C123",
                "Enabled": false,
                "MaxFileSize": 1,
                "SessionTimeout": 1,
                "TimeoutCheckInterval": 1,
                "ThreadsPerPage": 1
            }"#,
        );
        let cfg = BotConfig::load_file(f.path(), "acme").unwrap();
        assert!(!cfg.enabled);
    }

    #[test]
    fn name_from_path_uses_filename_stem() {
        assert_eq!(
            BotConfig::name_from_path("bot_config/acme.json").as_deref(),
            Some("acme")
        );
    }

    #[test]
    fn database_config_rejects_unsupported_driver() {
        let f = write_tmp(
            r#"{
                "driverName": "postgres",
                "dataSource": "whatever",
                "connMaxLifetime": 5,
                "maxIdleConns": 2
            }"#,
        );
        let err = DatabaseConfig::load_file(f.path()).unwrap_err();
        assert_eq!(err.code(), "FATAL");
    }

    #[test]
    fn database_config_accepts_sqlite() {
        let f = write_tmp(
            r#"{
                "driverName": "sqlite",
                "dataSource": "./relay.db",
                "connMaxLifetime": 5,
                "maxIdleConns": 2
            }"#,
        );
        let cfg = DatabaseConfig::load_file(f.path()).unwrap();
        assert_eq!(cfg.data_source, "./relay.db");
    }
}
