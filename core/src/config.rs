use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use dirs::home_dir;
use ragchat_backend_client::DEFAULT_CONNECT_TIMEOUT;
use serde::Deserialize;
use toml::Value as TomlValue;

use crate::sync_poller::DEFAULT_SYNC_MAX_POLLS;
use crate::sync_poller::DEFAULT_SYNC_POLL_INTERVAL;
use crate::sync_poller::SyncPollerOptions;

pub const CONFIG_TOML_FILE: &str = "config.toml";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Environment variable that points the client at a different backend.
pub const BASE_URL_ENV_VAR: &str = "RAGCHAT_BASE_URL";
pub const RAGCHAT_HOME_ENV_VAR: &str = "RAGCHAT_HOME";

/// Application configuration loaded from disk and merged with overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Root URL of the backend, without a trailing slash.
    pub base_url: String,
    pub connect_timeout: Duration,
    pub sync_poll_interval: Duration,
    pub sync_max_polls: u32,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Directory holding `config.toml`; `~/.ragchat` unless `RAGCHAT_HOME`
    /// says otherwise.
    pub ragchat_home: PathBuf,
}

/// Base config deserialized from `~/.ragchat/config.toml`.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ConfigToml {
    pub base_url: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub sync_poll_interval_ms: Option<u64>,
    pub sync_max_polls: Option<u32>,
    pub log_level: Option<String>,
}

/// Optional overrides for user configuration (e.g., from CLI flags).
#[derive(Default, Debug, Clone)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
}

impl Config {
    /// Load configuration from `$RAGCHAT_HOME/config.toml`, apply the `-c`
    /// style `cli_overrides`, then `RAGCHAT_BASE_URL`, then `overrides`.
    pub fn load_with_cli_overrides(
        cli_overrides: Vec<(String, TomlValue)>,
        overrides: ConfigOverrides,
    ) -> std::io::Result<Self> {
        let ragchat_home = find_ragchat_home()?;
        let mut root_value = load_config_as_toml(&ragchat_home)?;
        for (path, value) in cli_overrides {
            apply_toml_override(&mut root_value, &path, value);
        }
        let cfg: ConfigToml = root_value.try_into().map_err(|e| {
            tracing::error!("Failed to deserialize overridden config: {e}");
            std::io::Error::new(ErrorKind::InvalidData, e)
        })?;

        let mut overrides = overrides;
        if overrides.base_url.is_none() {
            overrides.base_url = std::env::var(BASE_URL_ENV_VAR)
                .ok()
                .filter(|v| !v.trim().is_empty());
        }
        Self::load_from_base_config_with_overrides(cfg, overrides, ragchat_home)
    }

    /// Meant to be used exclusively for tests: `load_with_cli_overrides()`
    /// should be used in all other cases.
    pub fn load_from_base_config_with_overrides(
        cfg: ConfigToml,
        overrides: ConfigOverrides,
        ragchat_home: PathBuf,
    ) -> std::io::Result<Self> {
        let base_url = overrides
            .base_url
            .or(cfg.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(invalid("base_url must not be empty"));
        }

        let connect_timeout = match cfg.connect_timeout_ms {
            Some(0) => return Err(invalid("connect_timeout_ms must be greater than 0")),
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_CONNECT_TIMEOUT,
        };
        let sync_poll_interval = match cfg.sync_poll_interval_ms {
            Some(0) => return Err(invalid("sync_poll_interval_ms must be greater than 0")),
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_SYNC_POLL_INTERVAL,
        };
        let sync_max_polls = match cfg.sync_max_polls {
            Some(0) => return Err(invalid("sync_max_polls must be greater than 0")),
            Some(n) => n,
            None => DEFAULT_SYNC_MAX_POLLS,
        };

        Ok(Self {
            base_url,
            connect_timeout,
            sync_poll_interval,
            sync_max_polls,
            log_level: cfg
                .log_level
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            ragchat_home,
        })
    }

    pub fn sync_poller_options(&self) -> SyncPollerOptions {
        SyncPollerOptions {
            interval: self.sync_poll_interval,
            max_polls: self.sync_max_polls,
        }
    }
}

fn invalid(message: &str) -> std::io::Error {
    std::io::Error::new(ErrorKind::InvalidInput, message.to_string())
}

/// Read `config.toml` from `ragchat_home`. A missing file is an empty table.
pub fn load_config_as_toml(ragchat_home: &Path) -> std::io::Result<TomlValue> {
    let config_path = ragchat_home.join(CONFIG_TOML_FILE);
    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<TomlValue>(&contents) {
            Ok(val) => Ok(val),
            Err(e) => {
                tracing::error!("Failed to parse config.toml: {e}");
                Err(std::io::Error::new(ErrorKind::InvalidData, e))
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::info!("config.toml not found, using defaults");
            Ok(TomlValue::Table(Default::default()))
        }
        Err(e) => {
            tracing::error!("Failed to read config.toml: {e}");
            Err(e)
        }
    }
}

/// Apply a single dotted-path override onto a TOML value.
fn apply_toml_override(root: &mut TomlValue, path: &str, value: TomlValue) {
    use toml::value::Table;

    let segments: Vec<&str> = path.split('.').collect();
    let mut current = root;

    for (idx, segment) in segments.iter().enumerate() {
        let is_last = idx == segments.len() - 1;

        if is_last {
            match current {
                TomlValue::Table(table) => {
                    table.insert(segment.to_string(), value);
                }
                _ => {
                    let mut table = Table::new();
                    table.insert(segment.to_string(), value);
                    *current = TomlValue::Table(table);
                }
            }
            return;
        }

        if !current.is_table() {
            *current = TomlValue::Table(Table::new());
        }
        let TomlValue::Table(table) = current else {
            return;
        };
        current = table
            .entry(segment.to_string())
            .or_insert_with(|| TomlValue::Table(Table::new()));
    }
}

/// Returns the path to the ragchat configuration directory, which can be
/// specified by the `RAGCHAT_HOME` environment variable. If not set, defaults
/// to `~/.ragchat`.
///
/// - If `RAGCHAT_HOME` is set, the value will be canonicalized and this
///   function will Err if the path does not exist.
/// - If `RAGCHAT_HOME` is not set, this function does not verify that the
///   directory exists.
pub fn find_ragchat_home() -> std::io::Result<PathBuf> {
    if let Ok(val) = std::env::var(RAGCHAT_HOME_ENV_VAR)
        && !val.is_empty()
    {
        return PathBuf::from(val).canonicalize();
    }

    let mut p = home_dir().ok_or_else(|| {
        std::io::Error::new(ErrorKind::NotFound, "Could not find home directory")
    })?;
    p.push(".ragchat");
    Ok(p)
}
