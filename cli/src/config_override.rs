//! Support for `-c key=value` overrides of `config.toml` settings.
//!
//! [`CliConfigOverrides`] is embedded into the top-level `clap` struct with
//! `#[clap(flatten)]`. Each occurrence of `-c key=value` (or
//! `--config key=value`) is collected as a raw string and parsed into a
//! `(path, toml::Value)` pair for the config loader.

use clap::ArgAction;
use clap::Parser;
use toml::Value;

#[derive(Parser, Debug, Default, Clone)]
pub struct CliConfigOverrides {
    /// Override a value from `~/.ragchat/config.toml`. The `value` portion is
    /// parsed as TOML; if that fails the raw string is used.
    ///
    /// Examples:
    ///   - `-c sync_poll_interval_ms=1000`
    ///   - `-c base_url=http://127.0.0.1:9000`
    #[arg(
        short = 'c',
        long = "config",
        value_name = "key=value",
        action = ArgAction::Append,
        global = true,
    )]
    pub raw_overrides: Vec<String>,
}

impl CliConfigOverrides {
    pub fn parse_overrides(&self) -> Result<Vec<(String, Value)>, String> {
        self.raw_overrides
            .iter()
            .map(|s| {
                // Only split on the first '=' so values may contain it.
                let Some((key, value_str)) = s.split_once('=') else {
                    return Err(format!("Invalid override (missing '='): {s}"));
                };
                let key = key.trim();
                let value_str = value_str.trim();
                if key.is_empty() {
                    return Err(format!("Empty key in override: {s}"));
                }
                let value = parse_toml_value(value_str)
                    .unwrap_or_else(|| Value::String(value_str.to_string()));
                Ok((key.to_string(), value))
            })
            .collect()
    }
}

/// Parse a bare TOML value such as `42`, `true` or `"text"`.
fn parse_toml_value(raw: &str) -> Option<Value> {
    let wrapped = format!("_v_ = {raw}");
    let mut table: toml::Table = toml::from_str(&wrapped).ok()?;
    table.remove("_v_")
}
