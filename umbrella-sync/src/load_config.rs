//! `load_config` module: the YAML key/value store behind `umbrella-sync`.
//!
//! The config file is a flat mapping, by default at `$HOME/.umbrellasync/config.yaml`:
//!
//! ```yaml
//! apihostname: api.umbrella.com
//! apiversion: v2
//! key: <api key>
//! secret: <api secret>
//! files:
//!   - /srv/feeds/phishing.txt
//! highvolumedomains:
//!   - google.com
//! pagesize: 100
//! chunksize: 500
//! pausesecs: 60
//! ```
//!
//! # Responsibilities
//! - Parse the file into an order-preserving [`serde_yaml::Mapping`] and expose typed accessors
//! - Overlay `UMBRELLA_KEY` / `UMBRELLA_SECRET` from the environment onto the API credentials
//! - Back the engine's [`IgnoreStore`]: every appended high-volume domain is written through
//! - Rewrite the whole file atomically (temp file in the same directory, then rename)
//!
//! The file is read once when loaded; concurrent invocations against the same file are not safe.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use directories::BaseDirs;
use serde_yaml::{Mapping, Value};
use tempfile::NamedTempFile;
use tracing::{debug, error, info};
use umbrella_sync_core::contract::IgnoreStore;
use umbrella_sync_core::mutate::DEFAULT_CHUNK_SIZE;
use umbrella_sync_core::synchronise::{SyncSettings, DEFAULT_PAGE_SIZE, DEFAULT_PAUSE};
use umbrella_sync_core::SyncError;

use crate::client::ApiSettings;

pub const DEFAULT_API_HOSTNAME: &str = "api.umbrella.com";
pub const DEFAULT_API_VERSION: &str = "v2";

/// Environment variable overriding the `key` entry.
pub const KEY_ENV: &str = "UMBRELLA_KEY";
/// Environment variable overriding the `secret` entry.
pub const SECRET_ENV: &str = "UMBRELLA_SECRET";

/// Keys accepted by the `config` subcommands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigKey {
    Apihostname,
    Apiversion,
    Key,
    Secret,
    Files,
    Highvolumedomains,
    Pagesize,
    Chunksize,
    Pausesecs,
}

impl ConfigKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::Apihostname => "apihostname",
            ConfigKey::Apiversion => "apiversion",
            ConfigKey::Key => "key",
            ConfigKey::Secret => "secret",
            ConfigKey::Files => "files",
            ConfigKey::Highvolumedomains => "highvolumedomains",
            ConfigKey::Pagesize => "pagesize",
            ConfigKey::Chunksize => "chunksize",
            ConfigKey::Pausesecs => "pausesecs",
        }
    }

    /// Keys holding a list; `set` appends to these.
    pub fn is_sequence(&self) -> bool {
        matches!(self, ConfigKey::Files | ConfigKey::Highvolumedomains)
    }

    fn is_number(&self) -> bool {
        matches!(
            self,
            ConfigKey::Pagesize | ConfigKey::Chunksize | ConfigKey::Pausesecs
        )
    }
}

/// `$HOME/.umbrellasync/config.yaml`.
pub fn default_config_path() -> Result<PathBuf> {
    let dirs = BaseDirs::new().context("Could not determine the home directory")?;
    Ok(dirs.home_dir().join(".umbrellasync").join("config.yaml"))
}

/// Prefix `version` with `v` unless it already has one.
pub fn normalize_api_version(version: &str) -> String {
    let version = version.trim();
    if version.starts_with('v') {
        version.to_string()
    } else {
        format!("v{version}")
    }
}

/// Loads the config file at `path`. A missing or empty file yields an empty store.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ConfigStore> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let values = match std::fs::read_to_string(path_ref) {
        Ok(content) if content.trim().is_empty() => Mapping::new(),
        Ok(content) => match serde_yaml::from_str::<Value>(&content) {
            Ok(Value::Mapping(mapping)) => mapping,
            Ok(Value::Null) => Mapping::new(),
            Ok(other) => {
                error!(config_path = ?path_ref, "Config file is not a key/value mapping");
                anyhow::bail!(
                    "Config file {:?} must be a mapping, found {}",
                    path_ref,
                    yaml_kind(&other)
                );
            }
            Err(e) => {
                error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
                return Err(anyhow::anyhow!("Failed to parse config YAML {:?}: {e}", path_ref));
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(config_path = ?path_ref, "Config file not found; starting empty");
            Mapping::new()
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    Ok(ConfigStore {
        path: path_ref.to_path_buf(),
        values: Mutex::new(values),
    })
}

fn yaml_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// In-memory copy of the config file, written back on every change.
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    values: Mutex<Mapping>,
}

impl ConfigStore {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn values(&self) -> Result<MutexGuard<'_, Mapping>, SyncError> {
        self.values
            .lock()
            .map_err(|_| SyncError::Config("config store lock poisoned".to_string()))
    }

    /// Raw value stored under `key`.
    pub fn get(&self, key: ConfigKey) -> Result<Option<Value>, SyncError> {
        Ok(self.values()?.get(key.as_str()).cloned())
    }

    /// Value under `key` rendered for a terminal: strings bare, everything else as YAML.
    pub fn get_display(&self, key: ConfigKey) -> Result<String, SyncError> {
        match self.get(key)? {
            None | Some(Value::Null) => Ok(String::new()),
            Some(Value::String(s)) => Ok(s),
            Some(other) => serde_yaml::to_string(&other)
                .map(|s| s.trim_end().to_string())
                .map_err(|e| SyncError::Config(e.to_string())),
        }
    }

    /// Store `value` under `key` and persist.
    ///
    /// List keys append (a value already present is left alone); numeric keys must parse as an
    /// unsigned integer; `apiversion` gains a `v` prefix when it lacks one.
    pub fn set(&self, key: ConfigKey, value: &str) -> Result<(), SyncError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(SyncError::Config(format!("empty value for {}", key.as_str())));
        }

        if key.is_sequence() {
            self.append(key, value)?;
            return Ok(());
        }

        let stored = match key {
            ConfigKey::Apiversion => Value::String(normalize_api_version(value)),
            k if k.is_number() => {
                let n: u64 = value.parse().map_err(|_| {
                    SyncError::Config(format!(
                        "{} must be a non-negative integer, got {value:?}",
                        key.as_str()
                    ))
                })?;
                Value::Number(n.into())
            }
            _ => Value::String(value.to_string()),
        };

        let mut values = self.values()?;
        values.insert(Value::String(key.as_str().to_string()), stored);
        self.persist(&values)?;
        info!(key = key.as_str(), "Config value set");
        Ok(())
    }

    /// Append `value` to a list key and persist. Returns `false` if it was already there.
    pub fn append(&self, key: ConfigKey, value: &str) -> Result<bool, SyncError> {
        let mut values = self.values()?;
        let mut items = match values.get(key.as_str()) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Sequence(seq)) => seq.clone(),
            Some(scalar @ Value::String(_)) => vec![scalar.clone()],
            Some(other) => {
                return Err(SyncError::Config(format!(
                    "{} must be a list, found {}",
                    key.as_str(),
                    yaml_kind(other)
                )))
            }
        };

        if items.iter().any(|item| item.as_str() == Some(value)) {
            debug!(key = key.as_str(), value, "Config list already contains value");
            return Ok(false);
        }
        items.push(Value::String(value.to_string()));
        values.insert(
            Value::String(key.as_str().to_string()),
            Value::Sequence(items),
        );
        self.persist(&values)?;
        info!(key = key.as_str(), value, "Appended value to config list");
        Ok(true)
    }

    /// Remove `key` and persist.
    pub fn clear(&self, key: ConfigKey) -> Result<(), SyncError> {
        let mut values = self.values()?;
        values.remove(key.as_str());
        self.persist(&values)?;
        info!(key = key.as_str(), "Config value cleared");
        Ok(())
    }

    fn persist(&self, values: &Mapping) -> Result<(), SyncError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let yaml = serde_yaml::to_string(values).map_err(|e| SyncError::Config(e.to_string()))?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(yaml.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| SyncError::Io(e.error))?;
        debug!(config_path = ?self.path, "Config file written");
        Ok(())
    }

    fn string_list(&self, key: ConfigKey) -> Result<Vec<String>, SyncError> {
        match self.get(key)? {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(vec![s]),
            Some(Value::Sequence(seq)) => seq
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    other => Err(SyncError::Config(format!(
                        "{} entries must be strings, found {}",
                        key.as_str(),
                        yaml_kind(&other)
                    ))),
                })
                .collect(),
            Some(other) => Err(SyncError::Config(format!(
                "{} must be a list of strings, found {}",
                key.as_str(),
                yaml_kind(&other)
            ))),
        }
    }

    fn string_value(&self, key: ConfigKey) -> Result<Option<String>, SyncError> {
        match self.get(key)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(SyncError::Config(format!(
                "{} must be a string, found {}",
                key.as_str(),
                yaml_kind(&other)
            ))),
        }
    }

    fn number_value(&self, key: ConfigKey) -> Result<Option<u64>, SyncError> {
        let invalid = |found: String| {
            SyncError::Config(format!(
                "{} must be a non-negative integer, found {found}",
                key.as_str()
            ))
        };
        match self.get(key)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| invalid(n.to_string())),
            Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid(s)),
            Some(other) => Err(invalid(yaml_kind(&other).to_string())),
        }
    }

    /// Blocklist files to synchronise, in configured order.
    pub fn files(&self) -> Result<Vec<PathBuf>, SyncError> {
        Ok(self
            .string_list(ConfigKey::Files)?
            .into_iter()
            .map(PathBuf::from)
            .collect())
    }

    /// Connection settings; the environment wins over the file for credentials.
    pub fn api_settings(&self) -> Result<ApiSettings, SyncError> {
        let from_env = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let key = from_env(KEY_ENV)
            .or(self.string_value(ConfigKey::Key)?)
            .ok_or_else(|| {
                SyncError::Config(format!("API key missing: set `key` or {KEY_ENV}"))
            })?;
        let secret = from_env(SECRET_ENV)
            .or(self.string_value(ConfigKey::Secret)?)
            .ok_or_else(|| {
                SyncError::Config(format!("API secret missing: set `secret` or {SECRET_ENV}"))
            })?;

        let hostname = self
            .string_value(ConfigKey::Apihostname)?
            .unwrap_or_else(|| DEFAULT_API_HOSTNAME.to_string());
        let version = self
            .string_value(ConfigKey::Apiversion)?
            .map(|v| normalize_api_version(&v))
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

        Ok(ApiSettings {
            hostname,
            version,
            key,
            secret,
        })
    }

    /// Page size, chunk size and inter-file pause, with defaults for absent keys.
    pub fn sync_settings(&self) -> Result<SyncSettings, SyncError> {
        let page_size = match self.number_value(ConfigKey::Pagesize)? {
            Some(n) => u32::try_from(n).map_err(|_| {
                SyncError::Config(format!("pagesize {n} is out of range"))
            })?,
            None => DEFAULT_PAGE_SIZE,
        };
        let chunk_size = match self.number_value(ConfigKey::Chunksize)? {
            Some(n) => usize::try_from(n).map_err(|_| {
                SyncError::Config(format!("chunksize {n} is out of range"))
            })?,
            None => DEFAULT_CHUNK_SIZE,
        };
        let pause = self
            .number_value(ConfigKey::Pausesecs)?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_PAUSE);

        Ok(SyncSettings {
            page_size,
            chunk_size,
            pause,
        })
    }
}

impl IgnoreStore for ConfigStore {
    fn high_volume_domains(&self) -> Result<Vec<String>, SyncError> {
        self.string_list(ConfigKey::Highvolumedomains)
    }

    fn append_high_volume_domain(&self, host: &str) -> Result<bool, SyncError> {
        self.append(ConfigKey::Highvolumedomains, host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_gets_prefix_once() {
        assert_eq!(normalize_api_version("2"), "v2");
        assert_eq!(normalize_api_version("v2"), "v2");
        assert_eq!(normalize_api_version(" 1 "), "v1");
    }

    #[test]
    fn key_names_match_clap_values() {
        for key in ConfigKey::value_variants() {
            let possible = key.to_possible_value().unwrap();
            assert_eq!(possible.get_name(), key.as_str());
        }
    }
}
