use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::providers::{providers::ProviderKind, Adapter};
use crate::registry::descriptor::Recommendation;

#[derive(Error, Debug)]
pub(crate) enum Error {
    #[error("failed to read config \"{}\": {}", .0.display(), .1)]
    Read(PathBuf, #[source] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub(crate) struct Server {
    pub bind: String,
}

impl Default for Server {
    fn default() -> Self {
        Server {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub(crate) struct Prober {
    /// Run the periodic refresh while serving
    pub enabled: bool,
    pub interval_secs: u64,
    /// Probes in flight at once
    pub concurrency: usize,
    pub probe_timeout_secs: u64,
    /// Bound on a whole refresh
    pub deadline_secs: u64,
    /// Model probed when nothing better is known about a provider
    pub fallback_model: String,
}

impl Default for Prober {
    fn default() -> Self {
        Prober {
            enabled: true,
            interval_secs: 3600,
            concurrency: 8,
            probe_timeout_secs: 5,
            deadline_secs: 300,
            fallback_model: "gpt-4".to_string(),
        }
    }
}

impl Prober {
    pub(crate) fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub(crate) fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub(crate) fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub(crate) struct Resolver {
    /// Attempt ceiling of unpinned requests
    pub attempts: usize,
    pub attempt_timeout_secs: u64,
    /// The address of this host as seen by the backends
    pub public_ip: Option<IpAddr>,
}

impl Default for Resolver {
    fn default() -> Self {
        Resolver {
            attempts: 10,
            attempt_timeout_secs: 120,
            public_ip: None,
        }
    }
}

impl Resolver {
    pub(crate) fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub(crate) struct Directory {
    pub preferred_models: Vec<String>,
    pub model_blacklist: BTreeSet<String>,
    pub provider_denylist: BTreeSet<String>,
    pub overrides: BTreeMap<String, Vec<String>>,
}

impl Default for Directory {
    fn default() -> Self {
        Directory {
            preferred_models: vec!["gpt-4".to_string(), "gpt-3.5-turbo".to_string()],
            model_blacklist: BTreeSet::new(),
            provider_denylist: BTreeSet::new(),
            overrides: BTreeMap::new(),
        }
    }
}

fn yes() -> bool {
    true
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub(crate) struct Provider {
    pub name: String,
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default)]
    pub url: String,
    /// Where the OpenAI-compatible routes live, `url` when unset
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: Option<String>,
    #[serde(default = "yes")]
    pub working: bool,
    #[serde(default)]
    pub needs_auth: bool,
    pub priority: Option<u8>,
    #[serde(default)]
    pub models: Vec<String>,
    pub default_model: Option<String>,
    #[serde(default)]
    pub supports_gpt_4: bool,
    #[serde(default)]
    pub supports_gpt_35_turbo: bool,
    #[serde(default)]
    pub enumerate_models: bool,
    #[serde(default)]
    pub adapter: Adapter,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub(crate) struct Model {
    pub name: String,
    pub base_provider: Option<String>,
    pub best_provider: Option<Recommendation>,
}

#[derive(Deserialize, Serialize, Default, Debug, Clone)]
pub(crate) struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub prober: Prober,
    #[serde(default)]
    pub resolver: Resolver,
    #[serde(default)]
    pub directory: Directory,
    #[serde(default)]
    pub providers: Vec<Provider>,
    #[serde(default)]
    pub models: Vec<Model>,
}

fn get_config_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME");

    if let Some(home) = home {
        let home = PathBuf::from(home);

        const USER_PATHS: [&str; 2] = [".config/switchboard/config.toml", ".switchboard.toml"];

        for &path in USER_PATHS.iter() {
            let fullpath = home.join(path);

            if fullpath.exists() {
                return Some(fullpath);
            }
        }
    }

    let system_config = PathBuf::from("/etc/switchboard.toml");

    if system_config.exists() {
        Some(system_config)
    } else {
        None
    }
}

fn extra_fields_helper<'a>(
    path: &mut Vec<String>,
    user_value: &'a toml::Value,
    config_value: &'a toml::Value,
    extra: &mut Vec<String>,
) {
    match (user_value, config_value) {
        (toml::Value::Table(user_table), toml::Value::Table(config_table)) => {
            for (user_key, user_value) in user_table {
                path.push(user_key.clone());

                match config_table.get(user_key) {
                    Some(config_value) => {
                        extra_fields_helper(path, user_value, config_value, extra)
                    }
                    None => extra.push(path.join(".")),
                }

                path.pop();
            }
        }
        (toml::Value::Array(user_items), toml::Value::Array(config_items)) => {
            for (i, (user_item, config_item)) in user_items.iter().zip(config_items).enumerate() {
                path.push(i.to_string());
                extra_fields_helper(path, user_item, config_item, extra);
                path.pop();
            }
        }
        _ => {}
    }
}

/// Keys of the raw config that did not make it into the parsed one.
fn extra_fields(config: &Config, raw_config: &str) -> Vec<String> {
    let user_config: toml::Value = match toml::from_str::<toml::Table>(raw_config) {
        Ok(table) => toml::Value::Table(table),
        Err(_) => return Vec::new(),
    };

    let config = match toml::Value::try_from(config) {
        Ok(value) => value,
        Err(_) => return Vec::new(),
    };

    let mut path = Vec::new();
    let mut extra = Vec::new();

    extra_fields_helper(&mut path, &user_config, &config, &mut extra);

    extra
}

pub(crate) fn from_toml(raw_config: &str) -> Result<Config, Error> {
    let config: Config = toml::from_str(raw_config)?;

    for key in extra_fields(&config, raw_config) {
        tracing::warn!("config contains extraneous key \"{}\", ignoring", key);
    }

    Ok(config)
}

fn read_path(path: &Path) -> Result<Config, Error> {
    let raw_config =
        std::fs::read_to_string(path).map_err(|e| Error::Read(path.to_path_buf(), e))?;

    from_toml(&raw_config)
}

/// Read the config at `config`, or at the first of the usual locations that
/// exists. Without either, the defaults are used.
pub(crate) fn read_config(config: Option<PathBuf>) -> Result<Config, Error> {
    match config.or_else(get_config_path) {
        Some(path) => {
            let config = read_path(&path)?;
            tracing::info!("loaded config from {}", path.display());

            Ok(config)
        }
        None => {
            tracing::info!("no config found, using defaults");

            Ok(Config::default())
        }
    }
}
