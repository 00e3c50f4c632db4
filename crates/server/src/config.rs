use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use library::Mount;
use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_COLLECTION_TTL_SECS: u64 = 5 * 365 * 24 * 60 * 60;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MountConfig {
    pub name: String,
    pub path: String,
    pub mount_point: String,
    pub users: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub version: u32,
    pub storage_root: String,
    pub music_folder: String,
    pub index_path: String,
    pub blob_cache_path: String,
    pub port: u16,
    pub user_header: String,
    pub mounts: Vec<MountConfig>,
    pub mutex_enabled: bool,
    pub watch_storage: bool,
    pub watch_debounce_secs: u64,
    pub collection_ttl_secs: u64,
    pub client_cache_days: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            storage_root: "storage".to_string(),
            music_folder: "Music".to_string(),
            index_path: "library.redb".to_string(),
            blob_cache_path: "cache".to_string(),
            port: DEFAULT_PORT,
            user_header: "X-Remote-User".to_string(),
            mounts: Vec::new(),
            mutex_enabled: true,
            watch_storage: true,
            watch_debounce_secs: 2,
            collection_ttl_secs: DEFAULT_COLLECTION_TTL_SECS,
            client_cache_days: 90,
        }
    }
}

impl ServerConfig {
    pub fn resolved_mounts(&self, config_path: &Path) -> Vec<Mount> {
        self.mounts
            .iter()
            .filter(|mount| !mount.name.trim().is_empty() && !mount.path.trim().is_empty())
            .map(|mount| Mount {
                name: mount.name.trim().to_string(),
                path: resolve_path(config_path, mount.path.trim()),
                mount_point: mount.mount_point.clone(),
                users: mount.users.clone(),
            })
            .collect()
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("CUMULUS_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let contents = fs::read_to_string(path)?;
    Ok(normalize(serde_yaml::from_str(&contents)?))
}

pub fn load_or_create_config(path: &Path) -> Result<(ServerConfig, bool), ConfigError> {
    if path.exists() {
        return Ok((load_config(path)?, false));
    }

    let config = ServerConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

fn normalize(mut config: ServerConfig) -> ServerConfig {
    let defaults = ServerConfig::default();
    if config.version < CONFIG_VERSION {
        config.version = CONFIG_VERSION;
    }
    if config.storage_root.trim().is_empty() {
        config.storage_root = defaults.storage_root;
    }
    if config.index_path.trim().is_empty() {
        config.index_path = defaults.index_path;
    }
    if config.blob_cache_path.trim().is_empty() {
        config.blob_cache_path = defaults.blob_cache_path;
    }
    if config.port == 0 {
        config.port = DEFAULT_PORT;
    }
    if config.user_header.trim().is_empty() {
        config.user_header = defaults.user_header;
    }
    if config.watch_debounce_secs == 0 {
        config.watch_debounce_secs = defaults.watch_debounce_secs;
    }
    if config.collection_ttl_secs == 0 {
        config.collection_ttl_secs = DEFAULT_COLLECTION_TTL_SECS;
    }
    config
}

pub fn save_config(path: &Path, config: &ServerConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}
