//! Service configuration.
//!
//! Loaded from `sideflow.toml` when present, otherwise from `SIDEFLOW_*`
//! environment variables, with built-in defaults as the last resort.

use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for stored scripts.
    pub script_dir: PathBuf,
    /// Root directory for lock marker/info files.
    pub lock_dir: PathBuf,
    /// Root directory for the `jsFile` template helper.
    pub js_dir: PathBuf,
    /// WebDriver hub endpoint.
    pub grid_url: String,
    /// Session pool warm-up budget in seconds.
    pub pool_init_timeout_s: u64,
    /// Lock TTL for scoped (one-shot) executions in seconds.
    pub default_lock_ttl_s: u64,
    /// Lock TTL for pinned streams in seconds.
    pub stream_lock_ttl_s: u64,
    /// Implicit element wait applied to every driver session, in seconds.
    pub implicit_wait_s: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            script_dir: PathBuf::from(default_script_dir()),
            lock_dir: PathBuf::from(default_lock_dir()),
            js_dir: PathBuf::from(default_js_dir()),
            grid_url: default_grid_url(),
            pool_init_timeout_s: default_pool_init_timeout(),
            default_lock_ttl_s: default_lock_ttl(),
            stream_lock_ttl_s: default_stream_ttl(),
            implicit_wait_s: default_implicit_wait(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    storage: StorageSection,
    #[serde(default)]
    grid: GridSection,
    #[serde(default)]
    locks: LockSection,
}

#[derive(Debug, Deserialize)]
struct StorageSection {
    #[serde(default = "default_script_dir")]
    script_dir: String,
    #[serde(default = "default_lock_dir")]
    lock_dir: String,
    #[serde(default = "default_js_dir")]
    js_dir: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            script_dir: default_script_dir(),
            lock_dir: default_lock_dir(),
            js_dir: default_js_dir(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GridSection {
    #[serde(default = "default_grid_url")]
    url: String,
    #[serde(default = "default_pool_init_timeout")]
    pool_init_timeout_s: u64,
    #[serde(default = "default_implicit_wait")]
    implicit_wait_s: u64,
}

impl Default for GridSection {
    fn default() -> Self {
        Self {
            url: default_grid_url(),
            pool_init_timeout_s: default_pool_init_timeout(),
            implicit_wait_s: default_implicit_wait(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LockSection {
    #[serde(default = "default_lock_ttl")]
    default_ttl_s: u64,
    #[serde(default = "default_stream_ttl")]
    stream_ttl_s: u64,
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            default_ttl_s: default_lock_ttl(),
            stream_ttl_s: default_stream_ttl(),
        }
    }
}

fn default_script_dir() -> String {
    "./storage/sides".to_string()
}

fn default_lock_dir() -> String {
    "./storage/locks".to_string()
}

fn default_js_dir() -> String {
    "./storage/js".to_string()
}

fn default_grid_url() -> String {
    "http://localhost:4444".to_string()
}

fn default_pool_init_timeout() -> u64 {
    30
}

fn default_lock_ttl() -> u64 {
    300
}

fn default_stream_ttl() -> u64 {
    3600
}

fn default_implicit_wait() -> u64 {
    10
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        if let Some(file_config) = load_from_file()? {
            return Ok(Self {
                script_dir: PathBuf::from(file_config.storage.script_dir),
                lock_dir: PathBuf::from(file_config.storage.lock_dir),
                js_dir: PathBuf::from(file_config.storage.js_dir),
                grid_url: file_config.grid.url,
                pool_init_timeout_s: file_config.grid.pool_init_timeout_s,
                default_lock_ttl_s: file_config.locks.default_ttl_s,
                stream_lock_ttl_s: file_config.locks.stream_ttl_s,
                implicit_wait_s: file_config.grid.implicit_wait_s,
            });
        }

        Ok(Self::from_env())
    }

    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            script_dir: env_path("SIDEFLOW_SCRIPT_DIR", defaults.script_dir),
            lock_dir: env_path("SIDEFLOW_LOCK_DIR", defaults.lock_dir),
            js_dir: env_path("SIDEFLOW_JS_DIR", defaults.js_dir),
            grid_url: env::var("SIDEFLOW_GRID_URL").unwrap_or(defaults.grid_url),
            pool_init_timeout_s: env_u64("SIDEFLOW_POOL_INIT_TIMEOUT_S", defaults.pool_init_timeout_s),
            default_lock_ttl_s: env_u64("SIDEFLOW_DEFAULT_LOCK_TTL_S", defaults.default_lock_ttl_s),
            stream_lock_ttl_s: env_u64("SIDEFLOW_STREAM_LOCK_TTL_S", defaults.stream_lock_ttl_s),
            implicit_wait_s: env_u64("SIDEFLOW_IMPLICIT_WAIT_S", defaults.implicit_wait_s),
        }
    }
}

fn env_path(name: &str, fallback: PathBuf) -> PathBuf {
    env::var(name).map(PathBuf::from).unwrap_or(fallback)
}

fn env_u64(name: &str, fallback: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(fallback)
}

fn load_from_file() -> anyhow::Result<Option<FileConfig>> {
    let config_path = env::var("SIDEFLOW_CONFIG").ok();
    let path = if let Some(path) = config_path {
        Some(path)
    } else if Path::new("sideflow.toml").exists() {
        Some("sideflow.toml".to_string())
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(None);
    };

    let contents = fs::read_to_string(&path)
        .map_err(|err| anyhow::anyhow!("Failed to read config {}: {}", path, err))?;
    let parsed: FileConfig = toml::from_str(&contents)
        .map_err(|err| anyhow::anyhow!("Failed to parse config {}: {}", path, err))?;
    Ok(Some(parsed))
}
