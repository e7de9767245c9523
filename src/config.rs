use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use directories::BaseDirs;
use serde::Deserialize;
use tracing::{debug, warn};

const CONFIG_FILE_NAME: &str = "config.toml";
const DB_FILE_NAME: &str = "contacts.db";
const APP_NAME: &str = "rcontacts";

pub const DEFAULT_BASE_URL: &str = "https://randomuser.me/api/";
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_LOAD_MORE_THRESHOLD: usize = 15;

#[derive(Debug, Clone)]
pub struct Config {
    pub config_path: PathBuf,
    pub api: ApiConfig,
    pub sync: SyncSettings,
    pub cache: CacheConfig,
    pub connectivity: ConnectivityConfig,
}

// =============================================================================
// Runtime configuration types
// =============================================================================

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    /// Pinning a seed keeps the feed stable from one page to the next.
    pub seed: Option<String>,
    pub timeout: Duration,
}

/// Paging knobs for the sync controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub page_size: usize,
    /// How close to the end of the visible list the presentation may scroll
    /// before the next page is requested.
    pub load_more_threshold: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            load_more_threshold: DEFAULT_LOAD_MORE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub db_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ConnectivityConfig {
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
}

/// Expand ~ to home directory in paths
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = home::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

// =============================================================================
// File deserialization
// =============================================================================

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    api: ApiFile,
    sync: SyncFile,
    cache: CacheFile,
    connectivity: ConnectivityFile,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ApiFile {
    base_url: String,
    seed: Option<String>,
    timeout_secs: u64,
}

impl Default for ApiFile {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            seed: None,
            timeout_secs: 30,
        }
    }
}

impl ApiFile {
    fn into_config(self) -> Result<ApiConfig> {
        let base_url = self.base_url.trim().to_string();
        reqwest::Url::parse(&base_url)
            .with_context(|| format!("api.base_url is not a valid URL: {}", base_url))?;
        if self.timeout_secs == 0 {
            bail!("api.timeout_secs must be at least 1");
        }
        let seed = self
            .seed
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(ApiConfig {
            base_url,
            seed,
            timeout: Duration::from_secs(self.timeout_secs),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SyncFile {
    page_size: usize,
    load_more_threshold: usize,
}

impl Default for SyncFile {
    fn default() -> Self {
        let defaults = SyncSettings::default();
        Self {
            page_size: defaults.page_size,
            load_more_threshold: defaults.load_more_threshold,
        }
    }
}

impl SyncFile {
    fn into_settings(self) -> Result<SyncSettings> {
        if self.page_size == 0 {
            bail!("sync.page_size must be at least 1");
        }
        Ok(SyncSettings {
            page_size: self.page_size,
            load_more_threshold: self.load_more_threshold,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct CacheFile {
    db_path: Option<PathBuf>,
}

impl CacheFile {
    fn into_config(self) -> Result<CacheConfig> {
        let db_path = match self.db_path {
            Some(path) => expand_tilde(&path),
            None => default_db_path()?,
        };
        Ok(CacheConfig { db_path })
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ConnectivityFile {
    probe_interval_secs: u64,
    probe_timeout_secs: u64,
}

impl Default for ConnectivityFile {
    fn default() -> Self {
        Self {
            probe_interval_secs: 10,
            probe_timeout_secs: 3,
        }
    }
}

impl From<ConnectivityFile> for ConnectivityConfig {
    fn from(file: ConnectivityFile) -> Self {
        Self {
            probe_interval: Duration::from_secs(file.probe_interval_secs.max(1)),
            probe_timeout: Duration::from_secs(file.probe_timeout_secs.max(1)),
        }
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Load the configuration from `explicit`, or from the default location.
///
/// A missing default file is not an error: every key has a default.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                bail!("configuration file not found at {}", path.display());
            }
            path.to_path_buf()
        }
        None => config_path()?,
    };

    if !path.exists() {
        debug!(path = %path.display(), "no configuration file, using defaults");
        return from_file(ConfigFile::default(), path);
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read configuration file at {}", path.display()))?;
    parse(&raw, path)
}

pub fn parse(raw: &str, path: PathBuf) -> Result<Config> {
    let value: toml::Value = toml::from_str(raw)
        .with_context(|| format!("failed to parse {} as TOML", path.display()))?;

    warn_unknown_keys(&value);

    let cfg_file: ConfigFile = value
        .try_into()
        .with_context(|| format!("failed to deserialize config from {}", path.display()))?;

    from_file(cfg_file, path)
}

fn from_file(cfg_file: ConfigFile, path: PathBuf) -> Result<Config> {
    Ok(Config {
        config_path: path,
        api: cfg_file.api.into_config()?,
        sync: cfg_file.sync.into_settings()?,
        cache: cfg_file.cache.into_config()?,
        connectivity: cfg_file.connectivity.into(),
    })
}

fn config_root() -> Result<PathBuf> {
    let base = BaseDirs::new().context("unable to determine base directories")?;
    Ok(base.config_dir().join(APP_NAME))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_root()?.join(CONFIG_FILE_NAME))
}

fn default_db_path() -> Result<PathBuf> {
    let base = BaseDirs::new().ok_or_else(|| anyhow!("unable to determine data directories"))?;
    Ok(base.data_dir().join(APP_NAME).join(DB_FILE_NAME))
}

// =============================================================================
// Unknown key warnings
// =============================================================================

fn warn_unknown_keys(value: &toml::Value) {
    let Some(table) = value.as_table() else {
        return;
    };

    let known = HashSet::from(["api", "sync", "cache", "connectivity"]);
    for key in table.keys() {
        if !known.contains(key.as_str()) {
            warn!("unknown configuration key `{}`", key);
        }
    }

    if let Some(v) = table.get("api") {
        warn_unknown_in_section(v, "api", &["base_url", "seed", "timeout_secs"]);
    }
    if let Some(v) = table.get("sync") {
        warn_unknown_in_section(v, "sync", &["page_size", "load_more_threshold"]);
    }
    if let Some(v) = table.get("cache") {
        warn_unknown_in_section(v, "cache", &["db_path"]);
    }
    if let Some(v) = table.get("connectivity") {
        warn_unknown_in_section(
            v,
            "connectivity",
            &["probe_interval_secs", "probe_timeout_secs"],
        );
    }
}

fn warn_unknown_in_section(value: &toml::Value, section: &str, known: &[&str]) {
    let Some(table) = value.as_table() else {
        return;
    };
    let known_set: HashSet<&str> = known.iter().copied().collect();
    for key in table.keys() {
        if !known_set.contains(key.as_str()) {
            warn!("unknown {}.* entry `{}`", section, key);
        }
    }
}
