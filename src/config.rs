use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::aggregate::{DEFAULT_BACKFILL_PAGES, DEFAULT_MAX_PAGES, DEFAULT_TARGET_COUNT};
use crate::search::{DEFAULT_DEBOUNCE, DEFAULT_SUGGESTION_LIMIT};
use crate::tmdb::{DEFAULT_TIMEOUT, TMDB_API_BASE, TMDB_IMAGE_BASE};
use crate::view::SortKey;

const DEFAULT_ENV_PREFIX: &str = "MARQUEE";
const FALLBACK_API_KEY_VAR: &str = "TMDB_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub tmdb: TmdbConfig,
    #[serde(default)]
    pub browse: BrowseConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TmdbConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_image_base_url")]
    pub image_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for TmdbConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            image_base_url: default_image_base_url(),
            language: None,
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    TMDB_API_BASE.to_string()
}

fn default_image_base_url() -> String {
    TMDB_IMAGE_BASE.to_string()
}

fn default_user_agent() -> String {
    format!("marquee/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrowseConfig {
    #[serde(default = "default_target_count")]
    pub target_count: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_backfill_pages")]
    pub backfill_pages: u32,
    #[serde(default)]
    pub default_sort: SortKey,
}

impl Default for BrowseConfig {
    fn default() -> Self {
        Self {
            target_count: default_target_count(),
            max_pages: default_max_pages(),
            backfill_pages: default_backfill_pages(),
            default_sort: SortKey::default(),
        }
    }
}

fn default_target_count() -> usize {
    DEFAULT_TARGET_COUNT
}

fn default_max_pages() -> u32 {
    DEFAULT_MAX_PAGES
}

fn default_backfill_pages() -> u32 {
    DEFAULT_BACKFILL_PAGES
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    #[serde(default = "default_debounce", with = "humantime_serde")]
    pub debounce: Duration,
    #[serde(default = "default_suggestion_limit")]
    pub suggestion_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce: default_debounce(),
            suggestion_limit: default_suggestion_limit(),
        }
    }
}

fn default_debounce() -> Duration {
    DEFAULT_DEBOUNCE
}

fn default_suggestion_limit() -> usize {
    DEFAULT_SUGGESTION_LIMIT
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_file")]
    pub file: Option<PathBuf>,
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
            filter: default_log_filter(),
        }
    }
}

fn default_log_file() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("marquee").join("marquee.log"))
}

fn default_log_filter() -> String {
    "info".into()
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = merge_config(cfg, load_env(prefix));

    if cfg.tmdb.api_key.trim().is_empty() {
        if let Ok(key) = env::var(FALLBACK_API_KEY_VAR) {
            cfg.tmdb.api_key = key.trim().to_string();
        }
    }

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    if data.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    let defaults = Config::default();

    if !other.tmdb.api_key.is_empty() {
        base.tmdb.api_key = other.tmdb.api_key;
    }
    if !other.tmdb.base_url.is_empty() && other.tmdb.base_url != defaults.tmdb.base_url {
        base.tmdb.base_url = other.tmdb.base_url;
    }
    if !other.tmdb.image_base_url.is_empty()
        && other.tmdb.image_base_url != defaults.tmdb.image_base_url
    {
        base.tmdb.image_base_url = other.tmdb.image_base_url;
    }
    if other.tmdb.language.is_some() {
        base.tmdb.language = other.tmdb.language;
    }
    if !other.tmdb.user_agent.is_empty() && other.tmdb.user_agent != defaults.tmdb.user_agent {
        base.tmdb.user_agent = other.tmdb.user_agent;
    }
    if other.tmdb.timeout != defaults.tmdb.timeout {
        base.tmdb.timeout = other.tmdb.timeout;
    }

    if other.browse.target_count != 0 && other.browse.target_count != defaults.browse.target_count
    {
        base.browse.target_count = other.browse.target_count;
    }
    if other.browse.max_pages != 0 && other.browse.max_pages != defaults.browse.max_pages {
        base.browse.max_pages = other.browse.max_pages;
    }
    if other.browse.backfill_pages != defaults.browse.backfill_pages {
        base.browse.backfill_pages = other.browse.backfill_pages;
    }
    if other.browse.default_sort != defaults.browse.default_sort {
        base.browse.default_sort = other.browse.default_sort;
    }

    if other.search.debounce != defaults.search.debounce {
        base.search.debounce = other.search.debounce;
    }
    if other.search.suggestion_limit != 0
        && other.search.suggestion_limit != defaults.search.suggestion_limit
    {
        base.search.suggestion_limit = other.search.suggestion_limit;
    }

    if other.storage.path.is_some() {
        base.storage.path = other.storage.path;
    }

    if other.logging.file.is_some() && other.logging.file != defaults.logging.file {
        base.logging.file = other.logging.file;
    }
    if !other.logging.filter.is_empty() && other.logging.filter != defaults.logging.filter {
        base.logging.filter = other.logging.filter;
    }

    base
}

fn load_env(prefix: &str) -> Config {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    let map: HashMap<String, String> = env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(&upper_prefix)
                .map(|stripped| (stripped.to_ascii_lowercase().replace("__", "."), value))
        })
        .collect();

    let mut cfg = Config::default();
    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }
    cfg
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "tmdb.api_key" => cfg.tmdb.api_key = value.trim().to_string(),
        "tmdb.base_url" => cfg.tmdb.base_url = value,
        "tmdb.image_base_url" => cfg.tmdb.image_base_url = value,
        "tmdb.language" => {
            let value = value.trim();
            if !value.is_empty() {
                cfg.tmdb.language = Some(value.to_string());
            }
        }
        "tmdb.user_agent" => cfg.tmdb.user_agent = value,
        "tmdb.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.tmdb.timeout = duration;
            }
        }
        "browse.target_count" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.browse.target_count = parsed;
            }
        }
        "browse.max_pages" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.browse.max_pages = parsed;
            }
        }
        "browse.backfill_pages" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.browse.backfill_pages = parsed;
            }
        }
        "browse.default_sort" => match value.parse::<SortKey>() {
            Ok(sort) => cfg.browse.default_sort = sort,
            Err(err) => tracing::warn!("config: ignoring {key}: {err}"),
        },
        "search.debounce" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.search.debounce = duration;
            }
        }
        "search.suggestion_limit" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.search.suggestion_limit = parsed;
            }
        }
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        "logging.file" => cfg.logging.file = Some(PathBuf::from(value)),
        "logging.filter" => cfg.logging.filter = value,
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("marquee").join("config.yaml"))
}

pub fn save_api_key(path: Option<PathBuf>, api_key: &str) -> Result<PathBuf> {
    let api_key = api_key.trim();
    anyhow::ensure!(!api_key.is_empty(), "config: tmdb.api_key is required");

    let path = if let Some(path) = path {
        path
    } else {
        default_config_path().context("config: unable to determine default config path")?
    };

    let mut cfg = if path.exists() {
        read_config_file(&path)?
    } else {
        Config::default()
    };
    cfg.tmdb.api_key = api_key.to_string();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("config: failed to create directory {}", parent.display()))?;
    }

    let contents = serde_yaml::to_string(&cfg).context("config: failed to serialize config")?;
    fs::write(&path, contents)
        .with_context(|| format!("config: failed to write file {}", path.display()))?;

    Ok(path)
}
