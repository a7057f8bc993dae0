use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::aggregate;
use crate::config::{self, Config};
use crate::data::{CatalogService, ListingService, TmdbCatalogService, TmdbListingService};
use crate::favorites::Favorites;
use crate::storage::{self, KeyValueStore, MemoryStore};
use crate::tmdb;
use crate::ui;

const LOG_FILTER_ENV: &str = "MARQUEE_LOG";

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_file: Option<PathBuf>,
}

pub fn run(options: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: options.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    init_logging(&cfg);

    let config_path = options.config_file.or_else(config::default_path);
    let display_path = friendly_path(config_path.as_ref());
    tracing::info!(version = crate::VERSION, config = %display_path, "starting marquee");

    let store = open_store(&cfg);
    let favorites = Favorites::load(store);

    let mut listing_service: Option<Arc<dyn ListingService>> = None;
    let mut catalog_service: Option<Arc<dyn CatalogService>> = None;
    let status = if cfg.tmdb.api_key.trim().is_empty() {
        format!(
            "No TMDB API key found in {display_path}. \
             Run `marquee --set-api-key KEY` or export TMDB_API_KEY."
        )
    } else {
        match build_client(&cfg) {
            Ok(client) => {
                let client = Arc::new(client);
                listing_service = Some(Arc::new(TmdbListingService::new(client.clone())));
                catalog_service = Some(Arc::new(TmdbCatalogService::new(client)));
                "Loading popular movies...".to_string()
            }
            Err(err) => {
                tracing::warn!("tmdb client unavailable: {err:#}");
                format!("Failed to initialize TMDB client: {err}")
            }
        }
    };

    let mut model = ui::Model::new(ui::Options {
        status_message: status,
        listing_service,
        catalog_service,
        favorites,
        aggregate: aggregate::Options {
            max_pages: cfg.browse.max_pages,
            backfill_pages: cfg.browse.backfill_pages,
        },
        target_count: cfg.browse.target_count,
        default_sort: cfg.browse.default_sort,
        search_debounce: cfg.search.debounce,
        suggestion_limit: cfg.search.suggestion_limit,
        image_base_url: cfg.tmdb.image_base_url.clone(),
    });
    model.run()?;

    tracing::info!("marquee exited");
    Ok(())
}

fn build_client(cfg: &Config) -> Result<tmdb::Client> {
    tmdb::Client::new(tmdb::ClientConfig {
        api_key: cfg.tmdb.api_key.clone(),
        base_url: Some(cfg.tmdb.base_url.clone()),
        language: cfg.tmdb.language.clone(),
        user_agent: cfg.tmdb.user_agent.clone(),
        timeout: Some(cfg.tmdb.timeout),
        http_client: None,
    })
}

fn open_store(cfg: &Config) -> Arc<dyn KeyValueStore> {
    let opts = storage::Options {
        path: cfg.storage.path.clone(),
    };
    match storage::Store::open(opts) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            tracing::warn!("favorites will not persist: {err:#}");
            Arc::new(MemoryStore::new())
        }
    }
}

// The terminal belongs to the UI, so logs go to a file.
fn init_logging(cfg: &Config) {
    let Some(path) = cfg.logging.file.as_deref() else {
        return;
    };
    let file = match open_log_file(path) {
        Ok(file) => file,
        Err(_) => return,
    };
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .or_else(|_| EnvFilter::try_new(&cfg.logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init();
}

fn open_log_file(path: &Path) -> Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))
}

pub fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/marquee/config.yaml".to_string()
    }
}
