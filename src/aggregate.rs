use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::data::ListingService;
use crate::tmdb::Movie;

pub const DEFAULT_TARGET_COUNT: usize = 20;
pub const DEFAULT_MAX_PAGES: u32 = 5;
pub const DEFAULT_BACKFILL_PAGES: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ListingMode {
    #[default]
    Popular,
    Genre(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListingModeError {
    #[error("unknown listing mode {0:?}")]
    Unknown(String),
    #[error("invalid genre id {0:?}")]
    InvalidGenre(String),
}

impl FromStr for ListingMode {
    type Err = ListingModeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("popular") {
            return Ok(ListingMode::Popular);
        }
        match raw.split_once(':') {
            Some((kind, id)) if kind.eq_ignore_ascii_case("genre") => id
                .trim()
                .parse()
                .map(ListingMode::Genre)
                .map_err(|_| ListingModeError::InvalidGenre(id.to_string())),
            _ => Err(ListingModeError::Unknown(raw.to_string())),
        }
    }
}

impl fmt::Display for ListingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListingMode::Popular => write!(f, "popular"),
            ListingMode::Genre(id) => write!(f, "genre:{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub max_pages: u32,
    pub backfill_pages: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_pages: DEFAULT_MAX_PAGES,
            backfill_pages: DEFAULT_BACKFILL_PAGES,
        }
    }
}

#[derive(Debug, Default)]
pub struct Aggregation {
    pub movies: Vec<Movie>,
    pub last_page: u32,
    pub exhausted: bool,
    // First fetch failure; `movies` keeps what was assembled before it.
    pub error: Option<anyhow::Error>,
}

pub struct Aggregator<'a> {
    service: &'a dyn ListingService,
    options: Options,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> Aggregator<'a> {
    pub fn new(service: &'a dyn ListingService, options: Options) -> Self {
        Self {
            service,
            options,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn load_listing(&self, mode: ListingMode, target_count: usize) -> Aggregation {
        self.collect(mode, Vec::new(), 1, target_count)
    }

    pub fn load_more(
        &self,
        existing: &[Movie],
        mode: ListingMode,
        from_page: u32,
        target_count: usize,
    ) -> Aggregation {
        self.collect(
            mode,
            existing.to_vec(),
            from_page.saturating_add(1),
            target_count,
        )
    }

    fn collect(
        &self,
        mode: ListingMode,
        base: Vec<Movie>,
        start_page: u32,
        target: usize,
    ) -> Aggregation {
        let mut seen: HashSet<i64> = base.iter().map(|movie| movie.id).collect();
        let mut picked: Vec<Movie> = Vec::new();
        let mut deferred: Vec<Movie> = Vec::new();
        let mut last_page = start_page.saturating_sub(1);
        let mut exhausted = false;
        let mut error = None;

        let start_page = start_page.max(1);
        let bound = start_page.saturating_add(self.options.max_pages.saturating_sub(1));
        let mut page = start_page;

        while target > 0
            && self.options.max_pages > 0
            && page <= bound
            && picked.len() < target
            && !exhausted
            && !self.cancelled()
        {
            match self.service.listing_page(mode, page) {
                Ok(batch) => {
                    last_page = page;
                    exhausted = batch.is_last();
                    for movie in batch.results {
                        if picked.len() >= target {
                            break;
                        }
                        if !seen.insert(movie.id) {
                            continue;
                        }
                        if movie.has_poster() {
                            picked.push(movie);
                        } else {
                            deferred.push(movie);
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(%mode, page, "listing fetch failed: {err:#}");
                    error = Some(err);
                    break;
                }
            }
            page = page.saturating_add(1);
        }

        if picked.len() < target && error.is_none() {
            let missing = target - picked.len();
            if !deferred.is_empty() {
                tracing::debug!(%mode, missing, "backfilling with poster-less movies");
            }
            picked.extend(deferred.into_iter().take(missing));

            let mut extra = 0;
            while picked.len() < target
                && extra < self.options.backfill_pages
                && !exhausted
                && !self.cancelled()
            {
                let page = last_page.saturating_add(1);
                match self.service.listing_page(mode, page) {
                    Ok(batch) => {
                        last_page = page;
                        exhausted = batch.is_last();
                        for movie in batch.results {
                            if picked.len() >= target {
                                break;
                            }
                            if seen.insert(movie.id) {
                                picked.push(movie);
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(%mode, page, "backfill fetch failed: {err:#}");
                        error = Some(err);
                        break;
                    }
                }
                extra += 1;
            }
        }

        picked.truncate(target);
        tracing::debug!(%mode, added = picked.len(), last_page, exhausted, "listing assembled");

        let mut movies = base;
        movies.extend(picked);
        Aggregation {
            movies,
            last_page,
            exhausted,
            error,
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}
