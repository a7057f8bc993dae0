use std::sync::Arc;

use anyhow::{Context, Result};

use crate::aggregate::ListingMode;
use crate::tmdb::{self, Genre, Movie, MovieDetail, Page};

pub trait ListingService: Send + Sync {
    fn listing_page(&self, mode: ListingMode, page: u32) -> Result<Page>;
}

pub trait CatalogService: Send + Sync {
    fn search(&self, query: &str) -> Result<Vec<Movie>>;
    fn movie_detail(&self, id: i64) -> Result<MovieDetail>;
    fn genres(&self) -> Result<Vec<Genre>>;
}

pub struct TmdbListingService {
    client: Arc<tmdb::Client>,
}

impl TmdbListingService {
    pub fn new(client: Arc<tmdb::Client>) -> Self {
        Self { client }
    }
}

impl ListingService for TmdbListingService {
    fn listing_page(&self, mode: ListingMode, page: u32) -> Result<Page> {
        match mode {
            ListingMode::Popular => self
                .client
                .popular(page)
                .with_context(|| format!("fetch popular page {page}")),
            ListingMode::Genre(id) => self
                .client
                .discover_by_genre(id, page)
                .with_context(|| format!("fetch genre {id} page {page}")),
        }
    }
}

pub struct TmdbCatalogService {
    client: Arc<tmdb::Client>,
}

impl TmdbCatalogService {
    pub fn new(client: Arc<tmdb::Client>) -> Self {
        Self { client }
    }
}

impl CatalogService for TmdbCatalogService {
    fn search(&self, query: &str) -> Result<Vec<Movie>> {
        self.client
            .search(query)
            .map(|page| page.results)
            .context("search movies")
    }

    fn movie_detail(&self, id: i64) -> Result<MovieDetail> {
        self.client
            .movie_detail(id)
            .with_context(|| format!("fetch movie {id}"))
    }

    fn genres(&self) -> Result<Vec<Genre>> {
        self.client.genres().context("fetch genre list")
    }
}
