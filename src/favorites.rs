use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::storage::KeyValueStore;
use crate::tmdb::Movie;

pub const FAVORITES_KEY: &str = "favorites";

pub struct Favorites {
    store: Arc<dyn KeyValueStore>,
    movies: Vec<Movie>,
}

impl Favorites {
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let movies = match store.get(FAVORITES_KEY) {
            Ok(Some(raw)) => parse_favorites(&raw),
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::warn!("favorites: read failed: {err:#}");
                Vec::new()
            }
        };
        Self { store, movies }
    }

    pub fn movies(&self) -> &[Movie] {
        &self.movies
    }

    pub fn len(&self) -> usize {
        self.movies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.movies.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.movies.iter().any(|movie| movie.id == id)
    }

    pub fn toggle(&mut self, movie: &Movie) -> &[Movie] {
        if let Some(index) = self.movies.iter().position(|m| m.id == movie.id) {
            self.movies.remove(index);
        } else {
            self.movies.insert(0, movie.clone());
        }
        self.persist();
        &self.movies
    }

    fn persist(&self) {
        let encoded = match serde_json::to_string(&self.movies) {
            Ok(encoded) => encoded,
            Err(err) => {
                tracing::warn!("favorites: encode failed: {err}");
                return;
            }
        };
        if let Err(err) = self.store.set(FAVORITES_KEY, &encoded) {
            tracing::warn!("favorites: write failed: {err:#}");
        }
    }
}

fn parse_favorites(raw: &str) -> Vec<Movie> {
    let entries: Vec<Value> = match serde_json::from_str(raw) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!("favorites: ignoring unreadable blob: {err}");
            return Vec::new();
        }
    };
    let mut seen = HashSet::new();
    entries
        .iter()
        .filter_map(Movie::from_value)
        .filter(|movie| seen.insert(movie.id))
        .collect()
}
