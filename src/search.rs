use std::time::{Duration, Instant};

use crate::tmdb::Movie;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);
pub const DEFAULT_SUGGESTION_LIMIT: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub generation: u64,
    pub query: String,
}

#[derive(Debug, Clone)]
pub struct SearchState {
    query: String,
    deadline: Option<Instant>,
    generation: u64,
    results: Vec<Movie>,
    delay: Duration,
    limit: usize,
}

impl Default for SearchState {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE, DEFAULT_SUGGESTION_LIMIT)
    }
}

impl SearchState {
    pub fn new(delay: Duration, limit: usize) -> Self {
        Self {
            query: String::new(),
            deadline: None,
            generation: 0,
            results: Vec::new(),
            delay,
            limit: limit.max(1),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn results(&self) -> &[Movie] {
        &self.results
    }

    pub fn suggestions(&self) -> &[Movie] {
        let end = self.results.len().min(self.limit);
        &self.results[..end]
    }

    // A blank query clears the suggestions at once.
    pub fn input(&mut self, query: impl Into<String>, now: Instant) {
        self.query = query.into();
        self.generation = self.generation.wrapping_add(1);
        if self.query.trim().is_empty() {
            self.deadline = None;
            self.results.clear();
        } else {
            self.deadline = Some(now + self.delay);
        }
    }

    pub fn push_char(&mut self, ch: char, now: Instant) {
        let mut query = std::mem::take(&mut self.query);
        query.push(ch);
        self.input(query, now);
    }

    pub fn backspace(&mut self, now: Instant) {
        let mut query = std::mem::take(&mut self.query);
        query.pop();
        self.input(query, now);
    }

    pub fn poll(&mut self, now: Instant) -> Option<SearchRequest> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        self.deadline = None;
        Some(SearchRequest {
            generation: self.generation,
            query: self.query.trim().to_string(),
        })
    }

    pub fn flush(&mut self) -> Option<SearchRequest> {
        let deadline = self.deadline?;
        self.poll(deadline)
    }

    pub fn accept(&mut self, generation: u64, results: Vec<Movie>) -> bool {
        if generation != self.generation {
            return false;
        }
        self.results = results;
        true
    }

    pub fn fail(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.results.clear();
        true
    }

    pub fn clear(&mut self) {
        self.input(String::new(), Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie(id: i64) -> Movie {
        Movie {
            id,
            title: format!("Movie {id}"),
            poster_path: None,
            release_date: None,
            vote_average: None,
            overview: None,
        }
    }

    #[test]
    fn fires_only_after_delay() {
        let start = Instant::now();
        let mut search = SearchState::new(Duration::from_millis(300), 7);
        search.input("dune", start);
        assert!(search.poll(start + Duration::from_millis(299)).is_none());
        let request = search.poll(start + Duration::from_millis(300)).unwrap();
        assert_eq!(request.query, "dune");
        assert!(search.poll(start + Duration::from_secs(5)).is_none());
    }

    #[test]
    fn keystrokes_reset_the_timer() {
        let start = Instant::now();
        let mut search = SearchState::new(Duration::from_millis(300), 7);
        search.push_char('d', start);
        search.push_char('u', start + Duration::from_millis(200));
        search.push_char('n', start + Duration::from_millis(400));
        assert!(search.poll(start + Duration::from_millis(600)).is_none());
        let request = search.poll(start + Duration::from_millis(700)).unwrap();
        assert_eq!(request.query, "dun");
        assert_eq!(request.generation, search.generation());
    }

    #[test]
    fn stale_results_are_discarded() {
        let start = Instant::now();
        let mut search = SearchState::default();
        search.input("alien", start);
        let first = search.poll(start + DEFAULT_DEBOUNCE).unwrap();
        search.input("aliens", start + Duration::from_secs(1));
        assert!(!search.accept(first.generation, vec![movie(1)]));
        assert!(search.results().is_empty());

        let second = search.poll(start + Duration::from_secs(2)).unwrap();
        assert!(search.accept(second.generation, vec![movie(2)]));
        assert_eq!(search.results()[0].id, 2);
        assert!(!search.fail(first.generation));
    }

    #[test]
    fn blank_query_clears_without_request() {
        let start = Instant::now();
        let mut search = SearchState::default();
        search.input("x", start);
        let request = search.poll(start + DEFAULT_DEBOUNCE).unwrap();
        search.accept(request.generation, vec![movie(1)]);
        search.backspace(start + Duration::from_secs(1));
        assert!(search.results().is_empty());
        assert!(!search.is_pending());
        assert!(search.poll(start + Duration::from_secs(10)).is_none());
    }

    #[test]
    fn suggestions_are_capped() {
        let mut search = SearchState::new(Duration::ZERO, 3);
        let now = Instant::now();
        search.input("a", now);
        let request = search.poll(now).unwrap();
        search.accept(request.generation, (1..=10).map(movie).collect());
        assert_eq!(search.suggestions().len(), 3);
        assert_eq!(search.results().len(), 10);
    }

    #[test]
    fn flush_fires_before_deadline() {
        let start = Instant::now();
        let mut search = SearchState::default();
        assert!(search.flush().is_none());
        search.input("heat", start);
        let request = search.flush().unwrap();
        assert_eq!(request.query, "heat");
        assert!(search.poll(start + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn failure_clears_current_results() {
        let now = Instant::now();
        let mut search = SearchState::new(Duration::ZERO, 7);
        search.input("a", now);
        let request = search.poll(now).unwrap();
        search.accept(request.generation, vec![movie(1)]);
        search.input("ab", now);
        let request = search.poll(now).unwrap();
        assert!(search.fail(request.generation));
        assert!(search.results().is_empty());
    }
}
