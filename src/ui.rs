use std::io::{self, Stdout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, Borders, Clear, List, ListItem, ListState, Padding, Paragraph, Wrap,
};
use ratatui::{Frame, Terminal};
use textwrap::{wrap, Options as WrapOptions};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::aggregate::{self, Aggregation, Aggregator, ListingMode};
use crate::data::{CatalogService, ListingService};
use crate::favorites::Favorites;
use crate::search::{SearchRequest, SearchState};
use crate::tmdb::{self, Genre, Movie, MovieDetail, PosterSize, TmdbError};
use crate::view::{self, SortKey, ViewOptions};

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_FAVORITE: Color = Color::Rgb(243, 139, 168);
const COLOR_RATING: Color = Color::Rgb(249, 226, 175);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const TICK_RATE: Duration = Duration::from_millis(120);
const ALL_GENRES_LABEL: &str = "All Genres";
const NO_OVERVIEW: &str = "No overview available.";
const MOVIE_NOT_FOUND: &str = "Movie not found.";
const API_KEY_HINT: &str =
    "No TMDB API key configured. Run `marquee --set-api-key KEY` or export TMDB_API_KEY.";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Pane {
    Genres,
    Movies,
    Detail,
}

impl Pane {
    fn title(self) -> &'static str {
        match self {
            Pane::Genres => "Genres",
            Pane::Movies => "Movies",
            Pane::Detail => "Details",
        }
    }

    fn next(self) -> Self {
        match self {
            Pane::Genres => Pane::Movies,
            Pane::Movies => Pane::Detail,
            Pane::Detail => Pane::Detail,
        }
    }

    fn previous(self) -> Self {
        match self {
            Pane::Genres => Pane::Genres,
            Pane::Movies => Pane::Genres,
            Pane::Detail => Pane::Movies,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum InputMode {
    Browse,
    Search,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum LoadMode {
    Replace,
    Append,
}

#[derive(Clone, PartialEq, Eq, Debug)]
enum ListSource {
    Listing(ListingMode),
    Search(String),
}

struct PendingListing {
    request_id: u64,
    cancel_flag: Arc<AtomicBool>,
    load: LoadMode,
}

struct PendingDetail {
    request_id: u64,
    movie_id: i64,
}

struct PendingGenres {
    request_id: u64,
}

enum DetailState {
    Loading,
    Loaded(Box<MovieDetail>),
    Failed(String),
}

struct DetailView {
    movie_id: i64,
    state: DetailState,
}

enum AsyncResponse {
    Listing {
        request_id: u64,
        mode: ListingMode,
        aggregation: Aggregation,
    },
    Genres {
        request_id: u64,
        result: Result<Vec<Genre>>,
    },
    Search {
        generation: u64,
        query: String,
        result: Result<Vec<Movie>>,
    },
    Detail {
        request_id: u64,
        movie_id: i64,
        result: Result<MovieDetail>,
    },
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= TICK_RATE {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

pub struct Options {
    pub status_message: String,
    pub listing_service: Option<Arc<dyn ListingService>>,
    pub catalog_service: Option<Arc<dyn CatalogService>>,
    pub favorites: Favorites,
    pub aggregate: aggregate::Options,
    pub target_count: usize,
    pub default_sort: SortKey,
    pub search_debounce: Duration,
    pub suggestion_limit: usize,
    pub image_base_url: String,
}

pub struct Model {
    status_message: String,
    offline_message: String,
    listing: Vec<Movie>,
    source: ListSource,
    last_page: u32,
    exhausted: bool,
    visible: Vec<Movie>,
    view_options: ViewOptions,
    favorites: Favorites,
    genres: Vec<Genre>,
    genre_cursor: usize,
    active_genre: Option<i64>,
    selected_movie: usize,
    movie_list_state: ListState,
    detail: Option<DetailView>,
    detail_scroll: u16,
    focused_pane: Pane,
    input_mode: InputMode,
    search: SearchState,
    suggestion_cursor: Option<usize>,
    awaiting_search: Option<u64>,
    commit_search: Option<u64>,
    listing_service: Option<Arc<dyn ListingService>>,
    catalog_service: Option<Arc<dyn CatalogService>>,
    aggregate_options: aggregate::Options,
    target_count: usize,
    image_base_url: String,
    needs_redraw: bool,
    spinner: Spinner,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
    next_request_id: u64,
    pending_listing: Option<PendingListing>,
    pending_detail: Option<PendingDetail>,
    pending_genres: Option<PendingGenres>,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        let offline_message = if opts.status_message.trim().is_empty() {
            API_KEY_HINT.to_string()
        } else {
            opts.status_message.clone()
        };
        let mut model = Self {
            status_message: opts.status_message,
            offline_message,
            listing: Vec::new(),
            source: ListSource::Listing(ListingMode::Popular),
            last_page: 0,
            exhausted: false,
            visible: Vec::new(),
            view_options: ViewOptions {
                sort: opts.default_sort,
                favorites_only: false,
            },
            favorites: opts.favorites,
            genres: Vec::new(),
            genre_cursor: 0,
            active_genre: None,
            selected_movie: 0,
            movie_list_state: ListState::default(),
            detail: None,
            detail_scroll: 0,
            focused_pane: Pane::Movies,
            input_mode: InputMode::Browse,
            search: SearchState::new(opts.search_debounce, opts.suggestion_limit),
            suggestion_cursor: None,
            awaiting_search: None,
            commit_search: None,
            listing_service: opts.listing_service,
            catalog_service: opts.catalog_service,
            aggregate_options: opts.aggregate,
            target_count: opts.target_count,
            image_base_url: opts.image_base_url,
            needs_redraw: true,
            spinner: Spinner::new(),
            response_tx,
            response_rx,
            next_request_id: 1,
            pending_listing: None,
            pending_detail: None,
            pending_genres: None,
        };

        model.refresh_visible();
        model.reload_listing(ListingMode::Popular);
        model.reload_genres();
        model
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }
            if self.poll_search(Instant::now()) {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let mut timeout = TICK_RATE
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));
            if let Some(deadline) = self.search.deadline() {
                timeout = timeout.min(deadline.saturating_duration_since(Instant::now()));
            }

            if event::poll(timeout)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        match self.handle_key(key.code) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                self.status_message = format!("Error: {}", err);
                                self.mark_dirty();
                            }
                        }
                    }
                }
            }

            if last_tick.elapsed() >= TICK_RATE {
                last_tick = Instant::now();
                if self.is_loading() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn issue_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    fn is_loading(&self) -> bool {
        self.pending_listing.is_some()
            || self.pending_detail.is_some()
            || self.pending_genres.is_some()
            || self.awaiting_search.is_some()
    }

    fn current_mode(&self) -> ListingMode {
        self.active_genre
            .map(ListingMode::Genre)
            .unwrap_or(ListingMode::Popular)
    }

    fn mode_label(&self, mode: ListingMode) -> String {
        match mode {
            ListingMode::Popular => "Popular movies".to_string(),
            ListingMode::Genre(id) => self
                .genres
                .iter()
                .find(|genre| genre.id == id)
                .map(|genre| format!("{} movies", genre.name))
                .unwrap_or_else(|| format!("Genre {id}")),
        }
    }

    fn cancel_pending_listing(&mut self) {
        if let Some(pending) = self.pending_listing.take() {
            pending.cancel_flag.store(true, Ordering::SeqCst);
        }
    }

    fn reload_listing(&mut self, mode: ListingMode) {
        self.cancel_pending_listing();
        let Some(service) = self.listing_service.clone() else {
            self.status_message = self.offline_message.clone();
            return;
        };

        let request_id = self.issue_request_id();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.pending_listing = Some(PendingListing {
            request_id,
            cancel_flag: cancel_flag.clone(),
            load: LoadMode::Replace,
        });
        self.source = ListSource::Listing(mode);
        self.status_message = format!("Loading {}...", self.mode_label(mode));
        self.spinner.reset();

        let tx = self.response_tx.clone();
        let options = self.aggregate_options;
        let target = self.target_count;
        thread::spawn(move || {
            let aggregation = Aggregator::new(service.as_ref(), options)
                .with_cancel(&cancel_flag)
                .load_listing(mode, target);
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(AsyncResponse::Listing {
                request_id,
                mode,
                aggregation,
            });
        });
    }

    // Ignored while another listing load is in flight.
    fn show_more(&mut self) {
        if self.pending_listing.is_some() {
            return;
        }
        if self.view_options.favorites_only {
            self.status_message = "Show more is not available for favorites.".to_string();
            return;
        }
        let mode = match &self.source {
            ListSource::Listing(mode) => *mode,
            ListSource::Search(_) => {
                self.status_message =
                    "Search results are complete. Press H to return to browsing.".to_string();
                return;
            }
        };
        if self.exhausted {
            self.status_message = format!("No more {} to load.", self.mode_label(mode));
            return;
        }
        let Some(service) = self.listing_service.clone() else {
            self.status_message = self.offline_message.clone();
            return;
        };

        let request_id = self.issue_request_id();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.pending_listing = Some(PendingListing {
            request_id,
            cancel_flag: cancel_flag.clone(),
            load: LoadMode::Append,
        });
        self.status_message = format!("Loading more {}...", self.mode_label(mode));
        self.spinner.reset();

        let tx = self.response_tx.clone();
        let options = self.aggregate_options;
        let target = self.target_count;
        let existing = self.listing.clone();
        let from_page = self.last_page;
        thread::spawn(move || {
            let aggregation = Aggregator::new(service.as_ref(), options)
                .with_cancel(&cancel_flag)
                .load_more(&existing, mode, from_page, target);
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(AsyncResponse::Listing {
                request_id,
                mode,
                aggregation,
            });
        });
    }

    fn reload_genres(&mut self) {
        let Some(service) = self.catalog_service.clone() else {
            return;
        };
        let request_id = self.issue_request_id();
        self.pending_genres = Some(PendingGenres { request_id });
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.genres();
            let _ = tx.send(AsyncResponse::Genres { request_id, result });
        });
    }

    fn load_detail_for_selection(&mut self) {
        let Some(movie) = self.selected_movie().cloned() else {
            self.status_message = "No movie selected.".to_string();
            return;
        };
        self.detail_scroll = 0;
        let Some(service) = self.catalog_service.clone() else {
            self.detail = None;
            self.status_message = self.offline_message.clone();
            return;
        };

        let request_id = self.issue_request_id();
        self.pending_detail = Some(PendingDetail {
            request_id,
            movie_id: movie.id,
        });
        self.detail = Some(DetailView {
            movie_id: movie.id,
            state: DetailState::Loading,
        });
        self.status_message = format!("Loading details for {}...", movie.title);
        self.spinner.reset();

        let tx = self.response_tx.clone();
        let movie_id = movie.id;
        thread::spawn(move || {
            let result = service.movie_detail(movie_id);
            let _ = tx.send(AsyncResponse::Detail {
                request_id,
                movie_id,
                result,
            });
        });
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        changed
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        match message {
            AsyncResponse::Listing {
                request_id,
                mode,
                aggregation,
            } => {
                let Some(pending) = &self.pending_listing else {
                    return;
                };
                if pending.cancel_flag.load(Ordering::SeqCst) || pending.request_id != request_id
                {
                    tracing::debug!(request_id, "dropping superseded listing response");
                    return;
                }
                let load = pending.load;
                self.pending_listing = None;
                self.apply_aggregation(mode, load, aggregation);
            }
            AsyncResponse::Genres { request_id, result } => {
                let Some(pending) = &self.pending_genres else {
                    return;
                };
                if pending.request_id != request_id {
                    return;
                }
                self.pending_genres = None;
                match result {
                    Ok(genres) => {
                        tracing::debug!(count = genres.len(), "genre list loaded");
                        self.genres = genres;
                        self.genre_cursor = self.genre_cursor.min(self.genres.len());
                    }
                    Err(err) => {
                        tracing::warn!("genre list unavailable: {err:#}");
                        self.genres.clear();
                        self.genre_cursor = 0;
                    }
                }
            }
            AsyncResponse::Search {
                generation,
                query,
                result,
            } => {
                if self.awaiting_search == Some(generation) {
                    self.awaiting_search = None;
                }
                let accepted = match result {
                    Ok(movies) => self.search.accept(generation, movies),
                    Err(err) => {
                        tracing::warn!(query = %query, "search failed: {err:#}");
                        let current = self.search.fail(generation);
                        if current {
                            self.status_message = format!("Search failed: {err}");
                        }
                        current
                    }
                };
                if !accepted {
                    tracing::debug!(generation, "dropping stale search response");
                    return;
                }
                self.suggestion_cursor = None;
                if self.commit_search == Some(generation) {
                    self.commit_search = None;
                    let results = self.search.results().to_vec();
                    self.show_search_results(query, results);
                }
            }
            AsyncResponse::Detail {
                request_id,
                movie_id,
                result,
            } => {
                let Some(pending) = &self.pending_detail else {
                    return;
                };
                if pending.request_id != request_id || pending.movie_id != movie_id {
                    return;
                }
                self.pending_detail = None;
                let state = match result {
                    Ok(detail) => {
                        self.status_message = format!("Showing {}.", detail.movie.title);
                        DetailState::Loaded(Box::new(detail))
                    }
                    Err(err) => {
                        let not_found = matches!(
                            err.downcast_ref::<TmdbError>(),
                            Some(TmdbError::NotFound)
                        );
                        if not_found {
                            DetailState::Failed(MOVIE_NOT_FOUND.to_string())
                        } else {
                            tracing::warn!(movie_id, "detail fetch failed: {err:#}");
                            DetailState::Failed(format!("Failed to load details: {err}"))
                        }
                    }
                };
                self.detail = Some(DetailView { movie_id, state });
            }
        }
    }

    fn apply_aggregation(&mut self, mode: ListingMode, load: LoadMode, aggregation: Aggregation) {
        let Aggregation {
            movies,
            last_page,
            exhausted,
            error,
        } = aggregation;
        let previous = self.listing.len();
        if load == LoadMode::Replace {
            self.selected_movie = 0;
            self.detail = None;
            self.pending_detail = None;
            self.detail_scroll = 0;
        }
        self.listing = movies;
        self.last_page = last_page;
        self.exhausted = exhausted;
        self.source = ListSource::Listing(mode);
        self.refresh_visible();

        let label = self.mode_label(mode);
        let total = self.listing.len();
        self.status_message = match (error, load) {
            (Some(err), _) if total == 0 => format!("Failed to load {label}: {err}"),
            (Some(err), _) => format!("Showing {total} {label}; a page failed to load: {err}"),
            (None, LoadMode::Replace) if total == 0 => format!("No movies found for {label}."),
            (None, LoadMode::Replace) => format!("{label}: {total} loaded. Press n for more."),
            (None, LoadMode::Append) => match total.saturating_sub(previous) {
                0 => format!("No more {label} to load."),
                added => format!("Loaded {added} more {label} ({total} total)."),
            },
        };
    }

    fn refresh_visible(&mut self) {
        self.visible = view::derive(&self.listing, self.favorites.movies(), self.view_options);
        if self.visible.is_empty() {
            self.selected_movie = 0;
            self.movie_list_state.select(None);
        } else {
            self.selected_movie = self.selected_movie.min(self.visible.len() - 1);
            self.movie_list_state.select(Some(self.selected_movie));
        }
    }

    fn selected_movie(&self) -> Option<&Movie> {
        self.visible.get(self.selected_movie)
    }

    fn select_movie_at(&mut self, index: usize) {
        if self.visible.is_empty() {
            return;
        }
        let index = index.min(self.visible.len() - 1);
        if index != self.selected_movie {
            self.selected_movie = index;
            self.detail_scroll = 0;
        }
        self.movie_list_state.select(Some(index));
    }

    fn navigate_in_focus(&mut self, delta: i32) {
        match self.focused_pane {
            Pane::Genres => {
                let len = self.genres.len() + 1;
                self.genre_cursor = step_index(self.genre_cursor, delta, len);
            }
            Pane::Movies => {
                let target = step_index(self.selected_movie, delta, self.visible.len());
                self.select_movie_at(target);
            }
            Pane::Detail => {
                self.detail_scroll = if delta < 0 {
                    self.detail_scroll.saturating_sub(delta.unsigned_abs() as u16)
                } else {
                    self.detail_scroll.saturating_add(delta as u16)
                };
            }
        }
    }

    fn commit_genre_selection(&mut self) {
        let genre = match self.genre_cursor {
            0 => None,
            index => self.genres.get(index - 1).map(|genre| genre.id),
        };
        self.active_genre = genre;
        self.view_options.favorites_only = false;
        self.reload_listing(self.current_mode());
        self.focused_pane = Pane::Movies;
    }

    fn toggle_favorite(&mut self) {
        let Some(movie) = self.selected_movie().cloned() else {
            self.status_message = "No movie selected.".to_string();
            return;
        };
        self.favorites.toggle(&movie);
        self.status_message = if self.favorites.contains(movie.id) {
            format!("Added {} to favorites.", movie.title)
        } else {
            format!("Removed {} from favorites.", movie.title)
        };
        self.refresh_visible();
    }

    fn toggle_favorites_only(&mut self) {
        self.view_options.favorites_only = !self.view_options.favorites_only;
        self.selected_movie = 0;
        self.refresh_visible();
        self.status_message = if self.view_options.favorites_only {
            format!("Showing {} favorites.", self.favorites.len())
        } else {
            "Showing all movies.".to_string()
        };
    }

    fn set_sort(&mut self, sort: SortKey) {
        self.view_options.sort = sort;
        self.refresh_visible();
        self.status_message = format!("Sorted by {}.", sort.label());
    }

    fn open_selected_in_browser(&mut self) {
        let Some(movie) = self.selected_movie() else {
            self.status_message = "No movie selected.".to_string();
            return;
        };
        let title = movie.title.clone();
        let url = movie.web_url();
        match webbrowser::open(&url) {
            Ok(_) => self.status_message = format!("Opened {title} in your browser."),
            Err(err) => {
                self.status_message = format!("Failed to open {title}: {err} (URL: {url})")
            }
        }
    }

    fn go_home(&mut self) {
        self.search.clear();
        self.suggestion_cursor = None;
        self.commit_search = None;
        self.awaiting_search = None;
        self.input_mode = InputMode::Browse;
        self.active_genre = None;
        self.genre_cursor = 0;
        self.view_options.favorites_only = false;
        self.focused_pane = Pane::Movies;
        self.reload_listing(ListingMode::Popular);
    }

    fn poll_search(&mut self, now: Instant) -> bool {
        match self.search.poll(now) {
            Some(request) => {
                self.dispatch_search(request);
                true
            }
            None => false,
        }
    }

    fn dispatch_search(&mut self, request: SearchRequest) {
        let Some(service) = self.catalog_service.clone() else {
            self.search.fail(request.generation);
            self.status_message = self.offline_message.clone();
            return;
        };
        tracing::debug!(generation = request.generation, query = %request.query, "search dispatched");
        self.awaiting_search = Some(request.generation);
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = service.search(&request.query);
            let _ = tx.send(AsyncResponse::Search {
                generation: request.generation,
                query: request.query,
                result,
            });
        });
    }

    fn enter_search(&mut self) {
        self.input_mode = InputMode::Search;
        self.suggestion_cursor = None;
        self.status_message = "Search: type a title, Enter to show results, Esc to cancel.".into();
    }

    fn leave_search(&mut self) {
        self.input_mode = InputMode::Browse;
        self.suggestion_cursor = None;
        self.commit_search = None;
    }

    fn submit_search(&mut self) {
        if let Some(index) = self.suggestion_cursor {
            if let Some(movie) = self.search.suggestions().get(index).cloned() {
                self.pick_suggestion(movie);
                return;
            }
        }

        let query = self.search.query().trim().to_string();
        if query.is_empty() {
            self.leave_search();
            return;
        }

        if let Some(request) = self.search.flush() {
            self.commit_search = Some(request.generation);
            self.dispatch_search(request);
            self.status_message = format!("Searching for \"{query}\"...");
        } else if self.awaiting_search == Some(self.search.generation()) {
            self.commit_search = Some(self.search.generation());
            self.status_message = format!("Searching for \"{query}\"...");
        } else {
            let results = self.search.results().to_vec();
            self.show_search_results(query, results);
        }
    }

    fn show_search_results(&mut self, query: String, results: Vec<Movie>) {
        self.cancel_pending_listing();
        let count = results.len();
        self.listing = results;
        self.exhausted = true;
        self.last_page = 0;
        self.selected_movie = 0;
        self.detail = None;
        self.pending_detail = None;
        self.view_options.favorites_only = false;
        self.refresh_visible();
        self.status_message = if count == 0 {
            format!("No movies found for \"{query}\".")
        } else {
            format!("{count} results for \"{query}\".")
        };
        self.source = ListSource::Search(query);
        self.leave_search();
        self.focused_pane = Pane::Movies;
    }

    fn pick_suggestion(&mut self, movie: Movie) {
        let query = movie.title.clone();
        self.show_search_results(query, vec![movie]);
        self.search.clear();
        self.awaiting_search = None;
        self.load_detail_for_selection();
    }

    fn handle_search_key(&mut self, code: KeyCode) -> Result<bool> {
        let now = Instant::now();
        match code {
            KeyCode::Esc => {
                self.search.clear();
                self.awaiting_search = None;
                self.leave_search();
                self.status_message = "Search cancelled.".to_string();
            }
            KeyCode::Enter => self.submit_search(),
            KeyCode::Backspace => {
                self.search.backspace(now);
                self.suggestion_cursor = None;
            }
            KeyCode::Down => {
                let len = self.search.suggestions().len();
                if len > 0 {
                    self.suggestion_cursor = Some(match self.suggestion_cursor {
                        None => 0,
                        Some(index) => (index + 1).min(len - 1),
                    });
                }
            }
            KeyCode::Up => {
                self.suggestion_cursor = match self.suggestion_cursor {
                    None | Some(0) => None,
                    Some(index) => Some(index - 1),
                };
            }
            KeyCode::Char(ch) => {
                self.search.push_char(ch, now);
                self.suggestion_cursor = None;
            }
            _ => return Ok(false),
        }
        self.mark_dirty();
        Ok(false)
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        if self.input_mode == InputMode::Search {
            return self.handle_search_key(code);
        }

        let mut dirty = true;
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
            KeyCode::Char('/') => self.enter_search(),
            KeyCode::Char('j') | KeyCode::Down => self.navigate_in_focus(1),
            KeyCode::Char('k') | KeyCode::Up => self.navigate_in_focus(-1),
            KeyCode::PageDown => self.navigate_in_focus(10),
            KeyCode::PageUp => self.navigate_in_focus(-10),
            KeyCode::Home if self.focused_pane == Pane::Movies => self.select_movie_at(0),
            KeyCode::End if self.focused_pane == Pane::Movies => {
                self.select_movie_at(self.visible.len().saturating_sub(1))
            }
            KeyCode::Char('h') | KeyCode::Left | KeyCode::BackTab => {
                self.focused_pane = self.focused_pane.previous();
            }
            KeyCode::Char('l') | KeyCode::Right | KeyCode::Tab => {
                self.focused_pane = self.focused_pane.next();
            }
            KeyCode::Enter => match self.focused_pane {
                Pane::Genres => self.commit_genre_selection(),
                Pane::Movies | Pane::Detail => {
                    self.load_detail_for_selection();
                    if self.detail.is_some() {
                        self.focused_pane = Pane::Detail;
                    }
                }
            },
            KeyCode::Char('f') => self.toggle_favorite(),
            KeyCode::Char('F') => self.toggle_favorites_only(),
            KeyCode::Char('s') => self.set_sort(self.view_options.sort.next()),
            KeyCode::Char(ch @ '1'..='4') => {
                if let Some(sort) = SortKey::from_index((ch as u8 - b'1') as usize) {
                    self.set_sort(sort);
                }
            }
            KeyCode::Char('n') => self.show_more(),
            KeyCode::Char('r') => match self.source.clone() {
                ListSource::Listing(mode) => self.reload_listing(mode),
                ListSource::Search(_) => self.reload_listing(self.current_mode()),
            },
            KeyCode::Char('H') => self.go_home(),
            KeyCode::Char('o') => self.open_selected_in_browser(),
            _ => dirty = false,
        }

        if dirty {
            self.mark_dirty();
        }
        Ok(false)
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let status_text = if self.is_loading() {
            format!("{} {}", self.spinner.frame(), self.status_message)
                .trim()
                .to_string()
        } else {
            self.status_message.clone()
        };
        let status_line = Paragraph::new(status_text).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        let panes = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(20),
                Constraint::Percentage(40),
                Constraint::Percentage(40),
            ])
            .split(layout[1]);
        self.draw_genres(frame, panes[0]);
        self.draw_movies(frame, panes[1]);
        self.draw_detail(frame, panes[2]);

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(footer, layout[2]);

        if self.input_mode == InputMode::Search {
            self.draw_search(frame, layout[1]);
        }
    }

    fn pane_block(&self, pane: Pane, title: String) -> Block<'static> {
        let focused = self.focused_pane == pane;
        let border_style = if focused {
            Style::default().fg(COLOR_BORDER_FOCUSED)
        } else {
            Style::default().fg(COLOR_BORDER_IDLE)
        };
        let title_style = if focused {
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(COLOR_TEXT_SECONDARY)
        };
        Block::default()
            .title(Span::styled(title, title_style))
            .borders(Borders::ALL)
            .border_style(border_style)
            .style(Style::default().bg(COLOR_PANEL_BG))
            .padding(Padding::horizontal(1))
    }

    fn draw_genres(&self, frame: &mut Frame<'_>, area: Rect) {
        let block = self.pane_block(Pane::Genres, Pane::Genres.title().to_string());
        let inner = block.inner(area);
        frame.render_widget(block, area);
        let focused = self.focused_pane == Pane::Genres;
        let width = inner.width as usize;

        let names = std::iter::once((None, ALL_GENRES_LABEL))
            .chain(
                self.genres
                    .iter()
                    .map(|genre| (Some(genre.id), genre.name.as_str())),
            );
        let items: Vec<ListItem> = names
            .enumerate()
            .map(|(index, (id, name))| {
                let is_active = matches!(self.source, ListSource::Listing(_))
                    && self.active_genre == id;
                let is_cursor = focused && self.genre_cursor == index;
                let marker = if is_active { "●" } else { "○" };
                let mut style = Style::default().fg(if is_active {
                    COLOR_ACCENT
                } else {
                    COLOR_TEXT_SECONDARY
                });
                if is_cursor {
                    style = style
                        .bg(COLOR_PANEL_SELECTED_BG)
                        .fg(COLOR_TEXT_PRIMARY)
                        .add_modifier(Modifier::BOLD);
                }
                let label = truncate_to_width(&format!("{marker} {name}"), width);
                ListItem::new(Line::from(Span::styled(label, style)))
            })
            .collect();

        let mut state = ListState::default().with_selected(Some(self.genre_cursor));
        frame.render_stateful_widget(List::new(items), inner, &mut state);
    }

    fn movies_title(&self) -> String {
        let source = if self.view_options.favorites_only {
            "Favorites".to_string()
        } else {
            match &self.source {
                ListSource::Listing(mode) => self.mode_label(*mode),
                ListSource::Search(query) => format!("Results for \"{query}\""),
            }
        };
        format!(
            "{} · {} · {}",
            Pane::Movies.title(),
            source,
            self.view_options.sort.label()
        )
    }

    fn empty_list_message(&self) -> &'static str {
        if self.view_options.favorites_only {
            "No favorites yet."
        } else if self.pending_listing.is_some() {
            "Loading movies..."
        } else {
            "No movies found."
        }
    }

    fn draw_movies(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let block = self.pane_block(Pane::Movies, self.movies_title());
        let inner = block.inner(area);
        frame.render_widget(block, area);

        if self.visible.is_empty() {
            let message = Paragraph::new(Span::styled(
                self.empty_list_message(),
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .add_modifier(Modifier::ITALIC),
            ))
            .wrap(Wrap { trim: true });
            frame.render_widget(message, inner);
            return;
        }

        let width = inner.width as usize;
        let items: Vec<ListItem> = self
            .visible
            .iter()
            .map(|movie| movie_row(movie, self.favorites.contains(movie.id), width))
            .collect();
        let list = List::new(items).highlight_style(
            Style::default()
                .bg(COLOR_PANEL_SELECTED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_stateful_widget(list, inner, &mut self.movie_list_state);
    }

    fn draw_detail(&self, frame: &mut Frame<'_>, area: Rect) {
        let block = self.pane_block(Pane::Detail, Pane::Detail.title().to_string());
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let Some(movie) = self.selected_movie() else {
            let hint = Paragraph::new(Span::styled(
                "Select a movie to see its details.",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ))
            .wrap(Wrap { trim: true });
            frame.render_widget(hint, inner);
            return;
        };

        let state = self
            .detail
            .as_ref()
            .filter(|detail| detail.movie_id == movie.id)
            .map(|detail| &detail.state);
        let lines = self.detail_lines(movie, state, inner.width as usize);
        let paragraph = Paragraph::new(Text::from(lines)).scroll((self.detail_scroll, 0));
        frame.render_widget(paragraph, inner);
    }

    fn detail_lines(
        &self,
        movie: &Movie,
        state: Option<&DetailState>,
        width: usize,
    ) -> Vec<Line<'static>> {
        let primary = Style::default().fg(COLOR_TEXT_PRIMARY);
        let secondary = Style::default().fg(COLOR_TEXT_SECONDARY);
        let detail = match state {
            Some(DetailState::Loaded(detail)) => Some(&**detail),
            _ => None,
        };
        let movie = detail.map(|detail| &detail.movie).unwrap_or(movie);

        let mut lines = wrap_plain(
            &movie.title,
            width,
            primary.add_modifier(Modifier::BOLD),
        );

        let mut facts = vec![
            match movie.year() {
                Some(year) => year.to_string(),
                None => "Year unknown".to_string(),
            },
            format!("★ {}", format_rating(movie.vote_average)),
        ];
        if let Some(minutes) = detail.and_then(|detail| detail.runtime) {
            facts.push(format!("{minutes} min"));
        }
        lines.extend(wrap_plain(&facts.join(" · "), width, Style::default().fg(COLOR_RATING)));

        if let Some(detail) = detail {
            if !detail.genres.is_empty() {
                let names: Vec<&str> = detail.genres.iter().map(|g| g.name.as_str()).collect();
                lines.extend(wrap_plain(&names.join(", "), width, secondary));
            }
            if let Some(tagline) = &detail.tagline {
                lines.extend(wrap_plain(
                    tagline,
                    width,
                    secondary.add_modifier(Modifier::ITALIC),
                ));
            }
        }

        lines.push(Line::default());
        match state {
            Some(DetailState::Loading) => {
                lines.push(Line::from(Span::styled("Loading details...", secondary)));
            }
            Some(DetailState::Failed(message)) => {
                lines.push(Line::from(Span::styled(
                    message.clone(),
                    Style::default().fg(COLOR_FAVORITE),
                )));
            }
            _ => {}
        }
        let overview = movie
            .overview
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .unwrap_or(NO_OVERVIEW);
        lines.extend(wrap_plain(overview, width, primary));

        lines.push(Line::default());
        let poster = tmdb::poster_url(
            &self.image_base_url,
            PosterSize::Card,
            movie.poster_path.as_deref(),
        )
        .unwrap_or_else(|| tmdb::POSTER_PLACEHOLDER.to_string());
        lines.extend(wrap_plain(&format!("Poster: {poster}"), width, secondary));

        let (favorite_text, favorite_style) = if self.favorites.contains(movie.id) {
            ("♥ In your favorites (f to remove)", Style::default().fg(COLOR_FAVORITE))
        } else {
            ("♡ Press f to add to favorites", secondary)
        };
        lines.push(Line::from(Span::styled(favorite_text, favorite_style)));
        lines
    }

    fn draw_search(&self, frame: &mut Frame<'_>, area: Rect) {
        let suggestions = self.search.suggestions();
        let body_rows = suggestions.len().max(1) as u16;
        let popup = dropdown_rect(area, 70, body_rows + 3);
        frame.render_widget(Clear, popup);

        let block = Block::default()
            .title(Span::styled(
                "Search",
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_ACCENT))
            .style(Style::default().bg(COLOR_PANEL_BG));
        let inner = block.inner(popup);
        frame.render_widget(block, popup);
        let width = inner.width as usize;

        let mut lines = vec![Line::from(vec![
            Span::styled("› ", Style::default().fg(COLOR_ACCENT)),
            Span::styled(
                format!("{}▏", self.search.query()),
                Style::default().fg(COLOR_TEXT_PRIMARY),
            ),
        ])];

        let secondary = Style::default().fg(COLOR_TEXT_SECONDARY);
        if self.search.query().trim().is_empty() {
            lines.push(Line::from(Span::styled("Start typing to search.", secondary)));
        } else if self.search.is_pending() || self.awaiting_search.is_some() {
            lines.push(Line::from(Span::styled("Searching...", secondary)));
        } else if suggestions.is_empty() {
            lines.push(Line::from(Span::styled("No movies found.", secondary)));
        }

        for (index, movie) in suggestions.iter().enumerate() {
            let selected = self.suggestion_cursor == Some(index);
            let thumb = tmdb::poster_url(
                &self.image_base_url,
                PosterSize::Thumb,
                movie.poster_path.as_deref(),
            )
            .unwrap_or_else(|| tmdb::POSTER_PLACEHOLDER.to_string());
            let year = movie
                .year()
                .map(|year| format!(" ({year})"))
                .unwrap_or_default();
            let text = format!("{}{}  {}", movie.title, year, thumb);
            let mut style = Style::default().fg(COLOR_TEXT_PRIMARY);
            if selected {
                style = style
                    .bg(COLOR_PANEL_SELECTED_BG)
                    .add_modifier(Modifier::BOLD);
            }
            lines.push(Line::from(Span::styled(
                truncate_to_width(&text, width),
                style,
            )));
        }

        frame.render_widget(Paragraph::new(Text::from(lines)), inner);
    }

    fn footer_text(&self) -> String {
        if self.input_mode == InputMode::Search {
            return "Search: type to filter · ↑/↓ pick suggestion · Enter show · Esc cancel"
                .to_string();
        }

        let mut parts: Vec<String> = Vec::new();
        match self.focused_pane {
            Pane::Genres => parts.push("Genres: j/k move, Enter load".to_string()),
            Pane::Movies => {
                parts.push("Movies: j/k move, Enter details".to_string());
                parts.push("f favorite".to_string());
            }
            Pane::Detail => {
                parts.push("Details: j/k scroll".to_string());
                parts.push("f favorite".to_string());
            }
        }
        parts.push("/ search".to_string());
        parts.push("s or 1-4 sort".to_string());
        parts.push("F favorites only".to_string());
        if matches!(self.source, ListSource::Listing(_)) && !self.exhausted {
            parts.push("n show more".to_string());
        }
        parts.push("o open in browser".to_string());
        parts.push("H home".to_string());
        parts.push("q quit".to_string());
        parts.join(" · ")
    }
}

fn step_index(current: usize, delta: i32, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let next = current as i64 + delta as i64;
    next.clamp(0, len as i64 - 1) as usize
}

fn format_rating(rating: Option<f64>) -> String {
    match rating {
        Some(value) => format!("{value:.1}"),
        None => "n/a".to_string(),
    }
}

fn movie_row(movie: &Movie, favorite: bool, width: usize) -> ListItem<'static> {
    let heart = if favorite { "♥ " } else { "  " };
    let rating = format!(" ★ {}", format_rating(movie.vote_average));
    let year = movie
        .year()
        .map(|year| format!(" ({year})"))
        .unwrap_or_default();
    let fixed = UnicodeWidthStr::width(heart) + UnicodeWidthStr::width(rating.as_str());
    let title = truncate_to_width(
        &format!("{}{}", movie.title, year),
        width.saturating_sub(fixed),
    );
    let gap = width.saturating_sub(fixed + UnicodeWidthStr::width(title.as_str()));

    ListItem::new(Line::from(vec![
        Span::styled(heart, Style::default().fg(COLOR_FAVORITE)),
        Span::styled(title, Style::default().fg(COLOR_TEXT_PRIMARY)),
        Span::raw(" ".repeat(gap)),
        Span::styled(rating, Style::default().fg(COLOR_RATING)),
    ]))
}

fn truncate_to_width(text: &str, width: usize) -> String {
    if UnicodeWidthStr::width(text) <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + ch_width + 1 > width {
            break;
        }
        out.push(ch);
        used += ch_width;
    }
    out.push('…');
    out
}

fn wrap_plain(text: &str, width: usize, style: Style) -> Vec<Line<'static>> {
    if text.trim().is_empty() {
        return vec![Line::from(Span::styled(String::new(), style))];
    }
    if width == 0 {
        return vec![Line::from(Span::styled(text.to_string(), style))];
    }
    wrap(text, WrapOptions::new(width).break_words(true))
        .into_iter()
        .map(|cow| Line::from(Span::styled(cow.into_owned(), style)))
        .collect()
}

fn dropdown_rect(area: Rect, percent_x: u16, height: u16) -> Rect {
    let percent_x = percent_x.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let column = horizontal[1];
    Rect {
        height: height.min(column.height),
        ..column
    }
}
