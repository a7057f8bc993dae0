use std::time::Duration;

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

pub const TMDB_API_BASE: &str = "https://api.themoviedb.org/3";
pub const TMDB_IMAGE_BASE: &str = "https://image.tmdb.org/t/p";
pub const TMDB_MOVIE_URL: &str = "https://www.themoviedb.org/movie";
pub const POSTER_PLACEHOLDER: &str = "[no poster]";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

static YEAR_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d{4})").expect("year pattern is valid"));

#[derive(Debug, thiserror::Error)]
pub enum TmdbError {
    #[error("tmdb: api key rejected (401)")]
    Unauthorized,
    #[error("tmdb: resource not found (404)")]
    NotFound,
    #[error("tmdb: rate limited (429)")]
    RateLimited,
    #[error("tmdb: api error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("tmdb: unexpected response shape for {0}")]
    Shape(String),
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub language: Option<String>,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub id: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_average: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
}

impl Movie {
    pub fn from_value(value: &Value) -> Option<Movie> {
        let id = lenient_id(value.get("id")?)?;
        let title = lenient_string(value, "title")
            .or_else(|| lenient_string(value, "original_title"))
            .unwrap_or_else(|| "Untitled".to_string());
        Some(Movie {
            id,
            title,
            poster_path: lenient_string(value, "poster_path"),
            release_date: lenient_string(value, "release_date"),
            vote_average: lenient_rating(value.get("vote_average")),
            overview: lenient_string(value, "overview"),
        })
    }

    pub fn has_poster(&self) -> bool {
        self.poster_path
            .as_deref()
            .is_some_and(|path| !path.trim().is_empty())
    }

    pub fn year(&self) -> Option<i32> {
        release_year(self.release_date.as_deref())
    }

    pub fn web_url(&self) -> String {
        format!("{}/{}", TMDB_MOVIE_URL, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovieDetail {
    pub movie: Movie,
    pub runtime: Option<u32>,
    pub genres: Vec<Genre>,
    pub tagline: Option<String>,
}

impl MovieDetail {
    pub fn from_value(value: &Value) -> Option<MovieDetail> {
        let movie = Movie::from_value(value)?;
        let runtime = value
            .get("runtime")
            .and_then(Value::as_u64)
            .filter(|minutes| *minutes > 0)
            .and_then(|minutes| u32::try_from(minutes).ok());
        Some(MovieDetail {
            movie,
            runtime,
            genres: genres_from_value(value.get("genres")),
            tagline: lenient_string(value, "tagline"),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub page: u32,
    pub total_pages: Option<u32>,
    pub results: Vec<Movie>,
}

impl Page {
    pub fn from_value(value: &Value, requested: u32) -> Result<Page> {
        if !value.is_object() {
            bail!(TmdbError::Shape("listing page".into()));
        }
        let results = value
            .get("results")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let movie = Movie::from_value(item);
                        if movie.is_none() {
                            tracing::debug!(page = requested, "skipping listing entry without id");
                        }
                        movie
                    })
                    .collect()
            })
            .unwrap_or_default();
        let page = value
            .get("page")
            .and_then(Value::as_u64)
            .and_then(|page| u32::try_from(page).ok())
            .unwrap_or(requested);
        let total_pages = value
            .get("total_pages")
            .and_then(Value::as_u64)
            .and_then(|total| u32::try_from(total).ok());
        Ok(Page {
            page,
            total_pages,
            results,
        })
    }

    pub fn is_last(&self) -> bool {
        self.results.is_empty() || self.total_pages.is_some_and(|total| self.page >= total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosterSize {
    Card,
    Thumb,
}

impl PosterSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            PosterSize::Card => "w500",
            PosterSize::Thumb => "w92",
        }
    }
}

pub fn poster_url(image_base: &str, size: PosterSize, poster_path: Option<&str>) -> Option<String> {
    let path = poster_path.map(str::trim).filter(|path| !path.is_empty())?;
    let base = image_base.trim_end_matches('/');
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    Some(format!("{}/{}{}", base, size.as_str(), path))
}

pub fn release_year(release_date: Option<&str>) -> Option<i32> {
    let captures = YEAR_PREFIX.captures(release_date?)?;
    captures.get(1)?.as_str().parse().ok()
}

pub struct Client {
    http: HttpClient,
    api_key: String,
    language: Option<String>,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            bail!("tmdb client api key required");
        }
        if config.user_agent.trim().is_empty() {
            bail!("tmdb client user agent required");
        }

        let mut base = config
            .base_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| TMDB_API_BASE.to_string());
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).with_context(|| format!("tmdb: parse base url {base}"))?;

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(DEFAULT_TIMEOUT))
                .build()?,
        };

        Ok(Client {
            http,
            api_key: config.api_key.trim().to_string(),
            language: config.language.filter(|lang| !lang.trim().is_empty()),
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn popular(&self, page: u32) -> Result<Page> {
        let value = self.get_json("movie/popular", &[("page", page.to_string())])?;
        Page::from_value(&value, page)
    }

    pub fn discover_by_genre(&self, genre_id: i64, page: u32) -> Result<Page> {
        let value = self.get_json(
            "discover/movie",
            &[
                ("with_genres", genre_id.to_string()),
                ("sort_by", "popularity.desc".to_string()),
                ("page", page.to_string()),
            ],
        )?;
        Page::from_value(&value, page)
    }

    pub fn search(&self, query: &str) -> Result<Page> {
        let value = self.get_json(
            "search/movie",
            &[("query", query.to_string()), ("page", "1".to_string())],
        )?;
        Page::from_value(&value, 1)
    }

    pub fn movie_detail(&self, id: i64) -> Result<MovieDetail> {
        let path = format!("movie/{id}");
        let value = self.get_json(&path, &[])?;
        MovieDetail::from_value(&value).ok_or_else(|| TmdbError::Shape(path).into())
    }

    pub fn genres(&self) -> Result<Vec<Genre>> {
        let value = self.get_json("genre/movie/list", &[])?;
        Ok(genres_from_value(value.get("genres")))
    }

    fn get_json(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        let mut url = self
            .base_url
            .join(path)
            .with_context(|| format!("tmdb: build url for {path}"))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("api_key", &self.api_key);
            if let Some(language) = &self.language {
                pairs.append_pair("language", language);
            }
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }

        tracing::debug!(path, "tmdb request");
        let resp = self
            .http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json")
            .send()
            .with_context(|| format!("tmdb: request {path}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            let err = match status {
                StatusCode::UNAUTHORIZED => TmdbError::Unauthorized,
                StatusCode::NOT_FOUND => TmdbError::NotFound,
                StatusCode::TOO_MANY_REQUESTS => TmdbError::RateLimited,
                _ => TmdbError::Status {
                    status: status.as_u16(),
                    body,
                },
            };
            return Err(err.into());
        }

        resp.json::<Value>()
            .with_context(|| format!("tmdb: decode {path}"))
    }
}

fn genres_from_value(value: Option<&Value>) -> Vec<Genre> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(Genre {
                        id: lenient_id(item.get("id")?)?,
                        name: lenient_string(item, "name")?,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn lenient_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_string(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)?
        .as_str()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn lenient_rating(value: Option<&Value>) -> Option<f64> {
    let rating = match value? {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse().ok()?,
        _ => return None,
    };
    (rating.is_finite() && (0.0..=10.0).contains(&rating)).then_some(rating)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};
    use serde_json::json;
    use std::thread;
    use tiny_http::{Response, Server};

    fn serve(responses: Vec<(u16, String)>) -> (String, Receiver<String>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let base = format!("http://{addr}/3");
        let (tx, rx) = unbounded();
        thread::spawn(move || {
            for (status, body) in responses {
                let Ok(request) = server.recv() else {
                    break;
                };
                let _ = tx.send(request.url().to_string());
                let _ = request.respond(Response::from_string(body).with_status_code(status));
            }
        });
        (base, rx)
    }

    // Answers `responses` in order, then accepts one more request and never replies.
    fn serve_then_stall(responses: Vec<(u16, String)>) -> String {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        thread::spawn(move || {
            for (status, body) in responses {
                let Ok(request) = server.recv() else {
                    return;
                };
                let _ = request.respond(Response::from_string(body).with_status_code(status));
            }
            let _held = server.recv();
            thread::sleep(Duration::from_secs(10));
        });
        format!("http://{addr}/3")
    }

    fn client_with_timeout(base: String, timeout: Duration) -> Client {
        Client::new(ClientConfig {
            api_key: "secret".into(),
            base_url: Some(base),
            language: Some("en-US".into()),
            user_agent: "marquee-test".into(),
            timeout: Some(timeout),
            http_client: None,
        })
        .unwrap()
    }

    fn client(base: String) -> Client {
        client_with_timeout(base, Duration::from_secs(5))
    }

    #[test]
    fn movie_tolerates_malformed_fields() {
        let value = json!({
            "id": 7,
            "title": "  ",
            "original_title": "Fallback",
            "poster_path": "",
            "release_date": 1999,
            "vote_average": "not a number",
        });
        let movie = Movie::from_value(&value).unwrap();
        assert_eq!(movie.title, "Fallback");
        assert!(!movie.has_poster());
        assert_eq!(movie.release_date, None);
        assert_eq!(movie.vote_average, None);
    }

    #[test]
    fn movie_without_id_is_rejected() {
        assert!(Movie::from_value(&json!({ "title": "Nameless" })).is_none());
        assert!(Movie::from_value(&json!({ "id": "abc" })).is_none());
        assert_eq!(Movie::from_value(&json!({ "id": "12" })).unwrap().id, 12);
    }

    #[test]
    fn rating_outside_bounds_is_absent() {
        let movie = Movie::from_value(&json!({ "id": 1, "vote_average": 11.5 })).unwrap();
        assert_eq!(movie.vote_average, None);
        let movie = Movie::from_value(&json!({ "id": 1, "vote_average": 7.25 })).unwrap();
        assert_eq!(movie.vote_average, Some(7.25));
    }

    #[test]
    fn release_year_reads_prefix_only() {
        assert_eq!(release_year(Some("2023-05-01")), Some(2023));
        assert_eq!(release_year(Some("1999")), Some(1999));
        assert_eq!(release_year(Some("soon")), None);
        assert_eq!(release_year(Some("99-01-01")), None);
        assert_eq!(release_year(None), None);
    }

    #[test]
    fn page_skips_entries_without_id() {
        let value = json!({
            "page": 2,
            "total_pages": 2,
            "results": [{ "id": 1, "title": "A" }, { "title": "broken" }, "junk"],
        });
        let page = Page::from_value(&value, 2).unwrap();
        assert_eq!(page.results.len(), 1);
        assert!(page.is_last());
    }

    #[test]
    fn page_without_results_is_empty() {
        let page = Page::from_value(&json!({ "page": 1 }), 1).unwrap();
        assert!(page.results.is_empty());
        assert!(page.is_last());
        assert!(Page::from_value(&json!([1, 2]), 1).is_err());
    }

    #[test]
    fn poster_url_uses_size_and_placeholder() {
        assert_eq!(
            poster_url(TMDB_IMAGE_BASE, PosterSize::Card, Some("/abc.jpg")).as_deref(),
            Some("https://image.tmdb.org/t/p/w500/abc.jpg")
        );
        assert_eq!(
            poster_url("https://img.example/", PosterSize::Thumb, Some("abc.jpg")).as_deref(),
            Some("https://img.example/w92/abc.jpg")
        );
        assert_eq!(poster_url(TMDB_IMAGE_BASE, PosterSize::Card, Some(" ")), None);
    }

    #[test]
    fn client_requires_api_key() {
        let result = Client::new(ClientConfig {
            api_key: " ".into(),
            user_agent: "agent".into(),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn popular_sends_key_and_page() {
        let body = json!({
            "page": 3,
            "total_pages": 10,
            "results": [{ "id": 42, "title": "Answer", "poster_path": "/p.jpg" }],
        });
        let (base, requests) = serve(vec![(200, body.to_string())]);
        let page = client(base).popular(3).unwrap();
        assert_eq!(page.page, 3);
        assert_eq!(page.results[0].id, 42);
        let url = requests.recv().unwrap();
        assert!(url.starts_with("/3/movie/popular?"), "url was {url}");
        assert!(url.contains("api_key=secret"));
        assert!(url.contains("language=en-US"));
        assert!(url.contains("page=3"));
    }

    #[test]
    fn discover_filters_by_genre() {
        let (base, requests) = serve(vec![(200, json!({ "results": [] }).to_string())]);
        let page = client(base).discover_by_genre(28, 1).unwrap();
        assert!(page.results.is_empty());
        let url = requests.recv().unwrap();
        assert!(url.starts_with("/3/discover/movie?"));
        assert!(url.contains("with_genres=28"));
    }

    #[test]
    fn search_encodes_query() {
        let (base, requests) = serve(vec![(200, json!({ "results": [] }).to_string())]);
        client(base).search("star wars & co").unwrap();
        let url = requests.recv().unwrap();
        assert!(url.contains("query=star+wars+%26+co"), "url was {url}");
    }

    #[test]
    fn detail_and_genres_parse() {
        let detail = json!({
            "id": 5,
            "title": "Five",
            "runtime": 121,
            "tagline": "Count on it",
            "genres": [{ "id": 18, "name": "Drama" }, { "name": "no id" }],
        });
        let genres = json!({ "genres": [{ "id": 28, "name": "Action" }] });
        let (base, _requests) = serve(vec![
            (200, detail.to_string()),
            (200, genres.to_string()),
        ]);
        let client = client(base);
        let detail = client.movie_detail(5).unwrap();
        assert_eq!(detail.runtime, Some(121));
        assert_eq!(detail.genres, vec![Genre { id: 18, name: "Drama".into() }]);
        assert_eq!(detail.tagline.as_deref(), Some("Count on it"));
        let genres = client.genres().unwrap();
        assert_eq!(genres[0].name, "Action");
    }

    #[test]
    fn error_statuses_map_to_typed_errors() {
        let (base, _requests) = serve(vec![
            (401, "{}".into()),
            (404, "{}".into()),
            (500, "boom".into()),
        ]);
        let client = client(base);
        let err = client.popular(1).unwrap_err();
        assert!(matches!(err.downcast_ref::<TmdbError>(), Some(TmdbError::Unauthorized)));
        let err = client.movie_detail(1).unwrap_err();
        assert!(matches!(err.downcast_ref::<TmdbError>(), Some(TmdbError::NotFound)));
        let err = client.genres().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TmdbError>(),
            Some(TmdbError::Status { status: 500, .. })
        ));
    }

    #[test]
    fn malformed_body_is_an_error() {
        let (base, _requests) = serve(vec![(200, "not json".into())]);
        assert!(client(base).popular(1).is_err());
    }

    #[test]
    fn unanswered_request_times_out() {
        let base = serve_then_stall(Vec::new());
        let client = client_with_timeout(base, Duration::from_millis(300));
        let started = std::time::Instant::now();
        assert!(client.popular(1).is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn timeout_mid_listing_keeps_earlier_pages() {
        use crate::aggregate::{self, Aggregator, ListingMode};
        use crate::data::TmdbListingService;
        use std::sync::Arc;

        let first = json!({
            "page": 1,
            "total_pages": 10,
            "results": [
                { "id": 1, "title": "One", "poster_path": "/1.jpg" },
                { "id": 2, "title": "Two", "poster_path": "/2.jpg" },
                { "id": 3, "title": "Three", "poster_path": "/3.jpg" },
            ],
        });
        let base = serve_then_stall(vec![(200, first.to_string())]);
        let client = client_with_timeout(base, Duration::from_millis(300));
        let service = TmdbListingService::new(Arc::new(client));
        let aggregation = Aggregator::new(&service, aggregate::Options::default())
            .load_listing(ListingMode::Popular, 5);

        assert!(aggregation.error.is_some());
        let ids: Vec<i64> = aggregation.movies.iter().map(|movie| movie.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(aggregation.last_page, 1);
    }
}
