use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::tmdb::Movie;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Popularity,
    Rating,
    Title,
    Year,
}

impl SortKey {
    pub const ALL: [SortKey; 4] = [
        SortKey::Popularity,
        SortKey::Rating,
        SortKey::Title,
        SortKey::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Popularity => "popularity",
            SortKey::Rating => "rating",
            SortKey::Title => "title",
            SortKey::Year => "year",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SortKey::Popularity => "Popularity",
            SortKey::Rating => "Rating",
            SortKey::Title => "Title (A-Z)",
            SortKey::Year => "Year (Newest)",
        }
    }

    pub fn next(self) -> Self {
        let index = Self::ALL.iter().position(|key| *key == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|key| key.as_str().eq_ignore_ascii_case(raw))
            .ok_or_else(|| format!("unknown sort key {raw:?}"))
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewOptions {
    pub sort: SortKey,
    pub favorites_only: bool,
}

pub fn apply(list: &[Movie], key: SortKey) -> Vec<Movie> {
    let mut sorted = list.to_vec();
    match key {
        SortKey::Popularity => {}
        SortKey::Rating => sorted.sort_by(|a, b| rating(b).total_cmp(&rating(a))),
        SortKey::Title => sorted.sort_by_cached_key(|movie| collation_key(&movie.title)),
        SortKey::Year => sorted.sort_by(|a, b| year(b).cmp(&year(a))),
    }
    sorted
}

pub fn derive(listing: &[Movie], favorites: &[Movie], options: ViewOptions) -> Vec<Movie> {
    let source = if options.favorites_only {
        favorites
    } else {
        listing
    };
    apply(source, options.sort)
}

fn rating(movie: &Movie) -> f64 {
    movie.vote_average.unwrap_or(0.0)
}

fn year(movie: &Movie) -> i32 {
    movie.year().unwrap_or(0)
}

// Case-folded, with Latin diacritics removed.
fn collation_key(title: &str) -> String {
    let mut key = String::with_capacity(title.len());
    for ch in title.trim().chars().flat_map(char::to_lowercase) {
        match ch {
            'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => key.push('a'),
            'ç' | 'ć' | 'č' => key.push('c'),
            'ď' | 'đ' => key.push('d'),
            'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ė' | 'ę' | 'ě' => key.push('e'),
            'ì' | 'í' | 'î' | 'ï' | 'ī' | 'į' => key.push('i'),
            'ł' => key.push('l'),
            'ñ' | 'ń' | 'ň' => key.push('n'),
            'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => key.push('o'),
            'ř' => key.push('r'),
            'ś' | 'š' | 'ş' => key.push('s'),
            'ť' | 'ţ' => key.push('t'),
            'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' => key.push('u'),
            'ý' | 'ÿ' => key.push('y'),
            'ź' | 'ż' | 'ž' => key.push('z'),
            'æ' => key.push_str("ae"),
            'œ' => key.push_str("oe"),
            'ß' => key.push_str("ss"),
            other => key.push(other),
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie(id: i64, title: &str, rating: Option<f64>, date: Option<&str>) -> Movie {
        Movie {
            id,
            title: title.to_string(),
            poster_path: None,
            release_date: date.map(str::to_string),
            vote_average: rating,
            overview: None,
        }
    }

    fn ids(movies: &[Movie]) -> Vec<i64> {
        movies.iter().map(|m| m.id).collect()
    }

    #[test]
    fn popularity_keeps_arrival_order() {
        let list = vec![
            movie(3, "C", Some(1.0), None),
            movie(1, "A", Some(9.0), None),
            movie(2, "B", None, None),
        ];
        assert_eq!(ids(&apply(&list, SortKey::Popularity)), vec![3, 1, 2]);
    }

    #[test]
    fn rating_descending_and_stable() {
        let list = vec![
            movie(1, "A", None, None),
            movie(2, "B", Some(7.0), None),
            movie(3, "C", Some(0.0), None),
            movie(4, "D", Some(7.0), None),
            movie(5, "E", None, None),
            movie(6, "F", Some(8.5), None),
        ];
        assert_eq!(ids(&apply(&list, SortKey::Rating)), vec![6, 2, 4, 1, 3, 5]);
    }

    #[test]
    fn title_ignores_case_and_accents() {
        let list = vec![
            movie(1, "beta", None, None),
            movie(2, "Alpha", None, None),
            movie(3, "alpha", None, None),
            movie(4, "Émile", None, None),
            movie(5, "gamma", None, None),
        ];
        assert_eq!(ids(&apply(&list, SortKey::Title)), vec![2, 3, 1, 4, 5]);
    }

    #[test]
    fn year_descending_with_unparsable_last() {
        let list = vec![
            movie(1, "A", None, Some("garbage")),
            movie(2, "B", None, Some("2001-05-01")),
            movie(3, "C", None, None),
            movie(4, "D", None, Some("2019-01-01")),
            movie(5, "E", None, Some("2001")),
        ];
        assert_eq!(ids(&apply(&list, SortKey::Year)), vec![4, 2, 5, 1, 3]);
    }

    #[test]
    fn unparsable_date_matches_absent_date() {
        let list = vec![
            movie(1, "A", None, None),
            movie(2, "B", None, Some("n/a")),
            movie(3, "C", None, None),
        ];
        assert_eq!(ids(&apply(&list, SortKey::Year)), vec![1, 2, 3]);
    }

    #[test]
    fn apply_does_not_mutate_input() {
        let list = vec![movie(1, "B", Some(1.0), None), movie(2, "A", Some(2.0), None)];
        let _ = apply(&list, SortKey::Title);
        assert_eq!(ids(&list), vec![1, 2]);
    }

    #[test]
    fn derive_switches_to_favorites() {
        let listing = vec![movie(1, "A", None, None), movie(2, "B", None, None)];
        let favorites = vec![movie(9, "Z", Some(5.0), None), movie(8, "Y", Some(9.0), None)];
        let shown = derive(
            &listing,
            &favorites,
            ViewOptions {
                sort: SortKey::Rating,
                favorites_only: true,
            },
        );
        assert_eq!(ids(&shown), vec![8, 9]);
        let shown = derive(&listing, &favorites, ViewOptions::default());
        assert_eq!(ids(&shown), vec![1, 2]);
    }

    #[test]
    fn sort_key_cycles_and_parses() {
        assert_eq!(SortKey::Popularity.next(), SortKey::Rating);
        assert_eq!(SortKey::Year.next(), SortKey::Popularity);
        assert_eq!("Rating".parse::<SortKey>(), Ok(SortKey::Rating));
        assert!("loudness".parse::<SortKey>().is_err());
        assert_eq!(SortKey::from_index(3), Some(SortKey::Year));
        assert_eq!(SortKey::Title.label(), "Title (A-Z)");
    }
}
