use std::{fmt, str::FromStr};

use jiff::civil::Date;
use serde::{Deserialize, Serialize};

pub const IMAGE_BASE_URL: &str = "https://image.tmdb.org/t/p/";
pub const POSTER_SIZE: &str = "w342";
pub const BACKDROP_SIZE: &str = "w780";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Popular,
    TopRated,
    NowPlaying,
    Upcoming,
}

impl Category {
    pub const ALL: [Category; 4] =
        [Category::Popular, Category::TopRated, Category::NowPlaying, Category::Upcoming];

    /// Path segment used by the catalog API and the tag stored on cached rows.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Popular => "popular",
            Category::TopRated => "top_rated",
            Category::NowPlaying => "now_playing",
            Category::Upcoming => "upcoming",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::Popular => "Popular",
            Category::TopRated => "Top Rated",
            Category::NowPlaying => "Now Playing",
            Category::Upcoming => "Upcoming",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown category `{0}` (expected popular, top_rated, now_playing or upcoming)")]
pub struct ParseCategoryError(String);

impl FromStr for Category {
    type Err = ParseCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| ParseCategoryError(s.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Movie {
    pub id: i32,
    pub title: String,
    pub original_title: String,
    pub original_language: String,
    pub overview: String,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub release_date: String,
    pub vote_average: f64,
    pub vote_count: i32,
    pub popularity: f64,
    pub adult: bool,
    pub video: bool,
    pub genre_ids: Vec<i32>,
    /// `None` for search results and movies derived from a cached detail.
    pub category: Option<Category>,
    pub cached_at: i64,
}

impl Movie {
    pub fn poster_url(&self) -> Option<String> {
        image_url(self.poster_path.as_deref(), POSTER_SIZE)
    }

    pub fn release_year(&self) -> Option<i16> {
        self.release_date.get(..4).and_then(|y| y.parse().ok())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub id: i32,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MovieDetail {
    pub id: i32,
    pub title: String,
    pub original_title: String,
    pub original_language: String,
    pub overview: String,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub release_date: String,
    pub vote_average: f64,
    pub vote_count: i32,
    pub popularity: f64,
    pub adult: bool,
    pub video: bool,
    pub genres: Vec<Genre>,
    pub runtime: Option<i32>,
    pub revenue: i64,
    pub budget: i64,
    pub status: String,
    pub tagline: Option<String>,
    pub homepage: Option<String>,
    pub imdb_id: Option<String>,
    pub cached_at: i64,
}

impl MovieDetail {
    pub fn backdrop_url(&self) -> Option<String> {
        image_url(self.backdrop_path.as_deref(), BACKDROP_SIZE)
    }
}

impl From<&MovieDetail> for Movie {
    fn from(d: &MovieDetail) -> Self {
        Movie {
            id: d.id,
            title: d.title.clone(),
            original_title: d.original_title.clone(),
            original_language: d.original_language.clone(),
            overview: d.overview.clone(),
            poster_path: d.poster_path.clone(),
            backdrop_path: d.backdrop_path.clone(),
            release_date: d.release_date.clone(),
            vote_average: d.vote_average,
            vote_count: d.vote_count,
            popularity: d.popularity,
            adult: d.adult,
            video: d.video,
            genre_ids: d.genres.iter().map(|g| g.id).collect(),
            category: None,
            cached_at: d.cached_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MovieReview {
    pub id: String,
    pub movie_id: i32,
    pub author: String,
    pub author_username: String,
    pub author_avatar_path: Option<String>,
    pub author_rating: Option<f64>,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
    pub url: String,
    pub cached_at: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Page<T> {
    pub page: u32,
    pub results: Vec<T>,
    pub total_pages: u32,
    pub total_results: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: i32,
    pub login_id: String,
    pub preferred_name: String,
    pub birth_date: Date,
    pub profile_picture_path: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SortOption {
    #[default]
    TitleAsc,
    TitleDesc,
    RatingAsc,
    RatingDesc,
    ReleaseDateAsc,
    ReleaseDateDesc,
}

impl SortOption {
    pub fn sort(self, movies: &mut [Movie]) {
        match self {
            SortOption::TitleAsc => movies.sort_by(|a, b| a.title.cmp(&b.title)),
            SortOption::TitleDesc => movies.sort_by(|a, b| b.title.cmp(&a.title)),
            SortOption::RatingAsc => movies.sort_by(|a, b| a.vote_average.total_cmp(&b.vote_average)),
            SortOption::RatingDesc => {
                movies.sort_by(|a, b| b.vote_average.total_cmp(&a.vote_average))
            },
            SortOption::ReleaseDateAsc => movies.sort_by(|a, b| a.release_date.cmp(&b.release_date)),
            SortOption::ReleaseDateDesc => {
                movies.sort_by(|a, b| b.release_date.cmp(&a.release_date))
            },
        }
    }
}

impl FromStr for SortOption {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "title" | "title-asc" => SortOption::TitleAsc,
            "title-desc" => SortOption::TitleDesc,
            "rating-asc" => SortOption::RatingAsc,
            "rating" | "rating-desc" => SortOption::RatingDesc,
            "release-asc" => SortOption::ReleaseDateAsc,
            "release" | "release-desc" => SortOption::ReleaseDateDesc,
            other => anyhow::bail!("unknown sort option `{other}`"),
        })
    }
}

/// Outcome of a repository read. `Loading` and `Error` may carry whatever
/// the cache held at the time so callers can keep showing it.
#[derive(Clone, Debug, PartialEq)]
pub enum Resource<T> {
    Loading { stale: Option<T> },
    Success(T),
    Error { message: String, stale: Option<T> },
}

impl<T> Resource<T> {
    pub fn error(message: impl Into<String>) -> Self {
        Resource::Error { message: message.into(), stale: None }
    }

    pub fn error_with(message: impl Into<String>, stale: Option<T>) -> Self {
        Resource::Error { message: message.into(), stale }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Resource::Success(_))
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Resource::Success(data) => Some(data),
            Resource::Loading { stale } | Resource::Error { stale, .. } => stale.as_ref(),
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            Resource::Success(data) => Some(data),
            Resource::Loading { stale } | Resource::Error { stale, .. } => stale,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Resource::Error { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resource<U> {
        match self {
            Resource::Loading { stale } => Resource::Loading { stale: stale.map(f) },
            Resource::Success(data) => Resource::Success(f(data)),
            Resource::Error { message, stale } => Resource::Error { message, stale: stale.map(f) },
        }
    }
}

pub fn image_url(path: Option<&str>, size: &str) -> Option<String> {
    path.map(|p| format!("{IMAGE_BASE_URL}{size}{p}"))
}
