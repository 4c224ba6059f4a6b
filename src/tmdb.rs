use std::{num::NonZeroU32, sync::Arc};

use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::debug;

use crate::{
    cache::now_sec,
    error::AppResult,
    models::{Category, Genre, Movie, MovieDetail, MovieReview, Page},
};

/// Remote movie catalog. Errors are returned as-is; falling back to the cache
/// is the caller's job.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn category_page(&self, category: Category, page: u32) -> AppResult<Page<Movie>>;

    async fn movie_detail(&self, movie_id: i32) -> AppResult<MovieDetail>;

    async fn movie_reviews(&self, movie_id: i32, page: u32) -> AppResult<Page<MovieReview>>;

    async fn search(&self, query: &str, page: u32) -> AppResult<Page<Movie>>;

    /// Cheap request used to decide whether the catalog is reachable.
    async fn probe(&self) -> AppResult<()>;
}

pub struct TmdbClient {
    client: reqwest::Client,
    api_key: String,
    access_token: Option<String>,
    base_url: String,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl TmdbClient {
    pub fn new(
        client: reqwest::Client,
        api_key: String,
        access_token: Option<String>,
        base_url: String,
        rps: u32,
    ) -> Self {
        if api_key.trim().is_empty() && access_token.is_none() {
            tracing::warn!("no TMDB_API_KEY or TMDB_ACCESS_TOKEN provided, catalog requests will fail");
        }

        let quota = Quota::per_second(NonZeroU32::new(rps.max(1)).unwrap_or(NonZeroU32::MIN));
        let limiter = Arc::new(RateLimiter::direct(quota));
        Self { client, api_key, access_token, base_url, limiter }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> AppResult<T> {
        self.limiter.until_ready().await;

        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'));
        debug!(url = %url, "catalog request");

        let mut req = self.client.get(url).query(query);
        req = match &self.access_token {
            Some(token) => req.bearer_auth(token),
            None => req.query(&[("api_key", &self.api_key)]),
        };

        let resp = req.send().await?.error_for_status()?.json().await?;
        Ok(resp)
    }
}

#[async_trait]
impl CatalogApi for TmdbClient {
    async fn category_page(&self, category: Category, page: u32) -> AppResult<Page<Movie>> {
        let resp: MovieListResponse = self
            .get_json(&format!("movie/{}", category.as_str()), &[("page", page.to_string())])
            .await?;
        Ok(resp.into_page())
    }

    async fn movie_detail(&self, movie_id: i32) -> AppResult<MovieDetail> {
        let resp: MovieDetailDto = self.get_json(&format!("movie/{movie_id}"), &[]).await?;
        Ok(resp.into_detail())
    }

    async fn movie_reviews(&self, movie_id: i32, page: u32) -> AppResult<Page<MovieReview>> {
        let resp: ReviewListResponse = self
            .get_json(&format!("movie/{movie_id}/reviews"), &[("page", page.to_string())])
            .await?;
        Ok(resp.into_page(movie_id))
    }

    async fn search(&self, query: &str, page: u32) -> AppResult<Page<Movie>> {
        let resp: MovieListResponse = self
            .get_json("search/movie", &[("query", query.to_string()), ("page", page.to_string())])
            .await?;
        Ok(resp.into_page())
    }

    async fn probe(&self) -> AppResult<()> {
        let _: serde_json::Value = self.get_json("configuration", &[]).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct MovieListResponse {
    #[serde(default = "first_page")]
    page: u32,
    #[serde(default)]
    results: Vec<MovieDto>,
    #[serde(default)]
    total_pages: u32,
    #[serde(default)]
    total_results: u32,
}

fn first_page() -> u32 {
    1
}

impl MovieListResponse {
    fn into_page(self) -> Page<Movie> {
        let now = now_sec();
        Page {
            page: self.page,
            results: self.results.into_iter().map(|m| m.into_movie(now)).collect(),
            total_pages: self.total_pages,
            total_results: self.total_results,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MovieDto {
    id: i32,
    #[serde(default)]
    title: String,
    #[serde(default)]
    original_title: String,
    #[serde(default)]
    original_language: String,
    #[serde(default)]
    overview: String,
    poster_path: Option<String>,
    backdrop_path: Option<String>,
    release_date: Option<String>,
    #[serde(default)]
    vote_average: f64,
    #[serde(default)]
    vote_count: i32,
    #[serde(default)]
    popularity: f64,
    #[serde(default)]
    adult: bool,
    #[serde(default)]
    video: bool,
    #[serde(default)]
    genre_ids: Vec<i32>,
}

impl MovieDto {
    fn into_movie(self, cached_at: i64) -> Movie {
        Movie {
            id: self.id,
            title: self.title,
            original_title: self.original_title,
            original_language: self.original_language,
            overview: self.overview,
            poster_path: self.poster_path,
            backdrop_path: self.backdrop_path,
            release_date: self.release_date.unwrap_or_default(),
            vote_average: self.vote_average,
            vote_count: self.vote_count,
            popularity: self.popularity,
            adult: self.adult,
            video: self.video,
            genre_ids: self.genre_ids,
            category: None,
            cached_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MovieDetailDto {
    id: i32,
    #[serde(default)]
    title: String,
    #[serde(default)]
    original_title: String,
    #[serde(default)]
    original_language: String,
    #[serde(default)]
    overview: String,
    poster_path: Option<String>,
    backdrop_path: Option<String>,
    release_date: Option<String>,
    #[serde(default)]
    vote_average: f64,
    #[serde(default)]
    vote_count: i32,
    #[serde(default)]
    popularity: f64,
    #[serde(default)]
    adult: bool,
    #[serde(default)]
    video: bool,
    #[serde(default)]
    genres: Vec<Genre>,
    runtime: Option<i32>,
    #[serde(default)]
    revenue: i64,
    #[serde(default)]
    budget: i64,
    #[serde(default)]
    status: String,
    tagline: Option<String>,
    homepage: Option<String>,
    imdb_id: Option<String>,
}

impl MovieDetailDto {
    fn into_detail(self) -> MovieDetail {
        MovieDetail {
            id: self.id,
            title: self.title,
            original_title: self.original_title,
            original_language: self.original_language,
            overview: self.overview,
            poster_path: self.poster_path,
            backdrop_path: self.backdrop_path,
            release_date: self.release_date.unwrap_or_default(),
            vote_average: self.vote_average,
            vote_count: self.vote_count,
            popularity: self.popularity,
            adult: self.adult,
            video: self.video,
            genres: self.genres,
            runtime: self.runtime,
            revenue: self.revenue,
            budget: self.budget,
            status: self.status,
            tagline: self.tagline.filter(|s| !s.trim().is_empty()),
            homepage: self.homepage.filter(|s| !s.trim().is_empty()),
            imdb_id: self.imdb_id,
            cached_at: now_sec(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReviewListResponse {
    #[serde(default = "first_page")]
    page: u32,
    #[serde(default)]
    results: Vec<ReviewDto>,
    #[serde(default)]
    total_pages: u32,
    #[serde(default)]
    total_results: u32,
}

impl ReviewListResponse {
    fn into_page(self, movie_id: i32) -> Page<MovieReview> {
        let now = now_sec();
        Page {
            page: self.page,
            results: self.results.into_iter().map(|r| r.into_review(movie_id, now)).collect(),
            total_pages: self.total_pages,
            total_results: self.total_results,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReviewDto {
    id: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    author_details: ReviewAuthorDto,
    #[serde(default)]
    content: String,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    updated_at: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct ReviewAuthorDto {
    #[serde(default)]
    username: String,
    avatar_path: Option<String>,
    rating: Option<f64>,
}

impl ReviewDto {
    fn into_review(self, movie_id: i32, cached_at: i64) -> MovieReview {
        MovieReview {
            id: self.id,
            movie_id,
            author: self.author,
            author_username: self.author_details.username,
            author_avatar_path: self.author_details.avatar_path,
            author_rating: self.author_details.rating,
            content: self.content,
            created_at: self.created_at,
            updated_at: self.updated_at,
            url: self.url,
            cached_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_listing_with_missing_release_date() {
        let json = r#"{
            "page": 2,
            "results": [{
                "id": 550,
                "title": "Fight Club",
                "original_title": "Fight Club",
                "original_language": "en",
                "overview": "An insomniac office worker...",
                "poster_path": "/pB8BM7pdSp6B6Ih7QZ4DrQ3PmJK.jpg",
                "backdrop_path": null,
                "vote_average": 8.4,
                "vote_count": 26000,
                "popularity": 61.4,
                "adult": false,
                "video": false,
                "genre_ids": [18, 53]
            }],
            "total_pages": 40,
            "total_results": 800
        }"#;

        let page = serde_json::from_str::<MovieListResponse>(json).unwrap().into_page();
        assert_eq!(page.page, 2);
        assert_eq!(page.total_pages, 40);
        let movie = &page.results[0];
        assert_eq!(movie.id, 550);
        assert_eq!(movie.release_date, "");
        assert_eq!(movie.genre_ids, vec![18, 53]);
        assert_eq!(movie.category, None);
    }

    #[test]
    fn parses_detail_and_drops_blank_tagline() {
        let json = r#"{
            "id": 603,
            "title": "The Matrix",
            "original_title": "The Matrix",
            "original_language": "en",
            "overview": "Set in the 22nd century...",
            "poster_path": null,
            "backdrop_path": "/bg.jpg",
            "release_date": "1999-03-30",
            "vote_average": 8.2,
            "vote_count": 24000,
            "popularity": 80.0,
            "adult": false,
            "video": false,
            "genres": [{"id": 28, "name": "Action"}, {"id": 878, "name": "Science Fiction"}],
            "runtime": 136,
            "revenue": 463517383,
            "budget": 63000000,
            "status": "Released",
            "tagline": " ",
            "homepage": "http://www.warnerbros.com/matrix",
            "imdb_id": "tt0133093"
        }"#;

        let detail = serde_json::from_str::<MovieDetailDto>(json).unwrap().into_detail();
        assert_eq!(detail.runtime, Some(136));
        assert_eq!(detail.genres.len(), 2);
        assert_eq!(detail.tagline, None);
        assert_eq!(detail.imdb_id.as_deref(), Some("tt0133093"));
        assert_eq!(
            detail.backdrop_url().as_deref(),
            Some("https://image.tmdb.org/t/p/w780/bg.jpg")
        );
    }

    #[test]
    fn parses_reviews_with_author_details() {
        let json = r#"{
            "id": 603,
            "page": 1,
            "results": [{
                "id": "5b1c13b9c3a36848f2026384",
                "author": "Goddard",
                "author_details": {"name": "", "username": "Goddard", "avatar_path": null, "rating": 9.0},
                "content": "Pretty awesome movie.",
                "created_at": "2018-06-09T17:51:53.359Z",
                "updated_at": "2021-06-23T15:58:09.421Z",
                "url": "https://www.themoviedb.org/review/5b1c13b9c3a36848f2026384"
            }],
            "total_pages": 1,
            "total_results": 1
        }"#;

        let page = serde_json::from_str::<ReviewListResponse>(json).unwrap().into_page(603);
        let review = &page.results[0];
        assert_eq!(review.movie_id, 603);
        assert_eq!(review.author_username, "Goddard");
        assert_eq!(review.author_rating, Some(9.0));
    }
}
