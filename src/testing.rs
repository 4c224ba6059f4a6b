use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    error::{AppError, AppResult},
    models::{Category, Movie, MovieDetail, MovieReview, Page},
    tmdb::CatalogApi,
};

/// In-memory catalog that records every call it receives.
#[derive(Default)]
pub(crate) struct FakeCatalog {
    pages: Mutex<HashMap<(Category, u32), Vec<Movie>>>,
    details: Mutex<HashMap<i32, MovieDetail>>,
    reviews: Mutex<HashMap<i32, Vec<MovieReview>>>,
    search_results: Mutex<Vec<Movie>>,
    failing: AtomicBool,
    latency: Mutex<Option<Duration>>,
    calls: Mutex<Vec<String>>,
}

impl FakeCatalog {
    pub(crate) fn set_page(&self, category: Category, page: u32, movies: Vec<Movie>) {
        self.pages.lock().insert((category, page), movies);
    }

    pub(crate) fn set_detail(&self, detail: MovieDetail) {
        self.details.lock().insert(detail.id, detail);
    }

    pub(crate) fn set_reviews(&self, movie_id: i32, reviews: Vec<MovieReview>) {
        self.reviews.lock().insert(movie_id, reviews);
    }

    pub(crate) fn set_search_results(&self, movies: Vec<Movie>) {
        *self.search_results.lock() = movies;
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    async fn record(&self, call: String) -> AppResult<()> {
        self.calls.lock().push(call);
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::msg("connection refused"));
        }
        Ok(())
    }
}

fn page_of<T>(page: u32, results: Vec<T>) -> Page<T> {
    let total_results = results.len() as u32;
    Page { page, results, total_pages: page, total_results }
}

#[async_trait]
impl CatalogApi for FakeCatalog {
    async fn category_page(&self, category: Category, page: u32) -> AppResult<Page<Movie>> {
        self.record(format!("category:{category}:{page}")).await?;
        let movies = self.pages.lock().get(&(category, page)).cloned().unwrap_or_default();
        Ok(page_of(page, movies))
    }

    async fn movie_detail(&self, movie_id: i32) -> AppResult<MovieDetail> {
        self.record(format!("detail:{movie_id}")).await?;
        self.details
            .lock()
            .get(&movie_id)
            .cloned()
            .ok_or_else(|| AppError::msg("404 Not Found"))
    }

    async fn movie_reviews(&self, movie_id: i32, page: u32) -> AppResult<Page<MovieReview>> {
        self.record(format!("reviews:{movie_id}:{page}")).await?;
        let reviews = self.reviews.lock().get(&movie_id).cloned().unwrap_or_default();
        Ok(page_of(page, reviews))
    }

    async fn search(&self, query: &str, page: u32) -> AppResult<Page<Movie>> {
        self.record(format!("search:{query}:{page}")).await?;
        let results = if page == 1 { self.search_results.lock().clone() } else { Vec::new() };
        Ok(page_of(page, results))
    }

    async fn probe(&self) -> AppResult<()> {
        self.record("probe".to_string()).await
    }
}
