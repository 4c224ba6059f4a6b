use std::{collections::HashSet, sync::Arc};

use tokio::sync::watch;
use tracing::warn;

use super::JobScope;
use crate::{
    models::{MovieReview, Resource},
    network::NetworkMonitor,
    repository::MovieRepository,
};

#[derive(Clone, Debug, PartialEq)]
pub struct ReviewsState {
    pub movie_id: i32,
    pub movie_title: Option<String>,
    pub reviews: Vec<MovieReview>,
    pub is_loading: bool,
    /// Only set when there are no reviews to show.
    pub error: Option<String>,
}

struct ReviewsInner {
    repo: MovieRepository,
    network: NetworkMonitor,
    state: watch::Sender<ReviewsState>,
}

/// Full review list for one movie.
pub struct ReviewsScreen {
    inner: Arc<ReviewsInner>,
    scope: JobScope,
}

impl ReviewsScreen {
    pub fn new(repo: MovieRepository, network: NetworkMonitor, movie_id: i32) -> Self {
        let (state, _) = watch::channel(ReviewsState {
            movie_id,
            movie_title: None,
            reviews: Vec::new(),
            is_loading: true,
            error: None,
        });
        let screen = Self {
            inner: Arc::new(ReviewsInner { repo, network, state }),
            scope: JobScope::default(),
        };
        screen.load_reviews();
        screen
    }

    pub fn state(&self) -> ReviewsState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReviewsState> {
        self.inner.state.subscribe()
    }

    pub fn load_reviews(&self) {
        let inner = self.inner.clone();
        self.scope.jobs().replace("reviews", async move {
            let movie_id = inner.state.borrow().movie_id;
            inner.state.send_modify(|s| s.is_loading = true);

            let title = cached_title(&inner.repo, movie_id).await;
            let result = inner.repo.movie_reviews(movie_id, inner.network.is_online()).await;

            inner.state.send_modify(|s| {
                s.is_loading = false;
                if title.is_some() {
                    s.movie_title = title;
                }
                let (reviews, message) = match result {
                    Resource::Success(reviews) => (reviews, None),
                    Resource::Error { message, stale } => (stale.unwrap_or_default(), Some(message)),
                    Resource::Loading { stale } => (stale.unwrap_or_default(), None),
                };
                s.reviews = dedupe(reviews);
                s.error = if s.reviews.is_empty() { message } else { None };
            });
        });
    }
}

async fn cached_title(repo: &MovieRepository, movie_id: i32) -> Option<String> {
    match repo.movie_by_id(movie_id).await {
        Ok(Some(movie)) => return Some(movie.title),
        Ok(None) => {},
        Err(err) => warn!(movie_id, error = %err, "failed to read cached movie"),
    }
    match repo.cached_details(&[movie_id]).await {
        Ok(details) => details.into_iter().next().map(|d| d.title),
        Err(err) => {
            warn!(movie_id, error = %err, "failed to read cached detail");
            None
        },
    }
}

fn dedupe(reviews: Vec<MovieReview>) -> Vec<MovieReview> {
    let mut seen = HashSet::new();
    reviews.into_iter().filter(|r| seen.insert(r.id.clone())).collect()
}
