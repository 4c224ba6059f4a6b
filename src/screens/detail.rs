use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::warn;

use super::JobScope;
use crate::{
    error::AppResult,
    models::{MovieDetail, MovieReview, Resource},
    network::NetworkMonitor,
    prefs::FavoritesStore,
    repository::MovieRepository,
};

#[derive(Clone, Debug, PartialEq)]
pub struct DetailState {
    pub movie_id: i32,
    pub detail: Option<MovieDetail>,
    pub reviews: Vec<MovieReview>,
    pub is_favorite: bool,
    pub is_loading_detail: bool,
    pub is_loading_reviews: bool,
    pub is_online: bool,
    /// Set when the detail fetch failed; `detail` may still hold cached data.
    pub error: Option<String>,
    pub reviews_error: Option<String>,
}

struct DetailInner {
    repo: MovieRepository,
    favorites: FavoritesStore,
    network: NetworkMonitor,
    state: watch::Sender<DetailState>,
}

pub struct DetailScreen {
    inner: Arc<DetailInner>,
    scope: JobScope,
}

impl DetailScreen {
    pub fn new(
        repo: MovieRepository,
        favorites: FavoritesStore,
        network: NetworkMonitor,
        movie_id: i32,
    ) -> Self {
        let (state, _) = watch::channel(DetailState {
            movie_id,
            detail: None,
            reviews: Vec::new(),
            is_favorite: favorites.contains(movie_id),
            is_loading_detail: true,
            is_loading_reviews: true,
            is_online: network.is_online(),
            error: None,
            reviews_error: None,
        });
        let inner = Arc::new(DetailInner { repo, favorites, network, state });
        let screen = Self { inner, scope: JobScope::default() };

        screen.watch_favorite();
        screen.watch_cached_detail();
        screen.watch_network();
        screen.load_detail();
        screen.load_reviews();
        screen
    }

    pub fn state(&self) -> DetailState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DetailState> {
        self.inner.state.subscribe()
    }

    pub fn load_detail(&self) {
        let inner = self.inner.clone();
        self.scope.jobs().replace("detail", async move {
            let movie_id = inner.state.borrow().movie_id;
            inner.state.send_modify(|s| s.is_loading_detail = true);

            let result = inner.repo.movie_detail(movie_id, inner.network.is_online()).await;
            inner.state.send_modify(|s| {
                s.is_loading_detail = false;
                match result {
                    Resource::Success(detail) => {
                        s.detail = Some(detail);
                        s.error = None;
                    },
                    Resource::Error { message, stale } => {
                        if stale.is_some() {
                            s.detail = stale;
                        }
                        s.error = Some(message);
                    },
                    Resource::Loading { .. } => {},
                }
            });
        });
    }

    pub fn load_reviews(&self) {
        let inner = self.inner.clone();
        self.scope.jobs().replace("reviews", async move {
            let movie_id = inner.state.borrow().movie_id;
            inner.state.send_modify(|s| s.is_loading_reviews = true);

            let result = inner.repo.movie_reviews(movie_id, inner.network.is_online()).await;
            inner.state.send_modify(|s| {
                s.is_loading_reviews = false;
                match result {
                    Resource::Success(reviews) => {
                        s.reviews = reviews;
                        s.reviews_error = None;
                    },
                    Resource::Error { message, stale } => {
                        if let Some(stale) = stale {
                            s.reviews = stale;
                        }
                        s.reviews_error = Some(message);
                    },
                    Resource::Loading { .. } => {},
                }
            });
        });
    }

    pub async fn toggle_favorite(&self) -> AppResult<bool> {
        let movie_id = self.inner.state.borrow().movie_id;
        self.inner.favorites.toggle(movie_id).await
    }

    fn watch_favorite(&self) {
        let inner = self.inner.clone();
        let movie_id = self.inner.state.borrow().movie_id;
        let mut is_favorite = self.inner.favorites.observe_is_favorite(movie_id);
        self.scope.jobs().spawn(async move {
            while let Some(is_favorite) = is_favorite.next().await {
                inner.state.send_if_modified(|s| {
                    let changed = s.is_favorite != is_favorite;
                    s.is_favorite = is_favorite;
                    changed
                });
            }
        });
    }

    /// Keeps the shown detail in step with the cache row.
    fn watch_cached_detail(&self) {
        let inner = self.inner.clone();
        let movie_id = self.inner.state.borrow().movie_id;
        let mut cached = self.inner.repo.cache().observe_detail(movie_id);
        self.scope.jobs().spawn(async move {
            while let Some(row) = cached.next().await {
                match row {
                    Ok(Some(detail)) => {
                        inner.state.send_if_modified(|s| {
                            if s.detail.as_ref() == Some(&detail) {
                                return false;
                            }
                            s.detail = Some(detail);
                            true
                        });
                    },
                    Ok(None) => {},
                    Err(err) => warn!(movie_id, error = %err, "cached detail stream failed"),
                }
            }
        });
    }

    fn watch_network(&self) {
        let inner = self.inner.clone();
        let mut rx = self.inner.network.subscribe();
        self.scope.jobs().spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                inner.state.send_modify(|s| s.is_online = online);
            }
        });
    }
}
