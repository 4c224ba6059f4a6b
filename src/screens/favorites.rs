use std::{collections::BTreeSet, sync::Arc};

use tokio::sync::watch;
use tracing::{debug, warn};

use super::JobScope;
use crate::{
    error::AppResult,
    models::{Movie, SortOption},
    network::NetworkMonitor,
    prefs::FavoritesStore,
    repository::MovieRepository,
};

#[derive(Clone, Debug, PartialEq)]
pub struct FavoritesState {
    pub movies: Vec<Movie>,
    pub sort: SortOption,
    pub is_loading: bool,
    pub is_refreshing: bool,
    /// Favorites whose details are still being fetched.
    pub loading_movie_ids: BTreeSet<i32>,
    pub is_online: bool,
    pub error: Option<String>,
}

struct FavoritesInner {
    repo: MovieRepository,
    favorites: FavoritesStore,
    network: NetworkMonitor,
    state: watch::Sender<FavoritesState>,
}

impl FavoritesInner {
    async fn recompute(&self) {
        let ids = self.favorites.ids();
        let online = self.network.is_online();

        let missing = if online {
            self.repo.missing_details(&ids).await.unwrap_or_else(|err| {
                warn!(error = %err, "failed to check cached favorites");
                BTreeSet::new()
            })
        } else {
            BTreeSet::new()
        };
        if !missing.is_empty() {
            debug!(missing = missing.len(), "favorites need details");
        }
        self.state.send_modify(|s| {
            s.is_online = online;
            s.loading_movie_ids = missing;
        });

        let result = self.repo.favorite_movies(&ids, online).await;
        self.state.send_modify(|s| {
            s.is_loading = false;
            s.is_refreshing = false;
            s.loading_movie_ids.clear();
            match result {
                Ok(mut movies) => {
                    s.sort.sort(&mut movies);
                    s.movies = movies;
                    s.error = None;
                },
                Err(err) => {
                    warn!(error = %err, "failed to load favorites");
                    s.error = Some(format!("Failed to load favorites: {err}"));
                },
            }
        });
    }
}

/// Favorited movies joined with cached details, kept current as the favorite
/// set, the cache or connectivity change.
pub struct FavoritesScreen {
    inner: Arc<FavoritesInner>,
    scope: JobScope,
}

impl FavoritesScreen {
    pub fn new(
        repo: MovieRepository,
        favorites: FavoritesStore,
        network: NetworkMonitor,
        sort: SortOption,
    ) -> Self {
        let (state, _) = watch::channel(FavoritesState {
            movies: Vec::new(),
            sort,
            is_loading: true,
            is_refreshing: false,
            loading_movie_ids: BTreeSet::new(),
            is_online: network.is_online(),
            error: None,
        });
        let inner = Arc::new(FavoritesInner { repo, favorites, network, state });
        let screen = Self { inner, scope: JobScope::default() };

        screen.watch_sources();
        screen
    }

    pub fn state(&self) -> FavoritesState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FavoritesState> {
        self.inner.state.subscribe()
    }

    pub async fn add(&self, movie_id: i32) -> AppResult<()> {
        self.inner.favorites.add(movie_id).await
    }

    pub async fn remove(&self, movie_id: i32) -> AppResult<()> {
        self.inner.favorites.remove(movie_id).await
    }

    pub fn set_sort(&self, sort: SortOption) {
        self.inner.state.send_if_modified(|s| {
            if s.sort == sort {
                return false;
            }
            s.sort = sort;
            sort.sort(&mut s.movies);
            true
        });
    }

    pub fn refresh(&self) {
        self.inner.state.send_modify(|s| s.is_refreshing = true);
        let inner = self.inner.clone();
        self.scope.jobs().replace("refresh", async move { inner.recompute().await });
    }

    fn watch_sources(&self) {
        let inner = self.inner.clone();
        let mut favorites = self.inner.favorites.subscribe();
        let mut cache = self.inner.repo.cache().subscribe_changes();
        let mut network = self.inner.network.subscribe();

        self.scope.jobs().spawn(async move {
            loop {
                inner.recompute().await;
                tokio::select! {
                    changed = favorites.changed() => if changed.is_err() { break },
                    changed = cache.changed() => if changed.is_err() { break },
                    changed = network.changed() => if changed.is_err() { break },
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::tests::detail,
        repository::tests::repo_with_fake,
        screens::tests::wait_for,
    };

    fn titles(state: &FavoritesState) -> Vec<&str> {
        state.movies.iter().map(|m| m.title.as_str()).collect()
    }

    #[tokio::test]
    async fn fetches_missing_details_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, catalog) = repo_with_fake().await;
        repo.cache().upsert_detail(&detail(1, "Zodiac")).await.unwrap();
        catalog.set_detail(detail(2, "Arrival"));
        let favorites = FavoritesStore::open(dir.path()).await.unwrap();
        favorites.add(1).await.unwrap();
        favorites.add(2).await.unwrap();

        let screen =
            FavoritesScreen::new(repo, favorites, NetworkMonitor::new(true), SortOption::TitleAsc);
        let state = wait_for(&mut screen.subscribe(), |s| s.movies.len() == 2).await;
        assert_eq!(titles(&state), vec!["Arrival", "Zodiac"]);
        assert_eq!(catalog.calls(), vec!["detail:2".to_string()]);

        screen.set_sort(SortOption::TitleDesc);
        assert_eq!(titles(&screen.state()), vec!["Zodiac", "Arrival"]);
    }

    #[tokio::test]
    async fn offline_shows_only_cached_favorites() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, catalog) = repo_with_fake().await;
        repo.cache().upsert_detail(&detail(1, "Zodiac")).await.unwrap();
        let favorites = FavoritesStore::open(dir.path()).await.unwrap();
        favorites.add(1).await.unwrap();
        favorites.add(2).await.unwrap();

        let screen =
            FavoritesScreen::new(repo, favorites, NetworkMonitor::new(false), SortOption::default());
        let state = wait_for(&mut screen.subscribe(), |s| !s.is_loading).await;

        assert_eq!(titles(&state), vec!["Zodiac"]);
        assert!(catalog.calls().is_empty());
    }

    #[tokio::test]
    async fn follows_the_favorite_set() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, _catalog) = repo_with_fake().await;
        repo.cache().upsert_detail(&detail(1, "Zodiac")).await.unwrap();
        repo.cache().upsert_detail(&detail(2, "Arrival")).await.unwrap();
        let favorites = FavoritesStore::open(dir.path()).await.unwrap();

        let screen = FavoritesScreen::new(
            repo,
            favorites,
            NetworkMonitor::new(true),
            SortOption::default(),
        );
        let mut rx = screen.subscribe();
        wait_for(&mut rx, |s| !s.is_loading).await;

        screen.add(2).await.unwrap();
        let state = wait_for(&mut rx, |s| s.movies.len() == 1).await;
        assert_eq!(titles(&state), vec!["Arrival"]);

        screen.add(1).await.unwrap();
        wait_for(&mut rx, |s| s.movies.len() == 2).await;

        screen.remove(2).await.unwrap();
        let state = wait_for(&mut rx, |s| s.movies.len() == 1).await;
        assert_eq!(titles(&state), vec!["Zodiac"]);
    }
}
