use std::{collections::BTreeSet, sync::Arc, time::Duration};

use futures::StreamExt;
use tokio::sync::watch;
use tracing::debug;

use super::{JobScope, append_unique, should_prefetch};
use crate::{
    error::AppResult,
    models::{Movie, Resource},
    network::NetworkMonitor,
    prefs::FavoritesStore,
    repository::MovieRepository,
};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchState {
    pub query: String,
    pub results: Vec<Movie>,
    pub page: u32,
    pub can_load_more: bool,
    pub has_searched: bool,
    pub is_loading: bool,
    pub is_loading_more: bool,
    pub is_online: bool,
    pub error: Option<String>,
    pub favorite_ids: BTreeSet<i32>,
}

struct SearchInner {
    repo: MovieRepository,
    favorites: FavoritesStore,
    network: NetworkMonitor,
    debounce: Duration,
    state: watch::Sender<SearchState>,
}

impl SearchInner {
    async fn run_first_page(&self, query: String) {
        self.state.send_modify(|s| {
            s.is_loading = true;
            s.error = None;
        });

        let result = self.repo.search(&query, 1, self.network.is_online()).await;
        self.state.send_modify(|s| {
            s.is_loading = false;
            s.has_searched = true;
            match result {
                Resource::Success(results) => {
                    s.can_load_more = !results.is_empty();
                    s.results = results;
                    s.page = 1;
                },
                Resource::Error { message, .. } => {
                    s.results.clear();
                    s.can_load_more = false;
                    s.page = 0;
                    s.error = Some(message);
                },
                Resource::Loading { .. } => {},
            }
        });
    }
}

/// Debounced catalog search with infinite scroll.
pub struct SearchScreen {
    inner: Arc<SearchInner>,
    scope: JobScope,
}

impl SearchScreen {
    pub fn new(
        repo: MovieRepository,
        favorites: FavoritesStore,
        network: NetworkMonitor,
        debounce: Duration,
    ) -> Self {
        let (state, _) = watch::channel(SearchState {
            is_online: network.is_online(),
            favorite_ids: favorites.ids(),
            ..Default::default()
        });
        let inner = Arc::new(SearchInner { repo, favorites, network, debounce, state });
        let screen = Self { inner, scope: JobScope::default() };

        screen.watch_favorites();
        screen.watch_network();
        screen
    }

    pub fn state(&self) -> SearchState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.inner.state.subscribe()
    }

    /// Records the new query and schedules a search once typing pauses. Any
    /// pending or running search is replaced; a blank query clears results.
    pub fn update_query(&self, query: impl Into<String>) {
        let query = query.into();
        let jobs = self.scope.jobs();
        jobs.cancel("page");

        if query.trim().is_empty() {
            jobs.cancel("search");
            self.inner.state.send_modify(|s| {
                s.query = query;
                s.results.clear();
                s.page = 0;
                s.can_load_more = false;
                s.has_searched = false;
                s.is_loading = false;
                s.is_loading_more = false;
                s.error = None;
            });
            return;
        }

        // Paging stays closed until the new query's first page arrives.
        self.inner.state.send_modify(|s| {
            s.query = query.clone();
            s.results.clear();
            s.page = 0;
            s.can_load_more = false;
            s.is_loading_more = false;
        });

        let inner = self.inner.clone();
        jobs.replace("search", async move {
            tokio::time::sleep(inner.debounce).await;
            debug!(%query, "debounce elapsed, searching");
            inner.run_first_page(query).await;
        });
    }

    /// Searches the current query right away.
    pub fn search(&self) {
        let query = self.inner.state.borrow().query.clone();
        self.scope.jobs().cancel("page");
        let inner = self.inner.clone();
        self.scope.jobs().replace("search", async move {
            inner.run_first_page(query).await;
        });
    }

    pub fn load_next_page(&self) {
        let mut claimed = None;
        self.inner.state.send_if_modified(|s| {
            if s.is_loading || s.is_loading_more || !s.can_load_more || s.page == 0 {
                return false;
            }
            s.is_loading_more = true;
            claimed = Some((s.query.clone(), s.page + 1));
            true
        });
        let Some((query, next)) = claimed else {
            return;
        };

        let inner = self.inner.clone();
        self.scope.jobs().replace("page", async move {
            let result = inner.repo.search(&query, next, inner.network.is_online()).await;
            inner.state.send_modify(|s| {
                s.is_loading_more = false;
                match result {
                    Resource::Success(results) => {
                        s.can_load_more = !results.is_empty();
                        append_unique(&mut s.results, results);
                        s.page = next;
                    },
                    Resource::Error { message, .. } => {
                        s.can_load_more = false;
                        s.error = Some(message);
                    },
                    Resource::Loading { .. } => {},
                }
            });
        });
    }

    pub fn on_item_visible(&self, index: usize) {
        let loaded = self.inner.state.borrow().results.len();
        if should_prefetch(index, loaded) {
            self.load_next_page();
        }
    }

    pub fn clear(&self) {
        self.update_query(String::new());
    }

    pub async fn toggle_favorite(&self, movie_id: i32) -> AppResult<bool> {
        self.inner.favorites.toggle(movie_id).await
    }

    fn watch_favorites(&self) {
        let inner = self.inner.clone();
        let mut ids = self.inner.favorites.observe_ids();
        self.scope.jobs().spawn(async move {
            while let Some(ids) = ids.next().await {
                inner.state.send_if_modified(|s| {
                    let changed = s.favorite_ids != ids;
                    s.favorite_ids = ids;
                    changed
                });
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::tests::movie,
        repository::{SEARCH_OFFLINE, tests::repo_with_fake},
        screens::tests::wait_for,
    };

    const DEBOUNCE: Duration = Duration::from_millis(40);

    #[tokio::test]
    async fn burst_of_keystrokes_sends_one_request() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, catalog) = repo_with_fake().await;
        catalog.set_search_results(vec![movie(1, "Dune", 1.0), movie(2, "Dune: Part Two", 1.0)]);
        let favorites = FavoritesStore::open(dir.path()).await.unwrap();

        let screen = SearchScreen::new(repo, favorites, NetworkMonitor::new(true), DEBOUNCE);
        for query in ["d", "du", "dun", "dune"] {
            screen.update_query(query);
        }
        let state = wait_for(&mut screen.subscribe(), |s| s.has_searched).await;

        assert_eq!(state.results.len(), 2);
        assert_eq!(catalog.calls(), vec!["search:dune:1".to_string()]);
    }

    #[tokio::test]
    async fn blank_query_clears_without_searching() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, catalog) = repo_with_fake().await;
        catalog.set_search_results(vec![movie(1, "Dune", 1.0)]);
        let favorites = FavoritesStore::open(dir.path()).await.unwrap();

        let screen = SearchScreen::new(repo, favorites, NetworkMonitor::new(true), DEBOUNCE);
        screen.update_query("dune");
        wait_for(&mut screen.subscribe(), |s| s.has_searched).await;

        screen.update_query("dun");
        screen.update_query("   ");
        tokio::time::sleep(DEBOUNCE * 3).await;

        let state = screen.state();
        assert!(state.results.is_empty());
        assert!(!state.has_searched);
        assert_eq!(catalog.calls().len(), 1);
    }

    #[tokio::test]
    async fn new_query_does_not_page_the_old_results() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, catalog) = repo_with_fake().await;
        catalog.set_search_results(vec![movie(1, "Dune", 1.0)]);
        let favorites = FavoritesStore::open(dir.path()).await.unwrap();

        let screen = SearchScreen::new(
            repo,
            favorites,
            NetworkMonitor::new(true),
            Duration::from_millis(150),
        );
        let mut rx = screen.subscribe();
        screen.update_query("dune");
        screen.search();
        wait_for(&mut rx, |s| s.page == 1).await;

        catalog.set_search_results(vec![movie(2, "Alien", 1.0)]);
        screen.update_query("alien");
        screen.on_item_visible(0);
        screen.load_next_page();

        let state = screen.state();
        assert_eq!(state.page, 0);
        assert!(state.results.is_empty());
        assert!(!state.is_loading_more);

        let state = wait_for(&mut rx, |s| s.query == "alien" && s.page == 1).await;
        assert_eq!(state.results.iter().map(|m| m.id).collect::<Vec<_>>(), vec![2]);
        assert_eq!(
            catalog.calls(),
            vec!["search:dune:1".to_string(), "search:alien:1".to_string()]
        );
    }

    #[tokio::test]
    async fn offline_search_reports_connection() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, catalog) = repo_with_fake().await;
        let favorites = FavoritesStore::open(dir.path()).await.unwrap();

        let screen = SearchScreen::new(repo, favorites, NetworkMonitor::new(false), DEBOUNCE);
        screen.update_query("alien");
        screen.search();
        let state = wait_for(&mut screen.subscribe(), |s| s.has_searched).await;

        assert_eq!(state.error.as_deref(), Some(SEARCH_OFFLINE));
        assert!(catalog.calls().is_empty());
    }

    #[tokio::test]
    async fn next_page_stops_on_empty_page() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, catalog) = repo_with_fake().await;
        catalog.set_search_results(vec![movie(1, "Up", 1.0)]);
        let favorites = FavoritesStore::open(dir.path()).await.unwrap();

        let screen = SearchScreen::new(repo, favorites, NetworkMonitor::new(true), DEBOUNCE);
        screen.update_query("up");
        screen.search();
        let mut rx = screen.subscribe();
        wait_for(&mut rx, |s| s.page == 1).await;

        screen.on_item_visible(0);
        let state = wait_for(&mut rx, |s| !s.can_load_more).await;
        assert_eq!(state.results.len(), 1);
        assert_eq!(catalog.calls(), vec!["search:up:1".to_string(), "search:up:2".to_string()]);
    }
}
