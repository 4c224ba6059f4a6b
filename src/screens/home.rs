use std::{collections::BTreeSet, sync::Arc};

use futures::StreamExt;
use tokio::sync::watch;
use tracing::debug;

use super::{JobScope, Jobs, append_unique, should_prefetch};
use crate::{
    error::AppResult,
    models::{Category, Movie, Resource},
    network::NetworkMonitor,
    prefs::FavoritesStore,
    repository::MovieRepository,
};

#[derive(Clone, Debug, PartialEq)]
pub struct HomeState {
    pub category: Category,
    pub movies: Vec<Movie>,
    pub page: u32,
    pub can_load_more: bool,
    pub is_loading: bool,
    pub is_loading_more: bool,
    pub is_refreshing: bool,
    pub is_online: bool,
    pub error: Option<String>,
    pub favorite_ids: BTreeSet<i32>,
    pub scroll_position: usize,
}

impl HomeState {
    fn new(category: Category, is_online: bool, favorite_ids: BTreeSet<i32>) -> Self {
        Self {
            category,
            movies: Vec::new(),
            page: 0,
            can_load_more: true,
            is_loading: true,
            is_loading_more: false,
            is_refreshing: false,
            is_online,
            error: None,
            favorite_ids,
            scroll_position: 0,
        }
    }
}

struct HomeInner {
    repo: MovieRepository,
    favorites: FavoritesStore,
    network: NetworkMonitor,
    state: watch::Sender<HomeState>,
}

/// Category listing with infinite scroll.
pub struct HomeScreen {
    inner: Arc<HomeInner>,
    scope: JobScope,
}

impl HomeScreen {
    /// Starts watching favorites and connectivity, then loads the first page.
    pub fn new(
        repo: MovieRepository,
        favorites: FavoritesStore,
        network: NetworkMonitor,
        category: Category,
    ) -> Self {
        let initial = HomeState::new(category, network.is_online(), favorites.ids());
        let (state, _) = watch::channel(initial);
        let inner = Arc::new(HomeInner { repo, favorites, network, state });
        let screen = Self { inner, scope: JobScope::default() };

        screen.watch_favorites();
        screen.watch_network();
        screen.load_movies();
        screen
    }

    pub fn state(&self) -> HomeState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<HomeState> {
        self.inner.state.subscribe()
    }

    pub fn load_movies(&self) {
        spawn_first_page(self.scope.jobs(), &self.inner, false);
    }

    pub fn refresh(&self) {
        spawn_first_page(self.scope.jobs(), &self.inner, true);
    }

    pub fn load_next_page(&self) {
        let mut claimed = None;
        self.inner.state.send_if_modified(|s| {
            if s.is_loading || s.is_loading_more || !s.can_load_more || s.page == 0 {
                return false;
            }
            s.is_loading_more = true;
            claimed = Some((s.category, s.page + 1));
            true
        });
        let Some((category, next)) = claimed else {
            return;
        };

        let inner = self.inner.clone();
        self.scope.jobs().replace("page", async move {
            let online = inner.network.is_online();
            let result = inner.repo.load_category(category, next, online).await;
            inner.state.send_modify(|s| {
                s.is_loading_more = false;
                match result {
                    Resource::Success(movies) => {
                        s.can_load_more = !movies.is_empty();
                        append_unique(&mut s.movies, movies);
                        s.page = next;
                        s.error = None;
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

    /// Called with the index of the last visible item.
    pub fn on_item_visible(&self, index: usize) {
        let loaded = self.inner.state.borrow().movies.len();
        if should_prefetch(index, loaded) {
            self.load_next_page();
        }
    }

    pub fn select_category(&self, category: Category) {
        if self.inner.state.borrow().category == category {
            return;
        }
        self.scope.jobs().cancel("page");
        self.inner.state.send_modify(|s| {
            s.category = category;
            s.movies.clear();
            s.page = 0;
            s.can_load_more = true;
            s.is_loading_more = false;
            s.scroll_position = 0;
            s.error = None;
        });
        debug!(%category, "category selected");
        self.load_movies();
    }

    pub fn save_scroll_position(&self, index: usize) {
        self.inner.state.send_if_modified(|s| {
            let changed = s.scroll_position != index;
            s.scroll_position = index;
            changed
        });
    }

    pub fn clear_error(&self) {
        self.inner.state.send_if_modified(|s| s.error.take().is_some());
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

    /// Coming back online while an error is shown reloads the listing.
    fn watch_network(&self) {
        let inner = self.inner.clone();
        let jobs = self.scope.jobs().clone();
        let mut rx = self.inner.network.subscribe();
        self.scope.jobs().spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                let mut reload = false;
                inner.state.send_modify(|s| {
                    reload = online && !s.is_online && s.error.is_some();
                    s.is_online = online;
                });
                if reload {
                    debug!("back online, reloading listing");
                    spawn_first_page(&jobs, &inner, false);
                }
            }
        });
    }
}

fn spawn_first_page(jobs: &Jobs, inner: &Arc<HomeInner>, refreshing: bool) {
    jobs.cancel("page");
    let inner = inner.clone();
    jobs.replace("load", async move {
        let category = inner.state.borrow().category;
        let online = inner.network.is_online();

        let mut listing = inner.repo.category_listing(category, online);
        while let Some(resource) = listing.next().await {
            inner.state.send_modify(|s| {
                s.is_online = online;
                match resource {
                    Resource::Loading { stale } => {
                        s.is_loading = !refreshing;
                        s.is_refreshing = refreshing;
                        s.is_loading_more = false;
                        if let Some(stale) = stale {
                            s.movies = stale;
                        }
                    },
                    Resource::Success(movies) => {
                        s.is_loading = false;
                        s.is_refreshing = false;
                        s.can_load_more = online && !movies.is_empty();
                        s.movies = movies;
                        s.page = 1;
                        s.error = None;
                    },
                    Resource::Error { message, stale } => {
                        s.is_loading = false;
                        s.is_refreshing = false;
                        s.can_load_more = false;
                        if let Some(stale) = stale {
                            s.movies = stale;
                            s.page = 1;
                        }
                        s.error = Some(message);
                    },
                }
            });
        }
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        cache::tests::movie, repository::NO_CACHED_DATA, repository::tests::repo_with_fake,
        screens::tests::wait_for,
    };

    fn movies(range: std::ops::RangeInclusive<i32>) -> Vec<Movie> {
        range.map(|id| movie(id, &format!("Movie {id}"), 1000.0 - id as f64)).collect()
    }

    #[tokio::test]
    async fn first_page_loads_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, catalog) = repo_with_fake().await;
        catalog.set_page(Category::Popular, 1, movies(1..=3));
        let favorites = FavoritesStore::open(dir.path()).await.unwrap();

        let screen =
            HomeScreen::new(repo, favorites, NetworkMonitor::new(true), Category::Popular);
        let state = wait_for(&mut screen.subscribe(), |s| s.page == 1).await;

        assert_eq!(state.movies.len(), 3);
        assert!(state.can_load_more);
        assert!(!state.is_loading);
        assert_eq!(state.error, None);
    }

    #[tokio::test]
    async fn scrolling_near_the_end_loads_the_next_page() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, catalog) = repo_with_fake().await;
        catalog.set_page(Category::Popular, 1, movies(1..=20));
        catalog.set_page(Category::Popular, 2, movies(19..=30));
        let favorites = FavoritesStore::open(dir.path()).await.unwrap();

        let screen =
            HomeScreen::new(repo, favorites, NetworkMonitor::new(true), Category::Popular);
        let mut rx = screen.subscribe();
        wait_for(&mut rx, |s| s.page == 1).await;

        screen.on_item_visible(10);
        assert!(!screen.state().is_loading_more);

        screen.on_item_visible(16);
        let state = wait_for(&mut rx, |s| s.page == 2).await;
        assert_eq!(state.movies.len(), 30);
        assert_eq!(
            catalog.calls(),
            vec!["category:popular:1".to_string(), "category:popular:2".to_string()]
        );

        // An empty page stops further paging.
        screen.load_next_page();
        let state = wait_for(&mut rx, |s| !s.can_load_more).await;
        assert_eq!(state.page, 3);
        screen.load_next_page();
        assert!(!screen.state().is_loading_more);
    }

    #[tokio::test]
    async fn switching_category_discards_the_old_load() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, catalog) = repo_with_fake().await;
        catalog.set_page(Category::Popular, 1, movies(1..=3));
        catalog.set_page(Category::TopRated, 1, movies(50..=51));
        catalog.set_latency(Duration::from_millis(50));
        let favorites = FavoritesStore::open(dir.path()).await.unwrap();

        let screen =
            HomeScreen::new(repo, favorites, NetworkMonitor::new(true), Category::Popular);
        screen.select_category(Category::TopRated);

        let mut rx = screen.subscribe();
        let state = wait_for(&mut rx, |s| s.page == 1).await;
        assert_eq!(state.category, Category::TopRated);
        assert_eq!(state.movies.iter().map(|m| m.id).collect::<Vec<_>>(), vec![50, 51]);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(screen.state().movies.len(), 2);
    }

    #[tokio::test]
    async fn reconnecting_after_an_error_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, catalog) = repo_with_fake().await;
        catalog.set_page(Category::Upcoming, 1, movies(1..=2));
        let favorites = FavoritesStore::open(dir.path()).await.unwrap();
        let network = NetworkMonitor::new(false);

        let screen = HomeScreen::new(repo, favorites, network.clone(), Category::Upcoming);
        let mut rx = screen.subscribe();
        let state = wait_for(&mut rx, |s| s.error.is_some()).await;
        assert_eq!(state.error.as_deref(), Some(NO_CACHED_DATA));
        assert!(catalog.calls().is_empty());

        network.set_online(true);
        let state = wait_for(&mut rx, |s| s.error.is_none() && s.page == 1).await;
        assert!(state.is_online);
        assert_eq!(state.movies.len(), 2);
    }

    #[tokio::test]
    async fn favorite_ids_follow_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let (repo, _catalog) = repo_with_fake().await;
        let favorites = FavoritesStore::open(dir.path()).await.unwrap();

        let screen =
            HomeScreen::new(repo, favorites, NetworkMonitor::new(true), Category::Popular);
        assert!(screen.toggle_favorite(7).await.unwrap());

        let state = wait_for(&mut screen.subscribe(), |s| s.favorite_ids.contains(&7)).await;
        assert_eq!(state.favorite_ids.len(), 1);

        screen.save_scroll_position(4);
        assert_eq!(screen.state().scroll_position, 4);
    }
}
