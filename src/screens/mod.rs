//! Per-screen state holders. Each screen publishes an immutable snapshot on a
//! `watch` channel and owns the background jobs it spawns; dropping the screen
//! aborts them.

use std::{collections::HashMap, future::Future, sync::Arc};

use parking_lot::Mutex;
use tokio::task::AbortHandle;

use crate::models::Movie;

pub mod detail;
pub mod favorites;
pub mod home;
pub mod reviews;
pub mod search;

pub use detail::{DetailScreen, DetailState};
pub use favorites::{FavoritesScreen, FavoritesState};
pub use home::{HomeScreen, HomeState};
pub use reviews::{ReviewsScreen, ReviewsState};
pub use search::{SearchScreen, SearchState};

/// Infinite scroll kicks in once the last visible item is this close to the end.
pub const PREFETCH_DISTANCE: usize = 5;

#[derive(Default)]
struct JobSet {
    slots: HashMap<&'static str, AbortHandle>,
    background: Vec<AbortHandle>,
    closed: bool,
}

/// Handle for spawning screen-scoped tasks. Cloned into the tasks themselves
/// so they can start follow-up work in the same scope.
#[derive(Clone, Default)]
pub(crate) struct Jobs {
    set: Arc<Mutex<JobSet>>,
}

impl Jobs {
    /// Runs `fut` in `slot`, aborting whatever ran there before.
    pub(crate) fn replace<F>(&self, slot: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.set.lock();
        if set.closed {
            return;
        }
        let handle = tokio::spawn(fut).abort_handle();
        if let Some(previous) = set.slots.insert(slot, handle) {
            previous.abort();
        }
    }

    pub(crate) fn cancel(&self, slot: &'static str) {
        if let Some(handle) = self.set.lock().slots.remove(slot) {
            handle.abort();
        }
    }

    /// Long-lived watchers that only stop with the screen.
    pub(crate) fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.set.lock();
        if set.closed {
            return;
        }
        set.background.retain(|h| !h.is_finished());
        set.background.push(tokio::spawn(fut).abort_handle());
    }

    fn abort_all(&self) {
        let mut set = self.set.lock();
        set.closed = true;
        for (_, handle) in set.slots.drain() {
            handle.abort();
        }
        for handle in set.background.drain(..) {
            handle.abort();
        }
    }
}

/// Owned by a screen; aborts every job of the scope when dropped.
#[derive(Default)]
pub(crate) struct JobScope {
    jobs: Jobs,
}

impl JobScope {
    pub(crate) fn jobs(&self) -> &Jobs {
        &self.jobs
    }
}

impl Drop for JobScope {
    fn drop(&mut self) {
        self.jobs.abort_all();
    }
}

pub(crate) fn should_prefetch(last_visible: usize, loaded: usize) -> bool {
    loaded > 0 && last_visible + PREFETCH_DISTANCE >= loaded
}

/// Appends `page` to `movies`, skipping ids already present.
pub(crate) fn append_unique(movies: &mut Vec<Movie>, page: Vec<Movie>) {
    for movie in page {
        if !movies.iter().any(|m| m.id == movie.id) {
            movies.push(movie);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use tokio::sync::watch;

    use super::*;
    use crate::cache::tests::movie;

    /// Waits until the published state satisfies `pred`.
    pub(crate) async fn wait_for<T: Clone>(
        rx: &mut watch::Receiver<T>,
        pred: impl FnMut(&T) -> bool,
    ) -> T {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
            .await
            .expect("timed out waiting for screen state")
            .expect("screen state channel closed")
            .clone()
    }

    #[test]
    fn prefetch_triggers_near_the_end() {
        assert!(!should_prefetch(0, 0));
        assert!(!should_prefetch(14, 20));
        assert!(should_prefetch(15, 20));
        assert!(should_prefetch(0, 3));
    }

    #[test]
    fn appended_pages_skip_known_ids() {
        let mut movies = vec![movie(1, "A", 1.0), movie(2, "B", 1.0)];
        append_unique(&mut movies, vec![movie(2, "B", 1.0), movie(3, "C", 1.0)]);
        assert_eq!(movies.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn dropping_the_scope_aborts_jobs() {
        let scope = JobScope::default();
        let (tx, mut rx) = watch::channel(false);
        scope.jobs().spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });
        drop(scope);

        // The sender is dropped without ever sending once the task is aborted.
        assert!(rx.changed().await.is_err());
        assert!(!*rx.borrow());
    }

    #[tokio::test]
    async fn replacing_a_slot_aborts_the_previous_job() {
        let scope = JobScope::default();
        let hits = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let hits = hits.clone();
            scope.jobs().replace("load", async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                hits.lock().push(n);
            });
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*hits.lock(), vec![2]);
    }
}
