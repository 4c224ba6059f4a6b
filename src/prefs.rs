//! Small key-value preference files kept next to, but separate from, the
//! relational cache. Each file is a JSON document whose current value is
//! also published on a `watch` channel.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::{
    fs,
    sync::{Mutex, watch},
};
use tracing::{debug, warn};

use crate::error::AppResult;

pub struct PreferenceFile<T> {
    path: PathBuf,
    value: watch::Sender<T>,
    write_lock: Mutex<()>,
}

impl<T> PreferenceFile<T>
where
    T: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Loads `path`, falling back to `T::default()` when the file is missing
    /// or unreadable.
    pub async fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();

        let value = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "corrupt preference file, starting empty");
                T::default()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => T::default(),
            Err(err) => return Err(err.into()),
        };

        let (value, _) = watch::channel(value);
        Ok(Self { path, value, write_lock: Mutex::new(()) })
    }

    pub fn get(&self) -> T {
        self.value.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.value.subscribe()
    }

    /// Applies `f` to a copy of the current value, persists it, then publishes
    /// it. Returns whatever `f` returned.
    pub async fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> AppResult<R> {
        let _guard = self.write_lock.lock().await;

        let mut next = self.get();
        let out = f(&mut next);
        self.persist(&next).await?;
        self.value.send_replace(next);

        Ok(out)
    }

    async fn persist(&self, value: &T) -> AppResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(value)?).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FavoritesPrefs {
    #[serde(default)]
    pub favorite_movie_ids: BTreeSet<i32>,
}

/// Persisted set of favorited movie ids.
#[derive(Clone)]
pub struct FavoritesStore {
    file: Arc<PreferenceFile<FavoritesPrefs>>,
}

impl FavoritesStore {
    pub async fn open(prefs_dir: impl AsRef<Path>) -> AppResult<Self> {
        let file = PreferenceFile::open(prefs_dir.as_ref().join("favorites.json")).await?;
        Ok(Self { file: Arc::new(file) })
    }

    pub fn ids(&self) -> BTreeSet<i32> {
        self.file.get().favorite_movie_ids
    }

    pub fn contains(&self, movie_id: i32) -> bool {
        self.file.value.borrow().favorite_movie_ids.contains(&movie_id)
    }

    pub async fn add(&self, movie_id: i32) -> AppResult<()> {
        self.file.update(|p| p.favorite_movie_ids.insert(movie_id)).await?;
        debug!(movie_id, "added favorite");
        Ok(())
    }

    pub async fn remove(&self, movie_id: i32) -> AppResult<()> {
        self.file.update(|p| p.favorite_movie_ids.remove(&movie_id)).await?;
        debug!(movie_id, "removed favorite");
        Ok(())
    }

    /// Returns whether the movie is a favorite after the toggle.
    pub async fn toggle(&self, movie_id: i32) -> AppResult<bool> {
        let now_favorite = self
            .file
            .update(|p| {
                if p.favorite_movie_ids.remove(&movie_id) {
                    false
                } else {
                    p.favorite_movie_ids.insert(movie_id);
                    true
                }
            })
            .await?;
        debug!(movie_id, now_favorite, "toggled favorite");
        Ok(now_favorite)
    }

    pub fn subscribe(&self) -> watch::Receiver<FavoritesPrefs> {
        self.file.subscribe()
    }

    pub fn observe_ids(&self) -> BoxStream<'static, BTreeSet<i32>> {
        watch_stream(self.file.subscribe()).map(|p| p.favorite_movie_ids).boxed()
    }

    pub fn observe_is_favorite(&self, movie_id: i32) -> BoxStream<'static, bool> {
        watch_stream(self.file.subscribe())
            .map(move |p| p.favorite_movie_ids.contains(&movie_id))
            .boxed()
    }
}

/// Current value first, then one item per change.
pub(crate) fn watch_stream<T>(rx: watch::Receiver<T>) -> BoxStream<'static, T>
where
    T: Clone + Send + Sync + 'static,
{
    stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let value = rx.borrow_and_update().clone();
        Some((value, (rx, false)))
    })
    .boxed()
}
