use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
};

use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use tracing::{debug, warn};

use crate::{
    cache::CacheStore,
    error::AppResult,
    models::{Category, Movie, MovieDetail, MovieReview, Resource},
    tmdb::CatalogApi,
};

pub const NO_CACHED_DATA: &str = "No cached data available";
pub const NO_CONNECTION: &str = "No internet connection";
pub const DETAIL_OFFLINE: &str = "Movie details not available offline";
pub const REVIEWS_OFFLINE: &str = "Reviews not available offline";
pub const SEARCH_OFFLINE: &str = "Search requires internet connection";
pub const SEARCH_BLANK: &str = "Enter a search term";

const MAX_CONCURRENT_DETAIL_FETCHES: usize = 4;

/// Decides, per read, whether to go to the catalog or serve the cache, and
/// mirrors successful fetches into the cache.
#[derive(Clone)]
pub struct MovieRepository {
    catalog: Arc<dyn CatalogApi>,
    cache: CacheStore,
}

impl MovieRepository {
    pub fn new(catalog: Arc<dyn CatalogApi>, cache: CacheStore) -> Self {
        Self { catalog, cache }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Page 1 replaces the category's cache, later pages are merged into it.
    pub async fn load_category(
        &self,
        category: Category,
        page: u32,
        online: bool,
    ) -> Resource<Vec<Movie>> {
        if !online {
            if page > 1 {
                return Resource::error(NO_CONNECTION);
            }
            let cached = self.cached_category(category).await;
            debug!(%category, cached = cached.len(), "offline, serving cached listing");
            return if cached.is_empty() {
                Resource::error(NO_CACHED_DATA)
            } else {
                Resource::Success(cached)
            };
        }

        let fetched = match self.catalog.category_page(category, page).await {
            Ok(resp) => resp.results,
            Err(err) => {
                warn!(%category, page, error = %err, "category fetch failed");
                let cached = self.cached_category(category).await;
                let stale = (!cached.is_empty()).then_some(cached);
                return Resource::error_with(format!("Failed to fetch movies: {err}"), stale);
            },
        };

        let movies: Vec<Movie> =
            fetched.into_iter().map(|m| Movie { category: Some(category), ..m }).collect();

        let written = if page == 1 {
            self.cache.replace_category(category, &movies).await
        } else {
            self.cache.upsert_movies(category, &movies).await
        };
        if let Err(err) = written {
            warn!(%category, page, error = %err, "failed to cache listing");
        }

        debug!(%category, page, count = movies.len(), "fetched listing");
        Resource::Success(movies)
    }

    /// Emits the cached listing as `Loading`, then the outcome of a page-1 load.
    pub fn category_listing(
        &self,
        category: Category,
        online: bool,
    ) -> BoxStream<'static, Resource<Vec<Movie>>> {
        let first = self.clone();
        let second = self.clone();

        stream::once(async move {
            let cached = first.cached_category(category).await;
            Resource::Loading { stale: (!cached.is_empty()).then_some(cached) }
        })
        .chain(stream::once(async move { second.load_category(category, 1, online).await }))
        .boxed()
    }

    pub async fn movie_detail(&self, movie_id: i32, online: bool) -> Resource<MovieDetail> {
        if !online {
            return match self.cached_detail(movie_id).await {
                Some(detail) => Resource::Success(detail),
                None => Resource::error(DETAIL_OFFLINE),
            };
        }

        match self.catalog.movie_detail(movie_id).await {
            Ok(detail) => {
                if let Err(err) = self.cache.upsert_detail(&detail).await {
                    warn!(movie_id, error = %err, "failed to cache movie detail");
                }
                Resource::Success(detail)
            },
            Err(err) => {
                warn!(movie_id, error = %err, "detail fetch failed");
                let stale = self.cached_detail(movie_id).await;
                Resource::error_with(format!("Failed to fetch movie details: {err}"), stale)
            },
        }
    }

    pub async fn movie_reviews(&self, movie_id: i32, online: bool) -> Resource<Vec<MovieReview>> {
        if !online {
            let cached = self.cached_reviews(movie_id).await;
            return if cached.is_empty() {
                Resource::error(REVIEWS_OFFLINE)
            } else {
                Resource::Success(cached)
            };
        }

        match self.catalog.movie_reviews(movie_id, 1).await {
            Ok(resp) => {
                if let Err(err) = self.cache.replace_reviews(movie_id, &resp.results).await {
                    warn!(movie_id, error = %err, "failed to cache reviews");
                }
                Resource::Success(resp.results)
            },
            Err(err) => {
                warn!(movie_id, error = %err, "reviews fetch failed");
                let cached = self.cached_reviews(movie_id).await;
                let stale = (!cached.is_empty()).then_some(cached);
                Resource::error_with(format!("Failed to fetch reviews: {err}"), stale)
            },
        }
    }

    /// Network only; results are never cached.
    pub async fn search(&self, query: &str, page: u32, online: bool) -> Resource<Vec<Movie>> {
        let query = query.trim();
        if query.is_empty() {
            return Resource::error(SEARCH_BLANK);
        }
        if !online {
            return Resource::error(SEARCH_OFFLINE);
        }

        match self.catalog.search(query, page).await {
            Ok(resp) => {
                debug!(query, page, count = resp.results.len(), "search complete");
                Resource::Success(resp.results)
            },
            Err(err) => {
                warn!(query, page, error = %err, "search failed");
                Resource::error(format!("Search failed: {err}"))
            },
        }
    }

    /// Favorites materialized from cached details. When online, details that
    /// are not cached yet are fetched (and cached) first.
    pub async fn favorite_movies(&self, ids: &BTreeSet<i32>, online: bool) -> AppResult<Vec<Movie>> {
        let wanted: Vec<i32> = ids.iter().copied().collect();
        let mut details = self.cache.details_by_ids(&wanted).await?;

        if online {
            let cached: HashSet<i32> = details.iter().map(|d| d.id).collect();
            let missing: Vec<i32> = wanted.iter().copied().filter(|id| !cached.contains(id)).collect();

            if !missing.is_empty() {
                debug!(missing = missing.len(), "fetching missing favorite details");
                let fetched: Vec<Resource<MovieDetail>> = stream::iter(missing)
                    .map(|id| async move { self.movie_detail(id, true).await })
                    .buffer_unordered(MAX_CONCURRENT_DETAIL_FETCHES)
                    .collect()
                    .await;
                details.extend(fetched.into_iter().filter_map(|r| match r {
                    Resource::Success(detail) => Some(detail),
                    _ => None,
                }));
            }
        }

        let mut seen = HashSet::new();
        Ok(details.iter().filter(|d| seen.insert(d.id)).map(Movie::from).collect())
    }

    pub async fn missing_details(&self, ids: &BTreeSet<i32>) -> AppResult<BTreeSet<i32>> {
        let wanted: Vec<i32> = ids.iter().copied().collect();
        let cached: HashSet<i32> =
            self.cache.details_by_ids(&wanted).await?.into_iter().map(|d| d.id).collect();
        Ok(ids.iter().copied().filter(|id| !cached.contains(id)).collect())
    }

    pub async fn movie_by_id(&self, movie_id: i32) -> AppResult<Option<Movie>> {
        self.cache.movie_by_id(movie_id).await
    }

    pub async fn movies_by_ids(&self, ids: &[i32]) -> AppResult<Vec<Movie>> {
        self.cache.movies_by_ids(ids).await
    }

    pub async fn cached_details(&self, ids: &[i32]) -> AppResult<Vec<MovieDetail>> {
        self.cache.details_by_ids(ids).await
    }

    async fn cached_category(&self, category: Category) -> Vec<Movie> {
        self.cache.movies_by_category(category).await.unwrap_or_else(|err| {
            warn!(%category, error = %err, "failed to read cached listing");
            Vec::new()
        })
    }

    async fn cached_detail(&self, movie_id: i32) -> Option<MovieDetail> {
        let detail = self.cache.detail_by_id(movie_id).await.unwrap_or_else(|err| {
            warn!(movie_id, error = %err, "failed to read cached detail");
            None
        });
        if let Some(d) = &detail {
            if !self.cache.is_fresh(d.cached_at) {
                debug!(movie_id, cached_at = d.cached_at, "serving stale detail");
            }
        }
        detail
    }

    async fn cached_reviews(&self, movie_id: i32) -> Vec<MovieReview> {
        self.cache.reviews_by_movie(movie_id).await.unwrap_or_else(|err| {
            warn!(movie_id, error = %err, "failed to read cached reviews");
            Vec::new()
        })
    }
}
