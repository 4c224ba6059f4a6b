use std::{collections::HashSet, future::Future, sync::Arc};

use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait, sea_query::OnConflict,
};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{
    entities::{movie, movie_detail, movie_review},
    error::AppResult,
    models::{Category, Genre, Movie, MovieDetail, MovieReview},
};

/// Local copy of catalog data. Every write bumps a change counter so the
/// `observe_*` streams can re-run their query.
#[derive(Clone)]
pub struct CacheStore {
    db: DatabaseConnection,
    ttl_seconds: i64,
    changes: Arc<watch::Sender<u64>>,
}

impl CacheStore {
    pub fn new(db: DatabaseConnection, ttl_days: i64) -> Self {
        let (changes, _) = watch::channel(0);
        Self { db, ttl_seconds: ttl_days * 86_400, changes: Arc::new(changes) }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Stale rows are still served; freshness only decides how they are labeled.
    pub fn is_fresh(&self, cached_at: i64) -> bool {
        now_sec().saturating_sub(cached_at) <= self.ttl_seconds
    }

    fn notify(&self) {
        self.changes.send_modify(|v| *v = v.wrapping_add(1));
    }

    pub async fn movies_by_category(&self, category: Category) -> AppResult<Vec<Movie>> {
        let rows = movie::Entity::find()
            .filter(movie::Column::Category.eq(category.as_str()))
            .order_by_desc(movie::Column::Popularity)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(Movie::from).collect())
    }

    pub async fn movie_by_id(&self, movie_id: i32) -> AppResult<Option<Movie>> {
        let row = movie::Entity::find()
            .filter(movie::Column::Id.eq(movie_id))
            .order_by_desc(movie::Column::CachedAt)
            .one(&self.db)
            .await?;
        Ok(row.map(Movie::from))
    }

    /// One movie per id, whichever category row was cached most recently.
    pub async fn movies_by_ids(&self, ids: &[i32]) -> AppResult<Vec<Movie>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = movie::Entity::find()
            .filter(movie::Column::Id.is_in(ids.iter().copied()))
            .order_by_desc(movie::Column::CachedAt)
            .all(&self.db)
            .await?;

        let mut seen = HashSet::new();
        Ok(rows.into_iter().filter(|r| seen.insert(r.id)).map(Movie::from).collect())
    }

    pub async fn search_cached(&self, query: &str) -> AppResult<Vec<Movie>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let rows = movie::Entity::find()
            .filter(
                Condition::any()
                    .add(movie::Column::Title.contains(query))
                    .add(movie::Column::OriginalTitle.contains(query)),
            )
            .order_by_desc(movie::Column::Popularity)
            .all(&self.db)
            .await?;

        let mut seen = HashSet::new();
        Ok(rows.into_iter().filter(|r| seen.insert(r.id)).map(Movie::from).collect())
    }

    /// Deletes every cached row for `category` and inserts `movies`, in one
    /// transaction.
    pub async fn replace_category(&self, category: Category, movies: &[Movie]) -> AppResult<()> {
        let txn = self.db.begin().await?;

        let deleted = movie::Entity::delete_many()
            .filter(movie::Column::Category.eq(category.as_str()))
            .exec(&txn)
            .await?;
        insert_movies(&txn, category, movies).await?;

        txn.commit().await?;
        debug!(%category, removed = deleted.rows_affected, inserted = movies.len(), "replaced category cache");

        self.notify();
        Ok(())
    }

    pub async fn upsert_movies(&self, category: Category, movies: &[Movie]) -> AppResult<()> {
        if movies.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin().await?;
        insert_movies(&txn, category, movies).await?;
        txn.commit().await?;

        self.notify();
        Ok(())
    }

    pub async fn detail_by_id(&self, movie_id: i32) -> AppResult<Option<MovieDetail>> {
        let row = movie_detail::Entity::find_by_id(movie_id).one(&self.db).await?;
        Ok(row.map(MovieDetail::from))
    }

    pub async fn details_by_ids(&self, ids: &[i32]) -> AppResult<Vec<MovieDetail>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = movie_detail::Entity::find()
            .filter(movie_detail::Column::Id.is_in(ids.iter().copied()))
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(MovieDetail::from).collect())
    }

    pub async fn upsert_detail(&self, detail: &MovieDetail) -> AppResult<()> {
        let model = movie_detail::ActiveModel {
            id: Set(detail.id),
            title: Set(detail.title.clone()),
            original_title: Set(detail.original_title.clone()),
            original_language: Set(detail.original_language.clone()),
            overview: Set(detail.overview.clone()),
            poster_path: Set(detail.poster_path.clone()),
            backdrop_path: Set(detail.backdrop_path.clone()),
            release_date: Set(detail.release_date.clone()),
            vote_average: Set(detail.vote_average),
            vote_count: Set(detail.vote_count),
            popularity: Set(detail.popularity),
            adult: Set(detail.adult),
            video: Set(detail.video),
            genres: Set(serde_json::to_string(&detail.genres)?),
            runtime: Set(detail.runtime),
            revenue: Set(detail.revenue),
            budget: Set(detail.budget),
            status: Set(detail.status.clone()),
            tagline: Set(detail.tagline.clone()),
            homepage: Set(detail.homepage.clone()),
            imdb_id: Set(detail.imdb_id.clone()),
            cached_at: Set(now_sec()),
        };

        movie_detail::Entity::insert(model)
            .on_conflict(
                OnConflict::column(movie_detail::Column::Id)
                    .update_columns([
                        movie_detail::Column::Title,
                        movie_detail::Column::OriginalTitle,
                        movie_detail::Column::OriginalLanguage,
                        movie_detail::Column::Overview,
                        movie_detail::Column::PosterPath,
                        movie_detail::Column::BackdropPath,
                        movie_detail::Column::ReleaseDate,
                        movie_detail::Column::VoteAverage,
                        movie_detail::Column::VoteCount,
                        movie_detail::Column::Popularity,
                        movie_detail::Column::Adult,
                        movie_detail::Column::Video,
                        movie_detail::Column::Genres,
                        movie_detail::Column::Runtime,
                        movie_detail::Column::Revenue,
                        movie_detail::Column::Budget,
                        movie_detail::Column::Status,
                        movie_detail::Column::Tagline,
                        movie_detail::Column::Homepage,
                        movie_detail::Column::ImdbId,
                        movie_detail::Column::CachedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        self.notify();
        Ok(())
    }

    pub async fn delete_detail(&self, movie_id: i32) -> AppResult<()> {
        movie_detail::Entity::delete_by_id(movie_id).exec(&self.db).await?;
        self.notify();
        Ok(())
    }

    pub async fn clear_details(&self) -> AppResult<()> {
        movie_detail::Entity::delete_many().exec(&self.db).await?;
        self.notify();
        Ok(())
    }

    pub async fn reviews_by_movie(&self, movie_id: i32) -> AppResult<Vec<MovieReview>> {
        let rows = movie_review::Entity::find()
            .filter(movie_review::Column::MovieId.eq(movie_id))
            .order_by_desc(movie_review::Column::CreatedAt)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(MovieReview::from).collect())
    }

    /// Drops the movie's cached reviews and stores `reviews` in their place,
    /// in one transaction.
    pub async fn replace_reviews(&self, movie_id: i32, reviews: &[MovieReview]) -> AppResult<()> {
        let now = now_sec();
        let txn = self.db.begin().await?;

        movie_review::Entity::delete_many()
            .filter(movie_review::Column::MovieId.eq(movie_id))
            .exec(&txn)
            .await?;

        for review in reviews {
            let model = movie_review::ActiveModel {
                id: Set(review.id.clone()),
                movie_id: Set(movie_id),
                author: Set(review.author.clone()),
                author_username: Set(review.author_username.clone()),
                author_avatar_path: Set(review.author_avatar_path.clone()),
                author_rating: Set(review.author_rating),
                content: Set(review.content.clone()),
                created_at: Set(review.created_at.clone()),
                updated_at: Set(review.updated_at.clone()),
                url: Set(review.url.clone()),
                cached_at: Set(now),
            };
            // A review id is global; if another movie claimed it, the newest fetch wins.
            movie_review::Entity::insert(model)
                .on_conflict(
                    OnConflict::column(movie_review::Column::Id)
                        .update_columns([
                            movie_review::Column::MovieId,
                            movie_review::Column::Author,
                            movie_review::Column::AuthorUsername,
                            movie_review::Column::AuthorAvatarPath,
                            movie_review::Column::AuthorRating,
                            movie_review::Column::Content,
                            movie_review::Column::CreatedAt,
                            movie_review::Column::UpdatedAt,
                            movie_review::Column::Url,
                            movie_review::Column::CachedAt,
                        ])
                        .to_owned(),
                )
                .exec(&txn)
                .await?;
        }

        txn.commit().await?;

        self.notify();
        Ok(())
    }

    pub async fn clear_reviews(&self) -> AppResult<()> {
        movie_review::Entity::delete_many().exec(&self.db).await?;
        self.notify();
        Ok(())
    }

    pub fn observe_category(&self, category: Category) -> BoxStream<'static, AppResult<Vec<Movie>>> {
        self.observe(move |cache| async move { cache.movies_by_category(category).await })
    }

    pub fn observe_movies_by_ids(&self, ids: Vec<i32>) -> BoxStream<'static, AppResult<Vec<Movie>>> {
        let ids = Arc::new(ids);
        self.observe(move |cache| {
            let ids = ids.clone();
            async move { cache.movies_by_ids(&ids).await }
        })
    }

    pub fn observe_detail(
        &self,
        movie_id: i32,
    ) -> BoxStream<'static, AppResult<Option<MovieDetail>>> {
        self.observe(move |cache| async move { cache.detail_by_id(movie_id).await })
    }

    pub fn observe_reviews(&self, movie_id: i32) -> BoxStream<'static, AppResult<Vec<MovieReview>>> {
        self.observe(move |cache| async move { cache.reviews_by_movie(movie_id).await })
    }

    /// Yields `query` once right away, then again after every cache write.
    fn observe<T, F, Fut>(&self, query: F) -> BoxStream<'static, AppResult<T>>
    where
        T: Send + 'static,
        F: Fn(CacheStore) -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
    {
        let rx = self.changes.subscribe();
        let cache = self.clone();

        stream::unfold((rx, true), move |(mut rx, first)| {
            let next = query(cache.clone());
            async move {
                if !first && rx.changed().await.is_err() {
                    return None;
                }
                rx.borrow_and_update();
                Some((next.await, (rx, false)))
            }
        })
        .boxed()
    }
}

async fn insert_movies<C: ConnectionTrait>(
    conn: &C,
    category: Category,
    movies: &[Movie],
) -> AppResult<()> {
    let now = now_sec();

    for m in movies {
        let model = movie::ActiveModel {
            id: Set(m.id),
            category: Set(category.as_str().to_string()),
            title: Set(m.title.clone()),
            original_title: Set(m.original_title.clone()),
            original_language: Set(m.original_language.clone()),
            overview: Set(m.overview.clone()),
            poster_path: Set(m.poster_path.clone()),
            backdrop_path: Set(m.backdrop_path.clone()),
            release_date: Set(m.release_date.clone()),
            vote_average: Set(m.vote_average),
            vote_count: Set(m.vote_count),
            popularity: Set(m.popularity),
            adult: Set(m.adult),
            video: Set(m.video),
            genre_ids: Set(join_genre_ids(&m.genre_ids)),
            cached_at: Set(now),
        };

        movie::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([movie::Column::Id, movie::Column::Category])
                    .update_columns([
                        movie::Column::Title,
                        movie::Column::OriginalTitle,
                        movie::Column::OriginalLanguage,
                        movie::Column::Overview,
                        movie::Column::PosterPath,
                        movie::Column::BackdropPath,
                        movie::Column::ReleaseDate,
                        movie::Column::VoteAverage,
                        movie::Column::VoteCount,
                        movie::Column::Popularity,
                        movie::Column::Adult,
                        movie::Column::Video,
                        movie::Column::GenreIds,
                        movie::Column::CachedAt,
                    ])
                    .to_owned(),
            )
            .exec(conn)
            .await?;
    }

    Ok(())
}

fn join_genre_ids(ids: &[i32]) -> String {
    ids.iter().map(i32::to_string).collect::<Vec<_>>().join(",")
}

fn split_genre_ids(s: &str) -> Vec<i32> {
    s.split(',').filter_map(|id| id.trim().parse().ok()).collect()
}

impl From<movie::Model> for Movie {
    fn from(row: movie::Model) -> Self {
        Movie {
            id: row.id,
            genre_ids: split_genre_ids(&row.genre_ids),
            category: row.category.parse().ok(),
            title: row.title,
            original_title: row.original_title,
            original_language: row.original_language,
            overview: row.overview,
            poster_path: row.poster_path,
            backdrop_path: row.backdrop_path,
            release_date: row.release_date,
            vote_average: row.vote_average,
            vote_count: row.vote_count,
            popularity: row.popularity,
            adult: row.adult,
            video: row.video,
            cached_at: row.cached_at,
        }
    }
}

impl From<movie_detail::Model> for MovieDetail {
    fn from(row: movie_detail::Model) -> Self {
        let genres = serde_json::from_str::<Vec<Genre>>(&row.genres).unwrap_or_else(|err| {
            warn!(movie_id = row.id, error = %err, "unreadable cached genres");
            Vec::new()
        });
        MovieDetail {
            id: row.id,
            title: row.title,
            original_title: row.original_title,
            original_language: row.original_language,
            overview: row.overview,
            poster_path: row.poster_path,
            backdrop_path: row.backdrop_path,
            release_date: row.release_date,
            vote_average: row.vote_average,
            vote_count: row.vote_count,
            popularity: row.popularity,
            adult: row.adult,
            video: row.video,
            genres,
            runtime: row.runtime,
            revenue: row.revenue,
            budget: row.budget,
            status: row.status,
            tagline: row.tagline,
            homepage: row.homepage,
            imdb_id: row.imdb_id,
            cached_at: row.cached_at,
        }
    }
}

impl From<movie_review::Model> for MovieReview {
    fn from(row: movie_review::Model) -> Self {
        MovieReview {
            id: row.id,
            movie_id: row.movie_id,
            author: row.author,
            author_username: row.author_username,
            author_avatar_path: row.author_avatar_path,
            author_rating: row.author_rating,
            content: row.content,
            created_at: row.created_at,
            updated_at: row.updated_at,
            url: row.url,
            cached_at: row.cached_at,
        }
    }
}

pub(crate) fn now_sec() -> i64 {
    jiff::Timestamp::now().as_second()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db;

    pub(crate) async fn memory_cache() -> CacheStore {
        let db = db::connect_and_migrate("sqlite::memory:").await.unwrap();
        CacheStore::new(db, 7)
    }

    pub(crate) fn movie(id: i32, title: &str, popularity: f64) -> Movie {
        Movie {
            id,
            title: title.to_string(),
            original_title: title.to_string(),
            original_language: "en".to_string(),
            overview: format!("{title} overview"),
            poster_path: Some(format!("/{id}.jpg")),
            backdrop_path: None,
            release_date: "2024-05-01".to_string(),
            vote_average: 7.0,
            vote_count: 100,
            popularity,
            adult: false,
            video: false,
            genre_ids: vec![28, 12],
            category: None,
            cached_at: 0,
        }
    }

    pub(crate) fn detail(id: i32, title: &str) -> MovieDetail {
        MovieDetail {
            id,
            title: title.to_string(),
            original_title: title.to_string(),
            original_language: "en".to_string(),
            overview: String::new(),
            poster_path: None,
            backdrop_path: None,
            release_date: "2023-11-02".to_string(),
            vote_average: 6.5,
            vote_count: 10,
            popularity: 1.0,
            adult: false,
            video: false,
            genres: vec![Genre { id: 18, name: "Drama".to_string() }],
            runtime: Some(120),
            revenue: 0,
            budget: 0,
            status: "Released".to_string(),
            tagline: None,
            homepage: None,
            imdb_id: None,
            cached_at: 0,
        }
    }

    pub(crate) fn review(id: &str, movie_id: i32, created_at: &str) -> MovieReview {
        MovieReview {
            id: id.to_string(),
            movie_id,
            author: "critic".to_string(),
            author_username: "critic".to_string(),
            author_avatar_path: None,
            author_rating: Some(8.0),
            content: format!("review {id}"),
            created_at: created_at.to_string(),
            updated_at: created_at.to_string(),
            url: format!("https://example.com/{id}"),
            cached_at: 0,
        }
    }

    #[tokio::test]
    async fn replace_category_drops_previous_rows() {
        let cache = memory_cache().await;

        cache
            .replace_category(Category::Popular, &[movie(1, "A", 10.0), movie(2, "B", 20.0)])
            .await
            .unwrap();
        cache.replace_category(Category::Popular, &[movie(3, "C", 5.0)]).await.unwrap();

        let cached = cache.movies_by_category(Category::Popular).await.unwrap();
        assert_eq!(cached.iter().map(|m| m.id).collect::<Vec<_>>(), vec![3]);
        assert_eq!(cached[0].category, Some(Category::Popular));
        assert_eq!(cached[0].genre_ids, vec![28, 12]);
    }

    #[tokio::test]
    async fn categories_do_not_steal_each_others_rows() {
        let cache = memory_cache().await;

        cache.replace_category(Category::Popular, &[movie(1, "A", 10.0)]).await.unwrap();
        cache
            .replace_category(Category::TopRated, &[movie(1, "A", 10.0), movie(2, "B", 3.0)])
            .await
            .unwrap();
        cache.replace_category(Category::TopRated, &[]).await.unwrap();

        let popular = cache.movies_by_category(Category::Popular).await.unwrap();
        assert_eq!(popular.len(), 1);
        assert!(cache.movies_by_category(Category::TopRated).await.unwrap().is_empty());
        assert_eq!(cache.movies_by_ids(&[1, 2]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn listing_is_ordered_by_popularity() {
        let cache = memory_cache().await;
        cache
            .upsert_movies(
                Category::Upcoming,
                &[movie(1, "Low", 1.0), movie(2, "High", 99.0), movie(3, "Mid", 50.0)],
            )
            .await
            .unwrap();

        let ids: Vec<_> = cache
            .movies_by_category(Category::Upcoming)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn search_cached_matches_titles() {
        let cache = memory_cache().await;
        cache
            .upsert_movies(Category::Popular, &[movie(1, "Dune", 1.0), movie(2, "Alien", 2.0)])
            .await
            .unwrap();
        cache.upsert_movies(Category::TopRated, &[movie(1, "Dune", 1.0)]).await.unwrap();

        let found = cache.search_cached("dun").await.unwrap();
        assert_eq!(found.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1]);
        assert!(cache.search_cached("  ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn detail_upsert_overwrites_and_keeps_genres() {
        let cache = memory_cache().await;
        cache.upsert_detail(&detail(7, "Old")).await.unwrap();
        cache.upsert_detail(&detail(7, "New")).await.unwrap();

        let cached = cache.detail_by_id(7).await.unwrap().unwrap();
        assert_eq!(cached.title, "New");
        assert_eq!(cached.genres, vec![Genre { id: 18, name: "Drama".to_string() }]);
        assert!(cache.is_fresh(cached.cached_at));

        cache.delete_detail(7).await.unwrap();
        assert!(cache.detail_by_id(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn replace_reviews_is_wholesale_per_movie() {
        let cache = memory_cache().await;
        cache
            .replace_reviews(
                1,
                &[review("a", 1, "2024-01-01T00:00:00Z"), review("b", 1, "2024-02-01T00:00:00Z")],
            )
            .await
            .unwrap();
        cache.replace_reviews(2, &[review("c", 2, "2024-01-01T00:00:00Z")]).await.unwrap();
        cache.replace_reviews(1, &[review("d", 1, "2024-03-01T00:00:00Z")]).await.unwrap();

        let ids: Vec<_> =
            cache.reviews_by_movie(1).await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["d"]);
        assert_eq!(cache.reviews_by_movie(2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn observe_category_reemits_after_writes() {
        let cache = memory_cache().await;
        let mut stream = cache.observe_category(Category::NowPlaying);

        assert!(stream.next().await.unwrap().unwrap().is_empty());

        cache.replace_category(Category::NowPlaying, &[movie(5, "E", 1.0)]).await.unwrap();
        let after = stream.next().await.unwrap().unwrap();
        assert_eq!(after.iter().map(|m| m.id).collect::<Vec<_>>(), vec![5]);
    }
}
