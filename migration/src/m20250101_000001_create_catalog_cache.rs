use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Movies::Table)
                    .if_not_exists()
                    .col(integer(Movies::Id))
                    .col(string(Movies::Category))
                    .col(string(Movies::Title))
                    .col(string(Movies::OriginalTitle))
                    .col(string(Movies::OriginalLanguage))
                    .col(text(Movies::Overview))
                    .col(string_null(Movies::PosterPath))
                    .col(string_null(Movies::BackdropPath))
                    .col(string(Movies::ReleaseDate))
                    .col(double(Movies::VoteAverage))
                    .col(integer(Movies::VoteCount))
                    .col(double(Movies::Popularity))
                    .col(boolean(Movies::Adult))
                    .col(boolean(Movies::Video))
                    .col(string(Movies::GenreIds))
                    .col(big_integer(Movies::CachedAt))
                    .primary_key(Index::create().col(Movies::Id).col(Movies::Category))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_movies_category_popularity")
                    .table(Movies::Table)
                    .col(Movies::Category)
                    .col(Movies::Popularity)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MovieDetails::Table)
                    .if_not_exists()
                    .col(integer(MovieDetails::Id).primary_key())
                    .col(string(MovieDetails::Title))
                    .col(string(MovieDetails::OriginalTitle))
                    .col(string(MovieDetails::OriginalLanguage))
                    .col(text(MovieDetails::Overview))
                    .col(string_null(MovieDetails::PosterPath))
                    .col(string_null(MovieDetails::BackdropPath))
                    .col(string(MovieDetails::ReleaseDate))
                    .col(double(MovieDetails::VoteAverage))
                    .col(integer(MovieDetails::VoteCount))
                    .col(double(MovieDetails::Popularity))
                    .col(boolean(MovieDetails::Adult))
                    .col(boolean(MovieDetails::Video))
                    .col(text(MovieDetails::Genres))
                    .col(integer_null(MovieDetails::Runtime))
                    .col(big_integer(MovieDetails::Revenue))
                    .col(big_integer(MovieDetails::Budget))
                    .col(string(MovieDetails::Status))
                    .col(string_null(MovieDetails::Tagline))
                    .col(string_null(MovieDetails::Homepage))
                    .col(string_null(MovieDetails::ImdbId))
                    .col(big_integer(MovieDetails::CachedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MovieReviews::Table)
                    .if_not_exists()
                    .col(string(MovieReviews::Id).primary_key())
                    .col(integer(MovieReviews::MovieId))
                    .col(string(MovieReviews::Author))
                    .col(string(MovieReviews::AuthorUsername))
                    .col(string_null(MovieReviews::AuthorAvatarPath))
                    .col(double_null(MovieReviews::AuthorRating))
                    .col(text(MovieReviews::Content))
                    .col(string(MovieReviews::CreatedAt))
                    .col(string(MovieReviews::UpdatedAt))
                    .col(string(MovieReviews::Url))
                    .col(big_integer(MovieReviews::CachedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_movie_reviews_movie_id")
                    .table(MovieReviews::Table)
                    .col(MovieReviews::MovieId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(MovieReviews::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(MovieDetails::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(Movies::Table).to_owned()).await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Movies {
    Table,
    Id,
    Category,
    Title,
    OriginalTitle,
    OriginalLanguage,
    Overview,
    PosterPath,
    BackdropPath,
    ReleaseDate,
    VoteAverage,
    VoteCount,
    Popularity,
    Adult,
    Video,
    GenreIds,
    CachedAt,
}

#[derive(DeriveIden)]
enum MovieDetails {
    Table,
    Id,
    Title,
    OriginalTitle,
    OriginalLanguage,
    Overview,
    PosterPath,
    BackdropPath,
    ReleaseDate,
    VoteAverage,
    VoteCount,
    Popularity,
    Adult,
    Video,
    Genres,
    Runtime,
    Revenue,
    Budget,
    Status,
    Tagline,
    Homepage,
    ImdbId,
    CachedAt,
}

#[derive(DeriveIden)]
enum MovieReviews {
    Table,
    Id,
    MovieId,
    Author,
    AuthorUsername,
    AuthorAvatarPath,
    AuthorRating,
    Content,
    CreatedAt,
    UpdatedAt,
    Url,
    CachedAt,
}
