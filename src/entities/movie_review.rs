use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "movie_reviews")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub movie_id: i32,
    pub author: String,
    pub author_username: String,
    pub author_avatar_path: Option<String>,
    pub author_rating: Option<f64>,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
    pub url: String,
    pub cached_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
