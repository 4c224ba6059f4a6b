pub mod movie;
pub mod movie_detail;
pub mod movie_review;
pub mod user;
