//! Offline-first movie catalog client: TMDB listings, details, reviews and
//! search mirrored into a local SQLite cache, plus favorites and local
//! accounts.

pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod models;
pub mod network;
pub mod prefs;
pub mod repository;
pub mod screens;
pub mod session;
pub mod tmdb;
pub mod users;

#[cfg(test)]
mod testing;
