use std::{path::PathBuf, time::Duration};

#[derive(Clone, Debug)]
pub struct Config {
    pub tmdb_api_key: String,
    pub tmdb_access_token: Option<String>,
    pub tmdb_base_url: String,
    pub database_url: String,
    pub prefs_dir: PathBuf,
    pub cache_ttl_days: i64,
    pub tmdb_rps: u32,
    pub http_timeout: Duration,
    pub search_debounce: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let tmdb_api_key = std::env::var("TMDB_API_KEY").unwrap_or_default();
        let tmdb_access_token =
            std::env::var("TMDB_ACCESS_TOKEN").ok().filter(|s| !s.trim().is_empty());
        let tmdb_base_url = std::env::var("TMDB_BASE_URL")
            .unwrap_or_else(|_| "https://api.themoviedb.org/3".to_string());

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://movieviewer.db?mode=rwc".to_string());

        let prefs_dir = std::env::var("PREFS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".movieviewer"));

        let cache_ttl_days: i64 =
            std::env::var("CACHE_TTL_DAYS").ok().and_then(|s| s.parse().ok()).unwrap_or(7);

        let tmdb_rps: u32 =
            std::env::var("TMDB_RPS").ok().and_then(|s| s.parse().ok()).unwrap_or(4);

        let http_timeout_secs: u64 =
            std::env::var("HTTP_TIMEOUT_SECS").ok().and_then(|s| s.parse().ok()).unwrap_or(30);

        let search_debounce_ms: u64 =
            std::env::var("SEARCH_DEBOUNCE_MS").ok().and_then(|s| s.parse().ok()).unwrap_or(500);

        Ok(Self {
            tmdb_api_key,
            tmdb_access_token,
            tmdb_base_url,
            database_url,
            prefs_dir,
            cache_ttl_days,
            tmdb_rps,
            http_timeout: Duration::from_secs(http_timeout_secs),
            search_debounce: Duration::from_millis(search_debounce_ms),
        })
    }

    pub fn has_credentials(&self) -> bool {
        !self.tmdb_api_key.trim().is_empty() || self.tmdb_access_token.is_some()
    }
}
