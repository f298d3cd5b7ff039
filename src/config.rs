use crate::infrastructure::fetcher::EgressMode;
use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Public base URL used when building tracker links.
    pub api_base_url: String,
    pub root_path: String,
    pub web_url: String,
    /// Egress proxy for outbound fetches; when set, the proxy enforces the
    /// network policy and in-process IP validation is off.
    pub feed_proxy: Option<String>,
    /// Embedding oracle endpoint; personalization degrades gracefully when
    /// absent.
    pub embedding_api_url: Option<String>,
    pub dormant_threshold_days: i64,
    pub article_retention_days: i64,
    pub embedding_retention_days: i64,
    pub inactive_user_days: i64,
    pub feed_refresh_interval_hours: i64,
    pub feed_fetch_batch_size: usize,
    pub feed_max_failures: i64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T::Err: std::error::Error + 'static,
{
    match env::var(key) {
        Ok(raw) => Ok(raw.parse::<T>()?),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://feedlens.db".to_string());
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env_or("PORT", 3000u16)?;

        let api_base_url = env::var("API_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string();
        let root_path = env::var("ROOT_PATH").unwrap_or_else(|_| "/".to_string());
        let web_url = env::var("WEB_URL")
            .unwrap_or_else(|_| api_base_url.clone())
            .trim_end_matches('/')
            .to_string();

        let feed_proxy = env::var("FEED_PROXY").ok().filter(|v| !v.is_empty());
        let embedding_api_url = env::var("EMBEDDING_API_URL").ok().filter(|v| !v.is_empty());

        Ok(Config {
            database_url,
            host,
            port,
            api_base_url,
            root_path,
            web_url,
            feed_proxy,
            embedding_api_url,
            dormant_threshold_days: env_or("DORMANT_THRESHOLD_DAYS", 90)?,
            article_retention_days: env_or("ARTICLE_RETENTION_DAYS", 180)?,
            embedding_retention_days: env_or("EMBEDDING_RETENTION_DAYS", 30)?,
            inactive_user_days: env_or("INACTIVE_USER_DAYS", 365)?,
            feed_refresh_interval_hours: env_or("FEED_REFRESH_INTERVAL_HOURS", 24)?,
            feed_fetch_batch_size: env_or("FEED_FETCH_BATCH_SIZE", 10)?,
            feed_max_failures: env_or("FEED_MAX_FAILURES", 5)?,
        })
    }

    pub fn egress_mode(&self) -> EgressMode {
        match &self.feed_proxy {
            Some(proxy) => EgressMode::Proxy(proxy.clone()),
            None => EgressMode::Direct,
        }
    }

    /// Defaults suitable for tests: in-memory database, no proxy, no
    /// embedding oracle.
    #[doc(hidden)]
    pub fn for_tests() -> Self {
        Config {
            database_url: "sqlite::memory:".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            api_base_url: "http://proxy.test".to_string(),
            root_path: "/".to_string(),
            web_url: "http://proxy.test".to_string(),
            feed_proxy: None,
            embedding_api_url: None,
            dormant_threshold_days: 90,
            article_retention_days: 180,
            embedding_retention_days: 30,
            inactive_user_days: 365,
            feed_refresh_interval_hours: 24,
            feed_fetch_batch_size: 10,
            feed_max_failures: 5,
        }
    }
}
