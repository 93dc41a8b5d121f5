use color_eyre::{eyre::WrapErr, Result};
use dotenv::dotenv;
use std::env;

/// Runtime configuration, read from the environment (a local `.env` file
/// is honored).
#[derive(Debug)]
pub struct Config {
    /// Directory the record store lives in.
    pub store_url: String,
    /// Minimum gap between two page fetches.
    pub request_interval_ms: u64,
    /// Extra wait after each fetch.
    pub pageload_delay_ms: u64,
    /// Per-request timeout handed to the fetcher.
    pub request_timeout_ms: u64,
    pub user_agent: String,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        dotenv().ok();
        Ok(Config {
            store_url: env::var("STORE_URL").unwrap_or_else(|_| "./sitemaps".to_string()),
            request_interval_ms: env_millis("REQUEST_INTERVAL_MS", 2000)?,
            pageload_delay_ms: env_millis("PAGELOAD_DELAY_MS", 0)?,
            request_timeout_ms: env_millis("REQUEST_TIMEOUT_MS", 30_000)?,
            user_agent: env::var("USER_AGENT")
                .unwrap_or_else(|_| format!("sitescrape/{}", env!("CARGO_PKG_VERSION"))),
        })
    }
}

fn env_millis(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse()
            .wrap_err_with(|| format!("{} must be a number of milliseconds, got {:?}", name, raw)),
    }
}
