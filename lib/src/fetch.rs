use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use color_eyre::{eyre::WrapErr, Result};
use reqwest::Client;
use tracing::debug;

use crate::error::FetchError;

/// The engine's only window onto the network: bytes for a URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get(&self, url: &str) -> Result<Bytes, FetchError>;
}

/// Production fetcher backed by a reqwest `Client` with a fixed user agent
/// and per-request timeout.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<HttpFetcher> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .wrap_err("failed to build the http client")?;
        Ok(HttpFetcher { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<Bytes, FetchError> {
        debug!("requesting page at {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.bytes().await.map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })
    }
}

/// Canned responses keyed by URL. Lets tests and offline runs drive the
/// whole scrape loop without a network.
#[derive(Default)]
pub struct MemoryFetcher {
    pages: HashMap<String, Bytes>,
}

impl MemoryFetcher {
    pub fn new() -> MemoryFetcher {
        MemoryFetcher::default()
    }

    pub fn insert(&mut self, url: &str, body: &str) {
        self.pages
            .insert(url.to_string(), Bytes::from(body.to_string()));
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn get(&self, url: &str) -> Result<Bytes, FetchError> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(url.to_string()))
    }
}
