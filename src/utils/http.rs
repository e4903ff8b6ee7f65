// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::Result;
use crate::models::CrawlerConfig;

/// A fetched page before any interpretation.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: StatusCode,
    /// URL after redirects
    pub final_url: String,
    pub body: String,
}

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &CrawlerConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Fetch a page, keeping status and final URL for classification.
///
/// Non-2xx statuses are returned, not turned into errors.
pub async fn fetch_page_async(client: &reqwest::Client, url: &str) -> Result<FetchedPage> {
    let response = client.get(url).send().await?;
    let status = response.status();
    let final_url = response.url().to_string();
    let body = response.text().await?;
    Ok(FetchedPage {
        status,
        final_url,
        body,
    })
}

/// Anything that turns a URL into a [`FetchedPage`].
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

#[async_trait]
impl PageFetcher for reqwest::Client {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        fetch_page_async(self, url).await
    }
}
