use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::error::ArchiveError;
use crate::retry::RetryPolicy;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// True only when a HEAD request answers 200.
    async fn exists(&self, url: &str) -> bool;

    async fn fetch(&self, url: &str) -> Result<String, ArchiveError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64, retry: RetryPolicy) -> Result<Self, ArchiveError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| ArchiveError::Fetch {
                url: String::new(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client, retry })
    }

    async fn get_once(&self, url: &str) -> Result<String, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }
        response.text().await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn exists(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(resp) => {
                debug!(url, status = %resp.status(), "HEAD");
                resp.status() == StatusCode::OK
            }
            Err(e) => {
                warn!("HEAD {} failed: {}", url, e);
                false
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, ArchiveError> {
        self.retry
            .run("page fetch", || self.get_once(url))
            .await
            .map_err(|reason| ArchiveError::Fetch {
                url: url.to_string(),
                reason,
            })
    }
}
