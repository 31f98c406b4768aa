use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ImageError, Report, Warning};
use crate::parser::blocks::{BlockKind, ContentBlock};
use crate::retry::RetryPolicy;

const IMGUR_UPLOAD_URL: &str = "https://api.imgur.com/3/image";

#[async_trait]
pub trait ImageSink: Send + Sync {
    /// Re-host the image behind `url` and return its new address.
    async fn rehost(&self, url: &str) -> Result<String, ImageError>;
}

/// GitHub file pages serve HTML; the `raw` path serves the bytes.
pub fn normalize_source_url(url: &str) -> String {
    if url.starts_with("https://github.com/") {
        url.replacen("/blob/", "/raw/", 1)
    } else {
        url.to_string()
    }
}

pub struct ImgurUploader {
    client: reqwest::Client,
    client_id: String,
    retry: RetryPolicy,
}

impl ImgurUploader {
    pub fn new(client_id: impl Into<String>, retry: RetryPolicy) -> Result<Self, ImageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ImageError::Config(e.to_string()))?;
        Ok(Self {
            client,
            client_id: client_id.into(),
            retry,
        })
    }

    /// Reads `IMGUR_CLIENT_ID`.
    pub fn from_env(retry: RetryPolicy) -> Result<Self, ImageError> {
        let client_id = std::env::var("IMGUR_CLIENT_ID")
            .map_err(|_| ImageError::Config("IMGUR_CLIENT_ID is not set".into()))?;
        Self::new(client_id, retry)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ImageError::Download(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ImageError::Download(format!("HTTP {} for {}", response.status(), url)));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ImageError::Download(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn upload(&self, bytes: Vec<u8>) -> Result<String, ImageError> {
        let form = Form::new().part("image", Part::bytes(bytes).file_name("image"));
        let response = self
            .client
            .post(IMGUR_UPLOAD_URL)
            .header("Authorization", format!("Client-ID {}", self.client_id))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ImageError::Upload(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ImageError::Upload(format!("HTTP {}", response.status())));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| ImageError::Upload(e.to_string()))?;
        parse_upload_link(&body)
    }
}

#[async_trait]
impl ImageSink for ImgurUploader {
    async fn rehost(&self, url: &str) -> Result<String, ImageError> {
        let source = normalize_source_url(url);
        let source = source.as_str();
        self.retry
            .run("image upload", move || async move {
                let bytes = self.download(source).await?;
                self.upload(bytes).await
            })
            .await
    }
}

pub fn parse_upload_link(body: &Value) -> Result<String, ImageError> {
    body.get("data")
        .and_then(|d| d.get("link"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ImageError::Upload("response without data.link".into()))
}

/// Walks a block list and swaps image URLs for re-hosted ones, pausing
/// after every `batch_size` uploads.
pub struct ImagePass {
    pub batch_size: usize,
    pub pause: Duration,
}

impl ImagePass {
    pub async fn run(
        &self,
        sink: &dyn ImageSink,
        blocks: Vec<ContentBlock>,
        report: &mut Report,
    ) -> Vec<ContentBlock> {
        let mut out = Vec::with_capacity(blocks.len());
        let mut uploaded = 0usize;

        for block in blocks {
            let Some(url) = block.url_value().filter(|_| *block.kind() == BlockKind::Image) else {
                out.push(block);
                continue;
            };
            uploaded += 1;
            if self.batch_size > 0 && uploaded % self.batch_size == 0 && !self.pause.is_zero() {
                info!("Pausing {}s before next image upload", self.pause.as_secs());
                tokio::time::sleep(self.pause).await;
            }
            match sink.rehost(url).await {
                Ok(new_url) => {
                    debug!(from = url, to = %new_url, "image re-hosted");
                    out.push(block.with_url(new_url));
                }
                Err(e) => {
                    report.push(Warning::ImageKept {
                        url: url.to_string(),
                        reason: e.to_string(),
                    });
                    out.push(block);
                }
            }
        }
        out
    }
}
