use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::parser::blocks::DEFAULT_MERGE_CAP;
use crate::retry::{RetryPolicy, DEFAULT_ATTEMPTS, DEFAULT_BACKOFF_MS};

pub const CONFIG_FILE: &str = "wenling.toml";
pub const ENV_PREFIX: &str = "WENLING";

/// Runtime settings. Every field has a default, so an empty environment works.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: String,

    // ── Extraction ──
    pub merge_cap: usize,
    pub batch_size: usize,
    pub batch_char_budget: usize,
    pub video_span_precedence: bool,

    // ── Structuring service ──
    pub model: String,
    pub openai_base_url: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub tagging_max_tokens: u32,

    // ── Network ──
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub request_timeout_secs: u64,

    // ── Images ──
    pub rehost_images: bool,
    pub image_batch_size: usize,
    pub image_batch_pause_secs: u64,

    /// Fixed UTC offset for archive timestamps.
    pub utc_offset_hours: i32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: "data/wenling.sqlite".to_string(),
            merge_cap: DEFAULT_MERGE_CAP,
            batch_size: 20,
            batch_char_budget: 8192,
            video_span_precedence: false,
            model: "gpt-3.5-turbo-1106".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            temperature: 0.0,
            max_output_tokens: 8192,
            tagging_max_tokens: 256,
            retry_attempts: DEFAULT_ATTEMPTS,
            retry_backoff_ms: DEFAULT_BACKOFF_MS,
            request_timeout_secs: 30,
            rehost_images: false,
            image_batch_size: 5,
            image_batch_pause_secs: 60,
            utc_offset_hours: -8,
        }
    }
}

impl Settings {
    /// `wenling.toml` in the working directory (if present), then `WENLING_*`
    /// environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read configuration")?;
        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, self.retry_backoff_ms)
    }
}
