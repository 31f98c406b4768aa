use thiserror::Error;
use tracing::warn;

/// Fatal failures of one archive operation.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("URL is not reachable: {0}")]
    Unreachable(String),

    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("required element missing: {selector}")]
    Structural { selector: String },

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Structuring/tagging service failures that survive retry.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Missing API key, bad client settings
    #[error("service configuration error: {0}")]
    Config(String),

    /// Connection failed, timeout
    #[error("service network error: {0}")]
    Network(String),

    /// Non-2xx response or a reply without choices/message/content
    #[error("service API error: {0}")]
    Api(String),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink connection lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image sink not configured: {0}")]
    Config(String),

    #[error("image download failed: {0}")]
    Download(String),

    #[error("image upload failed: {0}")]
    Upload(String),
}

/// A single node that could not be turned into blocks. The node is skipped.
#[derive(Debug, Error)]
#[error("<{tag}> skipped: {reason}")]
pub struct ClassifyError {
    pub tag: String,
    pub reason: String,
}

impl ClassifyError {
    pub fn new(tag: &str, reason: impl Into<String>) -> Self {
        Self {
            tag: tag.to_string(),
            reason: reason.into(),
        }
    }
}

// ── Non-fatal warnings ──

#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    NodeSkipped { tag: String, reason: String },
    BatchDiscarded { batch: usize, reason: String },
    EntryDiscarded { batch: usize, reason: String },
    TagsDiscarded { reason: String },
    ImageKept { url: String, reason: String },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::NodeSkipped { tag, reason } => write!(f, "skipped <{}>: {}", tag, reason),
            Warning::BatchDiscarded { batch, reason } => {
                write!(f, "batch {} discarded: {}", batch, reason)
            }
            Warning::EntryDiscarded { batch, reason } => {
                write!(f, "entry in batch {} discarded: {}", batch, reason)
            }
            Warning::TagsDiscarded { reason } => write!(f, "auto tags discarded: {}", reason),
            Warning::ImageKept { url, reason } => {
                write!(f, "kept original image {}: {}", url, reason)
            }
        }
    }
}

/// Collects warnings for one archive run. Every push is also logged.
#[derive(Debug, Default)]
pub struct Report {
    warnings: Vec<Warning>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, warning: Warning) {
        warn!("{}", warning);
        self.warnings.push(warning);
    }

    pub fn skipped(&mut self, err: ClassifyError) {
        self.push(Warning::NodeSkipped {
            tag: err.tag,
            reason: err.reason,
        });
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_collects_in_order() {
        let mut report = Report::new();
        report.skipped(ClassifyError::new("figure", "no <img>"));
        report.push(Warning::BatchDiscarded {
            batch: 1,
            reason: "invalid JSON".into(),
        });
        assert_eq!(report.warnings().len(), 2);
        assert!(matches!(&report.warnings()[0], Warning::NodeSkipped { tag, .. } if tag == "figure"));
        assert_eq!(
            report.warnings()[1].to_string(),
            "batch 1 discarded: invalid JSON"
        );
    }

    #[test]
    fn classify_error_display() {
        let err = ClassifyError::new("p", "image without data-src");
        assert_eq!(err.to_string(), "<p> skipped: image without data-src");
    }
}
