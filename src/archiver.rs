use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use scraper::Html;
use tracing::{debug, info};

use crate::config::Settings;
use crate::db::DocumentSink;
use crate::error::{ArchiveError, Report, Warning};
use crate::fetch::PageFetcher;
use crate::images::{ImagePass, ImageSink};
use crate::llm::{auto_tags, StructuringService};
use crate::parser::blocks::ContentBlock;
use crate::parser::classify::NodeClassifier;
use crate::parser::consolidate::consolidate_unique;
use crate::parser::dedup::DedupCache;
use crate::parser::markup::MarkupNode;
use crate::parser::properties::{
    self, format_archive_time, sanitize_tags, ArchiveResult, DocumentProperties, SourceKind,
};
use crate::parser::segments::{collect_segments, SegmentBatcher};
use crate::parser::walker::TreeWalker;

pub const WECHAT_URL_PATTERN: &str = r"^https://mp\.weixin\.qq\.com/s/.*$";

static WECHAT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(WECHAT_URL_PATTERN).unwrap());

const WECHAT_ROOT: &str = "div#img-content.rich_media_wrp";
const WECHAT_CONTENT: &str = "#js_content";

/// Turns one page's markup into an archive result.
#[async_trait]
pub trait SourceArchiver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn build(
        &self,
        url: &str,
        html: &str,
        notes: Option<&str>,
        report: &mut Report,
    ) -> Result<ArchiveResult, ArchiveError>;
}

fn document_properties(
    url: &str,
    notes: Option<&str>,
    title: String,
    source: SourceKind,
    tags: Vec<String>,
    published: Option<String>,
    settings: &Settings,
) -> DocumentProperties {
    DocumentProperties {
        url: url.to_string(),
        notes: notes.unwrap_or_default().to_string(),
        title,
        source,
        datetime: format_archive_time(Utc::now(), settings.utc_offset_hours),
        tags,
        published,
    }
}

// ── WeChat articles ──

/// Everything the article path needs from the parsed page.
#[derive(Debug)]
pub struct ArticlePage {
    pub title: String,
    pub author: Option<String>,
    pub published: Option<String>,
    pub page_tags: Vec<String>,
    pub blocks: Vec<ContentBlock>,
}

/// Walk a WeChat article: section-first, then top level, then consolidate.
pub fn extract_article(
    html: &str,
    settings: &Settings,
    report: &mut Report,
) -> Result<ArticlePage, ArchiveError> {
    let doc = Html::parse_document(html);
    let page = doc.root_element();
    let root = page
        .select_one(WECHAT_ROOT)
        .ok_or_else(|| ArchiveError::Structural {
            selector: WECHAT_ROOT.to_string(),
        })?;
    let content = root
        .select_one(WECHAT_CONTENT)
        .ok_or_else(|| ArchiveError::Structural {
            selector: WECHAT_CONTENT.to_string(),
        })?;

    let classifier = NodeClassifier::new(settings.video_span_precedence);
    let mut cache = DedupCache::new();
    let blocks = TreeWalker::new(&classifier).walk(&content, &mut cache, report);
    let blocks = consolidate_unique(blocks, settings.merge_cap);

    let published = properties::publish_time(&root);
    if published.is_none() {
        debug!("no publish time on page");
    }
    Ok(ArticlePage {
        title: properties::article_title(&root),
        author: properties::author(&root),
        published,
        page_tags: properties::page_tags(&root),
        blocks,
    })
}

pub struct WechatArchiver {
    service: Arc<dyn StructuringService>,
    settings: Settings,
}

impl WechatArchiver {
    pub fn new(service: Arc<dyn StructuringService>, settings: Settings) -> Self {
        Self { service, settings }
    }
}

#[async_trait]
impl SourceArchiver for WechatArchiver {
    fn name(&self) -> &'static str {
        "WechatArticleArchiver"
    }

    async fn build(
        &self,
        url: &str,
        html: &str,
        notes: Option<&str>,
        report: &mut Report,
    ) -> Result<ArchiveResult, ArchiveError> {
        let page = extract_article(html, &self.settings, report)?;
        info!("Extracted {} blocks from article \"{}\"", page.blocks.len(), page.title);

        let generated = auto_tags(
            self.service.as_ref(),
            &page.blocks,
            true,
            self.settings.tagging_max_tokens,
            report,
        )
        .await?;
        let tags = sanitize_tags(
            page.page_tags
                .into_iter()
                .chain(page.author)
                .chain(generated),
        );

        Ok(ArchiveResult {
            properties: document_properties(
                url,
                notes,
                page.title,
                SourceKind::Wechat,
                tags,
                page.published,
                &self.settings,
            ),
            children: page.blocks,
        })
    }
}

// ── Generic web pages ──

/// Title and batch payloads of a generic page.
#[derive(Debug)]
pub struct WebPage {
    pub title: String,
    pub payloads: Vec<String>,
}

pub fn prepare_web_page(html: &str, batcher: &SegmentBatcher) -> Result<WebPage, ArchiveError> {
    let doc = Html::parse_document(html);
    let page = doc.root_element();
    let body = page.select_one("body").ok_or_else(|| ArchiveError::Structural {
        selector: "body".to_string(),
    })?;
    let segments = collect_segments(&body);
    debug!(segments = segments.len(), "collected top-level segments");
    Ok(WebPage {
        title: properties::page_title(&page),
        payloads: batcher.payloads(&segments),
    })
}

pub struct WebPageArchiver {
    service: Arc<dyn StructuringService>,
    settings: Settings,
}

impl WebPageArchiver {
    pub fn new(service: Arc<dyn StructuringService>, settings: Settings) -> Self {
        Self { service, settings }
    }

    fn batcher(&self) -> SegmentBatcher {
        SegmentBatcher {
            batch_size: self.settings.batch_size,
            char_budget: self.settings.batch_char_budget,
            max_output_tokens: self.settings.max_output_tokens,
            merge_cap: self.settings.merge_cap,
        }
    }
}

#[async_trait]
impl SourceArchiver for WebPageArchiver {
    fn name(&self) -> &'static str {
        "WebPageArchiver"
    }

    async fn build(
        &self,
        url: &str,
        html: &str,
        notes: Option<&str>,
        report: &mut Report,
    ) -> Result<ArchiveResult, ArchiveError> {
        let batcher = self.batcher();
        let page = prepare_web_page(html, &batcher)?;
        info!("Structuring {} batches for \"{}\"", page.payloads.len(), page.title);

        let blocks = batcher
            .structure(self.service.as_ref(), page.payloads, report)
            .await?;
        let generated = auto_tags(
            self.service.as_ref(),
            &blocks,
            false,
            self.settings.tagging_max_tokens,
            report,
        )
        .await?;

        Ok(ArchiveResult {
            properties: document_properties(
                url,
                notes,
                page.title,
                SourceKind::WebPage,
                sanitize_tags(generated),
                None,
                &self.settings,
            ),
            children: blocks,
        })
    }
}

// ── Routing ──

#[derive(Debug)]
pub struct ArchiveOutcome {
    /// Document ID from the sink; `None` when nothing was stored.
    pub id: Option<String>,
    pub result: ArchiveResult,
    pub warnings: Vec<Warning>,
}

pub struct ArchiverOrchestrator {
    routes: Vec<(Regex, Box<dyn SourceArchiver>)>,
    fallback: Box<dyn SourceArchiver>,
    fetcher: Arc<dyn PageFetcher>,
    sink: Arc<dyn DocumentSink>,
    images: Option<(Arc<dyn ImageSink>, ImagePass)>,
}

impl ArchiverOrchestrator {
    pub fn new(
        settings: &Settings,
        service: Arc<dyn StructuringService>,
        fetcher: Arc<dyn PageFetcher>,
        sink: Arc<dyn DocumentSink>,
    ) -> Self {
        let wechat: Box<dyn SourceArchiver> =
            Box::new(WechatArchiver::new(Arc::clone(&service), settings.clone()));
        Self {
            routes: vec![(WECHAT_RE.clone(), wechat)],
            fallback: Box::new(WebPageArchiver::new(service, settings.clone())),
            fetcher,
            sink,
            images: None,
        }
    }

    /// Re-host image blocks through `sink` before storing.
    pub fn with_image_sink(mut self, sink: Arc<dyn ImageSink>, settings: &Settings) -> Self {
        let pass = ImagePass {
            batch_size: settings.image_batch_size,
            pause: Duration::from_secs(settings.image_batch_pause_secs),
        };
        self.images = Some((sink, pass));
        self
    }

    pub fn route(&self, url: &str) -> &dyn SourceArchiver {
        self.routes
            .iter()
            .find(|(re, _)| re.is_match(url))
            .map(|(_, archiver)| archiver.as_ref())
            .unwrap_or(self.fallback.as_ref())
    }

    /// Build a result from markup already in hand. Nothing is stored.
    pub async fn extract(
        &self,
        url: &str,
        html: &str,
        notes: Option<&str>,
    ) -> Result<ArchiveOutcome, ArchiveError> {
        let mut report = Report::new();
        let archiver = self.route(url);
        info!("Archiving {} with {}", url, archiver.name());

        let mut result = archiver.build(url, html, notes, &mut report).await?;
        if let Some((sink, pass)) = &self.images {
            result.children = pass
                .run(sink.as_ref(), result.children, &mut report)
                .await;
        }
        Ok(ArchiveOutcome {
            id: None,
            result,
            warnings: report.into_warnings(),
        })
    }

    /// Check the URL answers, fetch it, build the result and store it.
    pub async fn archive(
        &self,
        url: &str,
        notes: Option<&str>,
        dry_run: bool,
    ) -> Result<ArchiveOutcome, ArchiveError> {
        if !self.fetcher.exists(url).await {
            return Err(ArchiveError::Unreachable(url.to_string()));
        }
        let html = self.fetcher.fetch(url).await?;
        let mut outcome = self.extract(url, &html, notes).await?;
        if !dry_run {
            outcome.id = Some(self.sink.store(&outcome.result).await?);
        }
        Ok(outcome)
    }
}
