use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use super::blocks::ContentBlock;
use super::markup::MarkupNode;

pub const UNTITLED: &str = "Untitled";
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    #[serde(rename = "微信")]
    Wechat,
    #[serde(rename = "网页")]
    WebPage,
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Wechat => "微信",
            SourceKind::WebPage => "网页",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentProperties {
    pub url: String,
    pub notes: String,
    pub title: String,
    #[serde(rename = "type")]
    pub source: SourceKind,
    pub datetime: String,
    pub tags: Vec<String>,
    /// Publish time as printed on the page, when it shows one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveResult {
    pub properties: DocumentProperties,
    pub children: Vec<ContentBlock>,
}

// ── Title ──

/// Article pages: the first `h1`.
pub fn article_title<N: MarkupNode>(root: &N) -> String {
    root.select_one("h1")
        .map(|h| h.text())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string())
}

/// Generic pages: `<title>`, then Open Graph, then Twitter card metadata.
pub fn page_title<N: MarkupNode>(root: &N) -> String {
    if let Some(title) = root
        .select_one("head > title")
        .map(|t| t.text())
        .filter(|t| !t.is_empty())
    {
        return title;
    }
    const META: &[&str] = &[
        "meta[property='og:title']",
        "meta[property='twitter:title']",
        "meta[name='twitter:title']",
    ];
    META.iter()
        .filter_map(|css| root.select_one(css))
        .filter_map(|m| m.attr("content").map(|c| c.trim().to_string()))
        .find(|c| !c.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string())
}

// ── Article metadata ──

fn first_text<N: MarkupNode>(root: &N, css: &str) -> Option<String> {
    root.select_one(css).map(|n| n.text()).filter(|t| !t.is_empty())
}

pub fn author<N: MarkupNode>(root: &N) -> Option<String> {
    first_text(root, ".rich_media_meta.rich_media_meta_text")
}

pub fn publish_time<N: MarkupNode>(root: &N) -> Option<String> {
    first_text(root, ".detail-time")
}

pub fn page_tags<N: MarkupNode>(root: &N) -> Vec<String> {
    root.select(".article-tag__item")
        .iter()
        .map(|t| t.text())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Strip `#`, trim, drop entries shorter than two characters and repeats.
pub fn sanitize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let clean = tag.as_ref().replace('#', "").trim().to_string();
        if clean.chars().count() > 1 && !out.contains(&clean) {
            out.push(clean);
        }
    }
    out
}

/// `%Y-%m-%d %H:%M:%S` at a fixed offset from UTC.
pub fn format_archive_time(at: DateTime<Utc>, utc_offset_hours: i32) -> String {
    let offset = FixedOffset::east_opt(utc_offset_hours.clamp(-23, 23) * 3600).unwrap_or(Utc.fix());
    at.with_timezone(&offset).format(TIME_FORMAT).to_string()
}
