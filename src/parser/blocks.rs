use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default consolidation cap in characters.
pub const DEFAULT_MERGE_CAP: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Heading1,
    Heading2,
    Heading3,
    Text,
    Quote,
    Code,
    Image,
    Video,
    ListItem,
    /// Fallback kind named after the source node's tag.
    Other(String),
}

impl BlockKind {
    pub fn as_str(&self) -> &str {
        match self {
            BlockKind::Heading1 => "h1",
            BlockKind::Heading2 => "h2",
            BlockKind::Heading3 => "h3",
            BlockKind::Text => "text",
            BlockKind::Quote => "quote",
            BlockKind::Code => "code",
            BlockKind::Image => "image",
            BlockKind::Video => "video",
            BlockKind::ListItem => "numbered_list_item",
            BlockKind::Other(tag) => tag,
        }
    }

    /// Parse a kind name, accepting the aliases the structuring service and
    /// stored documents use.
    pub fn parse(name: &str) -> BlockKind {
        match name.trim().to_ascii_lowercase().as_str() {
            "h1" | "heading_1" => BlockKind::Heading1,
            "h2" | "heading_2" => BlockKind::Heading2,
            "h3" | "heading_3" => BlockKind::Heading3,
            "text" | "span" | "paragraph" => BlockKind::Text,
            "quote" => BlockKind::Quote,
            "code" => BlockKind::Code,
            "image" | "img" => BlockKind::Image,
            "video" => BlockKind::Video,
            "numbered_list_item" | "list_item" => BlockKind::ListItem,
            other => BlockKind::Other(other.to_string()),
        }
    }

    pub fn carries_url(&self) -> bool {
        matches!(self, BlockKind::Image | BlockKind::Video)
    }

    /// Only text and code blocks take part in consolidation.
    pub fn is_mergeable(&self) -> bool {
        matches!(self, BlockKind::Text | BlockKind::Code)
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockBody {
    Text(String),
    Url(String),
}

/// One typed unit of archived content. Text-bearing kinds carry `text`,
/// image and video carry `url`, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RawBlock", try_from = "RawBlock")]
pub struct ContentBlock {
    kind: BlockKind,
    body: BlockBody,
}

impl ContentBlock {
    pub fn new(kind: BlockKind, value: impl Into<String>) -> Self {
        let value = value.into();
        let body = if kind.carries_url() {
            BlockBody::Url(value)
        } else {
            BlockBody::Text(value)
        };
        Self { kind, body }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(BlockKind::Text, text)
    }

    pub fn heading2(text: impl Into<String>) -> Self {
        Self::new(BlockKind::Heading2, text)
    }

    pub fn quote(text: impl Into<String>) -> Self {
        Self::new(BlockKind::Quote, text)
    }

    pub fn code(text: impl Into<String>) -> Self {
        Self::new(BlockKind::Code, text)
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self::new(BlockKind::Image, url)
    }

    pub fn video(url: impl Into<String>) -> Self {
        Self::new(BlockKind::Video, url)
    }

    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    pub fn body(&self) -> &BlockBody {
        &self.body
    }

    pub fn text_value(&self) -> Option<&str> {
        match &self.body {
            BlockBody::Text(t) => Some(t),
            BlockBody::Url(_) => None,
        }
    }

    pub fn url_value(&self) -> Option<&str> {
        match &self.body {
            BlockBody::Url(u) => Some(u),
            BlockBody::Text(_) => None,
        }
    }

    /// The raw string used for dedup: the text or the URL.
    pub fn raw(&self) -> &str {
        match &self.body {
            BlockBody::Text(t) | BlockBody::Url(t) => t,
        }
    }

    /// Copy of this block pointing at a different URL. Text blocks are
    /// returned unchanged.
    pub fn with_url(&self, url: impl Into<String>) -> Self {
        match self.body {
            BlockBody::Url(_) => Self {
                kind: self.kind.clone(),
                body: BlockBody::Url(url.into()),
            },
            BlockBody::Text(_) => self.clone(),
        }
    }

    /// Both blocks are text, or both code, and the joined text
    /// (including the `\n` separator) stays under `cap` characters.
    pub fn can_merge(&self, next: &ContentBlock, cap: usize) -> bool {
        if self.kind != next.kind || !self.kind.is_mergeable() {
            return false;
        }
        match (&self.body, &next.body) {
            (BlockBody::Text(a), BlockBody::Text(b)) => {
                a.chars().count() + 1 + b.chars().count() < cap
            }
            _ => false,
        }
    }

    /// New block with both texts joined by a newline. Caller checks
    /// `can_merge` first.
    pub fn merged(&self, next: &ContentBlock) -> ContentBlock {
        let joined = format!("{}\n{}", self.raw(), next.raw());
        ContentBlock::new(self.kind.clone(), joined)
    }

    /// Build a block from one entry of a structuring-service reply.
    /// Returns `None` when the entry has no type or lacks the field its kind needs.
    pub fn from_json(value: &Value) -> Option<ContentBlock> {
        let raw: RawBlock = serde_json::from_value(value.clone()).ok()?;
        ContentBlock::try_from(raw).ok()
    }
}

// ── Wire shape ──

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

impl From<ContentBlock> for RawBlock {
    fn from(block: ContentBlock) -> Self {
        let kind = block.kind.as_str().to_string();
        match block.body {
            BlockBody::Text(text) => RawBlock {
                kind,
                text: Some(text),
                url: None,
            },
            BlockBody::Url(url) => RawBlock {
                kind,
                text: None,
                url: Some(url),
            },
        }
    }
}

impl TryFrom<RawBlock> for ContentBlock {
    type Error = String;

    fn try_from(raw: RawBlock) -> Result<Self, Self::Error> {
        let kind = BlockKind::parse(&raw.kind);
        let value = if kind.carries_url() {
            raw.url
        } else {
            raw.text
        };
        match value.map(|v| v.trim().to_string()) {
            Some(v) if !v.is_empty() => Ok(ContentBlock::new(kind, v)),
            _ => Err(format!("\"{}\" block without its value", raw.kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn constructor_picks_body_from_kind() {
        assert_eq!(ContentBlock::image("https://a/b.png").url_value(), Some("https://a/b.png"));
        assert_eq!(ContentBlock::image("https://a/b.png").text_value(), None);
        assert_eq!(ContentBlock::quote("hi").text_value(), Some("hi"));
        let other = ContentBlock::new(BlockKind::Other("section".into()), "x");
        assert_eq!(other.kind().as_str(), "section");
        assert_eq!(other.text_value(), Some("x"));
    }

    #[test]
    fn kind_aliases() {
        assert_eq!(BlockKind::parse("heading_1"), BlockKind::Heading1);
        assert_eq!(BlockKind::parse("img"), BlockKind::Image);
        assert_eq!(BlockKind::parse("span"), BlockKind::Text);
        assert_eq!(BlockKind::parse("H2"), BlockKind::Heading2);
        assert_eq!(BlockKind::parse("aside"), BlockKind::Other("aside".into()));
    }

    #[test]
    fn serializes_to_wire_shape() {
        let text = serde_json::to_value(ContentBlock::heading2("Intro")).unwrap();
        assert_eq!(text, json!({"type": "h2", "text": "Intro"}));
        let img = serde_json::to_value(ContentBlock::image("https://x/y.png")).unwrap();
        assert_eq!(img, json!({"type": "image", "url": "https://x/y.png"}));
    }

    #[test]
    fn deserialize_rejects_missing_value() {
        assert!(serde_json::from_value::<ContentBlock>(json!({"type": "image", "text": "nope"})).is_err());
        assert!(serde_json::from_value::<ContentBlock>(json!({"type": "text"})).is_err());
        let ok: ContentBlock = serde_json::from_value(json!({"type": "code", "text": "fn main() {}"})).unwrap();
        assert_eq!(ok.kind(), &BlockKind::Code);
    }

    #[test]
    fn from_json_skips_untyped_entries() {
        assert!(ContentBlock::from_json(&json!({"text": "orphan"})).is_none());
        assert!(ContentBlock::from_json(&json!("just a string")).is_none());
        assert_eq!(
            ContentBlock::from_json(&json!({"type": "video", "url": "https://v"})),
            Some(ContentBlock::video("https://v"))
        );
    }

    #[test]
    fn merge_requires_same_mergeable_kind() {
        let a = ContentBlock::text("a");
        assert!(a.can_merge(&ContentBlock::text("b"), 2000));
        assert!(!a.can_merge(&ContentBlock::code("b"), 2000));
        assert!(!ContentBlock::quote("a").can_merge(&ContentBlock::quote("b"), 2000));
        assert!(!ContentBlock::image("u").can_merge(&ContentBlock::image("v"), 2000));
    }

    #[test]
    fn merge_cap_counts_separator_and_chars() {
        let a = ContentBlock::text("x".repeat(5));
        let b = ContentBlock::text("y".repeat(4));
        // 5 + 1 + 4 = 10
        assert!(!a.can_merge(&b, 10));
        assert!(a.can_merge(&b, 11));

        // multi-byte text is measured in characters
        let zh = ContentBlock::text("中文");
        assert!(zh.can_merge(&ContentBlock::text("字"), 5));
    }

    #[test]
    fn merged_joins_with_newline() {
        let m = ContentBlock::code("let a = 1;").merged(&ContentBlock::code("let b = 2;"));
        assert_eq!(m, ContentBlock::code("let a = 1;\nlet b = 2;"));
    }

    #[test]
    fn with_url_only_touches_url_blocks() {
        assert_eq!(ContentBlock::image("a").with_url("b"), ContentBlock::image("b"));
        assert_eq!(ContentBlock::text("a").with_url("b"), ContentBlock::text("a"));
    }
}
