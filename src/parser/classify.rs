use crate::error::ClassifyError;

use super::blocks::{BlockKind, ContentBlock};
use super::dedup::DedupCache;
use super::markup::{Child, MarkupNode};

pub type Handler<N> = fn(&N, &mut DedupCache) -> Result<Vec<ContentBlock>, ClassifyError>;

/// One entry of the dispatch table: the first rule whose tag and guard
/// match a node produces its blocks.
pub struct Rule<N> {
    pub name: &'static str,
    tags: &'static [&'static str],
    guard: fn(&N) -> bool,
    handler: Handler<N>,
}

impl<N: MarkupNode> Rule<N> {
    fn matches(&self, node: &N) -> bool {
        self.tags.contains(&node.tag()) && (self.guard)(node)
    }
}

pub struct NodeClassifier<N> {
    rules: Vec<Rule<N>>,
}

impl<N: MarkupNode> NodeClassifier<N> {
    /// Build the rule table. The generic span rule normally shadows the
    /// video-marker rule; `video_span_precedence` puts the video rule first.
    pub fn new(video_span_precedence: bool) -> Self {
        let mut rules = vec![
            Rule {
                name: "centered-heading",
                tags: &["p"],
                guard: is_centered_with_strong::<N>,
                handler: centered_heading::<N>,
            },
            Rule {
                name: "paragraph-image",
                tags: &["p"],
                guard: has_img::<N>,
                handler: paragraph_image::<N>,
            },
            Rule {
                name: "paragraph",
                tags: &["p"],
                guard: always::<N>,
                handler: paragraph::<N>,
            },
            Rule {
                name: "quote",
                tags: &["blockquote"],
                guard: always::<N>,
                handler: quote::<N>,
            },
            Rule {
                name: "span",
                tags: &["span"],
                guard: always::<N>,
                handler: whole_text::<N>,
            },
            Rule {
                name: "video-span",
                tags: &["span"],
                guard: is_video_marker::<N>,
                handler: video::<N>,
            },
            Rule {
                name: "list",
                tags: &["ul", "ol"],
                guard: always::<N>,
                handler: list_items::<N>,
            },
            Rule {
                name: "emphasis",
                tags: &["em"],
                guard: always::<N>,
                handler: whole_text::<N>,
            },
            Rule {
                name: "figure",
                tags: &["figure"],
                guard: always::<N>,
                handler: figure::<N>,
            },
        ];
        if video_span_precedence {
            if let Some(pos) = rules.iter().position(|r| r.name == "video-span") {
                let video = rules.remove(pos);
                let span = rules.iter().position(|r| r.name == "span").unwrap_or(pos);
                rules.insert(span, video);
            }
        }
        Self { rules }
    }

    /// Blocks for one node, gated through `cache`. Nodes no rule claims go
    /// to the fallback, which names the block after the tag.
    pub fn classify(
        &self,
        node: &N,
        cache: &mut DedupCache,
    ) -> Result<Vec<ContentBlock>, ClassifyError> {
        match self.rules.iter().find(|r| r.matches(node)) {
            Some(rule) => (rule.handler)(node, cache),
            None => fallback(node, cache),
        }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name).collect()
    }
}

impl<N: MarkupNode> Default for NodeClassifier<N> {
    fn default() -> Self {
        Self::new(false)
    }
}

// ── Guards ──

fn always<N>(_: &N) -> bool {
    true
}

fn is_centered_with_strong<N: MarkupNode>(node: &N) -> bool {
    node.attr("style")
        .is_some_and(|s| s.contains("text-align: center;"))
        && node.first_descendant("strong").is_some()
}

fn has_img<N: MarkupNode>(node: &N) -> bool {
    node.first_descendant("img").is_some()
}

fn is_video_marker<N: MarkupNode>(node: &N) -> bool {
    node.attr("data-vw").is_some()
}

// ── Handlers ──

fn emit(out: &mut Vec<ContentBlock>, cache: &mut DedupCache, kind: BlockKind, raw: &str) {
    let raw = raw.trim();
    if !raw.is_empty() && cache.admit(raw) {
        out.push(ContentBlock::new(kind, raw));
    }
}

fn single(
    cache: &mut DedupCache,
    kind: BlockKind,
    raw: &str,
) -> Result<Vec<ContentBlock>, ClassifyError> {
    let mut out = Vec::with_capacity(1);
    emit(&mut out, cache, kind, raw);
    Ok(out)
}

fn lazy_src<N: MarkupNode>(img: &N, owner: &N) -> Result<String, ClassifyError> {
    img.attr("data-src")
        .map(str::to_string)
        .ok_or_else(|| ClassifyError::new(owner.tag(), "image without data-src"))
}

fn centered_heading<N: MarkupNode>(
    node: &N,
    cache: &mut DedupCache,
) -> Result<Vec<ContentBlock>, ClassifyError> {
    let text = node
        .first_descendant("strong")
        .map(|s| s.text())
        .unwrap_or_default();
    single(cache, BlockKind::Heading2, &text)
}

fn paragraph_image<N: MarkupNode>(
    node: &N,
    cache: &mut DedupCache,
) -> Result<Vec<ContentBlock>, ClassifyError> {
    let img = node
        .first_descendant("img")
        .ok_or_else(|| ClassifyError::new(node.tag(), "missing <img>"))?;
    let url = lazy_src(&img, node)?;
    single(cache, BlockKind::Image, &url)
}

/// Bold children become subheadings, plain runs become text.
fn paragraph<N: MarkupNode>(
    node: &N,
    cache: &mut DedupCache,
) -> Result<Vec<ContentBlock>, ClassifyError> {
    let mut out = Vec::new();
    for child in node.children() {
        match child {
            Child::Element(el) if el.tag() == "strong" => {
                emit(&mut out, cache, BlockKind::Heading2, &el.text());
            }
            Child::Element(el) => {
                if let Some(text) = el.sole_text() {
                    emit(&mut out, cache, BlockKind::Text, &text);
                }
            }
            Child::Text(text) => emit(&mut out, cache, BlockKind::Text, &text),
        }
    }
    Ok(out)
}

fn quote<N: MarkupNode>(
    node: &N,
    cache: &mut DedupCache,
) -> Result<Vec<ContentBlock>, ClassifyError> {
    single(cache, BlockKind::Quote, &node.text())
}

fn whole_text<N: MarkupNode>(
    node: &N,
    cache: &mut DedupCache,
) -> Result<Vec<ContentBlock>, ClassifyError> {
    single(cache, BlockKind::Text, &node.text())
}

fn video<N: MarkupNode>(
    node: &N,
    cache: &mut DedupCache,
) -> Result<Vec<ContentBlock>, ClassifyError> {
    let url = node
        .attr("data-src")
        .ok_or_else(|| ClassifyError::new(node.tag(), "video marker without data-src"))?;
    single(cache, BlockKind::Video, url)
}

fn list_items<N: MarkupNode>(
    node: &N,
    cache: &mut DedupCache,
) -> Result<Vec<ContentBlock>, ClassifyError> {
    let mut out = Vec::new();
    for li in node.descendants().iter().filter(|d| d.tag() == "li") {
        emit(&mut out, cache, BlockKind::Text, &li.text());
    }
    Ok(out)
}

fn figure<N: MarkupNode>(
    node: &N,
    cache: &mut DedupCache,
) -> Result<Vec<ContentBlock>, ClassifyError> {
    let img = node
        .first_descendant("img")
        .ok_or_else(|| ClassifyError::new(node.tag(), "figure without <img>"))?;
    let url = lazy_src(&img, node)?;
    single(cache, BlockKind::Image, &url)
}

fn fallback<N: MarkupNode>(
    node: &N,
    cache: &mut DedupCache,
) -> Result<Vec<ContentBlock>, ClassifyError> {
    let kind = BlockKind::Other(node.tag().to_string());
    single(cache, kind, &node.text())
}
