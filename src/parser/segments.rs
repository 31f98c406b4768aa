use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Report, ServiceError, Warning};
use crate::llm::{StructuringRequest, StructuringService, SEGMENT_INSTRUCTION};

use super::blocks::ContentBlock;
use super::consolidate::consolidate_unique;
use super::dedup::DedupCache;
use super::markup::MarkupNode;

pub const SEGMENT_TAGS: &[&str] = &["p", "div", "h1", "h2", "img", "pre"];

/// Segment tags under `body` in document order, keeping only those with no
/// segment-tag ancestor. In preorder a nested node always sits under the most
/// recently kept one, so checking that single node is enough.
pub fn collect_segments<N: MarkupNode>(body: &N) -> Vec<N> {
    let mut kept: Vec<N> = Vec::new();
    for node in body.descendants() {
        if !SEGMENT_TAGS.contains(&node.tag()) {
            continue;
        }
        if kept.last().is_some_and(|last| node.is_descendant_of(last)) {
            continue;
        }
        kept.push(node);
    }
    kept
}

/// The line a segment contributes to its batch: visible text, or the image
/// URL for `img`.
pub fn segment_line<N: MarkupNode>(node: &N) -> String {
    if node.tag() == "img" {
        return node
            .attr("data-src")
            .or_else(|| node.attr("src"))
            .unwrap_or_default()
            .trim()
            .to_string();
    }
    node.text()
}

pub struct SegmentBatcher {
    pub batch_size: usize,
    pub char_budget: usize,
    pub max_output_tokens: u32,
    pub merge_cap: usize,
}

impl SegmentBatcher {
    /// One payload per batch of `batch_size` segments, each line followed by
    /// a newline and the whole cut to `char_budget` characters.
    pub fn payloads<N: MarkupNode>(&self, segments: &[N]) -> Vec<String> {
        segments
            .chunks(self.batch_size.max(1))
            .map(|batch| {
                let mut text = String::new();
                for seg in batch {
                    text.push_str(&segment_line(seg));
                    text.push('\n');
                }
                truncate_chars(text, self.char_budget)
            })
            .collect()
    }

    /// Send each payload in order and stitch the replies back together.
    /// Unusable replies cost only their own batch; a failed call aborts.
    pub async fn structure(
        &self,
        service: &dyn StructuringService,
        payloads: Vec<String>,
        report: &mut Report,
    ) -> Result<Vec<ContentBlock>, ServiceError> {
        let total = payloads.len();
        let mut per_batch: Vec<Vec<ContentBlock>> = vec![Vec::new(); total];

        for (index, payload) in payloads.into_iter().enumerate() {
            if payload.trim().is_empty() {
                debug!(batch = index, "empty batch, not sent");
                continue;
            }
            info!("Structuring segment batch {}/{}", index + 1, total);
            let request = StructuringRequest {
                instruction: SEGMENT_INSTRUCTION.to_string(),
                payload,
                max_output_tokens: self.max_output_tokens,
                json_output: true,
            };
            let raw = service.complete(&request).await?;
            per_batch[index] = parse_content_blocks(&raw, index, report);
        }

        let blocks: Vec<ContentBlock> = per_batch.into_iter().flatten().collect();
        let unique = DedupCache::new().retain_unique(blocks);
        Ok(consolidate_unique(unique, self.merge_cap))
    }
}

fn truncate_chars(mut text: String, limit: usize) -> String {
    if let Some((cut, _)) = text.char_indices().nth(limit) {
        text.truncate(cut);
    }
    text
}

/// Read a `{"content": [...]}` reply. A reply that is not JSON or lacks the
/// array yields nothing; single malformed entries are dropped.
pub fn parse_content_blocks(raw: &str, batch: usize, report: &mut Report) -> Vec<ContentBlock> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            report.push(Warning::BatchDiscarded {
                batch,
                reason: format!("invalid JSON: {}", e),
            });
            return Vec::new();
        }
    };
    let Some(entries) = value.get("content").and_then(Value::as_array) else {
        report.push(Warning::BatchDiscarded {
            batch,
            reason: "missing \"content\" array".into(),
        });
        return Vec::new();
    };

    let mut blocks = Vec::with_capacity(entries.len());
    for entry in entries {
        match ContentBlock::from_json(entry) {
            Some(block) => blocks.push(block),
            None => report.push(Warning::EntryDiscarded {
                batch,
                reason: format!("unusable entry {}", entry),
            }),
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::tests::ScriptedService;
    use crate::parser::blocks::DEFAULT_MERGE_CAP;
    use scraper::Html;

    fn batcher(batch_size: usize, char_budget: usize) -> SegmentBatcher {
        SegmentBatcher {
            batch_size,
            char_budget,
            max_output_tokens: 8192,
            merge_cap: DEFAULT_MERGE_CAP,
        }
    }

    fn body_segments(html: &str) -> Vec<String> {
        let doc = Html::parse_document(html);
        let body = doc.root_element().select_one("body").unwrap();
        collect_segments(&body).iter().map(segment_line).collect()
    }

    #[test]
    fn only_top_level_segments() {
        let lines = body_segments(
            r#"<div><p>nested </p><div><h1>deeper</h1></div></div>
               <section><p>under section</p><pre>code()</pre></section>
               <img data-src="https://i/lazy.png" src="x.gif">
               <h2>last</h2>"#,
        );
        assert_eq!(
            lines,
            vec!["nested deeper", "under section", "code()", "https://i/lazy.png", "last"]
        );
    }

    #[test]
    fn payloads_batch_and_truncate() {
        let doc = Html::parse_document(
            "<p>aaaa</p><p>bbbb</p><p>cccc</p><p>dddd</p><p>eeee</p>",
        );
        let body = doc.root_element().select_one("body").unwrap();
        let segments = collect_segments(&body);

        let payloads = batcher(2, 8192).payloads(&segments);
        assert_eq!(payloads, vec!["aaaa\nbbbb\n", "cccc\ndddd\n", "eeee\n"]);

        let cut = batcher(20, 7).payloads(&segments);
        assert_eq!(cut, vec!["aaaa\nbb"]);
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("中文内容".to_string(), 2), "中文");
        assert_eq!(truncate_chars("short".to_string(), 10), "short");
    }

    #[test]
    fn parse_rejects_bad_replies() {
        let mut report = Report::new();
        assert!(parse_content_blocks("nope", 0, &mut report).is_empty());
        assert!(parse_content_blocks(r#"{"content": "flat"}"#, 1, &mut report).is_empty());
        assert_eq!(report.warnings().len(), 2);

        let blocks = parse_content_blocks(
            r#"{"content": [{"type": "h1", "text": "T"}, {"type": "image"}, {"type": "img", "url": "https://i"}]}"#,
            2,
            &mut report,
        );
        assert_eq!(blocks, vec![
            ContentBlock::new(crate::parser::blocks::BlockKind::Heading1, "T"),
            ContentBlock::image("https://i"),
        ]);
        assert!(matches!(report.warnings()[2], Warning::EntryDiscarded { batch: 2, .. }));
    }

    #[tokio::test]
    async fn failed_batch_keeps_neighbours_in_order() {
        let service = ScriptedService::ok(&[
            r#"{"content": [{"type": "h1", "text": "One"}]}"#,
            "this is not json",
            r#"{"content": [{"type": "h2", "text": "Three"}]}"#,
        ]);
        let mut report = Report::new();
        let payloads = vec!["a\n".to_string(), "b\n".to_string(), "c\n".to_string()];
        let blocks = batcher(20, 8192)
            .structure(&service, payloads, &mut report)
            .await
            .unwrap();

        assert_eq!(
            blocks,
            vec![
                ContentBlock::new(crate::parser::blocks::BlockKind::Heading1, "One"),
                ContentBlock::heading2("Three"),
            ]
        );
        assert!(matches!(report.warnings()[0], Warning::BatchDiscarded { batch: 1, .. }));
        assert_eq!(service.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn results_are_deduped_then_consolidated() {
        let service = ScriptedService::ok(&[
            r#"{"content": [{"type": "text", "text": "p1"}, {"type": "text", "text": "p2"}]}"#,
            r#"{"content": [{"type": "text", "text": "p2"}, {"type": "text", "text": "p3"}]}"#,
        ]);
        let mut report = Report::new();
        let blocks = batcher(20, 8192)
            .structure(&service, vec!["x".into(), "y".into()], &mut report)
            .await
            .unwrap();
        assert_eq!(blocks, vec![ContentBlock::text("p1\np2\np3")]);
    }

    #[tokio::test]
    async fn merged_text_never_repeats_a_later_block() {
        let service = ScriptedService::ok(&[
            r#"{"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}, {"type": "code", "text": "q"}]}"#,
            r#"{"content": [{"type": "text", "text": "a\nb"}]}"#,
        ]);
        let mut report = Report::new();
        let blocks = batcher(20, 8192)
            .structure(&service, vec!["x".into(), "y".into()], &mut report)
            .await
            .unwrap();
        assert_eq!(blocks, vec![ContentBlock::text("a\nb"), ContentBlock::code("q")]);
    }

    #[tokio::test]
    async fn transport_failure_aborts() {
        let service = ScriptedService::new(vec![
            Ok(r#"{"content": []}"#.to_string()),
            Err(ServiceError::Network("timeout".into())),
        ]);
        let mut report = Report::new();
        let result = batcher(20, 8192)
            .structure(&service, vec!["x".into(), "y".into(), "z".into()], &mut report)
            .await;
        assert!(matches!(result, Err(ServiceError::Network(_))));
    }

    #[tokio::test]
    async fn blank_payloads_are_not_sent() {
        let service = ScriptedService::ok(&[]);
        let mut report = Report::new();
        let blocks = batcher(20, 8192)
            .structure(&service, vec!["  \n".into()], &mut report)
            .await
            .unwrap();
        assert!(blocks.is_empty());
        assert!(service.requests.lock().unwrap().is_empty());
    }
}
