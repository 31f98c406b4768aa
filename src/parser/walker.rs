use tracing::debug;

use crate::error::Report;

use super::blocks::ContentBlock;
use super::classify::NodeClassifier;
use super::dedup::DedupCache;
use super::markup::MarkupNode;

/// Tags the walker hands to the classifier.
pub const RECOGNIZED_TAGS: &[&str] = &["p", "blockquote", "span", "ul", "ol", "figure"];

fn is_recognized<N: MarkupNode>(node: &N) -> bool {
    RECOGNIZED_TAGS.contains(&node.tag())
}

pub struct TreeWalker<'c, N> {
    classifier: &'c NodeClassifier<N>,
}

impl<'c, N: MarkupNode> TreeWalker<'c, N> {
    pub fn new(classifier: &'c NodeClassifier<N>) -> Self {
        Self { classifier }
    }

    /// Walk the content root: every direct-child section first, then the
    /// recognized direct children. Skipped nodes land in `report`.
    pub fn walk(&self, root: &N, cache: &mut DedupCache, report: &mut Report) -> Vec<ContentBlock> {
        let mut blocks = Vec::new();
        let children = root.child_elements();

        for section in children.iter().filter(|c| c.tag() == "section") {
            blocks.extend(self.walk_section(section, cache, report));
        }
        let after_sections = blocks.len();

        for node in children.iter().filter(|c| is_recognized(*c)) {
            self.classify_into(node, cache, report, &mut blocks);
        }

        debug!(
            section_blocks = after_sections,
            top_level_blocks = blocks.len() - after_sections,
            "walked content root"
        );
        blocks
    }

    fn walk_section(&self, section: &N, cache: &mut DedupCache, report: &mut Report) -> Vec<ContentBlock> {
        let mut blocks = Vec::new();
        let mut recognized = false;
        for node in section.descendants().iter().filter(|d| is_recognized(*d)) {
            recognized = true;
            self.classify_into(node, cache, report, &mut blocks);
        }
        if !recognized {
            // bare-text section
            let text = section.text();
            if !text.is_empty() && cache.admit(&text) {
                blocks.push(ContentBlock::text(text));
            }
        }
        blocks
    }

    fn classify_into(
        &self,
        node: &N,
        cache: &mut DedupCache,
        report: &mut Report,
        out: &mut Vec<ContentBlock>,
    ) {
        match self.classifier.classify(node, cache) {
            Ok(blocks) => out.extend(blocks),
            Err(e) => report.skipped(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Warning;
    use scraper::Html;

    fn walk(html: &str) -> (Vec<ContentBlock>, Report) {
        let doc = Html::parse_document(html);
        let root = doc.root_element().select_one("#js_content").unwrap();
        let classifier = NodeClassifier::default();
        let mut cache = DedupCache::new();
        let mut report = Report::new();
        let blocks = TreeWalker::new(&classifier).walk(&root, &mut cache, &mut report);
        (blocks, report)
    }

    #[test]
    fn section_with_bare_text_falls_back() {
        let (blocks, report) = walk(r#"<div id="js_content"><section>Hello</section></div>"#);
        assert_eq!(blocks, vec![ContentBlock::text("Hello")]);
        assert!(report.is_empty());
    }

    #[test]
    fn sections_come_before_top_level_nodes() {
        let (blocks, _) = walk(
            r#"<div id="js_content">
                <p>top one</p>
                <section><p>inside</p></section>
                <blockquote>quoted</blockquote>
            </div>"#,
        );
        assert_eq!(
            blocks,
            vec![
                ContentBlock::text("inside"),
                ContentBlock::text("top one"),
                ContentBlock::quote("quoted"),
            ]
        );
    }

    #[test]
    fn nested_spans_do_not_duplicate() {
        let (blocks, _) = walk(
            r#"<div id="js_content"><section><p><span>once</span></p><span>once</span></section></div>"#,
        );
        assert_eq!(blocks, vec![ContentBlock::text("once")]);
    }

    #[test]
    fn malformed_node_is_skipped_with_warning() {
        let (blocks, report) = walk(
            r#"<div id="js_content">
                <figure><figcaption>no image</figcaption></figure>
                <p>kept</p>
            </div>"#,
        );
        assert_eq!(blocks, vec![ContentBlock::text("kept")]);
        assert_eq!(report.warnings().len(), 1);
        assert!(matches!(&report.warnings()[0], Warning::NodeSkipped { tag, .. } if tag == "figure"));
    }

    #[test]
    fn unrecognized_top_level_tags_are_ignored() {
        let (blocks, _) = walk(r#"<div id="js_content"><h3>ignored</h3><p>kept</p></div>"#);
        assert_eq!(blocks, vec![ContentBlock::text("kept")]);
    }

    #[test]
    fn no_duplicates_across_passes() {
        let (blocks, _) = walk(
            r#"<div id="js_content">
                <section><p><img data-src="https://i/1.png"></p><p>text</p></section>
                <p><img data-src="https://i/1.png"></p>
                <p>text</p>
            </div>"#,
        );
        assert_eq!(
            blocks,
            vec![ContentBlock::image("https://i/1.png"), ContentBlock::text("text")]
        );
    }
}
