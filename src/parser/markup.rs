use scraper::{ElementRef, Node, Selector};

/// A direct child of an element: either another element or a text run.
#[derive(Debug, Clone)]
pub enum Child<N> {
    Element(N),
    Text(String),
}

/// The read-only view of a parsed markup tree the extractors work against.
pub trait MarkupNode: Copy {
    fn tag(&self) -> &str;

    fn attr(&self, name: &str) -> Option<&str>;

    /// Direct children in document order. Comments and other node types are dropped.
    fn children(&self) -> Vec<Child<Self>>;

    /// Element descendants in document order, excluding `self`.
    fn descendants(&self) -> Vec<Self>;

    /// All descendant text, concatenated and trimmed.
    fn text(&self) -> String;

    fn select(&self, css: &str) -> Vec<Self>;

    fn is_descendant_of(&self, other: &Self) -> bool;

    fn select_one(&self, css: &str) -> Option<Self> {
        self.select(css).into_iter().next()
    }

    fn first_descendant(&self, tag: &str) -> Option<Self> {
        self.descendants().into_iter().find(|d| d.tag() == tag)
    }

    fn child_elements(&self) -> Vec<Self> {
        self.children()
            .into_iter()
            .filter_map(|c| match c {
                Child::Element(e) => Some(e),
                Child::Text(_) => None,
            })
            .collect()
    }

    /// The text of a node whose only content is a single text run, possibly
    /// wrapped in a chain of single-child elements.
    fn sole_text(&self) -> Option<String> {
        let mut children = self.children();
        if children.len() != 1 {
            return None;
        }
        match children.pop()? {
            Child::Text(t) => Some(t),
            Child::Element(e) => e.sole_text(),
        }
    }
}

impl<'a> MarkupNode for ElementRef<'a> {
    fn tag(&self) -> &str {
        self.value().name()
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.value().attr(name)
    }

    fn children(&self) -> Vec<Child<Self>> {
        (**self)
            .children()
            .filter_map(|node| match node.value() {
                Node::Element(_) => ElementRef::wrap(node).map(Child::Element),
                Node::Text(t) => Some(Child::Text(String::from(&**t))),
                _ => None,
            })
            .collect()
    }

    fn descendants(&self) -> Vec<Self> {
        (**self)
            .descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .collect()
    }

    fn text(&self) -> String {
        ElementRef::text(self).collect::<String>().trim().to_string()
    }

    fn select(&self, css: &str) -> Vec<Self> {
        match Selector::parse(css) {
            Ok(selector) => ElementRef::select(self, &selector).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn is_descendant_of(&self, other: &Self) -> bool {
        let target = other.id();
        self.ancestors().any(|a| a.id() == target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn body(doc: &Html) -> ElementRef<'_> {
        doc.root_element().select_one("body").unwrap()
    }

    #[test]
    fn children_keep_text_and_elements_in_order() {
        let doc = Html::parse_document("<p>one <strong>two</strong> three<!-- c --></p>");
        let p = body(&doc).select_one("p").unwrap();
        let kids = MarkupNode::children(&p);
        assert_eq!(kids.len(), 3);
        assert!(matches!(&kids[0], Child::Text(t) if t == "one "));
        assert!(matches!(&kids[1], Child::Element(e) if e.tag() == "strong"));
        assert!(matches!(&kids[2], Child::Text(t) if t == " three"));
    }

    #[test]
    fn descendants_exclude_self_and_follow_document_order() {
        let doc = Html::parse_document("<section><p><span>a</span></p><ul><li>b</li></ul></section>");
        let section = body(&doc).select_one("section").unwrap();
        let tags: Vec<String> = MarkupNode::descendants(&section)
            .iter()
            .map(|d| d.tag().to_string())
            .collect();
        assert_eq!(tags, vec!["p", "span", "ul", "li"]);
    }

    #[test]
    fn text_is_trimmed() {
        let doc = Html::parse_document("<blockquote>\n  quoted <em>words</em>  \n</blockquote>");
        let q = body(&doc).select_one("blockquote").unwrap();
        assert_eq!(MarkupNode::text(&q), "quoted words");
    }

    #[test]
    fn sole_text_follows_single_child_chain() {
        let doc = Html::parse_document("<p><span><em>deep</em></span></p><p><b>x</b><b>y</b></p>");
        let ps = MarkupNode::select(&body(&doc), "p");
        assert_eq!(ps[0].sole_text().as_deref(), Some("deep"));
        assert_eq!(ps[1].sole_text(), None);
    }

    #[test]
    fn descendant_check() {
        let doc = Html::parse_document("<div><p>in</p></div><p>out</p>");
        let b = body(&doc);
        let div = b.select_one("div").unwrap();
        let ps = MarkupNode::select(&b, "p");
        assert!(ps[0].is_descendant_of(&div));
        assert!(!ps[1].is_descendant_of(&div));
        assert!(!div.is_descendant_of(&div));
    }

    #[test]
    fn bad_selector_matches_nothing() {
        let doc = Html::parse_document("<p>x</p>");
        assert!(body(&doc).select_one("p[").is_none());
    }
}
