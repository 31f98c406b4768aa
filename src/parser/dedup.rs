use std::collections::HashSet;

use super::blocks::ContentBlock;

/// Raw strings and URLs already emitted during one document's extraction.
#[derive(Debug, Default)]
pub struct DedupCache {
    seen: HashSet<String>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `raw` and returns true the first time it is seen.
    pub fn admit(&mut self, raw: &str) -> bool {
        if self.seen.contains(raw) {
            return false;
        }
        self.seen.insert(raw.to_string())
    }

    pub fn contains(&self, raw: &str) -> bool {
        self.seen.contains(raw)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Keep the first block for each raw value, preserving order.
    pub fn retain_unique(&mut self, blocks: Vec<ContentBlock>) -> Vec<ContentBlock> {
        blocks
            .into_iter()
            .filter(|b| self.admit(b.raw()))
            .collect()
    }
}
