use super::blocks::ContentBlock;
use super::dedup::DedupCache;

/// Merge runs of adjacent text blocks (or code blocks) while each merged
/// result stays under `cap` characters. Other kinds pass through in place.
pub fn consolidate(blocks: Vec<ContentBlock>, cap: usize) -> Vec<ContentBlock> {
    let mut out = Vec::with_capacity(blocks.len());
    let mut open: Option<ContentBlock> = None;

    for block in blocks {
        if !block.kind().is_mergeable() {
            out.extend(open.take());
            out.push(block);
            continue;
        }
        open = Some(match open.take() {
            Some(current) if current.can_merge(&block, cap) => current.merged(&block),
            Some(current) => {
                out.push(current);
                block
            }
            None => block,
        });
    }
    out.extend(open);
    out
}

/// `consolidate`, then drop any merged block whose raw text an earlier
/// block already carries. Merging can rebuild a value the dedup cache
/// admitted on its own further down the sequence.
pub fn consolidate_unique(blocks: Vec<ContentBlock>, cap: usize) -> Vec<ContentBlock> {
    DedupCache::new().retain_unique(consolidate(blocks, cap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::blocks::DEFAULT_MERGE_CAP;

    #[test]
    fn merges_adjacent_text() {
        let out = consolidate(
            vec![
                ContentBlock::text("a"),
                ContentBlock::text("b"),
                ContentBlock::image("https://i/1.png"),
                ContentBlock::text("c"),
            ],
            DEFAULT_MERGE_CAP,
        );
        assert_eq!(
            out,
            vec![
                ContentBlock::text("a\nb"),
                ContentBlock::image("https://i/1.png"),
                ContentBlock::text("c"),
            ]
        );
    }

    #[test]
    fn text_and_code_do_not_mix() {
        let out = consolidate(
            vec![
                ContentBlock::code("x = 1"),
                ContentBlock::code("y = 2"),
                ContentBlock::text("prose"),
                ContentBlock::code("z = 3"),
            ],
            DEFAULT_MERGE_CAP,
        );
        assert_eq!(
            out,
            vec![
                ContentBlock::code("x = 1\ny = 2"),
                ContentBlock::text("prose"),
                ContentBlock::code("z = 3"),
            ]
        );
    }

    #[test]
    fn quotes_and_headings_pass_through() {
        let input = vec![
            ContentBlock::quote("q1"),
            ContentBlock::quote("q2"),
            ContentBlock::heading2("h"),
            ContentBlock::heading2("h again"),
        ];
        assert_eq!(consolidate(input.clone(), DEFAULT_MERGE_CAP), input);
    }

    #[test]
    fn results_stay_under_cap() {
        let chunk = "x".repeat(900);
        let input: Vec<ContentBlock> = (0..6).map(|_| ContentBlock::text(chunk.clone())).collect();
        let out = consolidate(input.clone(), DEFAULT_MERGE_CAP);

        // two chunks + separator = 1801 fits, a third would reach 2702
        assert_eq!(out.len(), 3);
        for block in &out {
            assert!(block.raw().chars().count() < DEFAULT_MERGE_CAP);
        }

        // lossless modulo separators
        let rejoined: String = out.iter().map(|b| b.raw()).collect::<Vec<_>>().join("\n");
        let original: String = input.iter().map(|b| b.raw()).collect::<Vec<_>>().join("\n");
        assert_eq!(rejoined, original);
    }

    #[test]
    fn oversized_single_block_is_kept() {
        let big = "y".repeat(2500);
        let out = consolidate(
            vec![ContentBlock::text(big.clone()), ContentBlock::text("tail")],
            DEFAULT_MERGE_CAP,
        );
        assert_eq!(out, vec![ContentBlock::text(big), ContentBlock::text("tail")]);
    }

    #[test]
    fn merge_does_not_recreate_a_later_block() {
        let input = vec![
            ContentBlock::text("a"),
            ContentBlock::text("b"),
            ContentBlock::quote("q"),
            ContentBlock::text("a\nb"),
        ];
        assert_eq!(
            consolidate(input.clone(), DEFAULT_MERGE_CAP),
            vec![
                ContentBlock::text("a\nb"),
                ContentBlock::quote("q"),
                ContentBlock::text("a\nb"),
            ]
        );
        assert_eq!(
            consolidate_unique(input, DEFAULT_MERGE_CAP),
            vec![ContentBlock::text("a\nb"), ContentBlock::quote("q")]
        );
    }

    #[test]
    fn empty_input() {
        assert!(consolidate(Vec::new(), DEFAULT_MERGE_CAP).is_empty());
    }
}
