use std::collections::{HashMap, HashSet};
use std::ops::Range;

use log::{debug, warn};

use crate::editing::{AnchorId, TextHost};
use crate::error::{MappingError, ModelError};
use crate::model::registry::{classify, dedent, indent_level, is_fence};
use crate::model::{Block, BlockId, BlockKind, BlockTree};

/// Binds every block to the anchor covering its own rendered lines.
///
/// Positions are never derived from the text: [`RangeMapping::refresh`] asks
/// the host where each anchor currently is and caches the answer until the
/// next refresh.
#[derive(Debug, Clone, Default)]
pub struct RangeMapping {
    anchors: HashMap<BlockId, AnchorId>,
    resolved: HashMap<BlockId, Range<usize>>,
    missing: HashSet<BlockId>,
    invalid: HashSet<BlockId>,
    /// Line count each block owned when last parsed
    expected: HashMap<BlockId, usize>,
    touched: HashSet<BlockId>,
}

/// What one refresh observed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshReport {
    pub resolved: usize,
    /// Blocks whose text is gone
    pub missing: Vec<BlockId>,
    /// Blocks without an anchor at all; excluded from planning
    pub invalid: Vec<BlockId>,
    /// Blocks that lost lines to an earlier block's overlapping range
    pub overlaps: Vec<BlockId>,
}

impl RangeMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Anchor `id` to `lines`, replacing any anchor it had.
    pub fn bind<H: TextHost>(
        &mut self,
        host: &mut H,
        id: BlockId,
        lines: Range<usize>,
    ) -> Result<AnchorId, MappingError> {
        check_range(host, &lines)?;
        if let Some(old) = self.anchors.remove(&id) {
            host.clear_anchor(old);
        }
        let anchor = host.create_anchor(lines.clone());
        self.anchors.insert(id.clone(), anchor);
        self.expected.insert(id.clone(), lines.len());
        self.missing.remove(&id);
        self.invalid.remove(&id);
        self.resolved.insert(id, lines);
        Ok(anchor)
    }

    pub fn unbind<H: TextHost>(&mut self, host: &mut H, id: &BlockId) {
        if let Some(anchor) = self.anchors.remove(id) {
            host.clear_anchor(anchor);
        }
        self.resolved.remove(id);
        self.missing.remove(id);
        self.invalid.remove(id);
        self.expected.remove(id);
        self.touched.remove(id);
    }

    /// Forget every binding; the host is expected to have been reset.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Move all bookkeeping from `old` to `new` once a real id is known.
    pub fn rename(&mut self, old: &BlockId, new: &BlockId) {
        if let Some(anchor) = self.anchors.remove(old) {
            self.anchors.insert(new.clone(), anchor);
        }
        if let Some(range) = self.resolved.remove(old) {
            self.resolved.insert(new.clone(), range);
        }
        if let Some(count) = self.expected.remove(old) {
            self.expected.insert(new.clone(), count);
        }
        if self.missing.remove(old) {
            self.missing.insert(new.clone());
        }
        if self.invalid.remove(old) {
            self.invalid.insert(new.clone());
        }
        if self.touched.remove(old) {
            self.touched.insert(new.clone());
        }
    }

    /// Insert `block` into the tree and anchor it to `lines`.
    ///
    /// With a parent the block goes through [`BlockTree::add_child_at`], so
    /// it can never end up in the top-level list by accident. The sibling
    /// position follows the line order.
    pub fn add_block<H: TextHost>(
        &mut self,
        tree: &mut BlockTree,
        host: &mut H,
        block: Block,
        parent: Option<&BlockId>,
        lines: Range<usize>,
    ) -> Result<BlockId, MappingError> {
        check_range(host, &lines)?;
        let id = block.id().clone();
        match parent {
            Some(parent) => {
                let siblings = tree
                    .get(parent)
                    .ok_or_else(|| ModelError::UnknownBlock(parent.clone()))?
                    .children();
                let index = self.insert_index(siblings, lines.start);
                tree.add_child_at(parent, index, block)?;
            }
            None => {
                let index = self.insert_index(tree.roots(), lines.start);
                tree.insert_root_at(index, block)?;
            }
        }
        self.bind(host, id.clone(), lines)?;
        Ok(id)
    }

    fn insert_index(&self, siblings: &[BlockId], line: usize) -> usize {
        siblings
            .iter()
            .rposition(|s| self.resolved.get(s).is_some_and(|r| r.start < line))
            .map_or(0, |pos| pos + 1)
    }

    /// Query every anchor and rebuild the resolved ranges.
    ///
    /// Ranges are visited in line order; where two overlap, the earlier
    /// block keeps the shared lines. A block left with no lines is missing.
    pub fn refresh<H: TextHost>(&mut self, tree: &BlockTree, host: &H) -> RefreshReport {
        let mut report = RefreshReport::default();
        self.resolved.clear();
        self.missing.clear();
        self.invalid.clear();

        let mut found = Vec::with_capacity(self.anchors.len());
        for (order, id) in tree.walk().into_iter().enumerate() {
            let Some(anchor) = self.anchors.get(&id) else {
                warn!("block {id} has no anchor; leaving it out of this sync");
                self.invalid.insert(id.clone());
                report.invalid.push(id);
                continue;
            };
            match host.anchor_lines(*anchor) {
                Some(lines) => found.push((lines, order, id)),
                None => {
                    self.missing.insert(id.clone());
                    report.missing.push(id);
                }
            }
        }
        found.sort_by_key(|(lines, order, _)| (lines.start, *order));

        let mut claimed = 0;
        for (lines, _, id) in found {
            let start = lines.start.max(claimed);
            if start > lines.start {
                report.overlaps.push(id.clone());
            }
            if start >= lines.end {
                self.missing.insert(id.clone());
                report.missing.push(id);
                continue;
            }
            claimed = claimed.max(lines.end);
            self.resolved.insert(id, start..lines.end);
        }
        report.resolved = self.resolved.len();
        debug!(
            "mapping refresh: {} resolved, {} missing, {} invalid",
            report.resolved,
            report.missing.len(),
            report.invalid.len()
        );
        report
    }

    pub fn range(&self, id: &BlockId) -> Option<Range<usize>> {
        self.resolved.get(id).cloned()
    }

    pub fn anchor(&self, id: &BlockId) -> Option<AnchorId> {
        self.anchors.get(id).copied()
    }

    pub fn is_bound(&self, id: &BlockId) -> bool {
        self.anchors.contains_key(id)
    }

    pub fn is_missing(&self, id: &BlockId) -> bool {
        self.missing.contains(id)
    }

    pub fn is_invalid(&self, id: &BlockId) -> bool {
        self.invalid.contains(id)
    }

    pub fn expected_lines(&self, id: &BlockId) -> usize {
        self.expected.get(id).copied().unwrap_or(1)
    }

    pub(crate) fn set_expected(&mut self, id: &BlockId, count: usize) {
        self.expected.insert(id.clone(), count);
    }

    /// Remember which blocks an edit touched, using live anchor positions.
    pub fn note_edit<H: TextHost>(&mut self, host: &H, changed_lines: &[Range<usize>]) {
        for (id, anchor) in &self.anchors {
            let touched = match host.anchor_lines(*anchor) {
                Some(lines) => changed_lines
                    .iter()
                    .any(|c| c.start < lines.end && lines.start < c.end),
                None => true,
            };
            if touched {
                self.touched.insert(id.clone());
            }
        }
    }

    pub fn take_touched(&mut self) -> HashSet<BlockId> {
        std::mem::take(&mut self.touched)
    }

    /// Owner of each line, as of the last refresh
    pub fn line_owners(&self, line_count: usize) -> Vec<Option<BlockId>> {
        let mut owners = vec![None; line_count];
        for (id, lines) in &self.resolved {
            for owner in owners.iter_mut().take(lines.end).skip(lines.start) {
                *owner = Some(id.clone());
            }
        }
        owners
    }
}

fn check_range<H: TextHost>(host: &H, lines: &Range<usize>) -> Result<(), MappingError> {
    let line_count = host.line_count();
    if lines.start >= lines.end || lines.end > line_count {
        return Err(MappingError::OutOfRange {
            lines: lines.clone(),
            line_count,
        });
    }
    Ok(())
}

/// How many of `lines` (a block's anchored range) still belong to the block.
///
/// Lines the block owned at its last parse stay with it. Beyond those, a
/// top-level paragraph or quote absorbs plain continuation lines and a code
/// block runs to its closing fence; anything else is left for the orphan
/// detector.
pub fn owned_line_count<S: AsRef<str>>(
    lines: &[S],
    depth: usize,
    indent_width: usize,
    previous: usize,
) -> usize {
    if lines.is_empty() {
        return 0;
    }
    let width = depth * indent_width;
    let local = |i: usize| dedent(lines[i].as_ref(), width, indent_width);
    let kind = classify(local(0)).kind;
    if matches!(kind, BlockKind::Code { .. }) {
        return (1..lines.len())
            .find(|&i| is_fence(local(i)))
            .map_or(lines.len(), |i| i + 1);
    }
    let mut keep = lines.len().min(previous.max(1));
    if depth == 0 {
        while keep < lines.len() && continues(&kind, lines[keep].as_ref(), indent_width) {
            keep += 1;
        }
    }
    keep
}

fn continues(kind: &BlockKind, line: &str, indent_width: usize) -> bool {
    if line.trim().is_empty() || indent_level(line, indent_width) != 0 {
        return false;
    }
    let next = classify(line).kind;
    match kind {
        BlockKind::Paragraph | BlockKind::Quote => next == *kind,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editing::{Cmd, Document};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn setup(text: &str, blocks: &[(&str, Range<usize>)]) -> (BlockTree, Document, RangeMapping) {
        let mut tree = BlockTree::new();
        let mut doc = Document::from_text(text);
        let mut mapping = RangeMapping::new();
        for (id, lines) in blocks {
            let block = Block::new_local(BlockId::from(*id), BlockKind::Paragraph, "");
            mapping
                .add_block(&mut tree, &mut doc, block, None, lines.clone())
                .unwrap();
        }
        (tree, doc, mapping)
    }

    #[test]
    fn refresh_follows_inserted_lines() {
        let (tree, mut doc, mut mapping) = setup("a\nb\n", &[("a", 0..1), ("b", 1..2)]);
        doc.apply(Cmd::InsertLines {
            before: 0,
            lines: vec!["x".into(), "y".into(), "z".into()],
        });
        let report = mapping.refresh(&tree, &doc);
        assert_eq!(report.resolved, 2);
        assert_eq!(mapping.range(&"a".into()), Some(3..4));
        assert_eq!(mapping.range(&"b".into()), Some(4..5));
    }

    #[test]
    fn deleted_lines_flag_block_missing() {
        let (tree, mut doc, mut mapping) = setup("a\nb\nc\n", &[("a", 0..1), ("b", 1..2), ("c", 2..3)]);
        doc.apply(Cmd::DeleteLines { lines: 1..2 });
        let report = mapping.refresh(&tree, &doc);
        assert_eq!(report.missing, [BlockId::from("b")]);
        assert!(mapping.is_missing(&"b".into()));
        assert_eq!(mapping.range(&"c".into()), Some(1..2));
    }

    #[test]
    fn joined_lines_go_to_the_earlier_block() {
        let (tree, mut doc, mut mapping) = setup("aaa\nbbb\n", &[("a", 0..1), ("b", 1..2)]);
        doc.apply(Cmd::DeleteRange { range: 3..4 });
        let report = mapping.refresh(&tree, &doc);
        assert_eq!(mapping.range(&"a".into()), Some(0..1));
        assert_eq!(report.missing, [BlockId::from("b")]);
        assert_eq!(report.overlaps, [BlockId::from("b")]);
    }

    #[test]
    fn unanchored_block_is_invalid_not_missing() {
        let (mut tree, doc, mut mapping) = setup("a\n", &[("a", 0..1)]);
        tree.insert_root(Block::new_local("ghost".into(), BlockKind::Paragraph, ""))
            .unwrap();
        let report = mapping.refresh(&tree, &doc);
        assert_eq!(report.invalid, [BlockId::from("ghost")]);
        assert!(report.missing.is_empty());
    }

    #[test]
    fn add_block_with_parent_attaches_as_child() {
        let (mut tree, mut doc, mut mapping) =
            setup("toggle\n  one\n  two\nafter\n", &[("t", 0..1), ("after", 3..4)]);
        let two = Block::new_local(BlockId::Temp(2), BlockKind::Paragraph, "two");
        let one = Block::new_local(BlockId::Temp(1), BlockKind::Paragraph, "one");
        mapping
            .add_block(&mut tree, &mut doc, two, Some(&"t".into()), 2..3)
            .unwrap();
        mapping
            .add_block(&mut tree, &mut doc, one, Some(&"t".into()), 1..2)
            .unwrap();

        assert_eq!(tree.roots(), [BlockId::from("t"), BlockId::from("after")]);
        assert_eq!(
            tree.get(&"t".into()).unwrap().children(),
            [BlockId::Temp(1), BlockId::Temp(2)]
        );
        assert!(tree.validate().is_empty());
    }

    #[test]
    fn add_block_rejects_out_of_range_lines() {
        let (mut tree, mut doc, mut mapping) = setup("a\n", &[("a", 0..1)]);
        let block = Block::new_local(BlockId::Temp(1), BlockKind::Paragraph, "");
        let err = mapping
            .add_block(&mut tree, &mut doc, block, None, 1..2)
            .unwrap_err();
        assert!(matches!(err, MappingError::OutOfRange { .. }));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn nested_block_never_becomes_top_level() {
        let (mut tree, mut doc, mut mapping) = setup("t\n  child\nnew\n", &[("t", 0..1)]);
        let child = Block::new_local("c".into(), BlockKind::Paragraph, "child");
        mapping
            .add_block(&mut tree, &mut doc, child, Some(&"t".into()), 1..2)
            .unwrap();
        assert_eq!(tree.roots(), [BlockId::from("t")]);
        assert_eq!(tree.get(&"t".into()).unwrap().children(), [BlockId::from("c")]);
    }

    #[test]
    fn note_edit_marks_only_intersecting_blocks() {
        let (_, mut doc, mut mapping) = setup("a\nb\nc\n", &[("a", 0..1), ("b", 1..2), ("c", 2..3)]);
        let patch = doc.apply(Cmd::ReplaceLine {
            line: 1,
            text: "B".into(),
        });
        mapping.note_edit(&doc, &patch.changed_lines);
        let touched = mapping.take_touched();
        assert!(touched.contains(&"b".into()));
        assert!(!touched.contains(&"a".into()));
        assert!(mapping.take_touched().is_empty());
    }

    #[rstest]
    #[case(&["# Title", ""], 0, 1, 1)]
    #[case(&["# Title", "more"], 0, 1, 1)]
    #[case(&["para", "more", "- item"], 0, 1, 2)]
    #[case(&["para", "", "more"], 0, 1, 1)]
    #[case(&["  nested", "  more"], 1, 1, 1)]
    #[case(&["line", "# kept"], 0, 2, 2)]
    #[case(&["> q", "> r", "s"], 0, 1, 2)]
    #[case(&["```", "code", "```", "after"], 0, 1, 3)]
    fn owned_lines(
        #[case] lines: &[&str],
        #[case] depth: usize,
        #[case] previous: usize,
        #[case] expected: usize,
    ) {
        assert_eq!(owned_line_count(lines, depth, 2, previous), expected);
    }
}
