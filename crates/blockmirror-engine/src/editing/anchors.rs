use std::collections::HashMap;
use std::ops::Range;

use xi_rope::delta::Transformer;
use xi_rope::{Delta, RopeInfo};

/// Unique identifier for an anchor
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct AnchorId(pub u64);

/// A byte range in the rope that follows edits around it
#[derive(Clone, Debug, PartialEq)]
pub struct Anchor {
    pub id: AnchorId,
    pub range: Range<usize>,
    /// Set once every byte of the range has been deleted; a dead anchor never revives
    pub dead: bool,
}

/// Position-tracking anchors over a rope.
///
/// Positions are never recomputed by scanning text: every edit's `Delta` is
/// pushed through [`AnchorSet::transform`], which moves, grows or shrinks the
/// ranges in place.
#[derive(Debug, Clone, Default)]
pub struct AnchorSet {
    anchors: HashMap<AnchorId, Anchor>,
    next_id: u64,
}

impl AnchorSet {
    pub fn create(&mut self, range: Range<usize>) -> AnchorId {
        self.next_id += 1;
        let id = AnchorId(self.next_id);
        let dead = range.start >= range.end;
        self.anchors.insert(id, Anchor { id, range, dead });
        id
    }

    pub fn get(&self, id: AnchorId) -> Option<&Anchor> {
        self.anchors.get(&id)
    }

    /// Live byte range, or `None` when the anchor is gone or collapsed
    pub fn range(&self, id: AnchorId) -> Option<Range<usize>> {
        self.anchors
            .get(&id)
            .filter(|a| !a.dead)
            .map(|a| a.range.clone())
    }

    pub fn clear(&mut self, id: AnchorId) -> bool {
        self.anchors.remove(&id).is_some()
    }

    pub fn clear_all(&mut self) {
        self.anchors.clear();
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Transform every anchor through a delta.
    ///
    /// The start uses `after = true` so text inserted exactly at the start
    /// (a new line typed above) is not captured; the end uses `after = false`
    /// so text inserted exactly at the end (a new line typed below) is not
    /// captured either. Text inserted strictly inside grows the range.
    pub(crate) fn transform(&mut self, delta: &Delta<RopeInfo>, doc_len: usize) {
        let mut transformer = Transformer::new(delta);
        for anchor in self.anchors.values_mut() {
            if anchor.dead {
                continue;
            }
            let new_start = transformer.transform(anchor.range.start, true).min(doc_len);
            let new_end = transformer.transform(anchor.range.end, false).min(doc_len);
            if new_start < new_end {
                anchor.range = new_start..new_end;
            } else {
                anchor.range = new_start..new_start;
                anchor.dead = true;
            }
        }
    }
}
