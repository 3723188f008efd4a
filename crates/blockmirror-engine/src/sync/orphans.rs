use std::ops::Range;

use log::debug;
use serde::Serialize;

use crate::editing::{RangeMapping, TextHost};
use crate::model::registry::{classify, dedent, indent_level, is_fence};
use crate::model::{Block, BlockId, BlockKind, BlockTree};
use crate::options::SyncOptions;

/// Contiguous text owned by no block, recognised as a new block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrphanRegion {
    pub temp_id: BlockId,
    pub lines: Range<usize>,
    pub level: usize,
    pub kind: BlockKind,
    pub content: String,
    /// Set for indented regions only
    pub parent_block_id: Option<BlockId>,
    /// Set for top-level regions only, and only ever to a top-level block
    pub after_block_id: Option<BlockId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnmatchedReason {
    /// No line exactly one level shallower precedes the region
    NoParentAtLevel,
    /// The would-be parent is itself unmatched
    ParentUnmatched,
    ParentRejectsChildren { parent_type: String },
    NotCreatable { type_name: String },
    /// An existing block's indentation no longer matches its depth
    IndentationChanged { depth: usize, level: usize },
    /// A type change would drop children that cannot be re-created
    ChildrenNotRecreatable { type_name: String },
    /// The block's text survives but an ancestor's text was deleted
    ParentRemoved,
}

impl std::fmt::Display for UnmatchedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnmatchedReason::NoParentAtLevel => f.write_str("no parent one level up"),
            UnmatchedReason::ParentUnmatched => f.write_str("parent is unmatched"),
            UnmatchedReason::ParentRejectsChildren { parent_type } => {
                write!(f, "{parent_type} blocks cannot hold children")
            }
            UnmatchedReason::NotCreatable { type_name } => {
                write!(f, "{type_name} blocks cannot be created")
            }
            UnmatchedReason::IndentationChanged { depth, level } => {
                write!(f, "block at depth {depth} is now indented to level {level}")
            }
            UnmatchedReason::ChildrenNotRecreatable { type_name } => {
                write!(f, "a {type_name} child could not be re-created")
            }
            UnmatchedReason::ParentRemoved => f.write_str("parent block was deleted"),
        }
    }
}

/// Text the engine will not guess about
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Unmatched {
    pub lines: Range<usize>,
    pub text: String,
    /// The existing block involved, if any
    pub block_id: Option<BlockId>,
    #[serde(flatten)]
    pub reason: UnmatchedReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Detection {
    pub regions: Vec<OrphanRegion>,
    pub unmatched: Vec<Unmatched>,
}

impl Detection {
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty() && self.unmatched.is_empty()
    }

    /// The existing block was reported as unmatched and must not be planned
    pub fn is_held_back(&self, id: &BlockId) -> bool {
        self.unmatched
            .iter()
            .any(|u| u.block_id.as_ref() == Some(id))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Claim {
    Free,
    Block { id: BlockId, depth: usize },
    Region { id: BlockId, level: usize, kind: BlockKind },
    Rejected { level: usize },
}

/// Find every line outside the header that no anchor covers and turn it into
/// candidate blocks.
///
/// Pure: temporary ids are numbered from `tree.next_temp_id()` in scan order,
/// so repeated calls on the same state agree.
pub fn detect_orphans<H: TextHost>(
    host: &H,
    tree: &BlockTree,
    mapping: &RangeMapping,
    options: &SyncOptions,
) -> Detection {
    let unit = options.indent_width.max(1);
    let lines = host.lines(0..host.line_count());
    let first_line = options.header_lines.min(lines.len());

    let mut claims: Vec<Claim> = mapping
        .line_owners(lines.len())
        .into_iter()
        .map(|owner| match owner {
            Some(id) => {
                let depth = tree.get(&id).map_or(0, Block::depth);
                Claim::Block { id, depth }
            }
            None => Claim::Free,
        })
        .collect();

    let mut detection = Detection::default();
    hold_back_displaced(&lines, tree, mapping, unit, &mut claims, &mut detection);

    let mut next_temp = tree.next_temp_id();
    let mut i = first_line;
    while i < lines.len() {
        if claims[i] != Claim::Free || lines[i].trim().is_empty() {
            i += 1;
            continue;
        }
        let level = indent_level(&lines[i], unit);
        let end = region_end(&lines, &claims, i, level, unit);

        let mut sample = Block::new_local(BlockId::Temp(0), BlockKind::Paragraph, "");
        sample.parse(&lines[i..end], level, unit);
        let kind = sample.kind().clone();

        let placement = if !kind.is_creatable() {
            Err(UnmatchedReason::NotCreatable {
                type_name: kind.tag().to_string(),
            })
        } else if level == 0 {
            Ok((None, top_level_before(&claims[first_line..i])))
        } else {
            parent_at(&claims[first_line..i], tree, level)
                .map(|(parent, after)| (Some(parent), after))
        };

        match placement {
            Ok((parent_block_id, after_block_id)) => {
                let temp_id = BlockId::Temp(next_temp);
                next_temp += 1;
                for claim in &mut claims[i..end] {
                    *claim = Claim::Region {
                        id: temp_id.clone(),
                        level,
                        kind: kind.clone(),
                    };
                }
                detection.regions.push(OrphanRegion {
                    temp_id,
                    lines: i..end,
                    level,
                    kind,
                    content: sample.text().to_string(),
                    parent_block_id,
                    after_block_id,
                });
            }
            Err(reason) => {
                for claim in &mut claims[i..end] {
                    *claim = Claim::Rejected { level };
                }
                detection.unmatched.push(Unmatched {
                    lines: i..end,
                    text: lines[i..end].join("\n"),
                    block_id: None,
                    reason,
                });
            }
        }
        i = end;
    }

    debug!(
        "orphan detection: {} regions, {} unmatched",
        detection.regions.len(),
        detection.unmatched.len()
    );
    detection
}

fn hold_back_displaced(
    lines: &[String],
    tree: &BlockTree,
    mapping: &RangeMapping,
    unit: usize,
    claims: &mut [Claim],
    detection: &mut Detection,
) {
    for id in tree.walk() {
        let (Some(block), Some(range)) = (tree.get(&id), mapping.range(&id)) else {
            continue;
        };
        let Some(first) = lines.get(range.start) else {
            continue;
        };
        if first.trim().is_empty() {
            continue;
        }
        let level = indent_level(first, unit);
        if level == block.depth() {
            continue;
        }
        for claim in claims.iter_mut().take(range.end).skip(range.start) {
            *claim = Claim::Rejected { level };
        }
        detection.unmatched.push(Unmatched {
            text: first.trim().to_string(),
            lines: range,
            block_id: Some(id),
            reason: UnmatchedReason::IndentationChanged {
                depth: block.depth(),
                level,
            },
        });
    }
}

/// End (exclusive) of the region starting at `start`.
///
/// A code fence runs to its closing fence at any level. At level 0 plain
/// lines continue a paragraph and quote lines continue a quote; every other
/// region is a single line.
fn region_end(lines: &[String], claims: &[Claim], start: usize, level: usize, unit: usize) -> usize {
    let first = classify(dedent(&lines[start], level * unit, unit)).kind;
    let free = |i: usize| i < lines.len() && claims[i] == Claim::Free;
    let mut end = start + 1;
    match first {
        BlockKind::Code { .. } => {
            while free(end) {
                let closing = is_fence(&lines[end]);
                end += 1;
                if closing {
                    break;
                }
            }
        }
        BlockKind::Paragraph | BlockKind::Quote if level == 0 => {
            while free(end)
                && !lines[end].trim().is_empty()
                && indent_level(&lines[end], unit) == 0
                && classify(&lines[end]).kind == first
            {
                end += 1;
            }
        }
        _ => {}
    }
    end
}

fn top_level_before(claims: &[Claim]) -> Option<BlockId> {
    claims.iter().rev().find_map(|claim| match claim {
        Claim::Block { id, depth: 0 } => Some(id.clone()),
        Claim::Region { id, level: 0, .. } => Some(id.clone()),
        _ => None,
    })
}

/// The nearest preceding line exactly one level shallower, if it can hold
/// children, and the nearest sibling between it and the region.
fn parent_at(
    claims: &[Claim],
    tree: &BlockTree,
    level: usize,
) -> Result<(BlockId, Option<BlockId>), UnmatchedReason> {
    let mut after = None;
    for claim in claims.iter().rev() {
        let claim_level = match claim {
            Claim::Free => continue,
            Claim::Block { depth, .. } => *depth,
            Claim::Region { level, .. } | Claim::Rejected { level } => *level,
        };
        if claim_level == level && after.is_none() {
            after = match claim {
                Claim::Block { id, .. } | Claim::Region { id, .. } => Some(id.clone()),
                _ => None,
            };
        }
        if claim_level >= level {
            continue;
        }
        if claim_level + 1 < level {
            return Err(UnmatchedReason::NoParentAtLevel);
        }
        let parent = match claim {
            Claim::Block { id, .. } => match tree.get(id) {
                Some(block) if block.supports_children() => id.clone(),
                Some(block) => {
                    return Err(UnmatchedReason::ParentRejectsChildren {
                        parent_type: block.kind().tag().to_string(),
                    });
                }
                None => return Err(UnmatchedReason::ParentUnmatched),
            },
            Claim::Region { id, kind, .. } if kind.supports_children() => id.clone(),
            Claim::Region { kind, .. } => {
                return Err(UnmatchedReason::ParentRejectsChildren {
                    parent_type: kind.tag().to_string(),
                });
            }
            Claim::Rejected { .. } | Claim::Free => return Err(UnmatchedReason::ParentUnmatched),
        };
        return Ok((parent, after));
    }
    Err(UnmatchedReason::NoParentAtLevel)
}
