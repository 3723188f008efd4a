use std::collections::HashSet;

use log::debug;

use crate::editing::RangeMapping;
use crate::model::{Block, BlockId, BlockTree};
use crate::sync::orphans::{Detection, Unmatched, UnmatchedReason};
use crate::sync::plan::{CreateOp, DeleteOp, Plan, TypeChangeOp, UpdateOp};

/// Diff the current tree against its last synced state.
///
/// Pure: reads the tree, the last mapping refresh and an orphan detection,
/// and never touches any of them, so it can be called repeatedly for preview.
pub fn build_plan(tree: &BlockTree, mapping: &RangeMapping, detection: &Detection) -> Plan {
    let mut plan = Plan {
        unmatched: detection.unmatched.clone(),
        ..Plan::default()
    };

    for id in tree.walk() {
        let Some(block) = tree.get(&id) else {
            continue;
        };
        if mapping.is_invalid(&id) || detection.is_held_back(&id) {
            continue;
        }
        let ancestor_missing = tree.ancestors(&id).iter().any(|a| mapping.is_missing(a));
        if mapping.is_missing(&id) {
            // Temp blocks have nothing remote to delete; descendants of a
            // deleted block go with it.
            if !id.is_temp() && !ancestor_missing {
                plan.deletes.push(DeleteOp {
                    block_id: id.clone(),
                    block_type: block.synced_type().to_string(),
                    content: block.synced_text.clone(),
                });
            }
            continue;
        }
        let Some(lines) = mapping.range(&id) else {
            continue;
        };
        if ancestor_missing {
            plan.unmatched.push(unmatched(block, lines, UnmatchedReason::ParentRemoved));
            continue;
        }

        if id.is_temp() {
            if block.kind().is_creatable() {
                plan.creates.push(pending_create(tree, mapping, block));
            } else {
                let reason = not_creatable(block);
                plan.unmatched.push(unmatched(block, lines, reason));
            }
            continue;
        }
        if !block.is_dirty() {
            continue;
        }
        if !block.type_changed() {
            plan.updates.push(UpdateOp {
                block_id: id.clone(),
                kind: block.kind().clone(),
                content: block.text().to_string(),
                record: block.serialize(),
            });
            continue;
        }
        match type_change_blocker(tree, block) {
            Some(reason) => plan.unmatched.push(unmatched(block, lines, reason)),
            None => plan.type_changes.push(TypeChangeOp {
                block_id: id.clone(),
                old_type: block.synced_type().to_string(),
                new_type: block.kind().tag().to_string(),
                kind: block.kind().clone(),
                content: block.text().to_string(),
                record: block.serialize(),
                has_children: !block.children().is_empty(),
            }),
        }
    }

    for region in &detection.regions {
        let block = Block::new_local(region.temp_id.clone(), region.kind.clone(), region.content.clone());
        plan.creates.push(CreateOp {
            temp_id: region.temp_id.clone(),
            kind: region.kind.clone(),
            content: region.content.clone(),
            record: block.serialize(),
            parent_block_id: region.parent_block_id.clone(),
            after_block_id: region.after_block_id.clone(),
            lines: Some(region.lines.clone()),
        });
    }
    order_parent_first(&mut plan.creates);

    plan.needs_confirmation = !plan.deletes.is_empty()
        || !plan.unmatched.is_empty()
        || plan.type_changes.iter().any(|t| t.has_children);
    debug!("built plan: {}", plan.summary());
    plan
}

fn unmatched(block: &Block, lines: std::ops::Range<usize>, reason: UnmatchedReason) -> Unmatched {
    Unmatched {
        lines,
        text: block.text().to_string(),
        block_id: Some(block.id().clone()),
        reason,
    }
}

fn not_creatable(block: &Block) -> UnmatchedReason {
    UnmatchedReason::NotCreatable {
        type_name: block.kind().tag().to_string(),
    }
}

/// Why a type change cannot be expressed as delete plus create, if it cannot
fn type_change_blocker(tree: &BlockTree, block: &Block) -> Option<UnmatchedReason> {
    if !block.kind().is_creatable() {
        return Some(not_creatable(block));
    }
    if block.children().is_empty() {
        return None;
    }
    if !block.kind().supports_children() {
        return Some(UnmatchedReason::ParentRejectsChildren {
            parent_type: block.kind().tag().to_string(),
        });
    }
    tree.descendants(block.id())
        .iter()
        .filter_map(|d| tree.get(d))
        .find(|d| !d.kind().is_creatable())
        .map(|d| UnmatchedReason::ChildrenNotRecreatable {
            type_name: d.kind().tag().to_string(),
        })
}

/// A create for a block already in the tree whose earlier create failed
pub(crate) fn pending_create(tree: &BlockTree, mapping: &RangeMapping, block: &Block) -> CreateOp {
    let after_block_id = tree
        .siblings(block.id())
        .iter()
        .take_while(|s| *s != block.id())
        .filter(|s| mapping.range(s).is_some())
        .last()
        .cloned();
    let mut record = block.serialize();
    record.id = None;
    record.has_children = false;
    CreateOp {
        temp_id: block.id().clone(),
        kind: block.kind().clone(),
        content: block.text().to_string(),
        record,
        parent_block_id: block.parent().cloned(),
        after_block_id,
        lines: None,
    }
}

/// Stable reorder so every create follows the creates it references.
fn order_parent_first(creates: &mut Vec<CreateOp>) {
    let planned: HashSet<BlockId> = creates.iter().map(|c| c.temp_id.clone()).collect();
    let mut placed: HashSet<BlockId> = HashSet::new();
    let mut pending = std::mem::take(creates);
    while !pending.is_empty() {
        // A reference cycle keeps the remaining order.
        let next = pending
            .iter()
            .position(|op| {
                op.dependencies()
                    .all(|dep| !planned.contains(dep) || placed.contains(dep))
            })
            .unwrap_or(0);
        let op = pending.remove(next);
        placed.insert(op.temp_id.clone());
        creates.push(op);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BlockKind;
    use crate::model::RemoteRecord;

    fn create(id: u64, parent: Option<u64>, after: Option<u64>) -> CreateOp {
        CreateOp {
            temp_id: BlockId::Temp(id),
            kind: BlockKind::Paragraph,
            content: String::new(),
            record: RemoteRecord::new("paragraph", serde_json::json!({})),
            parent_block_id: parent.map(BlockId::Temp),
            after_block_id: after.map(BlockId::Temp),
            lines: None,
        }
    }

    #[test]
    fn children_follow_parents() {
        let mut creates = vec![
            create(3, Some(2), None),
            create(2, Some(1), None),
            create(4, None, Some(1)),
            create(1, None, None),
        ];
        order_parent_first(&mut creates);
        let order: Vec<_> = creates.iter().map(|c| c.temp_id.clone()).collect();
        assert_eq!(order, [
            BlockId::Temp(1),
            BlockId::Temp(2),
            BlockId::Temp(3),
            BlockId::Temp(4)
        ]);
    }

    #[test]
    fn external_dependencies_do_not_block() {
        let mut creates = vec![create(2, Some(9), None), create(1, None, None)];
        order_parent_first(&mut creates);
        assert_eq!(creates[0].temp_id, BlockId::Temp(2));
    }
}
