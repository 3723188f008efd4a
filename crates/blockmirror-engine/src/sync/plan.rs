use std::ops::Range;

use serde::Serialize;

use crate::model::{BlockId, BlockKind, RemoteRecord};
use crate::sync::orphans::Unmatched;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateOp {
    pub block_id: BlockId,
    pub kind: BlockKind,
    pub content: String,
    pub record: RemoteRecord,
}

/// Delete of the old block plus create of the new type at the same position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeChangeOp {
    pub block_id: BlockId,
    pub old_type: String,
    pub new_type: String,
    pub kind: BlockKind,
    pub content: String,
    pub record: RemoteRecord,
    /// Children are deleted with the old block and re-created under the new one
    pub has_children: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteOp {
    pub block_id: BlockId,
    pub block_type: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateOp {
    pub temp_id: BlockId,
    pub kind: BlockKind,
    pub content: String,
    pub record: RemoteRecord,
    pub parent_block_id: Option<BlockId>,
    pub after_block_id: Option<BlockId>,
    /// Lines of a newly detected region; `None` for a block already in the tree
    pub lines: Option<Range<usize>>,
}

impl CreateOp {
    /// Ids this create cannot be sent before
    pub fn dependencies(&self) -> impl Iterator<Item = &BlockId> {
        self.parent_block_id
            .iter()
            .chain(self.after_block_id.iter())
    }
}

/// Everything one sync run would send, in execution order per kind
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Plan {
    pub updates: Vec<UpdateOp>,
    pub type_changes: Vec<TypeChangeOp>,
    pub deletes: Vec<DeleteOp>,
    /// Parent-before-child order
    pub creates: Vec<CreateOp>,
    pub unmatched: Vec<Unmatched>,
    pub needs_confirmation: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub type_changes: usize,
    pub unmatched: usize,
}

impl Plan {
    pub fn has_changes(&self) -> bool {
        self.operation_count() > 0
    }

    /// Remote operations the plan costs; a type change is a delete plus a create
    pub fn operation_count(&self) -> usize {
        self.updates.len() + self.deletes.len() + self.creates.len() + 2 * self.type_changes.len()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            creates: self.creates.len(),
            updates: self.updates.len(),
            deletes: self.deletes.len(),
            type_changes: self.type_changes.len(),
            unmatched: self.unmatched.len(),
        }
    }
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} type changes, {} unmatched",
            self.creates, self.updates, self.deletes, self.type_changes, self.unmatched
        )
    }
}
