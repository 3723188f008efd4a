use serde::Serialize;

use crate::model::BlockId;
use crate::remote::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    TypeChange,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::TypeChange => "type change",
        })
    }
}

/// One operation that did not reach the remote service; its block stays dirty
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItem {
    pub block_id: BlockId,
    pub operation: OperationKind,
    pub error: String,
    pub retryable: bool,
    /// Not attempted because a create it depends on failed
    pub dependency_failed: bool,
}

impl FailedItem {
    pub(crate) fn remote(block_id: BlockId, operation: OperationKind, error: &RemoteError) -> Self {
        Self {
            block_id,
            operation,
            error: error.to_string(),
            retryable: error.is_retryable(),
            dependency_failed: false,
        }
    }

    pub(crate) fn local(block_id: BlockId, operation: OperationKind, error: impl ToString) -> Self {
        Self {
            block_id,
            operation,
            error: error.to_string(),
            retryable: false,
            dependency_failed: false,
        }
    }

    pub(crate) fn dependency(block_id: BlockId, on: &BlockId) -> Self {
        Self {
            block_id,
            operation: OperationKind::Create,
            error: format!("depends on {on}, which was not created"),
            retryable: true,
            dependency_failed: true,
        }
    }
}

/// Outcome of one sync run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub type_changed: usize,
    pub failed: Vec<FailedItem>,
    pub unmatched: usize,
    /// The plan needed confirmation and the caller said no
    pub declined: bool,
    /// The text was edited while the run was in flight
    pub document_changed: bool,
}

impl SyncReport {
    pub fn applied(&self) -> usize {
        self.created + self.updated + self.deleted + self.type_changed
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.declined
    }

    pub fn failed_for(&self, operation: OperationKind) -> impl Iterator<Item = &FailedItem> {
        self.failed.iter().filter(move |f| f.operation == operation)
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.declined {
            return f.write_str("sync declined, nothing sent");
        }
        write!(
            f,
            "{} created, {} updated, {} deleted, {} type changes, {} failed",
            self.created,
            self.updated,
            self.deleted,
            self.type_changed,
            self.failed.len()
        )?;
        if self.unmatched > 0 {
            write!(f, ", {} unmatched", self.unmatched)?;
        }
        Ok(())
    }
}
