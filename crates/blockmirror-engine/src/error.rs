use std::ops::Range;

use thiserror::Error;

use crate::model::BlockId;
use crate::remote::RemoteError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("remote record of type {0} has no id")]
    MissingId(String),
    #[error("unknown block: {0}")]
    UnknownBlock(BlockId),
    #[error("block {0} already exists")]
    DuplicateId(BlockId),
    #[error("block {0} is not a top-level block")]
    NotTopLevel(BlockId),
    #[error("{type_name} block {parent} cannot hold children")]
    ChildrenNotSupported { parent: BlockId, type_name: String },
    #[error("parent/child references of {0} are inconsistent")]
    Inconsistent(BlockId),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MappingError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("line range {lines:?} is outside the document ({line_count} lines)")]
    OutOfRange {
        lines: Range<usize>,
        line_count: usize,
    },
    #[error("block {0} has no anchor")]
    Unbound(BlockId),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("a sync run is already in progress")]
    Busy,
}

pub type Result<T> = std::result::Result<T, SyncError>;
