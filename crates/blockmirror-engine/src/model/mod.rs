//! # Block Model
//!
//! - **`kind`**: `BlockKind`, the closed set of block variants
//! - **`registry`**: type table keyed by wire tag and the local text prefix table
//! - **`record`**: `RemoteRecord`, the lossless wire form of a block
//! - **`block`**: `Block` and `BlockId`; render/parse/serialize and dirty tracking
//! - **`tree`**: `BlockTree` arena holding hierarchy and document order
//! - **`editability`**: summary of read-only and unsupported content

pub mod block;
pub mod editability;
pub mod kind;
pub mod record;
pub mod registry;
pub mod tree;

pub use block::{Block, BlockId};
pub use editability::EditabilitySummary;
pub use kind::{BlockKind, ListKind};
pub use record::{RecordNode, RemoteRecord};
pub use tree::BlockTree;
