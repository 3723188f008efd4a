pub mod cache;
pub mod editing;
pub mod error;
pub mod model;
pub mod options;
pub mod remote;
pub mod sync;

// Re-export key types for easier usage
pub use cache::{CachedSnapshot, FileCache, SnapshotCache};
pub use editing::{Cmd, Document, RangeMapping, TextHost};
pub use error::{MappingError, ModelError, Result, SyncError};
pub use model::{Block, BlockId, BlockKind, BlockTree, EditabilitySummary, RecordNode, RemoteRecord};
pub use options::SyncOptions;
pub use remote::{InMemoryRemote, RemoteError, RemoteService};
pub use sync::{Plan, SyncHandle, SyncReport, SyncSession};
