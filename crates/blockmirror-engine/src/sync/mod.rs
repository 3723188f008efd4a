//! # Sync pipeline
//!
//! - **`session`**: `SyncSession`, the per-page owner of text, tree and mapping
//! - **`orphans`**: detection of typed text that belongs to no block
//! - **`plan`** / **`planner`**: the pure diff from tree state to remote operations
//! - **`executor`**: `SyncHandle`, which applies a plan against a `RemoteService`
//! - **`report`**: what a run did and which items failed
//! - **`bootstrap`**: loading a page, from the snapshot cache when current

pub mod bootstrap;
pub mod executor;
pub mod orphans;
pub mod plan;
pub mod planner;
pub mod report;
pub mod session;

pub use bootstrap::{Bootstrap, bootstrap, open_page};
pub use executor::SyncHandle;
pub use orphans::{Detection, OrphanRegion, Unmatched, UnmatchedReason, detect_orphans};
pub use plan::{CreateOp, DeleteOp, Plan, PlanSummary, TypeChangeOp, UpdateOp};
pub use planner::build_plan;
pub use report::{FailedItem, OperationKind, SyncReport};
pub use session::SyncSession;
