use std::sync::Arc;

use crate::oplog::OperationLog;
use crate::remote::RemoteService;

pub mod coordinator;
pub mod runner;
pub mod saved_items;
pub mod slot;
pub mod tracker;

pub use coordinator::ManagedOperations;
pub use runner::{run_entry, FailureReason, RunOutcome};
pub use saved_items::{ResyncOutcome, SavedItem, SavedItems};
pub use slot::OperationSlot;
pub use tracker::{OperationTracker, Reconciled};

#[derive(Clone)]
pub struct SyncContext {
  pub log: Arc<dyn OperationLog>,
  pub remote: Arc<dyn RemoteService>,
  pub saved: SavedItems
}
