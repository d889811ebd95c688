//! One-shot jobs run from the CLI or the interval scheduler.

mod load;
mod sync;

pub use load::{run_load, LoadReport};
pub use sync::{run_sync, AssociationSummary, SyncReport};
