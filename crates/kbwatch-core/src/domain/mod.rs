//! Domain model for kbwatch runs.

pub mod error;
pub mod item;
pub mod run;

pub use error::{NotifyError, RunError, ScanError};
pub use item::{
    AttemptOutcome, FailedItem, ItemEvidence, ItemResolution, RetryAttempt, RowHandle,
    RowSelector, ScanOutcome,
};
pub use run::{FailedItemReport, RunResult, RunStatus};
