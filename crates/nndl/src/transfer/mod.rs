//! Turning a content URL into a file on disk.

mod engine;
mod plan;
mod progress;

pub use engine::{TransferEngine, TransferReport};
pub use plan::{Partition, TransferPlan, plan};
pub use progress::{
    LogProgress, NoopProgress, ProgressObserver, ProgressUpdate, TransferState, format_bytes,
    format_speed,
};
