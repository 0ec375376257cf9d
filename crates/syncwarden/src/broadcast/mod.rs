//! Broadcasting of sync operation progress.

pub mod operation_progress;
pub mod progress;

pub use operation_progress::{OperationBroadcaster, OperationEvent};
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
