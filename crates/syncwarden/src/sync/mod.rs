//! Sync planning and execution.

pub mod executor;
pub mod hook;
pub mod operation;
pub mod plan;

pub use executor::{CancellationToken, ExecutorSettings, SyncExecutor};
pub use hook::{Hook, HookDeletePolicy, HookPhase};
pub use operation::{
    Backoff, Initiator, InvalidTransition, OperationPhase, ResourceResult, ResourceResultStatus,
    RetryPolicy, SyncOperation, SyncOptions, SyncResult,
};
pub use plan::{kind_tier, plan, ActionKind, ExecutionPlan, SkippedAction, SyncAction, Wave, WavePhase};
