// Restore Orchestration
// Confirmation gating, exclusivity, and sequenced per-tier restores with health checks

pub mod gate;
pub mod job;
pub mod lock;
pub mod orchestrator;
pub mod primitive;
pub mod retry;

pub use gate::{ConfirmationGate, GateDecision};
pub use job::{FailureKind, JobOutcome, RestoreJob, RestoreOutcome, RestoreResult, TierFailure};
pub use lock::{RestoreLocks, TierSetGuard};
pub use orchestrator::{RestoreOrchestrator, RestoreRequest};
pub use primitive::{PgRestorePrimitive, PrimitiveError, RestorePrimitive, TierRestore};
pub use retry::RetryPolicy;
