pub mod classifier;
pub mod differ;
pub mod digest;
pub mod engine;
pub mod integrity;
pub mod manifest;
pub mod scheduler;

pub use classifier::{DirectoryHeuristic, IgnoreReason, KeyKind, PathClassifier};
pub use differ::{list_all_keys, LocalState, PlanSummary, SyncAction, SyncPlan, TreeDiffer};
pub use digest::{file_digest, DigestAlgorithm};
pub use engine::{FailedTransfer, SyncConfig, SyncEngine, SyncReport};
pub use integrity::{IntegrityChecker, SyncMode, TransferDecision};
pub use manifest::DigestManifest;
pub use scheduler::{
    FailurePolicy, SchedulerConfig, TransferOutcome, TransferScheduler, WorkerPool,
};
