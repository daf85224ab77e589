pub mod batch_processor;
pub mod dependency_resolver;
pub mod directory_processor;
pub mod engine;
pub mod external_id;
pub mod group_orchestrator;
pub mod metrics_recorder;
pub mod options;
pub mod progress_tracker;
pub mod repository_sync;
pub mod state;

pub use engine::Engine;
pub use external_id::generate_sync_run_external_id;
pub use group_orchestrator::{GroupOrchestrator, GroupOutcome};
pub use metrics_recorder::{
    FileChangeRecord, MetricsError, MetricsRecorder, NullMetricsRecorder, SqliteMetricsRecorder,
    SyncRunRecord, TargetResultRecord,
};
pub use options::Options;
pub use progress_tracker::ProgressTracker;
pub use repository_sync::{PrAction, RepositorySync, TargetOutcome, TargetOutcomeStatus};
pub use state::{DiscoverError, GitStateDiscoverer, StateDiscoverer, SyncState};
