pub mod config;
pub mod error;
pub mod event_log;
pub mod events;
pub mod types;
pub mod validation;

pub use config::{Config, DirectoryMapping, FileMapping, Group, SourceConfig, TargetConfig, Transform};
pub use error::{BranchLocation, FileError, SyncError};
pub use event_log::{EventLogError, JsonlEventLog};
pub use events::{Event, EventKind};
pub use types::{
    FileChange, FileJob, FileProcessResult, GroupState, GroupStatus, Results, SourceState,
    TargetState, TargetStatus,
};
