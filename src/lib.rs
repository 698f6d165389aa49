// Allow complex types where needed for boxed async callbacks
#![allow(clippy::type_complexity)]

pub mod config;
pub mod degradation;
pub mod health;
pub mod mode;
pub mod recovery;
pub mod storage;
pub mod supervisor;

// Re-export main types for convenience
pub use config::{StoreConfig, SupervisorConfig};
pub use degradation::{DegradationError, DegradationLayer};
pub use health::{health_check, HealthCheck, HealthRegistry, HealthStatus};
pub use mode::{Mode, ModeController};
pub use recovery::{recovery_fn, RecoveryCoordinator, RecoveryFn, RecoveryOutcome};
pub use storage::{BackupRecord, RepairMethod, RepairReport, StorageError, StorageResilience};
pub use supervisor::{CycleReport, Supervisor};

use thiserror::Error;

/// Well-known component name of the primary data store
pub const PRIMARY_STORE: &str = "database";

/// Well-known component name of the secondary (auxiliary) data store
pub const SECONDARY_STORE: &str = "secondary_store";

// Top-level error type for the supervisor surface
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] ::config::ConfigError),

    #[error("No async runtime available: {0}")]
    Runtime(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Degradation(#[from] DegradationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;

#[cfg(test)]
mod lib_tests;
