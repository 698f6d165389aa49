/// Automatic recovery
///
/// This module provides:
/// - The boxed recovery-function type registered per component
/// - The coordinator that decides which components are due for recovery and
///   runs their procedures under a timeout
/// - A ready-made recovery procedure for the SQLite stores (repair in place)
///
/// Recovery procedures may run several times for the same fault (once per
/// cycle until the component is healthy again), so they must be idempotent.
pub mod coordinator;

pub use coordinator::{RecoveryCoordinator, RecoveryOutcome};

use crate::storage::StorageResilience;
use anyhow::Context;
use futures::future::BoxFuture;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

/// Recovery procedure for one component
pub type RecoveryFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Box an async closure as a [`RecoveryFn`]
pub fn recovery_fn<F, Fut>(procedure: F) -> RecoveryFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(procedure()))
}

/// Recovery procedure that repairs the SQLite store at `path`
///
/// Runs [`StorageResilience::repair`] on a blocking thread. Repair always
/// takes a fresh pre-repair copy, so repeated runs are safe.
pub fn store_recovery(path: impl Into<PathBuf>) -> RecoveryFn {
    let path = path.into();
    recovery_fn(move || {
        let path = path.clone();
        async move {
            let report = tokio::task::spawn_blocking(move || StorageResilience::new().repair(&path))
                .await
                .context("Store repair task failed")??;

            tracing::info!(
                path = %report.path.display(),
                method = ?report.method,
                backup = %report.backup_path.display(),
                "Store recovered by repair"
            );
            Ok(())
        }
    })
}
