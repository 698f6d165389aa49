/// Dependency health tracking
///
/// This module provides:
/// - The in-memory health registry (component name → health status)
/// - The boxed health-check function type invoked by the supervisor
/// - Ready-made checks for the embedded SQLite stores
///
/// Health checks are caller-supplied probes. The supervisor only invokes them
/// and records the outcome; it never interprets what "healthy" means for a
/// particular dependency.
pub mod checks;
pub mod registry;

pub use checks::sqlite_store;
pub use registry::{HealthRegistry, HealthStatus};

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Health-check function: `Ok(())` means the dependency is usable
pub type HealthCheck = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Box an async closure as a [`HealthCheck`]
///
/// ```rust,ignore
/// let check = health_check(|| async { cache.ping().await });
/// ```
pub fn health_check<F, Fut>(check: F) -> HealthCheck
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(check()))
}
