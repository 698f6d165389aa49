/// Recovery coordinator - runs registered recovery procedures
///
/// This module provides the recovery orchestration layer that:
/// - Holds one recovery procedure per component
/// - Selects components that have failed `threshold` consecutive checks
/// - Runs each selected procedure under a per-attempt timeout
/// - Resets the component's error count on success
///
/// Failures are logged and left in place; the next cycle retries them.
use super::RecoveryFn;
use crate::config::{DEFAULT_RECOVERY_THRESHOLD, DEFAULT_RECOVERY_TIMEOUT};
use crate::health::HealthRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Record of one recovery attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub component: String,

    pub succeeded: bool,

    /// Failure or timeout description
    pub error: Option<String>,

    pub duration_ms: u64,

    pub attempted_at: DateTime<Utc>,
}

/// Recovery coordinator - per-component procedures plus trigger policy
pub struct RecoveryCoordinator {
    /// Registered procedures by component name
    procedures: RwLock<HashMap<String, RecoveryFn>>,

    /// Consecutive failures before a component is due for recovery
    threshold: u32,

    /// Budget for a single procedure
    attempt_timeout: Duration,
}

impl RecoveryCoordinator {
    pub fn new(threshold: u32, attempt_timeout: Duration) -> Self {
        Self {
            procedures: RwLock::new(HashMap::new()),
            threshold,
            attempt_timeout,
        }
    }

    /// Register (or replace) the recovery procedure for a component
    pub fn register(&self, component: impl Into<String>, procedure: RecoveryFn) {
        let component = component.into();
        tracing::debug!(component = %component, "Recovery procedure registered");
        self.procedures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(component, procedure);
    }

    pub fn has_procedure(&self, component: &str) -> bool {
        self.procedures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(component)
    }

    /// Components with a registered procedure, sorted
    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .procedures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Unhealthy components whose consecutive failures reached the threshold
    pub fn candidates(&self, registry: &HealthRegistry) -> Vec<String> {
        registry.recovery_candidates(self.threshold)
    }

    /// Run the procedures for `components`, one after another
    ///
    /// Components without a procedure are skipped. A successful procedure
    /// resets the component's consecutive error count; a failed or timed-out
    /// one leaves the registry untouched.
    pub async fn attempt(&self, registry: &HealthRegistry, components: &[String]) -> Vec<RecoveryOutcome> {
        let operation_id = uuid::Uuid::new_v4().to_string();
        let mut outcomes = Vec::new();

        for component in components {
            // Clone the procedure out so no lock is held across the await
            let procedure = self
                .procedures
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(component)
                .cloned();

            let Some(procedure) = procedure else {
                tracing::debug!(
                    component = %component,
                    "No recovery procedure registered, skipping"
                );
                continue;
            };

            tracing::info!(
                component = %component,
                operation_id = %operation_id,
                timeout = %humantime::format_duration(self.attempt_timeout),
                "Attempting recovery"
            );

            let attempted_at = Utc::now();
            let started = Instant::now();
            let result = tokio::time::timeout(self.attempt_timeout, procedure()).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let error = match result {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{:#}", e)),
                Err(_) => Some(format!(
                    "recovery timed out after {}",
                    humantime::format_duration(self.attempt_timeout)
                )),
            };

            match &error {
                None => {
                    registry.reset_errors(component);
                    tracing::info!(
                        component = %component,
                        operation_id = %operation_id,
                        duration_ms,
                        "Recovery succeeded"
                    );
                }
                Some(e) => {
                    tracing::error!(
                        component = %component,
                        operation_id = %operation_id,
                        duration_ms,
                        error = %e,
                        "Recovery failed"
                    );
                }
            }

            outcomes.push(RecoveryOutcome {
                component: component.clone(),
                succeeded: error.is_none(),
                error,
                duration_ms,
                attempted_at,
            });
        }

        outcomes
    }
}

impl Default for RecoveryCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_RECOVERY_THRESHOLD, DEFAULT_RECOVERY_TIMEOUT)
    }
}

impl std::fmt::Debug for RecoveryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryCoordinator")
            .field("procedures", &self.registered())
            .field("threshold", &self.threshold)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}
