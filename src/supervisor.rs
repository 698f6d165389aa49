/// Supervisor - owns the health, mode, recovery, degradation and storage
/// components and drives the background health cycle
///
/// One cycle:
/// 1. Run every registered health check concurrently, each under the check
///    timeout, and record the results
/// 2. Re-evaluate the mode from the health snapshot (skipped in Maintenance)
/// 3. Collect components that reached the recovery threshold; if any, enter
///    Recovery and run their procedures
/// 4. After recovery attempts, re-check health and re-evaluate the mode
///
/// Nothing inside a cycle is returned as an error: failures are logged and
/// reflected in the registry and the mode.
use crate::config::SupervisorConfig;
use crate::degradation::DegradationLayer;
use crate::health::{sqlite_store, HealthCheck, HealthRegistry, HealthStatus};
use crate::mode::{Mode, ModeController};
use crate::recovery::{store_recovery, RecoveryCoordinator, RecoveryFn, RecoveryOutcome};
use crate::storage::{BackupRecord, RepairReport, StorageResilience};
use crate::{SupervisorError, SupervisorResult, PRIMARY_STORE, SECONDARY_STORE};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Result of one health cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// Mode at the end of the cycle
    pub mode: Mode,

    /// Components unhealthy at the end of the cycle, sorted
    pub unhealthy: Vec<String>,

    /// Recovery attempts made during the cycle
    pub recovery: Vec<RecoveryOutcome>,
}

/// Handle to the background cycle task
struct Running {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct SupervisorInner {
    config: SupervisorConfig,
    registry: HealthRegistry,
    mode: ModeController,
    recovery: RecoveryCoordinator,
    degradation: DegradationLayer,
    storage: StorageResilience,
    checks: RwLock<HashMap<String, HealthCheck>>,
    history: RwLock<VecDeque<RecoveryOutcome>>,
    running: Mutex<Option<Running>>,

    /// Serializes background and manual cycles
    cycle: tokio::sync::Mutex<()>,
}

/// Self-healing supervisor; cheap to clone, clones share state
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    /// Create a supervisor from a validated configuration
    pub fn new(config: SupervisorConfig) -> SupervisorResult<Self> {
        config.validate()?;

        let mode = ModeController::new(config.critical_components.iter().cloned());
        let recovery = RecoveryCoordinator::new(config.recovery_threshold, config.recovery_timeout);

        Ok(Self {
            inner: Arc::new(SupervisorInner {
                registry: HealthRegistry::new(),
                mode,
                recovery,
                degradation: DegradationLayer::new(),
                storage: StorageResilience::new(),
                checks: RwLock::new(HashMap::new()),
                history: RwLock::new(VecDeque::new()),
                running: Mutex::new(None),
                cycle: tokio::sync::Mutex::new(()),
                config,
            }),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    // ==================== LIFECYCLE ====================

    /// Start the background health cycle on the current tokio runtime
    ///
    /// No-op if already running. The first cycle runs one interval after
    /// start.
    pub fn start(&self) -> SupervisorResult<()> {
        let mut running = self.inner.running.lock().unwrap_or_else(PoisonError::into_inner);

        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            tracing::debug!("Supervisor already running");
            return Ok(());
        }

        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| SupervisorError::Runtime(e.to_string()))?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let interval = self.inner.config.check_interval;
        let task = handle.spawn(cycle_loop(Arc::downgrade(&self.inner), interval, shutdown_rx));

        tracing::info!(
            interval = %humantime::format_duration(interval),
            checks = self.check_names().len(),
            "Supervisor started"
        );

        *running = Some(Running { shutdown, task });
        Ok(())
    }

    /// Signal the background cycle to stop and return immediately
    ///
    /// A cycle already in progress finishes on its own timeouts.
    pub fn stop(&self) {
        let running = self
            .inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(running) = running {
            let _ = running.shutdown.send(true);
            tracing::info!("Supervisor stop requested");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    /// Run one full health cycle now
    pub async fn run_cycle(&self) -> CycleReport {
        let _cycle = self.inner.cycle.lock().await;
        let inner = &self.inner;
        let cycle_id = uuid::Uuid::new_v4().to_string();

        tracing::debug!(cycle_id = %cycle_id, "Health cycle started");

        self.run_checks().await;
        inner.mode.evaluate(&inner.registry.snapshot());

        let candidates = inner.recovery.candidates(&inner.registry);
        let mut recovery = Vec::new();

        if !candidates.is_empty() {
            tracing::warn!(
                cycle_id = %cycle_id,
                components = ?candidates,
                threshold = inner.recovery.threshold(),
                "Components due for recovery"
            );

            inner.mode.enter_recovery();
            recovery = inner.recovery.attempt(&inner.registry, &candidates).await;
            self.record_history(&recovery);

            if !recovery.is_empty() {
                self.run_checks().await;
            }
            inner.mode.evaluate(&inner.registry.snapshot());
        }

        let report = CycleReport {
            mode: inner.mode.mode(),
            unhealthy: inner.registry.unhealthy(),
            recovery,
        };

        tracing::debug!(
            cycle_id = %cycle_id,
            mode = %report.mode,
            unhealthy = report.unhealthy.len(),
            attempts = report.recovery.len(),
            "Health cycle finished"
        );

        report
    }

    /// Invoke all checks concurrently and record their results
    async fn run_checks(&self) {
        let checks: Vec<(String, HealthCheck)> = self
            .inner
            .checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, check)| (name.clone(), check.clone()))
            .collect();

        let timeout = self.inner.config.check_timeout;
        let results = join_all(checks.into_iter().map(|(name, check)| async move {
            let result = match tokio::time::timeout(timeout, check()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("{:#}", e)),
                Err(_) => Err(format!(
                    "health check timed out after {}",
                    humantime::format_duration(timeout)
                )),
            };
            (name, result)
        }))
        .await;

        for (name, result) in results {
            if let Err(e) = &result {
                tracing::warn!(component = %name, error = %e, "Health check failed");
            }
            let status = self.inner.registry.record_check(&name, result);
            if status.healthy {
                tracing::debug!(component = %name, "Health check passed");
            }
        }
    }

    fn record_history(&self, outcomes: &[RecoveryOutcome]) {
        let limit = self.inner.config.recovery_history;
        let mut history = self.inner.history.write().unwrap_or_else(PoisonError::into_inner);
        history.extend(outcomes.iter().cloned());
        while history.len() > limit {
            history.pop_front();
        }
    }

    // ==================== REGISTRATION ====================

    /// Replace the full set of health checks
    ///
    /// Every named component is seeded in the registry as healthy.
    pub fn set_health_checks(&self, checks: HashMap<String, HealthCheck>) {
        self.inner.registry.initialize(checks.keys().cloned());
        *self.inner.checks.write().unwrap_or_else(PoisonError::into_inner) = checks;
    }

    /// Add (or replace) a single health check
    pub fn add_health_check(&self, component: impl Into<String>, check: HealthCheck) {
        let component = component.into();
        self.inner.registry.initialize([component.clone()]);
        self.inner
            .checks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(component, check);
    }

    /// Names of the registered health checks, sorted
    pub fn check_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn register_recovery_fn(&self, component: impl Into<String>, procedure: RecoveryFn) {
        self.inner.recovery.register(component, procedure);
    }

    /// Install the built-in check and repair procedure for each configured
    /// SQLite store, under the well-known component names
    pub fn register_store_defaults(&self) {
        let stores = [
            (PRIMARY_STORE, self.inner.config.stores.primary.clone()),
            (SECONDARY_STORE, self.inner.config.stores.secondary.clone()),
        ];

        for (component, path) in stores {
            if let Some(path) = path {
                tracing::info!(component, path = %path.display(), "Watching SQLite store");
                self.add_health_check(component, sqlite_store(path.clone()));
                self.register_recovery_fn(component, store_recovery(path));
            }
        }
    }

    /// Subscribe to mode changes
    pub fn register_callback<F>(&self, callback: F)
    where
        F: Fn(Mode) + Send + Sync + 'static,
    {
        self.inner.mode.register_callback(callback);
    }

    // ==================== MODE ====================

    pub fn set_mode(&self, mode: Mode, message: impl Into<String>) -> bool {
        self.inner.mode.set_mode(mode, message)
    }

    pub fn mode(&self) -> Mode {
        self.inner.mode.mode()
    }

    pub fn message(&self) -> String {
        self.inner.mode.message()
    }

    pub fn enable_maintenance(&self, message: impl Into<String>, duration: Duration) {
        self.inner.mode.enable_maintenance(message, duration);
    }

    pub fn disable_maintenance(&self) {
        self.inner.mode.disable_maintenance();
    }

    pub fn scheduled_end(&self) -> Option<DateTime<Utc>> {
        self.inner.mode.scheduled_end()
    }

    pub fn mode_controller(&self) -> &ModeController {
        &self.inner.mode
    }

    // ==================== OBSERVATION ====================

    /// Copy of every component's health
    pub fn health_status(&self) -> HashMap<String, HealthStatus> {
        self.inner.registry.snapshot()
    }

    pub fn registry(&self) -> &HealthRegistry {
        &self.inner.registry
    }

    /// Most recent recovery attempts, oldest first
    pub fn recovery_history(&self) -> Vec<RecoveryOutcome> {
        self.inner
            .history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Aggregate status document for an external endpoint
    pub fn status(&self) -> serde_json::Value {
        let (mode, message, scheduled_end) = self.inner.mode.state();

        serde_json::json!({
            "mode": mode,
            "description": mode.description(),
            "message": message,
            "scheduled_end": scheduled_end,
            "health": self.health_status(),
            "degraded_features": self.inner.degradation.degraded_features(),
            "running": self.is_running(),
            "recent_recoveries": self.recovery_history(),
        })
    }

    // ==================== DEGRADATION & STORAGE ====================

    pub fn degradation(&self) -> &DegradationLayer {
        &self.inner.degradation
    }

    pub fn storage(&self) -> &StorageResilience {
        &self.inner.storage
    }

    pub fn check_integrity_at(&self, path: &Path) -> SupervisorResult<()> {
        Ok(self.inner.storage.check_integrity_at(path)?)
    }

    pub fn repair(&self, path: &Path) -> SupervisorResult<RepairReport> {
        Ok(self.inner.storage.repair(path)?)
    }

    /// Back up a store into the configured backup directory
    pub fn backup(&self, path: &Path) -> SupervisorResult<BackupRecord> {
        Ok(self.inner.storage.backup(path, &self.inner.config.backup_dir)?)
    }

    pub fn restore(&self, backup: &Path, target: &Path) -> SupervisorResult<()> {
        Ok(self.inner.storage.restore(backup, target)?)
    }

    /// Apply the configured retention to a store's backups
    pub fn prune_backups(&self, path: &Path) -> SupervisorResult<Vec<PathBuf>> {
        Ok(self.inner.storage.prune_backups(
            path,
            &self.inner.config.backup_dir,
            self.inner.config.backup_retention,
        )?)
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("mode", &self.mode())
            .field("checks", &self.check_names())
            .field("recovery", &self.inner.recovery)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Background loop; holds only a weak reference so dropping every
/// `Supervisor` handle ends it
async fn cycle_loop(inner: Weak<SupervisorInner>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                Supervisor { inner }.run_cycle().await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("Supervisor stopped");
}
