/// Thread-safe registry of component health
///
/// Entries are created on first registration or first check and are never
/// removed. Every update to an entry happens under the write lock, so readers
/// of [`HealthRegistry::snapshot`] always observe whole entries.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Health of one infrastructure dependency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Component name (unique key)
    pub component: String,

    /// Whether the last check succeeded
    pub healthy: bool,

    /// Error from the last failed check, empty when healthy
    pub message: String,

    /// When the component was last checked
    pub last_check: DateTime<Utc>,

    /// When the component was last seen healthy
    pub last_healthy: Option<DateTime<Utc>>,

    /// Failed checks in a row since the last success or recovery
    pub consecutive_errors: u32,
}

impl HealthStatus {
    /// Create a healthy entry
    pub fn new(component: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            component: component.into(),
            healthy: true,
            message: String::new(),
            last_check: now,
            last_healthy: Some(now),
            consecutive_errors: 0,
        }
    }

    fn record_success(&mut self, now: DateTime<Utc>) {
        self.healthy = true;
        self.message.clear();
        self.last_check = now;
        self.last_healthy = Some(now);
        self.consecutive_errors = 0;
    }

    fn record_failure(&mut self, now: DateTime<Utc>, message: String) {
        self.healthy = false;
        self.message = message;
        self.last_check = now;
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
    }
}

/// Component name → health status
#[derive(Debug, Default)]
pub struct HealthRegistry {
    entries: RwLock<HashMap<String, HealthStatus>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed components as healthy; existing entries are left untouched
    pub fn initialize<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entries = self.write();
        for name in names {
            let name = name.into();
            entries
                .entry(name.clone())
                .or_insert_with(|| HealthStatus::new(name));
        }
    }

    /// Record the outcome of one health check and return the updated entry
    pub fn record_check(&self, name: &str, result: Result<(), String>) -> HealthStatus {
        let now = Utc::now();
        let mut entries = self.write();
        let entry = entries
            .entry(name.to_string())
            .or_insert_with(|| HealthStatus::new(name));

        match result {
            Ok(()) => entry.record_success(now),
            Err(message) => entry.record_failure(now, message),
        }

        entry.clone()
    }

    /// Clear the consecutive error count after a successful recovery
    ///
    /// Returns false if the component is unknown.
    pub fn reset_errors(&self, name: &str) -> bool {
        match self.write().get_mut(name) {
            Some(entry) => {
                entry.consecutive_errors = 0;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<HealthStatus> {
        self.read().get(name).cloned()
    }

    /// Deep copy of every entry
    pub fn snapshot(&self) -> HashMap<String, HealthStatus> {
        self.read().clone()
    }

    /// Names of unhealthy components, sorted
    pub fn unhealthy(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .read()
            .values()
            .filter(|status| !status.healthy)
            .map(|status| status.component.clone())
            .collect();
        names.sort();
        names
    }

    /// Unhealthy components whose failure streak reached `threshold`, sorted
    pub fn recovery_candidates(&self, threshold: u32) -> Vec<String> {
        let mut names: Vec<String> = self
            .read()
            .values()
            .filter(|status| !status.healthy && status.consecutive_errors >= threshold)
            .map(|status| status.component.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panicking writer cannot leave an entry half-written, so poisoned
    // locks are recovered rather than propagated
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, HealthStatus>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, HealthStatus>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_initialize_seeds_healthy_entries() {
        let registry = HealthRegistry::new();
        registry.initialize(["database", "cache"]);

        assert_eq!(registry.len(), 2);
        let status = registry.get("database").unwrap();
        assert!(status.healthy);
        assert_eq!(status.consecutive_errors, 0);
        assert!(status.message.is_empty());
        assert!(status.last_healthy.is_some());
    }

    #[test]
    fn test_initialize_does_not_reset_existing() {
        let registry = HealthRegistry::new();
        registry.record_check("database", Err("down".to_string()));
        registry.initialize(["database"]);

        assert!(!registry.get("database").unwrap().healthy);
    }

    #[test]
    fn test_record_failure_increments_streak() {
        let registry = HealthRegistry::new();
        registry.initialize(["cache"]);

        for expected in 1..=3 {
            let status = registry.record_check("cache", Err("connection refused".to_string()));
            assert!(!status.healthy);
            assert_eq!(status.message, "connection refused");
            assert_eq!(status.consecutive_errors, expected);
        }
    }

    #[test]
    fn test_record_success_resets_entry() {
        let registry = HealthRegistry::new();
        registry.record_check("cache", Err("timeout".to_string()));
        registry.record_check("cache", Err("timeout".to_string()));

        let before = registry.get("cache").unwrap();
        let status = registry.record_check("cache", Ok(()));

        assert!(status.healthy);
        assert!(status.message.is_empty());
        assert_eq!(status.consecutive_errors, 0);
        assert!(status.last_healthy >= before.last_healthy);
    }

    #[test]
    fn test_record_check_creates_unknown_component() {
        let registry = HealthRegistry::new();
        assert!(registry.is_empty());

        registry.record_check("search_index", Err("missing".to_string()));
        assert_eq!(registry.get("search_index").unwrap().consecutive_errors, 1);
    }

    #[test]
    fn test_reset_errors() {
        let registry = HealthRegistry::new();
        registry.record_check("database", Err("locked".to_string()));
        registry.record_check("database", Err("locked".to_string()));

        assert!(registry.reset_errors("database"));
        let status = registry.get("database").unwrap();
        assert_eq!(status.consecutive_errors, 0);
        // Health itself is only changed by the next check
        assert!(!status.healthy);

        assert!(!registry.reset_errors("unknown"));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let registry = HealthRegistry::new();
        registry.initialize(["database"]);

        let mut snapshot = registry.snapshot();
        snapshot.get_mut("database").unwrap().healthy = false;

        assert!(registry.get("database").unwrap().healthy);
    }

    #[test]
    fn test_recovery_candidates_threshold() {
        let registry = HealthRegistry::new();
        registry.initialize(["a", "b", "c"]);

        registry.record_check("a", Err("x".to_string()));
        registry.record_check("a", Err("x".to_string()));
        for _ in 0..3 {
            registry.record_check("b", Err("x".to_string()));
        }

        assert_eq!(registry.unhealthy(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.recovery_candidates(3), vec!["b".to_string()]);
        assert_eq!(
            registry.recovery_candidates(2),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_concurrent_snapshots_see_whole_entries() {
        let registry = Arc::new(HealthRegistry::new());
        registry.initialize(["database", "cache"]);
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let registry = Arc::clone(&registry);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for i in 0..2000 {
                    let result = if i % 2 == 0 {
                        Err(format!("failure {}", i))
                    } else {
                        Ok(())
                    };
                    registry.record_check("database", result.clone());
                    registry.record_check("cache", result);
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    while !done.load(Ordering::SeqCst) {
                        for status in registry.snapshot().values() {
                            // healthy, message and streak are always written together
                            assert_eq!(status.healthy, status.message.is_empty());
                            assert_eq!(status.healthy, status.consecutive_errors == 0);
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
