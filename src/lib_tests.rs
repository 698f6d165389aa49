// Tests for crate-level types: error conversions, well-known names and the
// re-exported surface.

use super::*;
use std::path::PathBuf;

// ==================== WELL-KNOWN COMPONENTS ====================

#[test]
fn test_store_components_are_critical_by_default() {
    let config = SupervisorConfig::default();

    assert!(config.critical_components.contains(&PRIMARY_STORE.to_string()));
    assert!(config.critical_components.contains(&SECONDARY_STORE.to_string()));

    let controller = ModeController::new(config.critical_components.iter().cloned());
    assert!(controller.is_critical("database"));
    assert!(controller.is_critical("secondary_store"));
    assert!(!controller.is_critical("cache"));
}

// ==================== ERROR TESTS ====================

#[test]
fn test_storage_error_is_transparent() {
    let err: SupervisorError = StorageError::NotFound(PathBuf::from("/data/app.db")).into();

    assert!(matches!(err, SupervisorError::Storage(_)));
    assert_eq!(err.to_string(), "/data/app.db does not exist");
}

#[test]
fn test_degradation_error_is_transparent() {
    let err: SupervisorError = DegradationError::DegradedNoFallback("search".to_string()).into();

    assert!(matches!(err, SupervisorError::Degradation(_)));
    assert!(err.to_string().contains("search"));
}

#[test]
fn test_error_messages() {
    let cases: Vec<(SupervisorError, &str)> = vec![
        (
            SupervisorError::InvalidConfig("check_interval must be non-zero".to_string()),
            "Invalid configuration: check_interval must be non-zero",
        ),
        (
            SupervisorError::Runtime("no reactor running".to_string()),
            "No async runtime available: no reactor running",
        ),
        (
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into(),
            "I/O error: denied",
        ),
    ];

    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn test_errors_are_send_sync() {
    fn assert_send_sync<T: Send + Sync + 'static>() {}
    assert_send_sync::<SupervisorError>();
    assert_send_sync::<StorageError>();
    assert_send_sync::<DegradationError>();
}

#[test]
fn test_errors_convert_to_anyhow() {
    fn fallible() -> anyhow::Result<()> {
        Err(SupervisorError::InvalidConfig("bad".to_string()))?;
        Ok(())
    }
    assert!(fallible().is_err());
}

// ==================== SHARED TYPES ====================

#[test]
fn test_supervisor_handles_share_state() {
    let supervisor = Supervisor::new(SupervisorConfig::default()).unwrap();
    let handle = supervisor.clone();

    handle.set_mode(Mode::Degraded, "cache offline");

    assert_eq!(supervisor.mode(), Mode::Degraded);
    assert_eq!(supervisor.message(), "cache offline");
}

#[test]
fn test_shared_types_are_thread_safe() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Supervisor>();
    assert_send_sync::<HealthRegistry>();
    assert_send_sync::<ModeController>();
    assert_send_sync::<RecoveryCoordinator>();
    assert_send_sync::<DegradationLayer>();
}
