/// Integration tests for feature degradation through the supervisor
use serde_json::json;
use service_supervisor::{DegradationError, Supervisor, SupervisorConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_failed_feature_is_served_from_fallback() {
    let sup = Supervisor::new(SupervisorConfig::default()).unwrap();
    let layer = sup.degradation();
    layer.register_fallback("recommendations", || json!({ "items": [], "cached": true }));

    let primary_calls = Arc::new(AtomicUsize::new(0));

    let counter = primary_calls.clone();
    let first = layer
        .execute("recommendations", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("ranking service timed out")
        })
        .unwrap();
    assert_eq!(first["cached"], true);
    assert!(layer.is_degraded("recommendations"));

    // Degraded features skip the primary entirely
    let counter = primary_calls.clone();
    let second = layer
        .execute("recommendations", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "items": [1, 2, 3] }))
        })
        .unwrap();
    assert_eq!(second["cached"], true);
    assert_eq!(primary_calls.load(Ordering::SeqCst), 1);

    assert_eq!(sup.status()["degraded_features"], json!(["recommendations"]));
}

#[test]
fn test_degraded_without_fallback() {
    let sup = Supervisor::new(SupervisorConfig::default()).unwrap();
    let layer = sup.degradation();
    layer.mark_degraded("export");

    let err = layer.execute("export", || Ok(json!("done"))).unwrap_err();
    assert!(matches!(err, DegradationError::DegradedNoFallback(ref f) if f == "export"));

    // Operator re-enables the feature
    layer.mark_healthy("export");
    assert_eq!(layer.execute("export", || Ok(json!("done"))).unwrap(), json!("done"));
}

#[tokio::test]
async fn test_probe_heals_feature() {
    let sup = Supervisor::new(SupervisorConfig::default()).unwrap();
    let layer = sup.degradation();
    layer.mark_degraded("search");

    assert!(!layer.probe("search", || anyhow::bail!("index still rebuilding")));
    assert!(layer.is_degraded("search"));

    assert!(layer.probe("search", || Ok(())));
    assert!(!layer.is_degraded("search"));

    let value = layer
        .execute_async("search", || async { Ok(json!({ "hits": 3 })) })
        .await
        .unwrap();
    assert_eq!(value["hits"], 3);
}
