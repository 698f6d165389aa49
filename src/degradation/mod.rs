/// Feature degradation layer - fallback when a capability is unavailable
///
/// This module lets request-handling code wrap a feature call so that a
/// failing feature is served from a registered fallback instead of failing
/// the request.
///
/// Degradation is one-way: once a primary call fails, the feature stays
/// degraded and every later call goes straight to the fallback without
/// retrying the primary. Nothing in this layer ever un-marks a feature.
/// Re-healing is the caller's responsibility, either an operator action or an
/// explicit probe (see [`DegradationLayer::probe`]) that calls
/// [`DegradationLayer::mark_healthy`] once the feature's own check recovers.
/// This keeps a flapping dependency from bouncing requests between the
/// primary and the fallback.
///
/// The layer is independent of the health registry: a feature may be marked
/// degraded without any health check ever having run.
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Errors returned by guarded feature execution
#[derive(Debug, Error)]
pub enum DegradationError {
    /// Feature is degraded and nothing can stand in for it; treat as
    /// "feature unavailable", not as a transient error
    #[error("Feature '{0}' is degraded and has no fallback")]
    DegradedNoFallback(String),

    /// Primary call failed and no fallback is registered
    #[error("Feature '{feature}' failed: {source}")]
    Primary {
        feature: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Reduced-functionality substitute for a feature
pub type Fallback<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// Degraded flags and fallbacks, keyed by feature name
///
/// Values default to JSON so one layer can serve every feature of a backend.
pub struct DegradationLayer<T = serde_json::Value> {
    degraded: RwLock<HashSet<String>>,
    fallbacks: RwLock<HashMap<String, Fallback<T>>>,
}

impl<T: Send + 'static> DegradationLayer<T> {
    pub fn new() -> Self {
        Self {
            degraded: RwLock::new(HashSet::new()),
            fallbacks: RwLock::new(HashMap::new()),
        }
    }

    /// Mark a feature degraded
    pub fn mark_degraded(&self, feature: &str) {
        let inserted = self
            .degraded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(feature.to_string());

        if inserted {
            tracing::warn!(
                feature = %feature,
                has_fallback = self.has_fallback(feature),
                "Feature marked degraded"
            );
        }
    }

    /// Clear the degraded flag of a feature
    pub fn mark_healthy(&self, feature: &str) {
        let removed = self
            .degraded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(feature);

        if removed {
            tracing::info!(feature = %feature, "Feature marked healthy");
        }
    }

    pub fn is_degraded(&self, feature: &str) -> bool {
        self.degraded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(feature)
    }

    /// Register (or replace) the fallback for a feature
    pub fn register_fallback<F>(&self, feature: &str, fallback: F)
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.fallbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(feature.to_string(), Arc::new(fallback));
    }

    pub fn get_fallback(&self, feature: &str) -> Option<Fallback<T>> {
        self.fallbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(feature)
            .cloned()
    }

    pub fn has_fallback(&self, feature: &str) -> bool {
        self.fallbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(feature)
    }

    /// All currently degraded features, sorted
    pub fn degraded_features(&self) -> Vec<String> {
        let mut features: Vec<String> = self
            .degraded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        features.sort();
        features
    }

    /// Run `primary` for a feature, falling back when it is degraded or fails
    ///
    /// - degraded: fallback value, or [`DegradationError::DegradedNoFallback`]
    /// - primary succeeds: its value, the fallback is never consulted
    /// - primary fails: the feature is marked degraded, then the fallback
    ///   value is returned if one exists, otherwise the primary's error
    pub fn execute<F>(&self, feature: &str, primary: F) -> Result<T, DegradationError>
    where
        F: FnOnce() -> anyhow::Result<T>,
    {
        if self.is_degraded(feature) {
            return self.serve_fallback(feature);
        }

        primary().or_else(|error| self.handle_failure(feature, error))
    }

    /// Async variant of [`execute`](Self::execute); the primary future is not
    /// created while the feature is degraded
    pub async fn execute_async<F, Fut>(&self, feature: &str, primary: F) -> Result<T, DegradationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if self.is_degraded(feature) {
            return self.serve_fallback(feature);
        }

        match primary().await {
            Ok(value) => Ok(value),
            Err(error) => self.handle_failure(feature, error),
        }
    }

    /// Re-heal a degraded feature if `check` succeeds
    ///
    /// Never called by the layer itself. Returns true if the feature is
    /// healthy afterwards.
    pub fn probe<F>(&self, feature: &str, check: F) -> bool
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        if !self.is_degraded(feature) {
            return true;
        }

        match check() {
            Ok(()) => {
                self.mark_healthy(feature);
                true
            }
            Err(e) => {
                tracing::debug!(feature = %feature, error = %e, "Feature probe failed, staying degraded");
                false
            }
        }
    }

    fn serve_fallback(&self, feature: &str) -> Result<T, DegradationError> {
        match self.get_fallback(feature) {
            Some(fallback) => Ok(fallback()),
            None => Err(DegradationError::DegradedNoFallback(feature.to_string())),
        }
    }

    fn handle_failure(&self, feature: &str, error: anyhow::Error) -> Result<T, DegradationError> {
        tracing::warn!(feature = %feature, error = %error, "Feature call failed, degrading");
        self.mark_degraded(feature);

        match self.get_fallback(feature) {
            Some(fallback) => Ok(fallback()),
            None => Err(DegradationError::Primary {
                feature: feature.to_string(),
                source: error,
            }),
        }
    }
}

impl<T: Send + 'static> Default for DegradationLayer<T> {
    fn default() -> Self {
        Self::new()
    }
}
