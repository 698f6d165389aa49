/// Operating-mode state machine
///
/// The controller owns the service's single operating mode. It evaluates
/// aggregate health once per cycle, honours manual maintenance windows (which
/// always win over automatic evaluation), and notifies subscribers whenever
/// the mode actually changes.
///
/// # States
///
/// ```text
///            any unhealthy          critical unhealthy
///   Normal ───────────────► Degraded ─────────────────► Emergency
///     ▲                        │                            │
///     └──────── all healthy ───┴────────────────────────────┘
///
///   Maintenance  ← enable_maintenance (from any state; disable/auto-exit → Normal)
///   Recovery     ← failure streak crossed the recovery threshold (from any state)
/// ```
use crate::health::HealthStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Service operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Mode {
    /// All dependencies healthy
    Normal = 0,

    /// At least one non-critical dependency unhealthy
    Degraded = 1,

    /// Manually placed under maintenance
    Maintenance = 2,

    /// Automatic recovery in progress
    Recovery = 3,

    /// At least one critical dependency unhealthy
    Emergency = 4,
}

impl Mode {
    /// Get human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Mode::Normal => "All components operating normally",
            Mode::Degraded => "Running with reduced functionality",
            Mode::Maintenance => "Under scheduled maintenance",
            Mode::Recovery => "Attempting automatic recovery",
            Mode::Emergency => "Critical component failure",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::Degraded => "degraded",
            Mode::Maintenance => "maintenance",
            Mode::Recovery => "recovery",
            Mode::Emergency => "emergency",
        }
    }

    fn from_u8(value: u8) -> Mode {
        match value {
            1 => Mode::Degraded,
            2 => Mode::Maintenance,
            3 => Mode::Recovery,
            4 => Mode::Emergency,
            _ => Mode::Normal,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscriber notified with the new mode after every change
pub type ModeCallback = Arc<dyn Fn(Mode) + Send + Sync>;

struct ModeState {
    mode: Mode,
    message: String,
    scheduled_end: Option<DateTime<Utc>>,

    /// Pending auto-exit of the current maintenance window
    maintenance_timer: Option<JoinHandle<()>>,

    /// Bumped whenever a maintenance window is opened or closed, so a stale
    /// timer can tell its window is gone
    maintenance_epoch: u64,
}

impl Default for ModeState {
    fn default() -> Self {
        Self {
            mode: Mode::Normal,
            message: String::new(),
            scheduled_end: None,
            maintenance_timer: None,
            maintenance_epoch: 0,
        }
    }
}

impl ModeState {
    fn current(&self) -> Mode {
        self.mode
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.maintenance_timer.take() {
            timer.abort();
        }
    }
}

struct ModeInner {
    /// Lock-free mirror of `state.mode` for hot-path reads
    current: AtomicU8,

    /// Authoritative mode, message and schedule, always written together
    state: RwLock<ModeState>,

    callbacks: RwLock<Vec<ModeCallback>>,

    critical: HashSet<String>,
}

/// Mode state machine; cheap to clone, clones share state
#[derive(Clone)]
pub struct ModeController {
    inner: Arc<ModeInner>,
}

impl ModeController {
    /// Create a controller in Normal mode with the given critical components
    pub fn new<I, S>(critical: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Arc::new(ModeInner {
                current: AtomicU8::new(Mode::Normal as u8),
                state: RwLock::new(ModeState::default()),
                callbacks: RwLock::new(Vec::new()),
                critical: critical.into_iter().map(Into::into).collect(),
            }),
        }
    }

    /// Current mode (lock-free)
    pub fn mode(&self) -> Mode {
        Mode::from_u8(self.inner.current.load(Ordering::Acquire))
    }

    pub fn message(&self) -> String {
        self.read_state(|state| state.message.clone())
    }

    /// End of the current maintenance window, if one was scheduled
    pub fn scheduled_end(&self) -> Option<DateTime<Utc>> {
        self.read_state(|state| state.scheduled_end)
    }

    /// Mode, message and scheduled end read together under one lock
    pub fn state(&self) -> (Mode, String, Option<DateTime<Utc>>) {
        self.read_state(|state| (state.current(), state.message.clone(), state.scheduled_end))
    }

    pub fn is_critical(&self, component: &str) -> bool {
        self.inner.critical.contains(component)
    }

    /// Register a subscriber for mode changes
    pub fn register_callback<F>(&self, callback: F)
    where
        F: Fn(Mode) + Send + Sync + 'static,
    {
        self.inner
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Set the mode and message
    ///
    /// Subscribers are notified only when the mode differs from the previous
    /// one. Leaving Maintenance this way closes the maintenance window.
    /// Returns true if the mode changed.
    pub fn set_mode(&self, mode: Mode, message: impl Into<String>) -> bool {
        let changed = {
            let mut state = self.write_state();
            if mode != Mode::Maintenance {
                Self::close_maintenance_window(&mut state);
            }
            self.transition(&mut state, mode, message.into())
        };
        self.finish(changed)
    }

    /// Enter Maintenance immediately, regardless of health
    ///
    /// A non-zero `duration` schedules an automatic `disable_maintenance`
    /// which is skipped if the mode has changed by then.
    pub fn enable_maintenance(&self, message: impl Into<String>, duration: Duration) {
        let message = message.into();
        let changed = {
            let mut state = self.write_state();
            Self::close_maintenance_window(&mut state);

            if !duration.is_zero() {
                state.scheduled_end = chrono::Duration::from_std(duration)
                    .ok()
                    .and_then(|d| Utc::now().checked_add_signed(d));
                state.maintenance_timer = self.arm_timer(state.maintenance_epoch, duration);
            }

            tracing::warn!(
                message = %message,
                duration = %humantime::format_duration(duration),
                "Maintenance mode enabled"
            );
            self.transition(&mut state, Mode::Maintenance, message)
        };
        self.finish(changed);
    }

    /// Leave Maintenance and return to Normal
    pub fn disable_maintenance(&self) {
        let changed = {
            let mut state = self.write_state();
            Self::close_maintenance_window(&mut state);
            tracing::info!("Maintenance mode disabled");
            self.transition(&mut state, Mode::Normal, String::new())
        };
        self.finish(changed);
    }

    /// Apply the automatic transition rule to a health snapshot
    ///
    /// - no unhealthy components → Normal
    /// - any unhealthy critical component → Emergency
    /// - otherwise → Degraded
    ///
    /// Skipped entirely while in Maintenance. Returns the resulting mode.
    pub fn evaluate(&self, health: &HashMap<String, HealthStatus>) -> Mode {
        let mut unhealthy: Vec<&str> = health
            .values()
            .filter(|status| !status.healthy)
            .map(|status| status.component.as_str())
            .collect();
        unhealthy.sort_unstable();

        let (target, message) = if unhealthy.is_empty() {
            (Mode::Normal, "all components healthy".to_string())
        } else if unhealthy.iter().any(|name| self.is_critical(name)) {
            (
                Mode::Emergency,
                format!("critical components unhealthy: {}", unhealthy.join(", ")),
            )
        } else {
            (
                Mode::Degraded,
                format!("components unhealthy: {}", unhealthy.join(", ")),
            )
        };

        self.apply_automatic(target, message)
    }

    /// Switch to Recovery unless already there or under maintenance
    pub fn enter_recovery(&self) -> Mode {
        self.apply_automatic(Mode::Recovery, "attempting automatic recovery".to_string())
    }

    /// Automatic transitions never override a maintenance window, and never
    /// rewrite an ongoing recovery
    fn apply_automatic(&self, target: Mode, message: String) -> Mode {
        let changed = {
            let mut state = self.write_state();
            match state.current() {
                Mode::Maintenance => {
                    tracing::debug!(requested = %target, "Maintenance active, skipping automatic mode change");
                    return Mode::Maintenance;
                }
                Mode::Recovery if target == Mode::Recovery => return Mode::Recovery,
                _ => {}
            }
            self.transition(&mut state, target, message)
        };
        self.finish(changed);
        target
    }

    /// Write mode and message under the state lock, returning the
    /// `(from, to)` pair if the mode changed
    fn transition(&self, state: &mut ModeState, mode: Mode, message: String) -> Option<(Mode, Mode)> {
        let previous = state.current();
        state.mode = mode;
        state.message = message;
        self.inner.current.store(mode as u8, Ordering::Release);

        (previous != mode).then_some((previous, mode))
    }

    fn finish(&self, changed: Option<(Mode, Mode)>) -> bool {
        match changed {
            Some((from, to)) => {
                tracing::info!(from = %from, to = %to, description = to.description(), "Operating mode changed");
                self.notify(to);
                true
            }
            None => false,
        }
    }

    fn close_maintenance_window(state: &mut ModeState) {
        state.cancel_timer();
        state.scheduled_end = None;
        state.maintenance_epoch = state.maintenance_epoch.wrapping_add(1);
    }

    fn arm_timer(&self, epoch: u64, duration: Duration) -> Option<JoinHandle<()>> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!("No async runtime, maintenance window will not end automatically");
                return None;
            }
        };

        let weak: Weak<ModeInner> = Arc::downgrade(&self.inner);
        Some(handle.spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(inner) = weak.upgrade() {
                ModeController { inner }.expire_maintenance(epoch);
            }
        }))
    }

    /// Auto-exit for the window identified by `epoch`
    fn expire_maintenance(&self, epoch: u64) {
        let changed = {
            let mut state = self.write_state();
            if state.current() != Mode::Maintenance || state.maintenance_epoch != epoch {
                return;
            }
            // Running inside the timer task itself, so drop the handle instead of aborting
            state.maintenance_timer = None;
            state.scheduled_end = None;
            state.maintenance_epoch = state.maintenance_epoch.wrapping_add(1);
            tracing::info!("Scheduled maintenance window ended");
            self.transition(&mut state, Mode::Normal, String::new())
        };
        self.finish(changed);
    }

    /// Fire-and-forget fan-out, one blocking task per subscriber
    fn notify(&self, mode: Mode) {
        let callbacks: Vec<ModeCallback> = self
            .inner
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let runtime = tokio::runtime::Handle::try_current().ok();
        for callback in callbacks {
            match &runtime {
                Some(handle) => {
                    handle.spawn_blocking(move || callback(mode));
                }
                None => {
                    std::thread::spawn(move || callback(mode));
                }
            }
        }
    }

    fn read_state<T>(&self, f: impl FnOnce(&ModeState) -> T) -> T {
        f(&self.inner.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ModeState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ModeController {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}

impl fmt::Debug for ModeController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (mode, message, scheduled_end) = self.state();
        f.debug_struct("ModeController")
            .field("mode", &mode)
            .field("message", &message)
            .field("scheduled_end", &scheduled_end)
            .finish()
    }
}
