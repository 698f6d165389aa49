//! Common test utilities for integration tests
//!
//! This module provides shared fixtures:
//! - SQLite store files with known content
//! - Health checks whose outcome the test flips at will
//! - Recovery procedures that count their invocations
#![allow(dead_code)]

use rusqlite::Connection;
use service_supervisor::{health_check, recovery_fn, HealthCheck, RecoveryFn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Create a SQLite database with `rows` rows in table `items`
pub fn create_store(dir: &Path, name: &str, rows: usize) -> PathBuf {
    let path = dir.join(name);
    let conn = Connection::open(&path).expect("open test store");
    conn.execute_batch(
        "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
         CREATE INDEX idx_items_name ON items(name);",
    )
    .expect("create schema");
    for i in 0..rows {
        conn.execute("INSERT INTO items (name) VALUES (?1)", [format!("item-{}", i)])
            .expect("insert row");
    }
    path
}

pub fn count_items(path: &Path) -> i64 {
    let conn = Connection::open(path).expect("open test store");
    conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
        .expect("count rows")
}

/// Health check driven by a shared flag
#[derive(Clone)]
pub struct Toggle {
    healthy: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl Toggle {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: Arc::new(AtomicBool::new(healthy)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> HealthCheck {
        let healthy = self.healthy.clone();
        let calls = self.calls.clone();
        health_check(move || {
            let healthy = healthy.load(Ordering::SeqCst);
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if healthy {
                    Ok(())
                } else {
                    anyhow::bail!("dependency unreachable")
                }
            }
        })
    }
}

/// Recovery procedure that counts attempts and optionally heals a [`Toggle`]
pub struct CountingRecovery {
    attempts: Arc<AtomicUsize>,
}

impl CountingRecovery {
    pub fn new() -> Self {
        Self {
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Procedure that always fails
    pub fn failing(&self) -> RecoveryFn {
        let attempts = self.attempts.clone();
        recovery_fn(move || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { anyhow::bail!("restart failed") }
        })
    }

    /// Procedure that succeeds and marks `toggle` healthy again
    pub fn healing(&self, toggle: &Toggle) -> RecoveryFn {
        let attempts = self.attempts.clone();
        let toggle = toggle.clone();
        recovery_fn(move || {
            attempts.fetch_add(1, Ordering::SeqCst);
            toggle.set(true);
            async { Ok(()) }
        })
    }
}
