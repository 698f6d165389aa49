/// Built-in health checks for the embedded SQLite stores
///
/// The primary and secondary stores are the two well-known dependencies every
/// deployment watches. Their check opens the database read-only and runs
/// `PRAGMA quick_check` on a blocking thread so the async cycle never stalls
/// on file I/O.
use super::{health_check, HealthCheck};
use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};

/// Health check for a SQLite database file
pub fn sqlite_store(path: impl Into<PathBuf>) -> HealthCheck {
    let path = path.into();
    health_check(move || {
        let path = path.clone();
        async move {
            tokio::task::spawn_blocking(move || probe_sqlite(&path))
                .await
                .context("SQLite probe task failed")?
        }
    })
}

/// Open the database read-only and run a quick consistency check
pub fn probe_sqlite(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!("database file {} does not exist", path.display());
    }

    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let result: String = conn
        .query_row("PRAGMA quick_check", [], |row| row.get(0))
        .context("quick_check failed")?;

    if result != "ok" {
        bail!("quick_check reported: {}", result);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_db(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("store.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT);")
            .unwrap();
        path
    }

    #[test]
    fn test_probe_healthy_database() {
        let dir = TempDir::new().unwrap();
        let path = create_db(&dir);
        assert!(probe_sqlite(&path).is_ok());
    }

    #[test]
    fn test_probe_missing_database() {
        let dir = TempDir::new().unwrap();
        let err = probe_sqlite(&dir.path().join("missing.db")).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_probe_garbage_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.db");
        std::fs::write(&path, vec![0xAB; 8192]).unwrap();
        assert!(probe_sqlite(&path).is_err());
    }

    #[tokio::test]
    async fn test_sqlite_store_check() {
        let dir = TempDir::new().unwrap();
        let path = create_db(&dir);

        let check = sqlite_store(&path);
        assert!(check().await.is_ok());

        std::fs::remove_file(&path).unwrap();
        assert!(check().await.is_err());
    }
}
