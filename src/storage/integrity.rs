/// PRAGMA integrity_check, every issue reported
use super::{StorageError, StorageResilience, StorageResult};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

impl StorageResilience {
    /// Run the store's native consistency verification
    ///
    /// Returns [`StorageError::Integrity`] listing every issue found.
    pub fn check_integrity(&self, conn: &Connection) -> StorageResult<()> {
        let mut stmt = conn
            .prepare("PRAGMA integrity_check")
            .map_err(|e| StorageError::sqlite("integrity_check", e))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| StorageError::sqlite("integrity_check", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::sqlite("integrity_check", e))?;

        let result = collect_issues(rows);
        if let Err(StorageError::Integrity { issues }) = &result {
            tracing::error!(issue_count = issues.len(), "Integrity check failed");
        }
        result
    }

    /// Open the database at `path` read-only and check its integrity
    pub fn check_integrity_at(&self, path: &Path) -> StorageResult<()> {
        if !path.exists() {
            return Err(StorageError::NotFound(path.to_path_buf()));
        }

        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| StorageError::sqlite("open", e))?;

        self.check_integrity(&conn)
    }
}

/// A clean database reports exactly one row, `ok`
fn collect_issues(rows: Vec<String>) -> StorageResult<()> {
    let issues: Vec<String> = rows.into_iter().filter(|row| row != "ok").collect();

    if issues.is_empty() {
        Ok(())
    } else {
        Err(StorageError::Integrity { issues })
    }
}
