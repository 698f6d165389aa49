/// Store repair: pre-repair copy, compacting rewrite, reindex fallback
///
/// The original file is only ever replaced by a complete compacted copy via
/// rename, and a byte-for-byte copy of the pre-repair file always exists
/// before anything is touched.
use super::{timestamp, with_suffix, StorageError, StorageResilience, StorageResult};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// How a repair was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairMethod {
    /// Rewritten into a fresh file with `VACUUM INTO` and swapped in
    Compacted,

    /// Compaction failed, indexes rebuilt in place
    Reindexed,
}

impl RepairMethod {
    pub fn description(&self) -> &'static str {
        match self {
            RepairMethod::Compacted => "Compacting rewrite into a fresh file",
            RepairMethod::Reindexed => "In-place index rebuild",
        }
    }
}

/// Result of a successful repair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairReport {
    pub path: PathBuf,

    /// Copy of the file as it was before repair
    pub backup_path: PathBuf,

    pub method: RepairMethod,
}

impl StorageResilience {
    /// Repair the SQLite database at `path`
    ///
    /// 1. Checkpoint the WAL, then copy the file to
    ///    `<path>.backup.<timestamp>`; failure aborts.
    /// 2. `VACUUM INTO` a sibling file and atomically rename it over the
    ///    original.
    /// 3. If compaction fails, run `REINDEX` on the original instead.
    ///
    /// Repair needs exclusive access: the WAL is checkpointed first, but a
    /// connection the service still holds keeps pointing at the replaced file
    /// and its `-wal`/`-shm` files. Stop writers before repairing.
    pub fn repair(&self, path: &Path) -> StorageResult<RepairReport> {
        self.repair_inner(path).map_err(|source| {
            tracing::error!(path = %path.display(), error = %source, "Store repair failed");
            StorageError::Repair {
                path: path.to_path_buf(),
                source: Box::new(source),
            }
        })
    }

    fn repair_inner(&self, path: &Path) -> StorageResult<RepairReport> {
        if !path.exists() {
            return Err(StorageError::NotFound(path.to_path_buf()));
        }

        let conn = Connection::open(path).map_err(|e| StorageError::sqlite("open", e))?;

        // Fold any WAL content into the main file so the copy below is complete
        if let Err(e) = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(())) {
            tracing::warn!(path = %path.display(), error = %e, "WAL checkpoint before repair failed");
        }

        let backup_path = with_suffix(path, &format!(".backup.{}", timestamp()));
        fs::copy(path, &backup_path)
            .map_err(|e| StorageError::io("create pre-repair copy of", path, e))?;

        tracing::info!(
            path = %path.display(),
            backup = %backup_path.display(),
            "Pre-repair copy created"
        );

        let compacted = with_suffix(path, ".compact");
        if compacted.exists() {
            fs::remove_file(&compacted)
                .map_err(|e| StorageError::io("remove stale compaction file", &compacted, e))?;
        }

        let method = match conn.execute(
            "VACUUM INTO ?1",
            [compacted.to_string_lossy().as_ref()],
        ) {
            Ok(_) => {
                // Close before swapping files so no handle points at the old inode
                conn.close()
                    .map_err(|(_, e)| StorageError::sqlite("close", e))?;
                fs::rename(&compacted, path)
                    .map_err(|e| StorageError::io("replace original with compacted copy", path, e))?;
                RepairMethod::Compacted
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Compacting rewrite failed, falling back to reindex"
                );
                if compacted.exists() {
                    let _ = fs::remove_file(&compacted);
                }
                conn.execute_batch("REINDEX")
                    .map_err(|e| StorageError::sqlite("reindex", e))?;
                RepairMethod::Reindexed
            }
        };

        tracing::info!(
            path = %path.display(),
            method = ?method,
            description = method.description(),
            "Store repaired"
        );

        Ok(RepairReport {
            path: path.to_path_buf(),
            backup_path,
            method,
        })
    }
}
