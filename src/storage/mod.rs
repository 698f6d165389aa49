/// Embedded-store resilience primitives
///
/// Administrative operations on the SQLite stores, used by operators and
/// scheduled jobs, and by automatic recovery as a last resort:
/// - Integrity verification (`PRAGMA integrity_check`, every issue reported)
/// - Repair (pre-repair copy, compacting rewrite, reindex fallback)
/// - Checksummed backup (SHA-256 file beside each backup)
/// - Checksum-verified restore
/// - Backup retention
///
/// Unlike the background health cycle, every failure here is returned to the
/// caller.
pub mod backup;
pub mod integrity;
pub mod repair;

pub use backup::{checksum_path, file_checksum};
pub use repair::{RepairMethod, RepairReport};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Timestamp format used in backup file names (sorts chronologically)
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S-%3f";

/// Length of a formatted timestamp, e.g. `20260101-000000-000`
const TIMESTAMP_LEN: usize = 19;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Integrity check reported {} issue(s): {}", .issues.len(), .issues.join("; "))]
    Integrity { issues: Vec<String> },

    #[error("Checksum mismatch for {}: expected {expected}, computed {actual}", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("{} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid store path: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("Failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SQLite {action} failed: {source}")]
    Sqlite {
        action: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Repair of {} failed: {source}", .path.display())]
    Repair {
        path: PathBuf,
        #[source]
        source: Box<StorageError>,
    },

    #[error("Backup of {} failed: {source}", .path.display())]
    Backup {
        path: PathBuf,
        #[source]
        source: Box<StorageError>,
    },

    #[error("Restore to {} failed: {source}", .target.display())]
    Restore {
        target: PathBuf,
        #[source]
        source: Box<StorageError>,
    },
}

impl StorageError {
    pub(crate) fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn sqlite(action: &'static str, source: rusqlite::Error) -> Self {
        StorageError::Sqlite { action, source }
    }

    /// True if this error, or the error it wraps, is a checksum mismatch
    pub fn is_checksum_mismatch(&self) -> bool {
        match self {
            StorageError::ChecksumMismatch { .. } => true,
            StorageError::Repair { source, .. }
            | StorageError::Backup { source, .. }
            | StorageError::Restore { source, .. } => source.is_checksum_mismatch(),
            _ => false,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A backup file and the checksum persisted beside it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub path: PathBuf,

    /// SHA-256 of the backup content; `None` if it could not be persisted
    pub checksum: Option<String>,
}

/// Integrity, repair, backup and restore for SQLite store files
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageResilience;

impl StorageResilience {
    pub fn new() -> Self {
        Self
    }
}

/// Current time formatted for file names
pub(crate) fn timestamp() -> String {
    chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Parse the part of a backup file name after `<store>.`
///
/// Accepts `<timestamp>` or `<timestamp>-<n>` (collision counter). Anything
/// else, such as `backup.<ts>` or `pre-restore.<ts>`, is not a backup.
pub(crate) fn parse_backup_suffix(suffix: &str) -> Option<(NaiveDateTime, u32)> {
    let stamp = suffix.get(..TIMESTAMP_LEN)?;
    let taken = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;

    let counter = match &suffix[TIMESTAMP_LEN..] {
        "" => 0,
        rest => {
            let digits = rest.strip_prefix('-')?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            digits.parse().ok()?
        }
    };

    Some((taken, counter))
}

/// `path` with `suffix` appended to its file name
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
