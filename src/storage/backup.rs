/// Checksummed backups, verified restore and retention
///
/// Each backup `<dir>/<name>.<timestamp>` gets a sibling `<backup>.sha256`
/// in `sha256sum` format. Restore refuses a backup whose checksum file exists
/// but no longer matches its content.
use super::{
    parse_backup_suffix, timestamp, with_suffix, BackupRecord, StorageError, StorageResilience,
    StorageResult,
};
use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

/// Extension of the checksum file written beside each backup
pub const CHECKSUM_EXTENSION: &str = ".sha256";

/// Checksum file location for a backup
pub fn checksum_path(backup: &Path) -> PathBuf {
    with_suffix(backup, CHECKSUM_EXTENSION)
}

/// Lowercase hex SHA-256 of a file's content
pub fn file_checksum(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

impl StorageResilience {
    /// Copy `path` into `dir` as `<name>.<timestamp>` and persist its checksum
    ///
    /// A checksum that cannot be written is logged; the copy itself still
    /// counts as a successful backup.
    pub fn backup(&self, path: &Path, dir: &Path) -> StorageResult<BackupRecord> {
        self.backup_inner(path, dir).map_err(|source| {
            tracing::error!(path = %path.display(), error = %source, "Backup failed");
            StorageError::Backup {
                path: path.to_path_buf(),
                source: Box::new(source),
            }
        })
    }

    fn backup_inner(&self, path: &Path, dir: &Path) -> StorageResult<BackupRecord> {
        if !path.is_file() {
            return Err(StorageError::NotFound(path.to_path_buf()));
        }

        let name = path
            .file_name()
            .ok_or_else(|| StorageError::InvalidPath(path.to_path_buf()))?
            .to_string_lossy()
            .into_owned();

        fs::create_dir_all(dir).map_err(|e| StorageError::io("create backup directory", dir, e))?;

        let destination = unique_destination(dir, &name);
        fs::copy(path, &destination)
            .map_err(|e| StorageError::io("copy store to", &destination, e))?;

        let checksum = match write_checksum(&destination) {
            Ok(checksum) => Some(checksum),
            Err(e) => {
                tracing::warn!(
                    backup = %destination.display(),
                    error = %e,
                    "Failed to persist backup checksum"
                );
                None
            }
        };

        tracing::info!(
            source = %path.display(),
            backup = %destination.display(),
            checksum = checksum.as_deref().unwrap_or("none"),
            "Backup created"
        );

        Ok(BackupRecord {
            path: destination,
            checksum,
        })
    }

    /// Check a backup against its checksum file
    ///
    /// Returns `Ok(true)` if verified, `Ok(false)` if there is no checksum
    /// file, and [`StorageError::ChecksumMismatch`] if the content changed.
    pub fn verify_backup(&self, backup: &Path) -> StorageResult<bool> {
        if !backup.is_file() {
            return Err(StorageError::NotFound(backup.to_path_buf()));
        }

        let sum_path = checksum_path(backup);
        if !sum_path.exists() {
            return Ok(false);
        }

        let contents = fs::read_to_string(&sum_path)
            .map_err(|e| StorageError::io("read checksum file", &sum_path, e))?;
        let expected = contents
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase();

        let actual =
            file_checksum(backup).map_err(|e| StorageError::io("checksum", backup, e))?;

        if expected != actual {
            tracing::error!(
                backup = %backup.display(),
                expected = %expected,
                actual = %actual,
                "Backup checksum mismatch"
            );
            return Err(StorageError::ChecksumMismatch {
                path: backup.to_path_buf(),
                expected,
                actual,
            });
        }

        Ok(true)
    }

    /// Restore `backup` over `target`
    ///
    /// A checksum mismatch aborts before anything is written and is returned
    /// unwrapped. The current target is copied aside first when possible.
    pub fn restore(&self, backup: &Path, target: &Path) -> StorageResult<()> {
        let verified = match self.verify_backup(backup) {
            Ok(verified) => verified,
            Err(e @ StorageError::ChecksumMismatch { .. }) => return Err(e),
            Err(e) => return Err(restore_error(target, e)),
        };

        if !verified {
            tracing::warn!(backup = %backup.display(), "No checksum file, restoring unverified backup");
        }

        if target.exists() {
            let aside = with_suffix(target, &format!(".pre-restore.{}", timestamp()));
            match fs::copy(target, &aside) {
                Ok(_) => {
                    tracing::info!(store = %target.display(), copy = %aside.display(), "Current store copied aside")
                }
                Err(e) => tracing::warn!(
                    store = %target.display(),
                    error = %e,
                    "Could not copy current store aside, continuing with restore"
                ),
            }
        }

        // Stage next to the target so the final rename never crosses filesystems
        let staging = with_suffix(target, ".restoring");
        fs::copy(backup, &staging)
            .map_err(|e| restore_error(target, StorageError::io("stage backup at", &staging, e)))?;
        fs::rename(&staging, target).map_err(|e| {
            let _ = fs::remove_file(&staging);
            restore_error(target, StorageError::io("replace", target, e))
        })?;

        tracing::info!(
            backup = %backup.display(),
            store = %target.display(),
            verified,
            "Store restored from backup"
        );

        Ok(())
    }

    /// Keep the newest `keep` backups of `store` in `dir`, delete the rest
    ///
    /// Returns the deleted backup paths, newest first.
    pub fn prune_backups(&self, store: &Path, dir: &Path, keep: usize) -> StorageResult<Vec<PathBuf>> {
        let name = store
            .file_name()
            .ok_or_else(|| StorageError::InvalidPath(store.to_path_buf()))?
            .to_string_lossy()
            .into_owned();

        let pattern = format!("{}.*", glob::Pattern::escape(&dir.join(&name).to_string_lossy()));
        let prefix = format!("{}.", name);

        // Only `<name>.<timestamp>[-n]` belongs to this store
        let mut backups: Vec<((NaiveDateTime, u32), PathBuf)> = glob::glob(&pattern)
            .map_err(|_| StorageError::InvalidPath(dir.to_path_buf()))?
            .flatten()
            .filter(|path| path.is_file())
            .filter_map(|path| {
                let file_name = path.file_name()?.to_str()?;
                let order = parse_backup_suffix(file_name.strip_prefix(&prefix)?)?;
                Some((order, path))
            })
            .collect();

        // Newest first
        backups.sort_by(|a, b| b.0.cmp(&a.0));

        let mut removed = Vec::new();
        for (_, stale) in backups.into_iter().skip(keep) {
            fs::remove_file(&stale).map_err(|e| StorageError::io("remove backup", &stale, e))?;
            let sum_path = checksum_path(&stale);
            if sum_path.exists() {
                fs::remove_file(&sum_path)
                    .map_err(|e| StorageError::io("remove checksum file", &sum_path, e))?;
            }
            tracing::debug!(backup = %stale.display(), "Pruned old backup");
            removed.push(stale);
        }

        if !removed.is_empty() {
            tracing::info!(store = %name, removed = removed.len(), kept = keep, "Old backups pruned");
        }

        Ok(removed)
    }
}

fn restore_error(target: &Path, source: StorageError) -> StorageError {
    tracing::error!(store = %target.display(), error = %source, "Restore failed");
    StorageError::Restore {
        target: target.to_path_buf(),
        source: Box::new(source),
    }
}

fn write_checksum(backup: &Path) -> io::Result<String> {
    let checksum = file_checksum(backup)?;
    let name = backup
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    fs::write(checksum_path(backup), format!("{}  {}\n", checksum, name))?;
    Ok(checksum)
}

/// `<dir>/<name>.<timestamp>`, suffixed with a counter if already taken
fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let stamp = timestamp();
    let candidate = dir.join(format!("{}.{}", name, stamp));
    if !candidate.exists() {
        return candidate;
    }

    (1..)
        .map(|n| dir.join(format!("{}.{}-{}", name, stamp, n)))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}
