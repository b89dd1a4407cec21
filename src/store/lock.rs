//! Cross-process serialization and atomic multi-file commit.
//!
//! The lock is a dedicated file held under `flock(2)`, the same scheme
//! glibc's `lckpwdf` uses for `/etc/.pwd.lock`. Acquisition polls the
//! non-blocking variant until the configured deadline. Because the flock
//! conflicts between any two file descriptions, concurrent callers inside
//! one process serialize exactly like separate processes do.

use std::fs::{self, File, OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::unistd::{Gid, Uid, chown};
use tempfile::NamedTempFile;

use super::error::StoreError;

const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// New account files that did not previously exist get these modes.
pub const PUBLIC_FILE_MODE: u32 = 0o644;
pub const SHADOW_FILE_MODE: u32 = 0o600;

/// One file image to be committed.
#[derive(Debug, Clone)]
pub struct StagedWrite {
    pub path: PathBuf,
    pub content: String,
    /// Mode applied only when the target does not exist yet; existing files
    /// keep their current mode and owner.
    pub mode_if_new: u32,
}

#[derive(Debug, Clone)]
pub struct LockManager {
    lock_path: PathBuf,
    timeout: Duration,
    backup: bool,
}

impl LockManager {
    pub fn new(lock_path: PathBuf, timeout: Duration, backup: bool) -> Self {
        Self {
            lock_path,
            timeout,
            backup,
        }
    }

    /// Acquire the exclusive database lock, waiting up to the configured
    /// timeout. The returned guard holds the flock until dropped.
    pub fn begin(&self) -> Result<DatabaseLock, StoreError> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: self.lock_path.clone(),
                source,
            })?;
        }
        let started = Instant::now();
        let mut file = self.open_lock_file()?;
        let flock = loop {
            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(flock) => break flock,
                Err((returned, Errno::EWOULDBLOCK)) => {
                    if started.elapsed() >= self.timeout {
                        return Err(StoreError::LockTimeout {
                            path: self.lock_path.clone(),
                            waited_ms: self.timeout.as_millis() as u64,
                        });
                    }
                    file = returned;
                    std::thread::sleep(ACQUIRE_POLL_INTERVAL);
                }
                Err((_, errno)) => {
                    return Err(StoreError::Io {
                        path: self.lock_path.clone(),
                        source: errno.into(),
                    });
                }
            }
        };
        let mut guard = DatabaseLock {
            flock,
            backup: self.backup,
        };
        guard.write_pid();
        Ok(guard)
    }

    fn open_lock_file(&self) -> Result<File, StoreError> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .mode(0o600)
            .open(&self.lock_path)
            .map_err(|source| StoreError::Io {
                path: self.lock_path.clone(),
                source,
            })
    }
}

/// Held database lock. Commits happen through this guard so that no write
/// can occur outside a lock scope. Dropping releases the flock.
#[derive(Debug)]
pub struct DatabaseLock {
    flock: Flock<File>,
    backup: bool,
}

impl DatabaseLock {
    /// Record the holder like shadow-utils lock files do. Advisory only.
    fn write_pid(&mut self) {
        let _ = self.flock.set_len(0);
        let _ = writeln!(&mut *self.flock, "{}", std::process::id());
        let _ = self.flock.flush();
    }

    /// Atomically replace every target file.
    ///
    /// Stage A writes and fsyncs a sibling temp file per target and carries
    /// over the target's mode and owner (new targets get `mode_if_new`). Any
    /// failure here aborts the whole commit with nothing renamed. Stage B
    /// takes the optional `<file>-` backups and then renames each temp file
    /// over its target, which is the last step on every path.
    pub fn commit(&self, writes: &[StagedWrite]) -> Result<(), StoreError> {
        let mut staged: Vec<(NamedTempFile, &StagedWrite)> = Vec::with_capacity(writes.len());
        for write in writes {
            let temp = Self::prepare(write)?;
            staged.push((temp, write));
        }

        if self.backup {
            for (_, write) in &staged {
                Self::backup_original(&write.path)?;
            }
        }

        for (temp, write) in staged {
            temp.persist(&write.path)
                .map_err(|err| StoreError::CommitFailed {
                    path: write.path.clone(),
                    source: err.error,
                })?;
        }
        Ok(())
    }

    fn prepare(write: &StagedWrite) -> Result<NamedTempFile, StoreError> {
        let failed = |source: std::io::Error| StoreError::CommitFailed {
            path: write.path.clone(),
            source,
        };
        let dir = write
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir).map_err(failed)?;
        temp.write_all(write.content.as_bytes()).map_err(failed)?;
        temp.as_file().sync_all().map_err(failed)?;

        match fs::metadata(&write.path) {
            Ok(meta) => {
                fs::set_permissions(temp.path(), meta.permissions()).map_err(failed)?;
                chown(
                    temp.path(),
                    Some(Uid::from_raw(meta.uid())),
                    Some(Gid::from_raw(meta.gid())),
                )
                .map_err(|errno| failed(errno.into()))?;
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                fs::set_permissions(temp.path(), Permissions::from_mode(write.mode_if_new))
                    .map_err(failed)?;
            }
            Err(err) => return Err(failed(err)),
        }
        Ok(temp)
    }

    fn backup_original(path: &Path) -> Result<(), StoreError> {
        if !path.exists() {
            return Ok(());
        }
        let mut backup = path.as_os_str().to_owned();
        backup.push("-");
        fs::copy(path, PathBuf::from(backup)).map_err(|source| StoreError::CommitFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn manager(dir: &Path, timeout_ms: u64) -> LockManager {
        LockManager::new(
            dir.join(".pwd.lock"),
            Duration::from_millis(timeout_ms),
            true,
        )
    }

    fn staged(dir: &Path, name: &str, content: &str) -> StagedWrite {
        StagedWrite {
            path: dir.join(name),
            content: content.to_string(),
            mode_if_new: PUBLIC_FILE_MODE,
        }
    }

    #[test]
    fn test_lock_exclusion_and_timeout() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path(), 200);

        let held = manager.begin().unwrap();
        let err = manager.begin().unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { .. }));

        drop(held);
        manager.begin().unwrap();
    }

    #[test]
    fn test_lock_released_across_threads() {
        let dir = tempdir().unwrap();
        let manager = Arc::new(manager(dir.path(), 5000));

        let held = manager.begin().unwrap();
        let background = {
            let manager = Arc::clone(&manager);
            std::thread::spawn(move || manager.begin().map(|_| ()))
        };
        std::thread::sleep(Duration::from_millis(100));
        drop(held);
        background.join().unwrap().unwrap();
    }

    #[test]
    fn test_commit_replaces_files_and_keeps_backup() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path(), 200);
        fs::write(dir.path().join("passwd"), "old\n").unwrap();

        let guard = manager.begin().unwrap();
        guard
            .commit(&[
                staged(dir.path(), "passwd", "new\n"),
                staged(dir.path(), "group", "groups\n"),
            ])
            .unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("passwd")).unwrap(), "new\n");
        assert_eq!(fs::read_to_string(dir.path().join("group")).unwrap(), "groups\n");
        assert_eq!(fs::read_to_string(dir.path().join("passwd-")).unwrap(), "old\n");
        // group did not exist before, so there is nothing to back up
        assert!(!dir.path().join("group-").exists());
    }

    #[test]
    fn test_commit_preserves_existing_mode() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path(), 200);
        let shadow = dir.path().join("shadow");
        fs::write(&shadow, "old\n").unwrap();
        fs::set_permissions(&shadow, Permissions::from_mode(0o640)).unwrap();

        let guard = manager.begin().unwrap();
        guard
            .commit(&[StagedWrite {
                path: shadow.clone(),
                content: "new\n".to_string(),
                mode_if_new: SHADOW_FILE_MODE,
            }])
            .unwrap();

        let mode = fs::metadata(&shadow).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    fn test_new_file_gets_requested_mode() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path(), 200);

        let guard = manager.begin().unwrap();
        guard
            .commit(&[StagedWrite {
                path: dir.path().join("shadow"),
                content: "entry\n".to_string(),
                mode_if_new: SHADOW_FILE_MODE,
            }])
            .unwrap();

        let mode = fs::metadata(dir.path().join("shadow")).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, SHADOW_FILE_MODE);
    }

    #[test]
    fn test_failed_commit_leaves_all_files_untouched() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path(), 200);
        fs::write(dir.path().join("passwd"), "before\n").unwrap();
        fs::write(dir.path().join("group"), "before\n").unwrap();

        // Second target sits in a directory that cannot be written, so its
        // staging step fails after the first target was already staged.
        let guard = manager.begin().unwrap();
        let err = guard
            .commit(&[
                staged(dir.path(), "passwd", "after\n"),
                StagedWrite {
                    path: dir.path().join("missing-dir").join("group"),
                    content: "after\n".to_string(),
                    mode_if_new: PUBLIC_FILE_MODE,
                },
            ])
            .unwrap_err();
        assert!(matches!(err, StoreError::CommitFailed { .. }));

        assert_eq!(
            fs::read_to_string(dir.path().join("passwd")).unwrap(),
            "before\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("group")).unwrap(),
            "before\n"
        );
        // no temp files left behind either
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "stray temp files: {leftovers:?}");
    }
}
