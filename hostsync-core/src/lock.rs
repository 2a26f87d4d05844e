//! Label-file run lock.
//!
//! The lock is a JSON [`RunLock`] record at `<state>/hostsync/run.lock`.
//! Acquisition writes the record to a `.tmp` sibling and hard-links it into
//! place, so the label appears atomically and only if no other label exists.
//!
//! The record is never auto-expired: if its holder dies, the label stays
//! until an operator runs `hostsync unlock`. That trades availability for
//! never silently running twice.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::LockError;
use crate::types::{RunLock, SessionId};

/// Proof that this process holds the run lock.
///
/// [`release`](RunLockGuard::release) consumes the guard; a guard dropped
/// without being released releases itself. Either way, exactly once.
#[derive(Debug)]
pub struct RunLockGuard {
    path: PathBuf,
    record: RunLock,
    released: bool,
}

impl RunLockGuard {
    pub fn record(&self) -> &RunLock {
        &self.record
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the label if it still carries our holder identity.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        remove_if_holder(&self.path, &self.record.holder)
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        if !self.released {
            let _ = remove_if_holder(&self.path, &self.record.holder);
        }
    }
}

/// Holder identity written into the record.
pub fn holder_identity(session: &SessionId) -> String {
    format!("{session}@pid{}", std::process::id())
}

/// Try to take the lock at `path` for `session` on `host`.
///
/// Fails immediately with [`LockError::Held`] naming the current holder;
/// there is no queuing.
pub fn acquire_at(path: &Path, session: &SessionId, host: &str) -> Result<RunLockGuard, LockError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| lock_io(parent, e))?;
    }

    let record = RunLock {
        holder: holder_identity(session),
        pid: std::process::id(),
        acquired_at: Utc::now(),
        host: host.to_owned(),
    };
    let payload = serde_json::to_vec_pretty(&record).map_err(|source| LockError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp = path.with_extension(format!("lock.{}.tmp", session));
    std::fs::write(&tmp, payload).map_err(|e| lock_io(&tmp, e))?;
    let linked = std::fs::hard_link(&tmp, path);
    let _ = std::fs::remove_file(&tmp);

    match linked {
        Ok(()) => Ok(RunLockGuard {
            path: path.to_path_buf(),
            record,
            released: false,
        }),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Err(held_error(path)),
        Err(err) => Err(lock_io(path, err)),
    }
}

/// Read the current lock record, if any.
pub fn read_at(path: &Path) -> Result<Option<RunLock>, LockError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(lock_io(path, err)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| LockError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Operator intervention: remove the label regardless of holder.
///
/// Returns the record that was removed (`None` if nothing was held or the
/// record was unreadable).
pub fn force_remove_at(path: &Path) -> Result<Option<RunLock>, LockError> {
    let record = read_at(path).unwrap_or(None);
    match std::fs::remove_file(path) {
        Ok(()) => Ok(record),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(lock_io(path, err)),
    }
}

fn held_error(path: &Path) -> LockError {
    match read_at(path) {
        Ok(Some(existing)) => LockError::Held {
            holder: existing.holder,
            host: existing.host,
            acquired_at: existing.acquired_at,
            path: path.to_path_buf(),
        },
        _ => LockError::Held {
            holder: "<unreadable lock record>".into(),
            host: "<unknown>".into(),
            acquired_at: Utc::now(),
            path: path.to_path_buf(),
        },
    }
}

fn remove_if_holder(path: &Path, holder: &str) -> Result<(), LockError> {
    match read_at(path) {
        Ok(Some(current)) if current.holder == holder => match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(lock_io(path, err)),
        },
        // Someone else's label (after a forced unlock) or already gone.
        Ok(_) => Ok(()),
        Err(err) => Err(err),
    }
}

fn lock_io(path: &Path, source: std::io::Error) -> LockError {
    LockError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lock_path(dir: &TempDir) -> PathBuf {
        dir.path().join("state").join("hostsync").join("run.lock")
    }

    #[test]
    fn acquire_writes_record_and_release_removes_it() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);
        let guard = acquire_at(&path, &SessionId::from("aaaa0001"), "laptop").expect("acquire");
        let on_disk = read_at(&path).unwrap().expect("record present");
        assert_eq!(&on_disk, guard.record());
        assert_eq!(on_disk.host, "laptop");
        assert!(on_disk.holder.starts_with("aaaa0001@pid"));

        guard.release().expect("release");
        assert!(!path.exists());
    }

    #[test]
    fn second_acquire_names_existing_holder() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);
        let _first = acquire_at(&path, &SessionId::from("aaaa0001"), "laptop").expect("acquire");

        let err = acquire_at(&path, &SessionId::from("bbbb0002"), "laptop").unwrap_err();
        match &err {
            LockError::Held { holder, host, .. } => {
                assert!(holder.starts_with("aaaa0001@pid"));
                assert_eq!(host, "laptop");
            }
            other => panic!("expected Held, got {other}"),
        }
        assert!(err.to_string().contains("aaaa0001"));
    }

    #[test]
    fn dropped_guard_releases_lock() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);
        {
            let _guard = acquire_at(&path, &SessionId::from("aaaa0001"), "laptop").unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
        acquire_at(&path, &SessionId::from("cccc0003"), "laptop").expect("reacquire");
    }

    #[test]
    fn stale_label_is_not_expired() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);
        let stale = acquire_at(&path, &SessionId::from("dead0000"), "old-host").unwrap();
        // Simulate a crashed holder: the label outlives its process.
        std::mem::forget(stale);

        assert!(matches!(
            acquire_at(&path, &SessionId::from("eeee0004"), "laptop"),
            Err(LockError::Held { .. })
        ));

        let removed = force_remove_at(&path).unwrap().expect("record");
        assert_eq!(removed.host, "old-host");
        acquire_at(&path, &SessionId::from("eeee0004"), "laptop").expect("acquire after unlock");
    }

    #[test]
    fn release_leaves_foreign_label_alone() {
        let dir = TempDir::new().unwrap();
        let path = lock_path(&dir);
        let ours = acquire_at(&path, &SessionId::from("aaaa0001"), "laptop").unwrap();
        force_remove_at(&path).unwrap();
        let theirs = acquire_at(&path, &SessionId::from("ffff0005"), "laptop").unwrap();

        ours.release().unwrap();
        assert_eq!(read_at(&path).unwrap().as_ref(), Some(theirs.record()));
    }
}
