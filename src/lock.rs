/// lock.rs – Exclusive run lock backed by an advisory file lock.
///
/// `RunLock::acquire` opens (or creates) the lock file and polls for an
/// exclusive advisory lock on it until the wait budget is spent. The lock
/// is held by the open handle: it is released when the guard is dropped,
/// and by the kernel if the process dies, so a crashed run never leaves a
/// lock behind. The file itself is never deleted; removing it would let a
/// second run lock a fresh inode while the first still holds the old one.
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
    token: String,
}

impl RunLock {
    /// `Ok(None)` when another run still holds the lock after `wait`.
    pub fn acquire(path: &Path, wait: Duration) -> Result<Option<RunLock>> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("opening lock file {}", path.display()))?;

        let started = Instant::now();
        loop {
            match file.try_lock() {
                Ok(()) => break,
                Err(TryLockError::WouldBlock) => {
                    if started.elapsed() >= wait {
                        return Ok(None);
                    }
                    thread::sleep(POLL_INTERVAL.min(wait.saturating_sub(started.elapsed())));
                }
                Err(TryLockError::Error(e)) => {
                    return Err(e).with_context(|| format!("locking {}", path.display()))
                }
            }
        }

        // Holder identity for whoever inspects a stuck lock by hand.
        let token = format!("{} {}", std::process::id(), Uuid::new_v4());
        file.set_len(0)
            .and_then(|_| writeln!(file, "{token}"))
            .with_context(|| format!("writing lock file {}", path.display()))?;
        debug!("Acquired run lock {} ({})", path.display(), token);

        Ok(Some(RunLock {
            file,
            path: path.to_path_buf(),
            token,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `pid uuid` written into the lock file by this holder.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!("Could not release run lock {}: {}", self.path.display(), e);
        } else {
            debug!("Released run lock {}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn second_acquire_is_refused_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.lock");

        let first = RunLock::acquire(&path, Duration::ZERO).unwrap();
        assert!(first.is_some());

        let second = RunLock::acquire(&path, Duration::from_millis(150)).unwrap();
        assert!(second.is_none());

        drop(first);
        assert!(RunLock::acquire(&path, Duration::ZERO).unwrap().is_some());
    }

    #[test]
    fn released_holder_never_frees_the_next_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.lock");

        let a = RunLock::acquire(&path, Duration::ZERO).unwrap().unwrap();
        assert!(RunLock::acquire(&path, Duration::from_millis(50)).unwrap().is_none());

        drop(a);
        let b = RunLock::acquire(&path, Duration::ZERO).unwrap().unwrap();
        // The file outlives every holder.
        assert!(path.exists());

        let c = RunLock::acquire(&path, Duration::from_millis(150)).unwrap();
        assert!(c.is_none(), "two live holders");
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), b.token());
    }

    #[test]
    fn leftover_file_without_holder_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.lock");
        fs::write(&path, "12345 from-a-crashed-run\n").unwrap();

        let lock = RunLock::acquire(&path, Duration::ZERO).unwrap().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), lock.token());
    }

    #[test]
    fn tokens_are_unique_per_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.lock");
        let first = RunLock::acquire(&path, Duration::ZERO).unwrap().unwrap();
        let t1 = first.token().to_string();
        drop(first);
        let second = RunLock::acquire(&path, Duration::ZERO).unwrap().unwrap();
        assert_ne!(t1, second.token());
        assert!(t1.starts_with(&std::process::id().to_string()));
    }
}
