//! Exclusive, non-blocking lock on a build context.
//!
//! Liveness comes from `flock(2)`: the kernel drops the lock when the holder
//! exits, so a lock file left by a crashed process is simply re-locked.
//! The owning pid is written into the file for diagnostics only.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use acb_core::error::{BuildError, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

/// Attempts made when the lock file is replaced between open and lock.
const MAX_ATTEMPTS: usize = 5;

/// Held lock. Released by [`ContextLock::release`] or on drop.
#[derive(Debug)]
pub struct ContextLock {
    path: PathBuf,
    file: Option<Flock<File>>,
}

impl ContextLock {
    /// Take the lock at `path` or fail immediately with `LockHeld`.
    pub fn acquire(path: &Path) -> Result<Self> {
        for _ in 0..MAX_ATTEMPTS {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .mode(0o644)
                .open(path)?;

            let locked = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(locked) => locked,
                Err((mut file, errno)) if errno == Errno::EWOULDBLOCK => {
                    return Err(BuildError::LockHeld {
                        path: path.to_path_buf(),
                        holder: read_holder(&mut file),
                    });
                }
                Err((_, errno)) => return Err(std::io::Error::from(errno).into()),
            };

            // The previous holder unlinks the file before unlocking; if that
            // happened between our open and flock we hold a dead inode.
            let held = locked.metadata()?;
            match std::fs::metadata(path) {
                Ok(current) if current.ino() == held.ino() && current.dev() == held.dev() => {}
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }

            locked.set_len(0)?;
            let mut handle: &File = &locked;
            handle.write_all(std::process::id().to_string().as_bytes())?;

            tracing::debug!(path = %path.display(), "Acquired build context lock");
            return Ok(Self {
                path: path.to_path_buf(),
                file: Some(locked),
            });
        }

        Err(BuildError::LockHeld {
            path: path.to_path_buf(),
            holder: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file and unlock.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    /// Release the lock and fold the outcome into `result`.
    ///
    /// An error from the operation always wins; a release failure is only
    /// reported when the operation itself succeeded.
    pub fn finish<T>(self, result: Result<T>) -> Result<T> {
        let released = self.release();
        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                tracing::warn!(error = %release_err, "Failed to release build context lock");
                Err(e)
            }
        }
    }

    fn release_inner(&mut self) -> Result<()> {
        let Some(locked) = self.file.take() else {
            return Ok(());
        };

        let removed = match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        };
        locked
            .unlock()
            .map_err(|(_, errno)| std::io::Error::from(errno))?;
        removed?;

        tracing::debug!(path = %self.path.display(), "Released build context lock");
        Ok(())
    }
}

impl Drop for ContextLock {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release build context lock");
        }
    }
}

fn read_holder(file: &mut File) -> Option<u32> {
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}
