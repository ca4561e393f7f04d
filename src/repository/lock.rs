// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Advisory repository locking.

Every repository `(name, architecture)` owns one lock file in the
management root. All mutating operations hold its exclusive `flock`
while they run; readers take no locks and may observe a database mid
replacement, which the atomic rename on publish keeps consistent.

Operations spanning multiple repositories acquire the locks in
lexicographic identity order so two concurrent operations can never
deadlock on each other.
*/

use {
    crate::error::{RepositoryError, Result},
    fs2::FileExt,
    std::{
        fs::File,
        path::{Path, PathBuf},
        time::{Duration, Instant},
    },
};

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// An exclusive lock on one repository.
///
/// The lock is released when the value drops.
#[derive(Debug)]
pub struct RepositoryLock {
    // Held open to keep the flock; never read from.
    _file: File,
    path: PathBuf,
}

impl RepositoryLock {
    /// Acquire the lock, waiting up to `timeout`.
    ///
    /// A zero timeout fails fast: the lock is tried exactly once.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RepositoryError::IoPath(parent.display().to_string(), e))?;
        }

        let file = File::create(path)
            .map_err(|e| RepositoryError::IoPath(path.display().to_string(), e))?;

        let deadline = Instant::now() + timeout;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    log::debug!("locked repository via {}", path.display());

                    return Ok(Self {
                        _file: file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(RepositoryError::LockTimeout(
                            path.display().to_string(),
                            timeout,
                        ));
                    }

                    std::thread::sleep(RETRY_INTERVAL.min(
                        deadline.saturating_duration_since(Instant::now()),
                    ));
                }
                Err(e) => {
                    return Err(RepositoryError::IoPath(path.display().to_string(), e));
                }
            }
        }
    }

    /// Acquire several locks in canonical (sorted path) order.
    ///
    /// Duplicate paths are collapsed so an operation touching one
    /// repository twice does not deadlock against itself.
    pub fn acquire_ordered(paths: &[PathBuf], timeout: Duration) -> Result<Vec<Self>> {
        let mut unique = paths.to_vec();
        unique.sort();
        unique.dedup();

        unique
            .iter()
            .map(|path| Self::acquire(path, timeout))
            .collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RepositoryLock {
    fn drop(&mut self) {
        log::debug!("released repository lock {}", self.path.display());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core-x86_64.lock");

        let lock = RepositoryLock::acquire(&path, Duration::ZERO).unwrap();
        assert!(path.exists());

        drop(lock);

        // Releasable and re-acquirable.
        RepositoryLock::acquire(&path, Duration::ZERO).unwrap();
    }

    #[test]
    fn contention_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core-x86_64.lock");

        let _held = RepositoryLock::acquire(&path, Duration::ZERO).unwrap();

        assert!(matches!(
            RepositoryLock::acquire(&path, Duration::ZERO),
            Err(RepositoryError::LockTimeout(_, _))
        ));
    }

    #[test]
    fn ordered_acquisition_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.lock");
        let b = dir.path().join("b.lock");

        let locks = RepositoryLock::acquire_ordered(
            &[b.clone(), a.clone(), b.clone()],
            Duration::ZERO,
        )
        .unwrap();

        assert_eq!(locks.len(), 2);
        assert_eq!(locks[0].path(), a.as_path());
        assert_eq!(locks[1].path(), b.as_path());
    }
}
