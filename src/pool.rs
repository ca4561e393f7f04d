// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The content addressed package pool.

Archives and signatures live exactly once in a pool directory, keyed by
basename. Repository layer directories hold relative symlinks into the
pool; a pool entry is garbage collectable once no layer references it.

Placing the same file twice is a no-op (pools may be shared between
repositories), while placing different content under an existing
basename is a collision and fails.
*/

use {
    crate::{
        error::{RepositoryError, Result},
        io::digest_file,
        transaction::{staged_copy, UndoStack, UndoStep},
    },
    std::{
        collections::BTreeSet,
        fs,
        path::{Path, PathBuf},
    },
};

fn io_path(path: &Path) -> impl Fn(std::io::Error) -> RepositoryError + '_ {
    move |e| RepositoryError::IoPath(path.display().to_string(), e)
}

/// The shared leading components of two absolute paths.
fn shared_base(a: &Path, b: &Path) -> PathBuf {
    a.components()
        .zip(b.components())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x)
        .collect()
}

/// The path of `target` expressed relative to the directory `link`
/// lives in, traversing up to the shared base of both paths.
///
/// This is the string stored in layer symlinks, e.g.
/// `../../../../../pool/package/core/foo-1.0-1-any.pkg.tar.zst`.
pub fn relative_link_target(target: &Path, link: &Path) -> PathBuf {
    let base = shared_base(target, link);

    let ups = link
        .parent()
        .map(|parent| parent.components().count() - base.components().count())
        .unwrap_or(0);

    let mut out = PathBuf::new();
    for _ in 0..ups {
        out.push("..");
    }

    out.join(target.strip_prefix(&base).expect("base is a prefix"))
}

/// A pool directory.
#[derive(Clone, Debug)]
pub struct PackagePool {
    directory: PathBuf,
}

impl PackagePool {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The pool path a basename maps to.
    pub fn entry_path(&self, basename: &str) -> PathBuf {
        self.directory.join(basename)
    }

    /// Copy `src` into the pool under its basename.
    ///
    /// An existing entry with identical content is a no-op. An existing
    /// entry with different content is a [RepositoryError::PoolCollision].
    pub async fn place(&self, src: &Path, undo: &mut UndoStack) -> Result<PathBuf> {
        let basename = src
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                RepositoryError::IoPath(
                    src.display().to_string(),
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"),
                )
            })?;

        let dest = self.entry_path(basename);

        if dest.exists() {
            let existing = digest_file(&dest).await?;
            let incoming = digest_file(src).await?;

            if existing != incoming {
                return Err(RepositoryError::PoolCollision(basename.to_string()));
            }

            log::debug!("pool entry {} already current", basename);
            return Ok(dest);
        }

        fs::create_dir_all(&self.directory).map_err(io_path(&self.directory))?;

        staged_copy(src, &dest, undo)?;
        log::debug!("placed {} into pool {}", basename, self.directory.display());

        Ok(dest)
    }

    /// Create a relative symlink to a pool entry inside a layer
    /// directory.
    ///
    /// An existing symlink to the same target is a no-op; anything else
    /// occupying the name is a [RepositoryError::LinkConflict].
    pub fn link(
        &self,
        pool_path: &Path,
        layer_dir: &Path,
        undo: &mut UndoStack,
    ) -> Result<PathBuf> {
        let basename = pool_path
            .file_name()
            .expect("pool paths always carry a file name");
        let link_path = layer_dir.join(basename);
        let target = relative_link_target(pool_path, &link_path);

        match fs::read_link(&link_path) {
            Ok(existing) => {
                return if existing == target {
                    Ok(link_path)
                } else {
                    Err(RepositoryError::LinkConflict(
                        link_path.display().to_string(),
                        existing.display().to_string(),
                    ))
                };
            }
            Err(_) => {
                if link_path.exists() {
                    return Err(RepositoryError::LinkConflict(
                        link_path.display().to_string(),
                        "a non-symlink file".to_string(),
                    ));
                }
            }
        }

        fs::create_dir_all(layer_dir).map_err(io_path(layer_dir))?;

        std::os::unix::fs::symlink(&target, &link_path).map_err(io_path(&link_path))?;

        undo.push(UndoStep::Remove(link_path.clone()));

        Ok(link_path)
    }

    /// Remove a layer symlink. The pool entry stays untouched.
    ///
    /// Returns `false` when no such symlink existed.
    pub fn unlink(&self, layer_dir: &Path, filename: &str, undo: &mut UndoStack) -> Result<bool> {
        let link_path = layer_dir.join(filename);

        let target = match fs::read_link(&link_path) {
            Ok(target) => target,
            Err(_) => return Ok(false),
        };

        fs::remove_file(&link_path).map_err(io_path(&link_path))?;

        undo.push(UndoStep::Relink {
            path: link_path,
            target,
        });

        Ok(true)
    }

    /// Remove pool entries whose basename is not in `known`.
    ///
    /// Returns the removed basenames.
    pub fn collect(&self, known: &BTreeSet<String>) -> Result<Vec<String>> {
        let mut removed = Vec::new();

        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            // A pool that was never written to has nothing to collect.
            Err(_) => return Ok(removed),
        };

        for entry in entries {
            let entry = entry.map_err(io_path(&self.directory))?;

            let name = entry.file_name().to_string_lossy().to_string();

            if known.contains(&name) {
                continue;
            }

            fs::remove_file(entry.path()).map_err(io_path(&entry.path()))?;

            log::info!("collected pool entry {}", name);
            removed.push(name);
        }

        removed.sort();
        Ok(removed)
    }
}

#[cfg(test)]
mod test {
    use {super::*, async_std::task::block_on};

    #[test]
    fn relative_targets() {
        assert_eq!(
            relative_link_target(
                Path::new("/data/pool/package/core/foo.pkg.tar.zst"),
                Path::new("/data/repo/package/core/x86_64/stable/foo.pkg.tar.zst"),
            ),
            Path::new("../../../../../pool/package/core/foo.pkg.tar.zst")
        );

        assert_eq!(
            relative_link_target(Path::new("/data/a/file"), Path::new("/data/a/link")),
            Path::new("file")
        );
    }

    #[test]
    fn place_and_link() {
        block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let src = dir.path().join("incoming/foo-1.0-1-any.pkg.tar.zst");
            fs::create_dir_all(src.parent().unwrap()).unwrap();
            fs::write(&src, b"archive bytes").unwrap();

            let pool = PackagePool::new(dir.path().join("pool"));
            let layer = dir.path().join("repo/stable");

            let mut undo = UndoStack::new();
            let pool_path = pool.place(&src, &mut undo).await.unwrap();
            assert_eq!(fs::read(&pool_path).unwrap(), b"archive bytes");

            let link = pool.link(&pool_path, &layer, &mut undo).unwrap();
            let target = fs::read_link(&link).unwrap();
            assert_eq!(target, Path::new("../../pool/foo-1.0-1-any.pkg.tar.zst"));

            // Linking again is a no-op.
            pool.link(&pool_path, &layer, &mut undo).unwrap();

            // The symlink resolves to the pool entry.
            let resolved = link.parent().unwrap().join(&target);
            assert_eq!(fs::canonicalize(&resolved).unwrap(), pool_path);
        });
    }

    #[test]
    fn duplicate_place_is_a_noop() {
        block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let src = dir.path().join("foo.pkg.tar.zst");
            fs::write(&src, b"same bytes").unwrap();

            let pool = PackagePool::new(dir.path().join("pool"));

            let mut undo = UndoStack::new();
            pool.place(&src, &mut undo).await.unwrap();
            pool.place(&src, &mut undo).await.unwrap();
        });
    }

    #[test]
    fn collision_is_detected() {
        block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let pool = PackagePool::new(dir.path().join("pool"));

            let src = dir.path().join("foo.pkg.tar.zst");
            fs::write(&src, b"one").unwrap();

            let mut undo = UndoStack::new();
            pool.place(&src, &mut undo).await.unwrap();

            fs::write(&src, b"two").unwrap();
            assert!(matches!(
                pool.place(&src, &mut undo).await,
                Err(RepositoryError::PoolCollision(name)) if name == "foo.pkg.tar.zst"
            ));
        });
    }

    #[test]
    fn unlink_restores_on_undo() {
        block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let src = dir.path().join("foo.pkg.tar.zst");
            fs::write(&src, b"bytes").unwrap();

            let pool = PackagePool::new(dir.path().join("pool"));
            let layer = dir.path().join("stable");

            let mut setup = UndoStack::new();
            let pool_path = pool.place(&src, &mut setup).await.unwrap();
            let link = pool.link(&pool_path, &layer, &mut setup).unwrap();

            let mut undo = UndoStack::new();
            assert!(pool.unlink(&layer, "foo.pkg.tar.zst", &mut undo).unwrap());
            assert!(fs::read_link(&link).is_err());

            undo.unwind();
            assert!(fs::read_link(&link).is_ok());

            // Unlinking a missing name is tolerated.
            let mut undo = UndoStack::new();
            assert!(!pool.unlink(&layer, "absent.pkg.tar.zst", &mut undo).unwrap());
        });
    }

    #[test]
    fn collect_removes_unreferenced_entries() {
        block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let pool = PackagePool::new(dir.path().join("pool"));

            for name in ["keep.pkg.tar.zst", "drop.pkg.tar.zst"] {
                let src = dir.path().join(name);
                fs::write(&src, b"bytes").unwrap();

                let mut undo = UndoStack::new();
                pool.place(&src, &mut undo).await.unwrap();
            }

            let known = BTreeSet::from(["keep.pkg.tar.zst".to_string()]);
            let removed = pool.collect(&known).unwrap();

            assert_eq!(removed, vec!["drop.pkg.tar.zst".to_string()]);
            assert!(pool.entry_path("keep.pkg.tar.zst").exists());
            assert!(!pool.entry_path("drop.pkg.tar.zst").exists());
        });
    }
}
