// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Staged filesystem writes with undo.

Every mutating repository operation accumulates an [UndoStack] while it
runs. Individual steps use staged writes: content goes to a temporary
sibling first and is renamed into place, so each step is atomic on its
own. When a later step fails, the stack is unwound in reverse order and
the disk returns to its pre-operation state.

Renames never cross directories, which keeps them on one filesystem and
therefore atomic.
*/

use {
    crate::error::{RepositoryError, Result},
    std::{
        fs,
        path::{Path, PathBuf},
    },
};

const TMP_SUFFIX: &str = ".tmp";
const BACKUP_SUFFIX: &str = ".bkp";

fn io_path(path: &Path) -> impl Fn(std::io::Error) -> RepositoryError + '_ {
    move |e| RepositoryError::IoPath(path.display().to_string(), e)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);

    path.with_file_name(name)
}

/// A single reversible effect of an operation.
#[derive(Clone, Debug)]
pub enum UndoStep {
    /// Delete a file or symlink the operation created.
    Remove(PathBuf),
    /// Rename a backup copy back over a path the operation replaced.
    Restore { path: PathBuf, backup: PathBuf },
    /// Recreate a symlink the operation removed.
    Relink { path: PathBuf, target: PathBuf },
}

/// The accumulated undo state of one repository operation.
#[derive(Debug, Default)]
pub struct UndoStack {
    steps: Vec<UndoStep>,
}

impl UndoStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: UndoStep) {
        self.steps.push(step);
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Roll back every recorded step, most recent first.
    ///
    /// Unwinding is best effort: a failing step is logged and skipped so
    /// the remaining steps still run.
    pub fn unwind(self) {
        for step in self.steps.into_iter().rev() {
            let result = match &step {
                UndoStep::Remove(path) => fs::remove_file(path),
                UndoStep::Restore { path, backup } => fs::rename(backup, path),
                UndoStep::Relink { path, target } => {
                    // The path may hold a replacement link by now.
                    let _ = fs::remove_file(path);

                    std::os::unix::fs::symlink(target, path)
                }
            };

            if let Err(e) = result {
                log::warn!("undo step {:?} failed: {}", step, e);
            }
        }
    }

    /// Commit the operation: drop the undo state and delete backup
    /// copies that are no longer needed.
    pub fn commit(self) {
        for step in self.steps {
            if let UndoStep::Restore { backup, .. } = step {
                if let Err(e) = fs::remove_file(&backup) {
                    log::warn!("could not remove backup {}: {}", backup.display(), e);
                }
            }
        }
    }
}

/// Atomically write `data` to `path`, recording undo state.
///
/// The data is first written to a temporary sibling and then renamed
/// into place. A pre-existing file is preserved as a backup sibling so
/// the write can be undone.
pub fn staged_write(path: &Path, data: &[u8], undo: &mut UndoStack) -> Result<()> {
    let tmp = sibling(path, TMP_SUFFIX);

    fs::write(&tmp, data).map_err(io_path(&tmp))?;

    if path.exists() {
        let backup = sibling(path, BACKUP_SUFFIX);
        fs::copy(path, &backup).map_err(io_path(path))?;

        undo.push(UndoStep::Restore {
            path: path.to_path_buf(),
            backup,
        });
    } else {
        undo.push(UndoStep::Remove(path.to_path_buf()));
    }

    fs::rename(&tmp, path).map_err(io_path(path))?;

    Ok(())
}

/// Atomically copy `src` to `dest`, recording undo state.
///
/// `dest` must not exist; the copy goes through a temporary sibling of
/// `dest` so a crash never leaves a partially written destination.
pub fn staged_copy(src: &Path, dest: &Path, undo: &mut UndoStack) -> Result<()> {
    let tmp = sibling(dest, TMP_SUFFIX);

    fs::copy(src, &tmp).map_err(io_path(src))?;

    undo.push(UndoStep::Remove(dest.to_path_buf()));

    fs::rename(&tmp, dest).map_err(io_path(dest))?;

    Ok(())
}

/// Remove a file by renaming it to a backup sibling, recording undo
/// state. The backup is deleted on commit.
pub fn staged_remove(path: &Path, undo: &mut UndoStack) -> Result<()> {
    let backup = sibling(path, BACKUP_SUFFIX);

    fs::rename(path, &backup).map_err(io_path(path))?;

    undo.push(UndoStep::Restore {
        path: path.to_path_buf(),
        backup,
    });

    Ok(())
}

/// Point a symlink at `target`, atomically replacing whatever symlink
/// was there before.
pub fn replace_symlink(path: &Path, target: &Path, undo: &mut UndoStack) -> Result<()> {
    match fs::read_link(path) {
        Ok(existing) if existing.as_path() == target => return Ok(()),
        Ok(existing) => {
            fs::remove_file(path).map_err(io_path(path))?;

            undo.push(UndoStep::Relink {
                path: path.to_path_buf(),
                target: existing,
            });
        }
        Err(_) => {
            undo.push(UndoStep::Remove(path.to_path_buf()));
        }
    }

    std::os::unix::fs::symlink(target, path).map_err(io_path(path))?;

    Ok(())
}

/// Whether a directory entry name denotes staging or backup litter left
/// behind by an interrupted operation.
pub fn is_staging_residue(name: &str) -> bool {
    name.ends_with(TMP_SUFFIX) || name.ends_with(BACKUP_SUFFIX)
}
