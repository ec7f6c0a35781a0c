/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use std::fs;
use std::io;
use std::path::Path;

use log::debug;
use walkdir::WalkDir;

use crate::error::{GitcacheError, Result};

/// Delete a directory tree.
///
/// Mirror checkouts may contain read-only objects. If the first removal
/// attempt fails, all permissions below `path` are reset to `0700` and the
/// removal is attempted a second time. With `ignore_errors` set, a final
/// failure is logged and swallowed.
pub fn rmtree(path: &Path, ignore_errors: bool) -> Result<()> {
    debug!("Deleting directory tree {}", path.display());

    let first = match fs::remove_dir_all(path) {
        Ok(()) => return Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(error) => error,
    };

    debug!(
        "Error while deleting {}: {}. Resetting permissions and retrying.",
        path.display(),
        first
    );
    reset_permissions(path);

    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => {
            if ignore_errors {
                debug!("Ignoring error {} during rmtree.", error);
                Ok(())
            } else {
                Err(GitcacheError::Filesystem {
                    path: path.to_path_buf(),
                    source: error,
                })
            }
        }
    }
}

#[cfg(unix)]
fn reset_permissions(root: &Path) {
    use std::os::unix::fs::PermissionsExt;

    for entry in WalkDir::new(root).into_iter().flatten() {
        let _ = fs::set_permissions(entry.path(), fs::Permissions::from_mode(0o700));
    }
}

#[cfg(not(unix))]
fn reset_permissions(root: &Path) {
    for entry in WalkDir::new(root).into_iter().flatten() {
        if let Ok(metadata) = entry.metadata() {
            let mut permissions = metadata.permissions();
            permissions.set_readonly(false);
            let _ = fs::set_permissions(entry.path(), permissions);
        }
    }
}
