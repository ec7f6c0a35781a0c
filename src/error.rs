/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// An error raised by the mirror handling itself.
///
/// Failures of child processes are not errors on this level. They are
/// carried in [`crate::runner::RunStatus`] and turned into exit codes at
/// the process boundary.
#[derive(Error, Debug)]
pub enum GitcacheError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("URL {0} can not be mapped to a mirror location")]
    Url(String),
    #[error("Timeout waiting for the lock of {0}")]
    LockTimeout(String),
    #[error("Filesystem operation on {path} failed: {source}")]
    Filesystem { path: PathBuf, source: io::Error },
}

impl From<GitcacheError> for i32 {
    fn from(error: GitcacheError) -> i32 {
        match error {
            GitcacheError::Config(_) => 1,
            GitcacheError::Url(_) => 1,
            GitcacheError::LockTimeout(_) => 1,
            GitcacheError::Filesystem { .. } => 1,
        }
    }
}

pub type Result<T> = core::result::Result<T, GitcacheError>;
