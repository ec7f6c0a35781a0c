/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use std::path::PathBuf;

use log::{error, info, warn};
use rayon::prelude::*;

use crate::mirror::GitMirror;
use crate::Context;

/// Force an update of all known mirrors.
///
/// The mirrors are refreshed in parallel; the per-mirror locks and the
/// database lock keep the workers from stepping on each other.
pub fn update_all_mirrors(context: &Context) -> i32 {
    info!("Starting update of all known mirrors.");
    let paths: Vec<PathBuf> = context.database.get_all().keys().cloned().collect();

    let results: Vec<(PathBuf, bool)> = paths
        .par_iter()
        .map(|path| {
            let mirror = GitMirror::from_path(context, path);
            (path.clone(), mirror.update(None, true))
        })
        .collect();

    let success: Vec<&PathBuf> = results.iter().filter(|(_, ok)| *ok).map(|(path, _)| path).collect();
    let failed: Vec<&PathBuf> = results.iter().filter(|(_, ok)| !*ok).map(|(path, _)| path).collect();

    if !success.is_empty() {
        info!("Updated the following paths successfully:");
        for path in &success {
            info!("  {}", path.display());
        }
    }

    if !failed.is_empty() {
        error!("Failed to update the following paths:");
        for path in &failed {
            error!("  {}", path.display());
        }
        return 1;
    }

    if success.is_empty() && failed.is_empty() {
        warn!("Nothing to update.");
    }

    0
}
