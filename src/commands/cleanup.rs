/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use log::info;

use crate::mirror::GitMirror;
use crate::Context;

/// Remove all mirrors that have not been updated for longer than the
/// `MirrorHandling.CleanupAfter` threshold.
pub fn cleanup(context: &Context) -> i32 {
    info!("Starting cleanup of mirrors.");
    let mut num_removed = 0;
    for path in context.database.get_all().keys() {
        let mirror = GitMirror::from_path(context, path);
        if mirror.cleanup() {
            info!("Removed mirror {}.", path.display());
            num_removed += 1;
        }
    }
    info!("Removed {} mirrors.", num_removed);
    0
}
