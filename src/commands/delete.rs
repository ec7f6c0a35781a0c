/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use std::path::Path;

use log::{error, info, warn};

use crate::mirror::GitMirror;
use crate::Context;

/// Delete the given mirrors, identified by their upstream URL or their
/// path in the cache.
pub fn delete_mirrors(context: &Context, mirrors: &[String]) -> i32 {
    let db_map = context.database.get_all();
    let known_urls: Vec<&str> = db_map.values().map(|entry| entry.url.as_str()).collect();

    let mut num_deleted = 0;
    let mut num_failed = 0;
    info!("Deleting specified mirrors.");
    for mirror_ref in mirrors {
        let mirror = if known_urls.contains(&mirror_ref.as_str()) {
            match GitMirror::from_url(context, mirror_ref) {
                Ok(mirror) => mirror,
                Err(error) => {
                    error!("{}", error);
                    num_failed += 1;
                    continue;
                }
            }
        } else if db_map.contains_key(Path::new(mirror_ref)) {
            GitMirror::from_path(context, Path::new(mirror_ref))
        } else {
            error!(
                "Unknown mirror {} (does not match any known URL or mirror path).",
                mirror_ref
            );
            num_failed += 1;
            continue;
        };

        mirror.delete();
        info!("Deleted mirror {}.", mirror.path.display());
        num_deleted += 1;
    }

    match num_deleted {
        0 => warn!("No mirror deleted."),
        1 => info!("Mirror deleted."),
        count => info!("{} mirrors deleted.", count),
    }

    if num_failed != 0 {
        warn!("{} mirror(s) not identified!", num_failed);
        return 1;
    }
    0
}
