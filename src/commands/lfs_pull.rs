/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use log::error;

use super::helpers;
use crate::mirror::GitMirror;
use crate::options::GitInvocation;
use crate::runner;
use crate::Context;

/// Handle a git lfs pull command.
///
/// Like [`super::lfs_fetch`], but only the current ref is refreshed.
pub fn lfs_pull(context: &Context, invocation: &GitInvocation) -> i32 {
    if let Some(mirror_url) = helpers::get_mirror_url(context, invocation) {
        let repository = invocation
            .command_args
            .first()
            .cloned()
            .unwrap_or_else(|| "origin".to_string());

        if repository == "origin" && !invocation.command_options.is_empty() {
            if let Some(reference) = helpers::get_current_ref(context, invocation) {
                match GitMirror::from_url(context, &mirror_url) {
                    Ok(mirror) => {
                        mirror.fetch_lfs(Some(&reference), &invocation.command_options);
                    }
                    Err(error) => error!("{}", error),
                }
            }
        }
    }

    runner::simple_call_command(&invocation.real_git_all_args(&context.config), None)
}
