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

/// Handle a git lfs fetch command.
///
/// `git lfs fetch [options] [remote [ref...]]` updates the mirror only
/// when explicit options or refs are given for `origin`; a bare fetch was
/// already covered by the surrounding commands.
pub fn lfs_fetch(context: &Context, invocation: &GitInvocation) -> i32 {
    if let Some(mirror_url) = helpers::get_mirror_url(context, invocation) {
        let mut repository = "origin".to_string();
        let mut refs: Vec<String> = Vec::new();
        if let Some((first, rest)) = invocation.command_args.split_first() {
            repository = first.clone();
            refs = rest.to_vec();
        }

        if repository == "origin" && (!invocation.command_options.is_empty() || !refs.is_empty()) {
            if refs.is_empty() {
                if let Some(current) = helpers::get_current_ref(context, invocation) {
                    refs.push(current);
                }
            }

            match GitMirror::from_url(context, &mirror_url) {
                Ok(mirror) => {
                    for reference in &refs {
                        mirror.fetch_lfs(Some(reference), &invocation.command_options);
                    }
                }
                Err(error) => error!("{}", error),
            }
        }
    }

    runner::simple_call_command(&invocation.real_git_all_args(&context.config), None)
}
