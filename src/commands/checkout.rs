/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use super::helpers;
use crate::mirror::GitMirror;
use crate::options::GitInvocation;
use crate::runner;
use crate::Context;

/// Handle a git checkout command.
///
/// For every positional argument naming a remote ref, the LFS data of
/// that ref is fetched into the mirror before the real git takes over.
pub fn checkout(context: &Context, invocation: &GitInvocation) -> i32 {
    let ref_candidates = invocation
        .command_args
        .iter()
        .filter(|arg| !arg.starts_with('-') && !arg.starts_with(':'));

    let mut lfs_fetch_refs = Vec::new();
    for candidate in ref_candidates {
        let command = helpers::with_args(
            &invocation.real_git_with_options(&context.config),
            &["show-ref", candidate],
        );
        let (code, output) = runner::getstatusoutput(&command, None);
        if code == 0 && output.contains("remotes") {
            lfs_fetch_refs.push(candidate.clone());
        }
    }

    if !lfs_fetch_refs.is_empty() {
        if let Some(mirror_url) = helpers::get_mirror_url(context, invocation) {
            if let Ok(mirror) = GitMirror::from_url(context, &mirror_url) {
                for reference in &lfs_fetch_refs {
                    mirror.fetch_lfs(Some(reference), &[]);
                }
            }
        }
    }

    runner::simple_call_command(&invocation.real_git_all_args(&context.config), None)
}
