/*
 * Copyright (c) 2025 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use log::debug;

use super::helpers;
use crate::mirror::GitMirror;
use crate::options::GitInvocation;
use crate::runner;
use crate::Context;

/// Handle a git remote add command.
///
/// Only `git remote add origin <url>` without a `--mirror` option and
/// without an existing origin is intercepted: the mirror is created and
/// the checkout is wired to fetch from it.
pub fn remote_add(context: &Context, invocation: &GitInvocation) -> i32 {
    if invocation.command_args.len() >= 2 && invocation.command_args[0] == "origin" {
        if !invocation
            .command_options
            .iter()
            .any(|option| option.starts_with("--mirror"))
        {
            let remote_url = &invocation.command_args[1];
            if helpers::get_pull_url(context, invocation).is_none() {
                if helpers::use_mirror_for_remote_url(context, remote_url) {
                    if let Ok(mirror) = GitMirror::from_url(context, remote_url) {
                        if !mirror.ensure_exists() {
                            return 1;
                        }
                        return mirror.configure_git_for_mirror(invocation);
                    }
                    debug!("Ignoring 'git remote add' command as the remote url has no mirror location.");
                } else {
                    debug!("Ignoring 'git remote add' command as the remote url is excluded in the configuration.");
                }
            } else {
                debug!("Ignoring 'git remote add' command as there is already a remote set up.");
            }
        } else {
            debug!("Ignoring 'git remote add' command as the '--mirror' option was used.");
        }
    } else {
        debug!(
            "Ignoring 'git remote add' command with additional arguments {:?}.",
            invocation.command_args
        );
    }

    runner::simple_call_command(&invocation.real_git_all_args(&context.config), None)
}
