/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use log::{debug, error};

use super::helpers;
use crate::mirror::{clone_target_dir, GitMirror};
use crate::options::GitInvocation;
use crate::runner;
use crate::urls;
use crate::Context;

/// Handle a git clone command.
///
/// Remote URLs that map to a mirror location and pass the URL patterns are
/// cloned through the mirror; everything else falls back to the real git.
pub fn clone(context: &Context, called_as: &[String], invocation: &GitInvocation) -> i32 {
    let remote_url = invocation.command_args.first().cloned();
    let mirrorable = remote_url
        .as_deref()
        .and_then(|url| urls::mirror_path(url, &context.settings.cache_dir))
        .is_some();

    if let (Some(remote_url), true) = (remote_url, mirrorable) {
        if helpers::use_mirror_for_remote_url(context, &remote_url) {
            let mirror = match GitMirror::from_url(context, &remote_url) {
                Ok(mirror) => mirror,
                Err(error) => {
                    error!("{}", error);
                    return 1;
                }
            };

            let mut retval = mirror.clone_from_mirror(invocation);
            if retval == 0 && wants_submodules(invocation) {
                debug!("Initializing submodules by calling 'git submodule update --init --recursive'.");
                let target_dir = if invocation.command_args.len() > 1 {
                    invocation.command_args[1].clone()
                } else {
                    clone_target_dir(&remote_url)
                };

                let mut command = called_as.to_vec();
                command.extend(invocation.global_options.iter().cloned());
                command.push("-C".to_string());
                command.push(target_dir);
                command.extend(
                    ["submodule", "update", "--init", "--recursive"]
                        .iter()
                        .map(|arg| arg.to_string()),
                );
                if invocation
                    .command_options
                    .iter()
                    .any(|option| option == "--remote-submodules")
                {
                    command.push("--remote".to_string());
                }
                retval = runner::simple_call_command(&command, None);
            }
            return retval;
        }
        debug!("Remote URL does not match the UrlPatterns. Using original git command.");
    } else {
        debug!("No (mirrorable) remote URL found. Falling back to orginal git command.");
    }

    runner::simple_call_command(&invocation.real_git_all_args(&context.config), None)
}

fn wants_submodules(invocation: &GitInvocation) -> bool {
    invocation
        .command_options
        .iter()
        .any(|option| option == "--recurse-submodules" || option == "--recursive")
}
