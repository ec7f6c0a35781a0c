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

const SUPPORTED_PREFIXES: &[&str] = &["http://", "https://", "ssh://"];

/// Handle a git ls-remote command.
///
/// Without a repository argument or with `origin`, the mirror is updated
/// and the invocation is rewritten to run against `origin` of the mirror.
pub fn ls_remote(context: &Context, invocation: &GitInvocation) -> i32 {
    let repository = invocation.command_args.first().cloned();

    let mut mirror_url = None;
    if repository.is_none() || repository.as_deref() == Some("origin") {
        mirror_url = helpers::get_mirror_url(context, invocation);
    }

    if let Some(repository) = &repository {
        if SUPPORTED_PREFIXES
            .iter()
            .any(|prefix| repository.starts_with(prefix))
            && helpers::use_mirror_for_remote_url(context, repository)
        {
            mirror_url = Some(repository.clone());
        }
    }

    let new_args = match mirror_url {
        Some(mirror_url) => match GitMirror::from_url(context, &mirror_url) {
            Ok(mirror) => {
                mirror.update(None, false);
                let mut args = invocation.global_options.clone();
                args.push("ls-remote".to_string());
                args.extend(invocation.command_options.iter().cloned());
                args.push("origin".to_string());
                if invocation.command_args.len() > 1 {
                    args.extend(invocation.command_args[1..].iter().cloned());
                }
                args
            }
            Err(error) => {
                error!("{}", error);
                invocation.all_args.clone()
            }
        },
        None => invocation.all_args.clone(),
    };

    let mut command = vec![context.config.get_str("System", "RealGit")];
    command.extend(new_args);
    runner::simple_call_command(&command, None)
}
