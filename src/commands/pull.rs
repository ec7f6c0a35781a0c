/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use log::error;

use super::helpers;
use crate::database::Counter;
use crate::mirror::GitMirror;
use crate::options::GitInvocation;
use crate::runner::{self, CallOptions, RetrySpec};
use crate::Context;

/// Handle a git pull command.
///
/// When the checkout pulls from a gitcache-managed origin, the mirror is
/// refreshed first so the following real git pull reads from it.
pub fn pull(context: &Context, invocation: &GitInvocation) -> i32 {
    let mut action = "Update".to_string();
    let mut config = context.config.clone();

    let mut repository = "origin".to_string();
    let mut refs: Vec<String> = Vec::new();
    if let Some((first, rest)) = invocation.command_args.split_first() {
        repository = first.clone();
        refs = rest.to_vec();
    }

    if let Some(mirror_url) = helpers::get_mirror_url(context, invocation) {
        if repository == "origin" {
            match GitMirror::from_url(context, &mirror_url) {
                Ok(mirror) => {
                    mirror.update(None, false);
                    context.database.increment_counter(&mirror.path, Counter::Updates);

                    // the mirror update fetches the LFS data of the default
                    // ref only; refresh the current branch as well if it
                    // differs
                    if refs.is_empty() {
                        if let Some(current) = helpers::get_current_ref(context, invocation) {
                            refs.push(current);
                        }
                    }
                    let default_ref = mirror.get_default_ref();
                    for reference in &refs {
                        if Some(reference) != default_ref.as_ref() {
                            mirror.fetch_lfs(Some(reference), &[]);
                        }
                    }

                    config = mirror.config.clone();
                    action = format!("Update from mirror {}", mirror.path.display());
                }
                Err(error) => error!("{}", error),
            }
        }
    }

    let (command_timeout, output_timeout) = config.timeouts("Update");
    let output = runner::pretty_call_command_retry(
        &action,
        "",
        &invocation.real_git_all_args(&config),
        &CallOptions {
            command_timeout,
            output_timeout,
            ..CallOptions::default()
        },
        &RetrySpec {
            retries: config.retries("Update"),
            ..RetrySpec::default()
        },
    );
    output.status.code()
}
