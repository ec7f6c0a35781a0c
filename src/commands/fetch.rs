/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use log::{error, info};

use super::helpers;
use crate::mirror::GitMirror;
use crate::options::GitInvocation;
use crate::runner::{self, CallOptions, RetrySpec};
use crate::urls;
use crate::Context;

/// Handle a git fetch command.
///
/// If the fetch target or the origin of the checkout maps to a mirror, the
/// mirror is refreshed first and the fetch is retried through it.
pub fn fetch(context: &Context, invocation: &GitInvocation) -> i32 {
    let real_git = context.config.get_str("System", "RealGit");

    // only the first argument can name a remote, subsequent args are
    // refspecs
    let mut remote_url = invocation
        .command_args
        .first()
        .filter(|first| urls::mirror_path(first, &context.settings.cache_dir).is_some())
        .cloned();

    let mut remote_name = None;
    match remote_url.take() {
        None => {
            remote_url = helpers::get_mirror_url(context, invocation);
            if remote_url.is_none() {
                // maybe the checkout is not managed by gitcache yet
                let mut remote_candidate = "origin".to_string();
                for arg in &invocation.command_args {
                    if !arg.starts_with('-') && !arg.starts_with('+') && !arg.contains(':') {
                        remote_candidate = arg.clone();
                        break;
                    }
                }

                let command = helpers::with_args(
                    &invocation.real_git_with_options(&context.config),
                    &["remote", "get-url", &remote_candidate],
                );
                let (code, output) = runner::getstatusoutput(&command, None);
                if code == 0
                    && !output.is_empty()
                    && helpers::use_mirror_for_remote_url(context, &output)
                    && urls::mirror_path(&output, &context.settings.cache_dir).is_some()
                {
                    remote_url = Some(output);
                    remote_name = Some(remote_candidate);
                }
            }
        }
        Some(url) => {
            if helpers::use_mirror_for_remote_url(context, &url) {
                remote_url = Some(url);
            }
        }
    }

    let mut config = context.config.clone();
    let mut action = "Fetch".to_string();
    let mut new_args = invocation.all_args.clone();

    if let Some(remote_url) = remote_url {
        let mirror = match GitMirror::from_url(context, &remote_url) {
            Ok(mirror) => mirror,
            Err(error) => {
                error!("{}", error);
                return 1;
            }
        };
        mirror.update(None, false);
        context
            .database
            .increment_counter(&mirror.path, crate::database::Counter::Updates);

        config = mirror.config.clone();
        action = format!("Fetch from mirror {}", mirror.path.display());
        let git_dir = mirror.git_dir.to_string_lossy().into_owned();
        new_args = invocation
            .all_args
            .iter()
            .map(|arg| if *arg == remote_url { git_dir.clone() } else { arg.clone() })
            .collect();

        let run_path = invocation.run_path();
        if let Some(remote_name) = &remote_name {
            info!("Configuring remote {} to use gitcache mirror.", remote_name);
            let command = vec![
                real_git.clone(),
                "remote".to_string(),
                "set-url".to_string(),
                remote_name.clone(),
                git_dir.clone(),
            ];
            runner::simple_call_command(&command, Some(&run_path));

            let command = vec![
                real_git.clone(),
                "remote".to_string(),
                "set-url".to_string(),
                "--push".to_string(),
                remote_name.clone(),
                remote_url.clone(),
            ];
            runner::simple_call_command(&command, Some(&run_path));
        }

        // configure the LFS storage to support the Jenkins way of cloning
        // git repositories
        info!("Configuring LFS.");
        let command = vec![
            real_git.clone(),
            "config".to_string(),
            "--local".to_string(),
            "lfs.url".to_string(),
            format!("{}/info/lfs", mirror.url.as_deref().unwrap_or(&remote_url)),
        ];
        runner::simple_call_command(&command, Some(&run_path));

        if config.get_bool("LFS", "PerMirrorStorage") {
            let command = vec![
                real_git.clone(),
                "config".to_string(),
                "--local".to_string(),
                "lfs.storage".to_string(),
                mirror.lfs_dir.display().to_string(),
            ];
            runner::simple_call_command(&command, Some(&run_path));
        }

        // try the fetch command in the checkout once
        let (command_timeout, output_timeout) = config.timeouts("Update");
        let mut command = vec![real_git.clone()];
        command.extend(new_args.iter().cloned());
        let output = runner::pretty_call_command_retry(
            &action,
            "",
            &command,
            &CallOptions {
                command_timeout,
                output_timeout,
                ..CallOptions::default()
            },
            &RetrySpec {
                retries: 1,
                ..RetrySpec::default()
            },
        );
        if output.status.success() {
            return output.status.code();
        }

        // retry inside the mirror with the same command arguments
        mirror.fetch(&invocation.command_args);
    }

    let mut command = vec![real_git];
    command.extend(new_args);
    let (command_timeout, output_timeout) = config.timeouts("Update");
    let output = runner::pretty_call_command_retry(
        &action,
        "",
        &command,
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
