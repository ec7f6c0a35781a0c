/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use std::path::{Path, PathBuf};

use log::error;

use super::helpers;
use crate::options::GitInvocation;
use crate::runner;
use crate::urls;
use crate::Context;

/// Handle a git submodule update command.
///
/// Every submodule is cloned or fetched through the wrapper first, so the
/// transfers go through the mirrors, and the real git finishes the wiring
/// afterwards. With `--init`, a `submodule init` through the wrapper runs
/// up front.
pub fn submodule_update(
    context: &Context,
    called_as: &[String],
    invocation: &GitInvocation,
) -> i32 {
    let cd_paths: Vec<String> = invocation
        .global_group_values("run_path")
        .iter()
        .flatten()
        .cloned()
        .collect();
    let mut update_paths = invocation.command_args.clone();

    let mut all_args = invocation.all_args.clone();
    if !invocation.command_group_values("init").is_empty() {
        let mut command = called_as.to_vec();
        command.extend(invocation.global_options.iter().cloned());
        command.push("submodule".to_string());
        command.push("init".to_string());
        command.extend(update_paths.iter().cloned());

        let code = runner::simple_call_command(&command, None);
        if code != 0 {
            error!(
                "Initializing submodule with the command '{}' failed.",
                command.join(" ")
            );
            return code;
        }
        all_args.retain(|arg| arg != "--init");
    }

    // make the update paths relative to the checked out repository
    if !cd_paths.is_empty() {
        let base: PathBuf = cd_paths.iter().collect();
        update_paths = update_paths
            .iter()
            .map(|path| {
                helpers::relpath(Path::new(path), &base)
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
    }

    let base_command = invocation.real_git_with_options(&context.config);
    let list_command = helpers::with_args(&base_command, &["config", "-f", ".gitmodules", "-l"]);
    let (code, output) = runner::getstatusoutput(&list_command, None);
    if code == 0 {
        // relative submodule URLs resolve against the upstream URL of the
        // parent repository
        let parent_url = helpers::get_mirror_url(context, invocation)
            .or_else(|| helpers::get_pull_url(context, invocation));

        for line in output.lines() {
            let Some((key, _)) = line.split_once('=') else {
                continue;
            };
            if !key.starts_with("submodule.") || !key.ends_with(".url") {
                continue;
            }

            let command = helpers::with_args(&base_command, &["config", "-f", ".gitmodules", "--get", key]);
            let (code, target_url) = runner::getstatusoutput(&command, None);
            if code != 0 {
                continue;
            }

            let path_key = format!("{}.path", key.strip_suffix(".url").unwrap_or(key));
            let command =
                helpers::with_args(&base_command, &["config", "-f", ".gitmodules", "--get", &path_key]);
            let (code, target_path) = runner::getstatusoutput(&command, None);
            if code != 0 {
                continue;
            }

            // skip unselected target paths unless no path is given at all
            if !update_paths.is_empty() && !update_paths.contains(&target_path) {
                continue;
            }

            let target_url = match &parent_url {
                Some(parent) if target_url.starts_with("./") || target_url.starts_with("../") => {
                    urls::resolve_submodule_url(parent, &target_url)
                }
                _ => target_url,
            };

            let mut absolute_target = invocation.run_path();
            absolute_target.push(&target_path);
            if absolute_target.join(".git").exists() {
                let mut command = called_as.to_vec();
                command.push("fetch".to_string());
                runner::simple_call_command(&command, Some(&absolute_target));
            } else {
                let mut command = called_as.to_vec();
                command.extend(invocation.global_options.iter().cloned());
                command.push("clone".to_string());
                command.push(target_url);
                command.push(target_path);
                runner::simple_call_command(&command, None);
            }
        }
    }

    // let the real git finish the configuration
    let mut command = vec![context.config.get_str("System", "RealGit")];
    command.extend(all_args);
    runner::simple_call_command(&command, None)
}
