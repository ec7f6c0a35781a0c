/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use std::path::{Component, Path, PathBuf};

use log::{debug, error, warn};

use crate::options::GitInvocation;
use crate::runner;
use crate::urls;
use crate::Context;

/// Get the pull url of the remote origin.
pub fn get_pull_url(context: &Context, invocation: &GitInvocation) -> Option<String> {
    let command = with_args(
        &invocation.real_git_with_options(&context.config),
        &["remote", "get-url", "origin"],
    );
    let (code, pull_url) = runner::getstatusoutput(&command, None);
    (code == 0).then_some(pull_url)
}

/// Derive the upstream URL of a gitcache-managed checkout.
///
/// A managed checkout has its fetch URL below the cache directory and the
/// upstream URL configured as the push URL.
pub fn get_mirror_url(context: &Context, invocation: &GitInvocation) -> Option<String> {
    let pull_url = get_pull_url(context, invocation);
    match pull_url {
        Some(pull_url) if Path::new(&pull_url).starts_with(&context.settings.cache_dir) => {
            let command = with_args(
                &invocation.real_git_with_options(&context.config),
                &["remote", "get-url", "--push", "origin"],
            );
            let (code, push_url) = runner::getstatusoutput(&command, None);
            if code == 0 {
                Some(push_url)
            } else {
                warn!("Can't get push URL of the repository!");
                None
            }
        }
        _ => {
            debug!("Repository is not managed by gitcache!");
            None
        }
    }
}

/// Get the current ref of a repository.
pub fn get_current_ref(context: &Context, invocation: &GitInvocation) -> Option<String> {
    let command = with_args(
        &invocation.real_git_with_options(&context.config),
        &["rev-parse", "--abbrev-ref", "HEAD"],
    );
    let (code, reference) = runner::getstatusoutput(&command, None);
    (code == 0).then_some(reference)
}

/// Check the given remote URL against the UrlPatterns configuration.
pub fn use_mirror_for_remote_url(context: &Context, remote_url: &str) -> bool {
    match context.config.url_patterns() {
        Ok(patterns) => patterns.should_mirror(remote_url),
        Err(error) => {
            error!("{}", error);
            false
        }
    }
}

pub(crate) fn with_args(base: &[String], args: &[&str]) -> Vec<String> {
    let mut command = base.to_vec();
    command.extend(args.iter().map(|arg| arg.to_string()));
    command
}

/// Lexical relative path from `base` to `path`, both resolved against the
/// current working directory first.
pub(crate) fn relpath(path: &Path, base: &Path) -> PathBuf {
    let path = absolute_normalized(path);
    let base = absolute_normalized(base);

    let path_components: Vec<Component> = path.components().collect();
    let base_components: Vec<Component> = base.components().collect();

    let common = path_components
        .iter()
        .zip(base_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base_components.len() {
        relative.push("..");
    }
    for component in &path_components[common..] {
        relative.push(component);
    }
    if relative.as_os_str().is_empty() {
        relative.push(".");
    }
    relative
}

fn absolute_normalized(path: &Path) -> PathBuf {
    std::path::absolute(path)
        .map(|absolute| urls::lexical_normalize(&absolute))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths() {
        assert_eq!(relpath(Path::new("/a/b/c"), Path::new("/a/b")), PathBuf::from("c"));
        assert_eq!(
            relpath(Path::new("/a/x"), Path::new("/a/b/c")),
            PathBuf::from("../../x")
        );
        assert_eq!(relpath(Path::new("/a/b"), Path::new("/a/b")), PathBuf::from("."));
    }
}
