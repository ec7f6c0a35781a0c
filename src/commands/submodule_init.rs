/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use log::warn;

use super::helpers;
use crate::options::GitInvocation;
use crate::runner;
use crate::Context;

/// Handle a git submodule init command.
///
/// To let git resolve relative submodule URLs against the upstream, the
/// origin of a managed checkout is temporarily restored to the upstream
/// URL while the real command runs, and rewired to the mirror afterwards.
pub fn submodule_init(context: &Context, invocation: &GitInvocation) -> i32 {
    if let Some(mirror_url) = helpers::get_mirror_url(context, invocation) {
        let pull_url = helpers::get_pull_url(context, invocation);
        let base = invocation.real_git_with_options(&context.config);

        let command = helpers::with_args(&base, &["remote", "set-url", "origin", &mirror_url]);
        let (code, _) = runner::getstatusoutput(&command, None);
        let retval = if code == 0 {
            runner::simple_call_command(&invocation.real_git_all_args(&context.config), None)
        } else {
            warn!("Can't restore original pull URL of the repository!");
            code
        };

        if let Some(pull_url) = &pull_url {
            let command = helpers::with_args(&base, &["remote", "set-url", "origin", pull_url]);
            let _ = runner::getstatusoutput(&command, None);
        }
        let command =
            helpers::with_args(&base, &["remote", "set-url", "--push", "origin", &mirror_url]);
        let _ = runner::getstatusoutput(&command, None);

        return retval;
    }

    runner::simple_call_command(&invocation.real_git_all_args(&context.config), None)
}
