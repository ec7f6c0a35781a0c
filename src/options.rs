/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::Config;
use crate::urls;

/// Definition of a single git command line option.
///
/// Options are matched in the separate format (`-o Arg` / `--opt Arg`)
/// and, if enabled, in the stuck format (`-oArg` / `--opt=Arg`).
#[derive(Clone, Copy, Debug)]
pub struct OptionSpec {
    group: &'static str,
    short: Option<&'static str>,
    long: Option<&'static str>,
    has_arg: bool,
    has_stuck: bool,
    has_separate: bool,
}

impl OptionSpec {
    const fn new() -> Self {
        OptionSpec {
            group: "ignored",
            short: None,
            long: None,
            has_arg: true,
            has_stuck: true,
            has_separate: true,
        }
    }

    const fn group(mut self, group: &'static str) -> Self {
        self.group = group;
        self
    }

    const fn short(mut self, short: &'static str) -> Self {
        self.short = Some(short);
        self
    }

    const fn long(mut self, long: &'static str) -> Self {
        self.long = Some(long);
        self
    }

    /// A boolean option without a value.
    const fn flag(mut self) -> Self {
        self.has_arg = false;
        self
    }

    const fn stuck_only(mut self) -> Self {
        self.has_separate = false;
        self
    }

    const fn separate_only(mut self) -> Self {
        self.has_stuck = false;
        self
    }

    /// Try to parse this option at the start of `args`. Returns the number
    /// of consumed arguments and the extracted value.
    fn parse(&self, args: &[String]) -> Option<(usize, Option<String>)> {
        if self.has_separate {
            let names = [
                self.short.map(|short| format!("-{short}")),
                self.long.map(|long| format!("--{long}")),
            ];
            for name in names.into_iter().flatten() {
                if args[0] == name {
                    if self.has_arg && args.len() > 1 {
                        return Some((2, Some(args[1].clone())));
                    }
                    return Some((1, None));
                }
            }
        }

        if self.has_arg && self.has_stuck {
            let prefixes = [
                self.short.map(|short| format!("-{short}")),
                self.long.map(|long| format!("--{long}=")),
            ];
            for prefix in prefixes.into_iter().flatten() {
                if let Some(value) = args[0].strip_prefix(&prefix) {
                    return Some((1, Some(value.to_string())));
                }
            }
        }

        None
    }
}

// Global options (see 'man git'). Only options with arguments and boolean
// options of interest are listed. The groups identify the scenarios:
//   bail_out    git exits without running a subcommand, stop parsing
//   run_path    needed to reconstruct target paths for 'git clone'
static GLOBAL_OPTIONS: &[OptionSpec] = &[
    OptionSpec::new().group("bail_out").short("h").long("help").flag(),
    OptionSpec::new().group("bail_out").long("version").flag(),
    OptionSpec::new().group("bail_out").long("exec-path").flag(),
    OptionSpec::new().group("bail_out").long("html-path").flag(),
    OptionSpec::new().group("bail_out").long("man-path").flag(),
    OptionSpec::new().group("bail_out").long("info-path").flag(),
    OptionSpec::new().group("run_path").short("C").separate_only(),
    OptionSpec::new().short("c").separate_only(),
    OptionSpec::new().long("exec-path").stuck_only(),
    OptionSpec::new().long("git-dir"),
    OptionSpec::new().long("namespace"),
    OptionSpec::new().long("work-tree"),
    OptionSpec::new().long("super-prefix"),
    OptionSpec::new().long("config-env"),
    OptionSpec::new().long("shallow-file").separate_only(),
    OptionSpec::new().group("bail_out").long("list-cmds").stuck_only(),
];

static LS_REMOTE_OPTIONS: &[OptionSpec] = &[
    OptionSpec::new().long("upload-pack"),
    OptionSpec::new().long("exec"),
    OptionSpec::new().long("sort"),
    OptionSpec::new().short("o").long("server-option"),
];

static CHECKOUT_OPTIONS: &[OptionSpec] = &[
    OptionSpec::new().short("b"),
    OptionSpec::new().short("B"),
    OptionSpec::new().long("recurse-submodules"),
    OptionSpec::new().long("conflict"),
    OptionSpec::new().long("orphan"),
    OptionSpec::new().long("pathspec-from-file"),
];

static CLONE_OPTIONS: &[OptionSpec] = &[
    OptionSpec::new().long("recurse-submodules").flag(),
    OptionSpec::new().long("recursive").flag(),
    OptionSpec::new().long("remote-submodules").flag(),
    OptionSpec::new().short("j").long("jobs"),
    OptionSpec::new().long("template"),
    OptionSpec::new().long("reference"),
    OptionSpec::new().long("reference-if-able"),
    OptionSpec::new().short("o").long("origin"),
    OptionSpec::new().group("branch").short("b").long("branch"),
    OptionSpec::new().short("u").long("upload-pack"),
    OptionSpec::new().long("depth"),
    OptionSpec::new().long("shallow-since"),
    OptionSpec::new().long("shallow-exclude"),
    OptionSpec::new().long("separate-git-dir"),
    OptionSpec::new().short("c").long("config"),
    OptionSpec::new().long("server-option"),
    OptionSpec::new().long("filter"),
];

static LFS_FETCH_OPTIONS: &[OptionSpec] = &[
    OptionSpec::new().short("I").long("include"),
    OptionSpec::new().short("X").long("exclude"),
    OptionSpec::new().short("r").long("recent").flag(),
    OptionSpec::new().short("a").long("all").flag(),
    OptionSpec::new().short("p").long("prune").flag(),
];

static LFS_PULL_OPTIONS: &[OptionSpec] = &[
    OptionSpec::new().short("I").long("include"),
    OptionSpec::new().short("X").long("exclude"),
];

static PULL_OPTIONS: &[OptionSpec] = &[
    OptionSpec::new().long("recurse-submodules"),
    OptionSpec::new().short("r").long("rebase"),
    OptionSpec::new().long("log"),
    OptionSpec::new().long("cleanup"),
    OptionSpec::new().short("s").long("strategy"),
    OptionSpec::new().short("X").long("strategy-option"),
    OptionSpec::new().short("S").long("gpg-sign"),
    OptionSpec::new().long("upload-pack"),
    OptionSpec::new().short("j").long("jobs"),
    OptionSpec::new().long("depth"),
    OptionSpec::new().long("shallow-since"),
    OptionSpec::new().long("shallow-exclude"),
    OptionSpec::new().long("deepen"),
    OptionSpec::new().long("refmap"),
    OptionSpec::new().short("o").long("server-option"),
    OptionSpec::new().long("negotiation-tip"),
];

static FETCH_OPTIONS: &[OptionSpec] = &[
    OptionSpec::new().long("upload-pack"),
    OptionSpec::new().short("j").long("jobs"),
    OptionSpec::new().long("recurse-submodules"),
    OptionSpec::new().long("depth"),
    OptionSpec::new().long("shallow-since"),
    OptionSpec::new().long("shallow-exclude"),
    OptionSpec::new().long("deepen"),
    OptionSpec::new().long("submodule-prefix"),
    OptionSpec::new().long("recurse-submodules-default"),
    OptionSpec::new().long("refmap"),
    OptionSpec::new().short("o").long("server-option"),
    OptionSpec::new().long("negotiation-tip"),
    OptionSpec::new().long("filter"),
];

static SUBMODULE_UPDATE_OPTIONS: &[OptionSpec] = &[
    OptionSpec::new().group("init").long("init").flag(),
    OptionSpec::new().group("recursive").long("recursive").flag(),
    OptionSpec::new().group("remote").long("remote").flag(),
    OptionSpec::new().long("reference"),
    OptionSpec::new().long("depth"),
    OptionSpec::new().short("j").long("jobs"),
];

static REMOTE_ADD_OPTIONS: &[OptionSpec] = &[
    OptionSpec::new().short("t").long("track"),
    OptionSpec::new().short("m").long("master"),
    OptionSpec::new().long("mirror").stuck_only(),
];

static NO_OPTIONS: &[OptionSpec] = &[];

/// Commands that carry a subcommand which is folded into the command name,
/// e.g. `lfs fetch` becomes `lfs_fetch`.
const SUBCOMMAND_COMMANDS: &[&str] = &["lfs", "submodule", "remote"];

fn options_for(command: &str) -> Option<&'static [OptionSpec]> {
    match command {
        "lfs" | "submodule" | "remote" => Some(NO_OPTIONS),
        "cleanup" | "update-mirrors" | "delete-mirror" => Some(NO_OPTIONS),
        "ls-remote" => Some(LS_REMOTE_OPTIONS),
        "checkout" => Some(CHECKOUT_OPTIONS),
        "clone" => Some(CLONE_OPTIONS),
        "lfs_fetch" => Some(LFS_FETCH_OPTIONS),
        "lfs_pull" => Some(LFS_PULL_OPTIONS),
        "pull" => Some(PULL_OPTIONS),
        "fetch" => Some(FETCH_OPTIONS),
        "submodule_init" => Some(NO_OPTIONS),
        "submodule_update" => Some(SUBMODULE_UPDATE_OPTIONS),
        "remote_add" => Some(REMOTE_ADD_OPTIONS),
        _ => None,
    }
}

/// A parsed git command line.
#[derive(Clone, Debug, Default)]
pub struct GitInvocation {
    pub all_args: Vec<String>,
    pub global_options: Vec<String>,
    pub global_groups: HashMap<String, Vec<Option<String>>>,
    pub command: Option<String>,
    pub command_options: Vec<String>,
    pub command_args: Vec<String>,
    pub command_groups: HashMap<String, Vec<Option<String>>>,
}

impl GitInvocation {
    pub fn new(args: &[String]) -> Self {
        let mut invocation = GitInvocation {
            all_args: args.to_vec(),
            ..GitInvocation::default()
        };
        invocation.parse(args);
        invocation
    }

    /// A bail out option makes the real git exit without performing any
    /// subcommand.
    pub fn has_bail_out(&self) -> bool {
        self.global_groups.contains_key("bail_out")
    }

    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// The real git command followed by all global options.
    pub fn real_git_with_options(&self, config: &Config) -> Vec<String> {
        let mut argv = vec![config.get_str("System", "RealGit")];
        argv.extend(self.global_options.iter().cloned());
        argv
    }

    /// The real git command followed by all arguments given to the wrapper.
    pub fn real_git_all_args(&self, config: &Config) -> Vec<String> {
        let mut argv = vec![config.get_str("System", "RealGit")];
        argv.extend(self.all_args.iter().cloned());
        argv
    }

    /// The absolute path that results from applying all `-C` options.
    pub fn run_path(&self) -> PathBuf {
        let mut path = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        for value in self.global_group_values("run_path").iter().flatten() {
            path.push(value);
        }
        urls::lexical_normalize(&path)
    }

    pub fn global_group_values(&self, group: &str) -> &[Option<String>] {
        self.global_groups
            .get(group)
            .map(|values| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn command_group_values(&self, group: &str) -> &[Option<String>] {
        self.command_groups
            .get(group)
            .map(|values| values.as_slice())
            .unwrap_or(&[])
    }

    fn parse(&mut self, args: &[String]) {
        let mut index = 0;

        // consume the global options
        while index < args.len() && args[index].starts_with('-') {
            index += parse_any_option(
                GLOBAL_OPTIONS,
                &args[index..],
                &mut self.global_options,
                &mut self.global_groups,
            );
        }

        // consume the command
        if index < args.len() {
            self.command = Some(args[index].clone());
            index += 1;
        }

        let command = match &self.command {
            Some(command) => command.clone(),
            None => return,
        };

        if SUBCOMMAND_COMMANDS.contains(&command.as_str()) {
            // consume options until the subcommand is found
            let options = options_for(&command).unwrap_or(NO_OPTIONS);
            while index < args.len() && args[index].starts_with('-') {
                index += parse_any_option(
                    options,
                    &args[index..],
                    &mut self.command_options,
                    &mut self.command_groups,
                );
            }

            if index < args.len() {
                self.command = Some(format!("{}_{}", command, args[index]));
                index += 1;
            } else {
                return;
            }
        }

        let command = self.command.clone().unwrap_or_default();
        if let Some(options) = options_for(&command) {
            let mut ignore_options = false;
            while index < args.len() {
                if ignore_options {
                    self.command_args.push(args[index].clone());
                    index += 1;
                } else if args[index] == "--" {
                    ignore_options = true;
                    index += 1;
                } else if args[index].starts_with('-') {
                    index += parse_any_option(
                        options,
                        &args[index..],
                        &mut self.command_options,
                        &mut self.command_groups,
                    );
                } else {
                    self.command_args.push(args[index].clone());
                    index += 1;
                }
            }
        }
    }
}

/// Parse the next argument(s) trying all known options. Unknown options
/// are treated as boolean flags.
fn parse_any_option(
    options: &[OptionSpec],
    args: &[String],
    storage: &mut Vec<String>,
    groups: &mut HashMap<String, Vec<Option<String>>>,
) -> usize {
    for option in options {
        if let Some((consumed, value)) = option.parse(args) {
            storage.extend(args[..consumed].iter().cloned());
            groups
                .entry(option.group.to_string())
                .or_default()
                .push(value);
            return consumed;
        }
    }

    storage.push(args[0].clone());
    groups.entry("ignored".to_string()).or_default().push(None);
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(line: &str) -> GitInvocation {
        let args: Vec<String> = line.split(' ').map(str::to_string).collect();
        GitInvocation::new(&args)
    }

    #[test]
    fn bail_out_detection() {
        assert!(invocation("--help").has_bail_out());
        assert!(invocation("--exec-path").has_bail_out());
        assert!(!invocation("--exec-path=/usr/bin/git").has_bail_out());
        assert!(invocation("--version").has_bail_out());
    }

    #[test]
    fn command_extraction() {
        assert_eq!(invocation("lfs fetch").command(), Some("lfs_fetch"));
        assert_eq!(invocation("fetch").command(), Some("fetch"));
        assert_eq!(invocation("unknown").command(), Some("unknown"));
        assert_eq!(invocation("remote add origin url").command(), Some("remote_add"));
        assert_eq!(invocation("remote remove origin").command(), Some("remote_remove"));
    }

    #[test]
    fn subcommand_options_are_kept() {
        let parsed = invocation("submodule --quiet status");
        assert_eq!(parsed.command(), Some("submodule_status"));
        assert_eq!(parsed.command_options, vec!["--quiet"]);

        // makes no sense but must not confuse the parser
        assert_eq!(invocation("submodule").command(), Some("submodule"));
    }

    #[test]
    fn run_path_values() {
        let parsed = invocation("-C 1 -C 2 -C3 fetch");
        let values = parsed.global_group_values("run_path");
        assert_eq!(
            values,
            &[Some("1".to_string()), Some("2".to_string())],
            "-C3 is not a valid stuck form"
        );

        let expected = urls::lexical_normalize(
            &std::env::current_dir().unwrap().join("1").join("2"),
        );
        assert_eq!(parsed.run_path(), expected);

        assert_eq!(
            invocation("fetch").run_path(),
            std::env::current_dir().unwrap()
        );
    }

    #[test]
    fn command_option_formats() {
        let parsed = invocation("-C 1 fetch --upload-pack=pack -j5 --depth 2 -o 3 first scnd --filter flt");
        assert_eq!(parsed.global_options, vec!["-C", "1"]);
        assert_eq!(parsed.command(), Some("fetch"));
        assert_eq!(
            parsed.command_options,
            vec!["--upload-pack=pack", "-j5", "--depth", "2", "-o", "3", "--filter", "flt"]
        );
        assert_eq!(parsed.command_args, vec!["first", "scnd"]);
    }

    #[test]
    fn separator_stops_option_parsing() {
        let parsed = invocation("-C 1 fetch --upload-pack=pack -- first scnd --filter flt");
        assert_eq!(parsed.command_options, vec!["--upload-pack=pack"]);
        assert_eq!(parsed.command_args, vec!["first", "scnd", "--filter", "flt"]);
    }

    #[test]
    fn clone_branch_group() {
        let parsed = invocation("clone -b feature https://github.com/seeraven/gitcache target");
        assert_eq!(
            parsed.command_group_values("branch"),
            &[Some("feature".to_string())]
        );
        assert_eq!(
            parsed.command_args,
            vec!["https://github.com/seeraven/gitcache", "target"]
        );
    }

    #[test]
    fn real_git_argument_vectors() {
        let config = Config::new();
        let real_git = config.get_str("System", "RealGit");

        let parsed = invocation("-C 1 -c user.email=something --git-dir=here status");
        assert_eq!(
            parsed.real_git_with_options(&config),
            vec![
                real_git.clone(),
                "-C".to_string(),
                "1".to_string(),
                "-c".to_string(),
                "user.email=something".to_string(),
                "--git-dir=here".to_string(),
            ]
        );

        let all = parsed.real_git_all_args(&config);
        assert_eq!(all[0], real_git);
        assert_eq!(all[1..], parsed.all_args[..]);
    }
}
