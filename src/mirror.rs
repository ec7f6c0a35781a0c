/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use crate::config::Config;
use crate::database::Counter;
use crate::error::{GitcacheError, Result};
use crate::fsutil;
use crate::lock::{LockPolicy, MirrorLock};
use crate::options::GitInvocation;
use crate::runner::{self, CallOptions, RetrySpec, RunStatus};
use crate::urls;
use crate::Context;

/// Output of `git remote update` indicating a stale gc.log file.
const GC_LOG_PATTERN: &[u8] = b"remove gc.log";

/// Clone options that must not reach the inner clone from the mirror.
/// Submodules are initialized in a second step through the wrapper.
const STRIPPED_CLONE_OPTIONS: &[&str] = &["--recursive", "--recurse-submodules", "--remote-submodules"];

/// A single mirror identified by its path below the cache directory.
///
/// The mirror directory holds the bare repository under `git`, the
/// optional git-lfs storage under `lfs` and an optional per-mirror
/// configuration file `gitcache.config`. All mutating operations hold the
/// per-mirror file lock.
pub struct GitMirror<'a> {
    context: &'a Context,
    pub url: Option<String>,
    pub normalized_url: Option<String>,
    pub path: PathBuf,
    pub git_dir: PathBuf,
    pub lfs_dir: PathBuf,
    lockfile: PathBuf,
    pub config: Config,
}

impl<'a> GitMirror<'a> {
    /// Construct a mirror from its upstream URL.
    pub fn from_url(context: &'a Context, url: &str) -> Result<Self> {
        let path = urls::mirror_path(url, &context.settings.cache_dir)
            .ok_or_else(|| GitcacheError::Url(url.to_string()))?;
        Ok(Self::build(context, Some(url.to_string()), path))
    }

    /// Construct a mirror from its path, looking up the URL in the
    /// database.
    pub fn from_path(context: &'a Context, path: &Path) -> Self {
        let url = context.database.get_url_for_path(path);
        Self::build(context, url, path.to_path_buf())
    }

    fn build(context: &'a Context, url: Option<String>, path: PathBuf) -> Self {
        let normalized_url = url.as_deref().map(urls::normalize_url);
        let basename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mirror".to_string());
        let lockfile = context
            .settings
            .cache_dir
            .join("mirrors")
            .join(".lock")
            .join(basename);
        let config = context.mirror_config(&path.join("gitcache.config"));

        GitMirror {
            context,
            url,
            normalized_url,
            git_dir: path.join("git"),
            lfs_dir: path.join("lfs"),
            lockfile,
            config,
            path,
        }
    }

    fn lock(&self) -> Result<MirrorLock> {
        MirrorLock::acquire(
            &format!("Mirror {}", self.path.display()),
            &self.lockfile,
            &LockPolicy::from_config(&self.config),
        )
    }

    /// Update or create the mirror.
    ///
    /// Without a database entry any leftovers on disk are removed and a
    /// fresh bare mirror is created. An existing mirror is refreshed when
    /// `force` is set or the update interval is reached.
    pub fn update(&self, reference: Option<&str>, force: bool) -> bool {
        let mirror_exists = self.context.database.get(&self.path).is_some();
        let lock = match self.lock() {
            Ok(lock) => lock,
            Err(_) => {
                error!("Update timed out due to locked mirror.");
                return false;
            }
        };

        let result = if !mirror_exists {
            let _ = fsutil::rmtree(&self.path, true);
            self.clone_mirror(reference)
        } else if force || self.update_time_reached() {
            self.update_locked(reference, true)
        } else {
            info!("Update time of mirror {} not reached yet.", self.path.display());
            true
        };
        drop(lock);
        result
    }

    /// Execute a fetch command with custom arguments in the mirror.
    pub fn fetch(&self, command_args: &[String]) -> bool {
        let mirror_exists = self.context.database.get(&self.path).is_some();
        let lock = match self.lock() {
            Ok(lock) => lock,
            Err(_) => {
                error!("Update timed out due to locked mirror.");
                return false;
            }
        };

        let result = if mirror_exists {
            self.fetch_locked(command_args)
        } else {
            error!("Mirror does not exist!");
            false
        };
        drop(lock);
        result
    }

    /// Fetch the lfs data of the specified ref, or of the default ref if
    /// none is given.
    pub fn fetch_lfs(&self, reference: Option<&str>, options: &[String]) -> bool {
        if !self.context.has_git_lfs() {
            warn!("LFS fetch skipped as git-lfs is not available on this system!");
            return true;
        }

        match self.lock() {
            Ok(lock) => {
                let result = self.fetch_lfs_locked(reference, options);
                drop(lock);
                result
            }
            Err(_) => {
                match reference {
                    Some(reference) => {
                        error!("LFS fetch of {} timed out due to locked mirror.", reference);
                    }
                    None => error!("LFS fetch of default ref timed out due to locked mirror."),
                }
                false
            }
        }
    }

    /// Delete the mirror if it has not been updated for longer than the
    /// cleanup threshold.
    pub fn cleanup(&self) -> bool {
        if self.cleanup_time_reached() {
            debug!("Mirror {} is too old. Removing it.", self.path.display());
            return self.delete();
        }
        false
    }

    /// Delete the mirror and its database entry.
    pub fn delete(&self) -> bool {
        match self.lock() {
            Ok(lock) => {
                debug!("Deleting mirror {}", self.path.display());
                self.context.database.remove(&self.path);
                let _ = fsutil::rmtree(&self.path, true);
                drop(lock);
            }
            Err(_) => {
                error!("Delete timed out due to locked mirror.");
                return false;
            }
        }

        // second pass outside the lock to get rid of the lock file and
        // remaining directory entries
        if self.path.exists() {
            if let Err(error) = fsutil::rmtree(&self.path, false) {
                error!("{}", error);
                return false;
            }
        }
        if let Err(error) = fs::remove_file(&self.lockfile) {
            if error.kind() != io::ErrorKind::NotFound {
                debug!(
                    "Can't remove lock file {}: {}",
                    self.lockfile.display(),
                    error
                );
            }
        }
        true
    }

    /// Make sure the mirror exists on disk, creating it if necessary.
    pub fn ensure_exists(&self) -> bool {
        if self.context.database.get(&self.path).is_none() {
            return self.update(None, false);
        }
        if !self.git_dir.is_dir() {
            self.context.database.remove(&self.path);
            return self.update(None, false);
        }
        true
    }

    /// The user-facing clone path: refresh the mirror, clone from the
    /// local bare repository and rewire the resulting checkout so fetches
    /// go through the mirror while pushes go upstream.
    pub fn clone_from_mirror(&self, invocation: &GitInvocation) -> i32 {
        let reference = invocation
            .command_group_values("branch")
            .first()
            .and_then(|value| value.clone());
        if !self.update(reference.as_deref(), false) {
            return 1;
        }

        let Some(url) = self.url.clone() else {
            error!("Mirror {} has no upstream URL!", self.path.display());
            return 1;
        };
        let git_lfs_url = format!("{url}/info/lfs");
        let real_git = self.config.get_str("System", "RealGit");
        let per_mirror_storage = self.config.get_bool("LFS", "PerMirrorStorage");
        let git_dir = self.git_dir.to_string_lossy().into_owned();

        let mut new_args = vec![real_git.clone(), "-c".to_string(), format!("lfs.url={git_lfs_url}")];
        if per_mirror_storage {
            new_args.push("-c".to_string());
            new_args.push(format!("lfs.storage={}", self.lfs_dir.display()));
        }
        for arg in &invocation.all_args {
            if STRIPPED_CLONE_OPTIONS.contains(&arg.as_str()) {
                continue;
            }
            new_args.push(if *arg == url { git_dir.clone() } else { arg.clone() });
        }

        let target_dir = if invocation.command_args.len() > 1 {
            invocation.command_args[1].clone()
        } else {
            let target_dir = clone_target_dir(&url);
            new_args.push(target_dir.clone());
            target_dir
        };

        let (command_timeout, output_timeout) = self.config.timeouts("Clone");
        let output = runner::pretty_call_command_retry(
            &format!("Clone from mirror {}", self.path.display()),
            "",
            &new_args,
            &CallOptions {
                command_timeout,
                output_timeout,
                ..CallOptions::default()
            },
            &RetrySpec {
                retries: self.config.retries("Clone"),
                remove_dir: Some(Path::new(&target_dir)),
                ..RetrySpec::default()
            },
        );
        if !output.status.success() {
            return output.status.code();
        }

        self.context
            .database
            .increment_counter(&self.path, Counter::Clones);

        info!("Setting push URL to {} and configure LFS.", url);
        let mut checkout = invocation.run_path();
        checkout.push(&target_dir);

        let mut commands = vec![
            vec![
                real_git.clone(),
                "remote".to_string(),
                "set-url".to_string(),
                "--push".to_string(),
                "origin".to_string(),
                url.clone(),
            ],
            vec![
                real_git.clone(),
                "config".to_string(),
                "--local".to_string(),
                "lfs.url".to_string(),
                git_lfs_url,
            ],
        ];
        if per_mirror_storage {
            commands.push(vec![
                real_git,
                "config".to_string(),
                "--local".to_string(),
                "lfs.storage".to_string(),
                self.lfs_dir.display().to_string(),
            ]);
        }

        let mut retval = 0;
        for command in &commands {
            let code = runner::simple_call_command(command, Some(&checkout));
            if code != 0 {
                error!(
                    "Command '{}' with working directory {} gave return code of {}!",
                    command.join(" "),
                    checkout.display(),
                    code
                );
                retval = code;
            }
        }
        retval
    }

    /// Wire an existing checkout to fetch from the mirror and push
    /// upstream, including the LFS configuration.
    pub fn configure_git_for_mirror(&self, invocation: &GitInvocation) -> i32 {
        let Some(url) = self.url.clone() else {
            error!("Mirror {} has no upstream URL!", self.path.display());
            return 1;
        };
        info!("Configuring the checkout to use mirror {}.", self.path.display());

        let base = invocation.real_git_with_options(&self.config);
        let git_dir = self.git_dir.to_string_lossy().into_owned();
        let git_lfs_url = format!("{url}/info/lfs");

        let mut commands = vec![
            with_args(&base, &["remote", "add", "origin", &git_dir]),
            with_args(&base, &["remote", "set-url", "--push", "origin", &url]),
            with_args(&base, &["config", "--local", "lfs.url", &git_lfs_url]),
        ];
        if self.config.get_bool("LFS", "PerMirrorStorage") {
            let lfs_dir = self.lfs_dir.display().to_string();
            commands.push(with_args(&base, &["config", "--local", "lfs.storage", &lfs_dir]));
        }

        let mut retval = 0;
        for command in &commands {
            let code = runner::simple_call_command(command, None);
            if code != 0 {
                error!(
                    "Command '{}' gave return code of {}!",
                    command.join(" "),
                    code
                );
                retval = code;
            }
        }
        retval
    }

    /// The default ref of the bare repository, e.g. `master` or `main`.
    pub fn get_default_ref(&self) -> Option<String> {
        let argv = vec![
            self.config.get_str("System", "RealGit"),
            "symbolic-ref".to_string(),
            "--short".to_string(),
            "HEAD".to_string(),
        ];
        let (code, reference) = runner::getstatusoutput(&argv, Some(&self.git_dir));
        (code == 0).then_some(reference)
    }

    fn update_time_reached(&self) -> bool {
        let update_interval = self.config.get_seconds("MirrorHandling", "UpdateInterval");
        if update_interval < 0 {
            return false;
        }
        self.context.database.time_since_last_update(&self.path) >= update_interval as f64
    }

    fn cleanup_time_reached(&self) -> bool {
        let cleanup_after = self.config.get_seconds("MirrorHandling", "CleanupAfter");
        self.context.database.time_since_last_update(&self.path) >= cleanup_after as f64
    }

    fn clone_mirror(&self, reference: Option<&str>) -> bool {
        let Some(url) = self.url.clone() else {
            error!("Mirror {} has no upstream URL!", self.path.display());
            return false;
        };
        let real_git = self.config.get_str("System", "RealGit");
        let git_dir = self.git_dir.to_string_lossy().into_owned();
        let (command_timeout, output_timeout) = self.config.timeouts("Clone");
        let options = CallOptions {
            command_timeout,
            output_timeout,
            ..CallOptions::default()
        };
        let retries = self.config.retries("Clone");
        let partial_first = self
            .config
            .get_str("Clone", "CloneStyle")
            .eq_ignore_ascii_case("partialfirst");

        if let Err(error) = fs::create_dir_all(&self.lfs_dir) {
            error!("Can't create directory {}: {}", self.lfs_dir.display(), error);
            return false;
        }

        if partial_first {
            let command = vec![
                real_git.clone(),
                "clone".to_string(),
                "--progress".to_string(),
                "--depth=1".to_string(),
                url.clone(),
                git_dir.clone(),
            ];
            let output = runner::pretty_call_command_retry(
                &format!("Partial clone of {} into {}", url, self.path.display()),
                "",
                &command,
                &options,
                &RetrySpec {
                    retries,
                    remove_dir: Some(&self.git_dir),
                    ..RetrySpec::default()
                },
            );
            if !output.status.success() {
                return false;
            }

            let command = vec![
                real_git,
                "-C".to_string(),
                git_dir,
                "fetch".to_string(),
                "--unshallow".to_string(),
            ];
            let output = runner::pretty_call_command_retry(
                &format!("Fetching the rest of {} into {}", url, self.path.display()),
                "",
                &command,
                &options,
                &RetrySpec {
                    retries,
                    ..RetrySpec::default()
                },
            );
            if !output.status.success() {
                let _ = fsutil::rmtree(&self.git_dir, true);
                return false;
            }
        } else {
            let command = vec![
                real_git,
                "clone".to_string(),
                "--progress".to_string(),
                "--mirror".to_string(),
                url.clone(),
                git_dir,
            ];
            let output = runner::pretty_call_command_retry(
                &format!("Initial clone of {} into {}", url, self.path.display()),
                "",
                &command,
                &options,
                &RetrySpec {
                    retries,
                    remove_dir: Some(&self.git_dir),
                    ..RetrySpec::default()
                },
            );
            if !output.status.success() {
                return false;
            }
        }

        let normalized_url = self.normalized_url.clone().unwrap_or(url);
        self.context.database.add(&normalized_url, &self.path);

        self.fetch_lfs_locked(reference, &[])
    }

    fn update_locked(&self, reference: Option<&str>, handle_gc_error: bool) -> bool {
        let command = vec![
            self.config.get_str("System", "RealGit"),
            "remote".to_string(),
            "update".to_string(),
            "--prune".to_string(),
        ];
        let (command_timeout, output_timeout) = self.config.timeouts("Update");
        let output = runner::pretty_call_command_retry(
            &format!("Update of {}", self.path.display()),
            "garbage collection error",
            &command,
            &CallOptions {
                cwd: Some(self.git_dir.clone()),
                command_timeout,
                output_timeout,
                ..CallOptions::default()
            },
            &RetrySpec {
                retries: self.config.retries("Update"),
                abort_on_pattern: handle_gc_error.then_some(GC_LOG_PATTERN),
                ..RetrySpec::default()
            },
        );

        if output.status.success() {
            if handle_gc_error && output.contains(GC_LOG_PATTERN) {
                let _ = self.run_gc();
            }
            self.context.database.save_update_time(&self.path);
        } else if handle_gc_error && output.status == RunStatus::AbortedOnPattern {
            if self.run_gc() {
                return self.update_locked(reference, false);
            }
            return false;
        } else {
            return false;
        }

        self.fetch_lfs_locked(reference, &[])
    }

    fn run_gc(&self) -> bool {
        let command = vec![self.config.get_str("System", "RealGit"), "gc".to_string()];
        let (command_timeout, output_timeout) = self.config.timeouts("GC");
        let output = runner::pretty_call_command_retry(
            &format!("Garbage collection on {}", self.path.display()),
            "",
            &command,
            &CallOptions {
                cwd: Some(self.git_dir.clone()),
                command_timeout,
                output_timeout,
                ..CallOptions::default()
            },
            &RetrySpec {
                retries: self.config.retries("GC"),
                ..RetrySpec::default()
            },
        );

        if output.status.success() {
            let gc_log = self.git_dir.join("gc.log");
            if gc_log.exists() {
                let _ = fs::remove_file(gc_log);
            }
            return true;
        }
        false
    }

    fn fetch_locked(&self, command_args: &[String]) -> bool {
        let mut command = vec![
            self.config.get_str("System", "RealGit"),
            "fetch".to_string(),
        ];
        command.extend(command_args.iter().cloned());

        let (command_timeout, output_timeout) = self.config.timeouts("Update");
        let output = runner::pretty_call_command_retry(
            &format!(
                "Explicit fetch on {} with arguments {:?}",
                self.path.display(),
                command_args
            ),
            "",
            &command,
            &CallOptions {
                cwd: Some(self.git_dir.clone()),
                command_timeout,
                output_timeout,
                ..CallOptions::default()
            },
            &RetrySpec {
                retries: self.config.retries("Update"),
                ..RetrySpec::default()
            },
        );
        output.status.success()
    }

    fn fetch_lfs_locked(&self, reference: Option<&str>, lfs_options: &[String]) -> bool {
        if !self.context.has_git_lfs() {
            warn!("LFS fetch skipped as git-lfs is not available on this system!");
            return true;
        }

        let mut command = vec![self.config.get_str("System", "RealGit")];
        if self.config.get_bool("LFS", "PerMirrorStorage") {
            let _ = fs::create_dir_all(&self.lfs_dir);
            command.push("-c".to_string());
            command.push(format!("lfs.storage={}", self.lfs_dir.display()));
        }

        let reference = match reference {
            Some(reference) => reference.to_string(),
            None => match self.get_default_ref() {
                Some(reference) => reference,
                None => {
                    // a missing default ref does not fail the surrounding
                    // mirror operation
                    error!("Can't determine default ref of git repository!");
                    return true;
                }
            },
        };

        command.push("lfs".to_string());
        command.push("fetch".to_string());
        command.extend(lfs_options.iter().cloned());
        command.push("origin".to_string());
        command.push(reference.clone());

        let (command_timeout, output_timeout) = self.config.timeouts("LFS");
        let output = runner::pretty_call_command_retry(
            &format!(
                "LFS fetch of ref {} from {} into {}",
                reference,
                self.url.as_deref().unwrap_or_default(),
                self.path.display()
            ),
            "",
            &command,
            &CallOptions {
                cwd: Some(self.git_dir.clone()),
                command_timeout,
                output_timeout,
                ..CallOptions::default()
            },
            &RetrySpec {
                retries: self.config.retries("LFS"),
                ..RetrySpec::default()
            },
        );

        if output.status.success() {
            self.context
                .database
                .increment_counter(&self.path, Counter::LfsUpdates);
            return true;
        }
        false
    }
}

/// The checkout directory of a clone without explicit target, the
/// basename of the URL without `.git`.
pub(crate) fn clone_target_dir(url: &str) -> String {
    let base = url.rsplit('/').next().unwrap_or(url);
    base.strip_suffix(".git").unwrap_or(base).to_string()
}

fn with_args(base: &[String], args: &[&str]) -> Vec<String> {
    let mut command = base.to_vec();
    command.extend(args.iter().map(|arg| arg.to_string()));
    command
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn context() -> (tempfile::TempDir, Context) {
        let tmp = tempfile::tempdir().unwrap();
        let context = Context::for_cache_dir(tmp.path()).unwrap();
        (tmp, context)
    }

    #[test]
    #[serial]
    fn mirror_layout_from_url() {
        let (tmp, context) = context();
        let mirror =
            GitMirror::from_url(&context, "https://github.com/seeraven/gitcache").unwrap();

        let expected = context
            .settings
            .cache_dir
            .join("mirrors")
            .join("github.com")
            .join("seeraven")
            .join("gitcache");
        assert_eq!(mirror.path, expected);
        assert_eq!(mirror.git_dir, expected.join("git"));
        assert_eq!(mirror.lfs_dir, expected.join("lfs"));
        assert_eq!(
            mirror.normalized_url.as_deref(),
            Some("https://github.com/seeraven/gitcache")
        );
        assert_eq!(
            mirror.lockfile,
            context
                .settings
                .cache_dir
                .join("mirrors")
                .join(".lock")
                .join("gitcache")
        );
        drop(tmp);
    }

    #[test]
    #[serial]
    fn local_urls_have_no_mirror() {
        let (_tmp, context) = context();
        assert!(GitMirror::from_url(&context, "file:///somewhere/repo").is_err());
        assert!(GitMirror::from_url(&context, "/plain/local/path").is_err());
    }

    #[test]
    #[serial]
    fn from_path_resolves_the_url() {
        let (_tmp, context) = context();
        let path = context.settings.cache_dir.join("mirrors/github.com/repo");
        context.database.add("https://github.com/repo", &path);

        let mirror = GitMirror::from_path(&context, &path);
        assert_eq!(mirror.url.as_deref(), Some("https://github.com/repo"));
    }

    #[test]
    #[serial]
    fn cleanup_removes_only_aged_mirrors() {
        let (_tmp, context) = context();
        let aged = context.settings.cache_dir.join("mirrors/github.com/aged");
        let fresh = context.settings.cache_dir.join("mirrors/github.com/fresh");
        fs::create_dir_all(aged.join("git")).unwrap();
        fs::create_dir_all(fresh.join("git")).unwrap();
        context.database.add("https://github.com/aged", &aged);
        context.database.add("https://github.com/fresh", &fresh);

        // age the first entry far beyond CleanupAfter
        let db_file = context.settings.cache_dir.join("db");
        let raw = fs::read_to_string(&db_file).unwrap();
        let mut parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let key = format!("mirrors{0}github.com{0}aged", std::path::MAIN_SEPARATOR);
        parsed[key.as_str()]["last-update-time"] = serde_json::json!(1.0);
        fs::write(&db_file, parsed.to_string()).unwrap();

        assert!(GitMirror::from_path(&context, &aged).cleanup());
        assert!(!aged.exists());
        assert!(context.database.get(&aged).is_none());

        assert!(!GitMirror::from_path(&context, &fresh).cleanup());
        assert!(fresh.exists());
        assert!(context.database.get(&fresh).is_some());
    }

    #[test]
    #[serial]
    fn update_interval_controls_staleness() {
        let (_tmp, context) = context();
        let path = context.settings.cache_dir.join("mirrors/github.com/repo");
        context.database.add("https://github.com/repo", &path);

        // default interval of 0 refreshes on every update
        let mirror = GitMirror::from_path(&context, &path);
        assert!(mirror.update_time_reached());

        // a negative interval never refreshes automatically
        fs::create_dir_all(&path).unwrap();
        fs::write(
            path.join("gitcache.config"),
            "[MirrorHandling]\nUpdateInterval = -1\n",
        )
        .unwrap();
        let mirror = GitMirror::from_path(&context, &path);
        assert!(!mirror.update_time_reached());

        // a large interval is not reached right after the update
        fs::write(
            path.join("gitcache.config"),
            "[MirrorHandling]\nUpdateInterval = 1 hour\n",
        )
        .unwrap();
        let mirror = GitMirror::from_path(&context, &path);
        assert!(!mirror.update_time_reached());
    }

    #[test]
    #[serial]
    fn delete_removes_mirror_and_lockfile() {
        let (_tmp, context) = context();
        let path = context.settings.cache_dir.join("mirrors/github.com/repo");
        fs::create_dir_all(path.join("git")).unwrap();
        context.database.add("https://github.com/repo", &path);

        let mirror = GitMirror::from_path(&context, &path);
        assert!(mirror.delete());
        assert!(!path.exists());
        assert!(context.database.get(&path).is_none());
        assert!(!mirror.lockfile.exists());
    }

    #[test]
    fn clone_target_directory_naming() {
        assert_eq!(clone_target_dir("https://github.com/seeraven/gitcache"), "gitcache");
        assert_eq!(
            clone_target_dir("https://github.com/seeraven/gitcache.git"),
            "gitcache"
        );
        assert_eq!(clone_target_dir("git@github.com:seeraven/lfs-example.git"), "lfs-example");
    }
}
