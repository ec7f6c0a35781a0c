/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

pub mod commands;
pub mod config;
pub mod database;
pub mod error;
pub mod fsutil;
pub mod lock;
pub mod mirror;
pub mod options;
pub mod runner;
pub mod urls;

use std::env;
use std::path::{Path, PathBuf};

use log::debug;
use once_cell::sync::OnceCell;

use config::Config;
use database::Database;
use error::Result;
use options::GitInvocation;

/// Locations below the cache directory.
#[derive(Clone, Debug)]
pub struct Settings {
    pub cache_dir: PathBuf,
    pub db_file: PathBuf,
    pub db_lock_file: PathBuf,
}

impl Settings {
    /// Derive the settings from `GITCACHE_DIR`, defaulting to
    /// `~/.gitcache`.
    pub fn from_env() -> Self {
        let cache_dir = env::var_os("GITCACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("/"))
                    .join(".gitcache")
            });
        Settings::for_cache_dir(&cache_dir)
    }

    pub fn for_cache_dir(cache_dir: &Path) -> Self {
        let cache_dir = std::path::absolute(cache_dir)
            .map(|path| urls::lexical_normalize(&path))
            .unwrap_or_else(|_| cache_dir.to_path_buf());
        Settings {
            db_file: cache_dir.join("db"),
            db_lock_file: cache_dir.join("db.lock"),
            cache_dir,
        }
    }
}

/// Construction-time context shared by all command handlers.
///
/// Holds the global configuration, the database and the lazily detected
/// availability of the git-lfs command.
pub struct Context {
    pub settings: Settings,
    pub config: Config,
    pub database: Database,
    has_git_lfs: OnceCell<bool>,
}

impl Context {
    pub fn new() -> Result<Self> {
        Context::with_settings(Settings::from_env())
    }

    pub fn for_cache_dir(cache_dir: &Path) -> Result<Self> {
        Context::with_settings(Settings::for_cache_dir(cache_dir))
    }

    fn with_settings(settings: Settings) -> Result<Self> {
        let database = Database::new(&settings.cache_dir);

        let mut config = Config::new();
        let config_file = settings.cache_dir.join("config");
        if config.load(&config_file) {
            config.check_real_git(&config_file)?;
        } else {
            config.save(&config_file)?;
        }

        Ok(Context {
            settings,
            config,
            database,
            has_git_lfs: OnceCell::new(),
        })
    }

    /// Whether this host has the git-lfs command available.
    pub fn has_git_lfs(&self) -> bool {
        *self.has_git_lfs.get_or_init(|| {
            let argv = vec!["git-lfs".to_string(), "version".to_string()];
            runner::getstatusoutput(&argv, None).0 == 0
        })
    }

    /// The global configuration overlaid with a per-mirror configuration
    /// file.
    pub fn mirror_config(&self, config_file: &Path) -> Config {
        let mut config = self.config.clone();
        config.load(config_file);
        config
    }
}

/// Call the real git command with the given arguments.
pub fn call_real_git(context: &Context, args: &[String]) -> i32 {
    let mut argv = vec![context.config.get_str("System", "RealGit")];
    argv.extend_from_slice(args);
    runner::simple_call_command(&argv, None)
}

/// Handle an invocation of the git wrapper persona.
///
/// `called_as` is the argument vector prefix used for re-entrant calls of
/// the wrapper, e.g. for submodule handling.
pub fn handle_git_command(context: &Context, called_as: &[String], args: &[String]) -> i32 {
    debug!("handle_git_command({:?}, {:?}) started", called_as, args);

    let invocation = GitInvocation::new(args);
    if invocation.has_bail_out() {
        debug!("bail out");
        return call_real_git(context, args);
    }

    debug!(
        "Found global options {:?}, command {:?}, command options {:?} and arguments {:?}.",
        invocation.global_options,
        invocation.command(),
        invocation.command_options,
        invocation.command_args
    );

    match invocation.command() {
        Some("cleanup") => commands::cleanup(context),
        Some("update-mirrors") => commands::update_all_mirrors(context),
        Some("delete-mirror") => commands::delete_mirrors(context, &invocation.command_args),
        Some("ls-remote") => commands::ls_remote(context, &invocation),
        Some("checkout") => commands::checkout(context, &invocation),
        Some("clone") => commands::clone(context, called_as, &invocation),
        Some("lfs_fetch") => commands::lfs_fetch(context, &invocation),
        Some("lfs_pull") => commands::lfs_pull(context, &invocation),
        Some("pull") => commands::pull(context, &invocation),
        Some("fetch") => commands::fetch(context, &invocation),
        Some("submodule_init") => commands::submodule_init(context, &invocation),
        Some("submodule_update") => commands::submodule_update(context, called_as, &invocation),
        Some("remote_add") => commands::remote_add(context, &invocation),
        other => {
            debug!(
                "Command {:?} is not handled by gitcache. Calling the real git command.",
                other
            );
            call_real_git(context, args)
        }
    }
}
