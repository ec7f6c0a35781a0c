/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use std::env;
use std::path::Path;
use std::process::exit;

use clap::Parser;
use log::{debug, error, info};

use gitcache::commands;
use gitcache::{handle_git_command, Context};

const DESCRIPTION: &str = "\
Local cache for git repositories to speed up working with large
repositories and multiple clones.

Without any arguments, this command prints the current configuration.
Using the listed options below, the output can be changed and special
actions can be triggered.

If called with the first argument 'git' or when called as 'git' using a
symlink, it acts as a wrapper for the git command and intercepts the
commands required for the mirror handling.";

#[derive(Parser, Debug)]
#[command(name = "gitcache", version, about = DESCRIPTION)]
struct GitcacheArgs {
    /// Remove all outdated repositories.
    #[arg(short = 'c', long)]
    cleanup: bool,

    /// Update all mirrors.
    #[arg(short = 'u', long = "update-all")]
    update_all: bool,

    /// Delete a mirror identified by its URL or its path in the cache.
    /// This option can be specified multiple times.
    #[arg(short = 'd', long = "delete", value_name = "MIRROR")]
    delete: Vec<String>,

    /// Show the statistics.
    #[arg(short = 's', long = "show-statistics")]
    show_statistics: bool,

    /// Clear the statistics.
    #[arg(short = 'z', long = "zero-statistics")]
    zero_statistics: bool,
}

fn main() {
    init_logging();

    let args: Vec<String> = env::args().collect();
    debug!("Called as {:?}", args);

    let rc = if !args.is_empty() && is_git_name(&args[0]) {
        // called as "git ..." through a symlink or copy
        run_wrapper(&args[..1], &args[1..])
    } else if args.len() > 1 && is_git_name(&args[1]) {
        // called as "gitcache git ..."
        run_wrapper(&args[..2], &args[2..])
    } else {
        run_gitcache()
    };
    exit(rc);
}

fn run_wrapper(called_as: &[String], git_args: &[String]) -> i32 {
    match Context::new() {
        Ok(context) => handle_git_command(&context, called_as, git_args),
        Err(error) => {
            error!("{}", error);
            error.into()
        }
    }
}

fn run_gitcache() -> i32 {
    let args = GitcacheArgs::parse();
    let context = match Context::new() {
        Ok(context) => context,
        Err(error) => {
            error!("{}", error);
            return error.into();
        }
    };

    let mut success = true;
    if args.cleanup {
        success = commands::cleanup(&context) == 0;
    }
    if args.update_all {
        success = commands::update_all_mirrors(&context) == 0;
    }
    if !args.delete.is_empty() {
        success = commands::delete_mirrors(&context, &args.delete) == 0;
    }
    if args.zero_statistics {
        for path in context.database.get_all().keys() {
            context.database.clear_counters(path);
        }
        info!("Statistics cleared.");
    }

    if args.show_statistics {
        show_statistics(&context);
    } else if !(args.cleanup || args.update_all || !args.delete.is_empty() || args.zero_statistics)
    {
        show_settings(&context);
    }

    if success {
        0
    } else {
        1
    }
}

fn show_statistics(context: &Context) {
    let all_records = context.database.get_all();
    let mut total_mirror_updates = 0;
    let mut total_lfs_updates = 0;
    let mut total_clones = 0;
    let mut total_updates = 0;

    for entry in all_records.values() {
        println!("Mirror of {}:", entry.url);
        println!("  Mirror Updates:       {}", entry.mirror_updates);
        println!("  Mirror Updates (LFS): {}", entry.lfs_updates);
        println!("  Clones from Mirror:   {}", entry.clones);
        println!("  Updates from Mirror:  {}", entry.updates);
        println!();
        total_mirror_updates += entry.mirror_updates;
        total_lfs_updates += entry.lfs_updates;
        total_clones += entry.clones;
        total_updates += entry.updates;
    }

    println!("Total:");
    println!("  Mirror Updates:       {}", total_mirror_updates);
    println!("  Mirror Updates (LFS): {}", total_lfs_updates);
    println!("  Clones from Mirror:   {}", total_clones);
    println!("  Updates from Mirror:  {}", total_updates);
    println!();
}

fn show_settings(context: &Context) {
    println!("gitcache global settings:");
    println!("-------------------------");
    println!("  GITCACHE_DIR      = {}", context.settings.cache_dir.display());
    println!("  GITCACHE_DB       = {}", context.settings.db_file.display());
    println!("  GITCACHE_DB_LOCK  = {}", context.settings.db_lock_file.display());
    println!();
    println!("gitcache configuration:");
    println!("-----------------------");
    println!("{}", context.config);
}

fn init_logging() {
    let level = env::var("GITCACHE_LOGLEVEL").unwrap_or_else(|_| "info".to_string());
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(&level);
    if env::var("GITCACHE_LOGFORMAT").as_deref() == Ok("plain") {
        builder.format_timestamp(None);
    }
    builder.init();
}

fn is_git_name(arg: &str) -> bool {
    matches!(
        Path::new(arg).file_name().and_then(|name| name.to_str()),
        Some("git") | Some("git.exe")
    )
}
