/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use ini::Ini;
use log::{debug, error, warn};
use regex::Regex;

use crate::error::{GitcacheError, Result};

#[derive(Clone, Debug)]
struct ConfigItem {
    section: &'static str,
    option: &'static str,
    env: String,
}

/// The configuration of gitcache.
///
/// Every option has a single source of truth: the environment variable if
/// it is set, otherwise the value from the configuration file, otherwise
/// the compiled default. The defaults are materialized into the INI
/// representation on construction, so a file lookup always succeeds.
#[derive(Clone)]
pub struct Config {
    items: Vec<ConfigItem>,
    file: Ini,
}

impl Config {
    pub fn new() -> Self {
        let mut config = Config {
            items: Vec::new(),
            file: Ini::new(),
        };

        let real_git = find_git();
        config.register("System", "RealGit", &real_git, Some("GITCACHE_REAL_GIT"));

        config.register(
            "MirrorHandling",
            "UpdateInterval",
            "0 seconds",
            Some("GITCACHE_UPDATE_INTERVAL"),
        );
        config.register(
            "MirrorHandling",
            "CleanupAfter",
            "14 days",
            Some("GITCACHE_CLEANUP_AFTER"),
        );

        config.register("UrlPatterns", "IncludeRegex", ".*", None);
        config.register("UrlPatterns", "ExcludeRegex", "", None);

        config.register("Command", "WarnIfLockedFor", "10 seconds", None);
        config.register("Command", "CheckInterval", "2 seconds", None);
        config.register("Command", "LockTimeout", "1 hour", None);

        for section in ["Clone", "Update", "GC", "LFS"] {
            config.register(section, "Retries", "3", None);
            config.register(section, "CommandTimeout", "1 hour", None);
            config.register(section, "OutputTimeout", "5 minutes", None);
        }

        config.register("Clone", "CloneStyle", "Full", Some("GITCACHE_CLONE_STYLE"));
        config.register("LFS", "PerMirrorStorage", "True", None);

        config
    }

    fn register(
        &mut self,
        section: &'static str,
        option: &'static str,
        default: &str,
        env: Option<&'static str>,
    ) {
        let env = env
            .map(str::to_string)
            .unwrap_or_else(|| format!("GITCACHE_{}_{}", section.to_uppercase(), snake_upper(option)));
        self.items.push(ConfigItem { section, option, env });
        self.file.set_to(Some(section), option.to_string(), default.to_string());
    }

    fn item(&self, section: &str, option: &str) -> Option<&ConfigItem> {
        self.items.iter().find(|item| {
            item.section.eq_ignore_ascii_case(section) && item.option.eq_ignore_ascii_case(option)
        })
    }

    /// Get the raw string value of an option, applying the resolution order
    /// environment variable, configuration file, compiled default.
    fn raw_value(&self, section: &str, option: &str) -> Option<String> {
        let item = self.item(section, option);
        if let Some(item) = item {
            if let Ok(value) = env::var(&item.env) {
                return Some(value);
            }
            return self
                .file
                .get_from(Some(item.section), item.option)
                .map(str::to_string);
        }
        self.file.get_from(Some(section), option).map(str::to_string)
    }

    pub fn get_str(&self, section: &str, option: &str) -> String {
        self.raw_value(section, option).unwrap_or_default()
    }

    pub fn get_seconds(&self, section: &str, option: &str) -> i64 {
        self.raw_value(section, option)
            .map(|value| str_to_seconds(&value))
            .unwrap_or(0)
    }

    pub fn get_int(&self, section: &str, option: &str) -> i64 {
        self.raw_value(section, option)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn get_bool(&self, section: &str, option: &str) -> bool {
        self.raw_value(section, option)
            .map(|value| str_to_bool(&value))
            .unwrap_or(false)
    }

    /// Number of retries of a command group, e.g. `Clone`.
    pub fn retries(&self, section: &str) -> u32 {
        self.get_int(section, "Retries").max(0) as u32
    }

    /// Command and output timeouts of a command group. Zero or negative
    /// values disable the timeout.
    pub fn timeouts(
        &self,
        section: &str,
    ) -> (Option<std::time::Duration>, Option<std::time::Duration>) {
        let command = self.get_seconds(section, "CommandTimeout");
        let output = self.get_seconds(section, "OutputTimeout");
        (
            (command > 0).then(|| std::time::Duration::from_secs(command as u64)),
            (output > 0).then(|| std::time::Duration::from_secs(output as u64)),
        )
    }

    /// The compiled URL pattern pair. An empty exclude pattern never
    /// matches.
    pub fn url_patterns(&self) -> Result<UrlPatterns> {
        let include = self.get_str("UrlPatterns", "IncludeRegex");
        let include = Regex::new(&include)
            .map_err(|error| GitcacheError::Config(format!("invalid IncludeRegex: {error}")))?;

        let exclude = self.get_str("UrlPatterns", "ExcludeRegex");
        let exclude = if exclude.is_empty() {
            None
        } else {
            Some(
                Regex::new(&exclude)
                    .map_err(|error| GitcacheError::Config(format!("invalid ExcludeRegex: {error}")))?,
            )
        };

        Ok(UrlPatterns { include, exclude })
    }

    /// Load a configuration file on top of the current values.
    ///
    /// Returns `true` if the file was found and loaded.
    pub fn load(&mut self, path: &Path) -> bool {
        if !path.exists() {
            debug!(
                "Can't load configuration file {} as it does not exist yet!",
                path.display()
            );
            return false;
        }

        match Ini::load_from_file(path) {
            Ok(loaded) => {
                debug!("Loading configuration file {}.", path.display());
                for (section, properties) in loaded.iter() {
                    let Some(section) = section else { continue };
                    for (option, value) in properties.iter() {
                        // Keys are matched case-insensitively against the
                        // registry and stored under their canonical name.
                        let (section, option) = match self.item(section, option) {
                            Some(item) => (item.section.to_string(), item.option.to_string()),
                            None => (section.to_string(), option.to_string()),
                        };
                        self.file.set_to(Some(section), option, value.to_string());
                    }
                }
                true
            }
            Err(error) => {
                error!("Can't parse configuration file {}: {}", path.display(), error);
                false
            }
        }
    }

    /// Save the effective file values.
    pub fn save(&self, path: &Path) -> Result<()> {
        log::info!("Save configuration file {}.", path.display());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| GitcacheError::Filesystem {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        self.file
            .write_to_file(path)
            .map_err(|source| GitcacheError::Filesystem {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Validate the configured real git command.
    ///
    /// It must resolve to an existing executable and must not resolve to
    /// this wrapper itself.
    pub fn check_real_git(&self, config_file: &Path) -> Result<()> {
        let configured = self.get_str("System", "RealGit");
        let resolved = match Path::new(&configured).canonicalize() {
            Ok(resolved) => resolved,
            Err(exception) => {
                error!("Can't resolve configured path to the real git command!");
                error!("Configuration file:  {}", config_file.display());
                error!("Configured real git: {}", configured);
                error!("Error:               {}", exception);
                error!(
                    "Required action:     Please change the entry in the configuration file \
                     to point to the real git executable!"
                );
                return Err(GitcacheError::Config(
                    "real git command can not be resolved".to_string(),
                ));
            }
        };

        if this_executable().is_some_and(|this| this == resolved) {
            error!("The configured real git command is actually this wrapper!");
            error!("Configuration file:  {}", config_file.display());
            error!("Configured real git: {}", configured);
            error!(
                "Required action:     Please change the entry in the configuration file \
                 to point to the real git executable!"
            );
            return Err(GitcacheError::Config(
                "real git command resolves to the wrapper".to_string(),
            ));
        }

        Ok(())
    }

    fn env_name(&self, section: &str, option: &str) -> Option<&str> {
        self.item(section, option).map(|item| item.env.as_str())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sections: Vec<&str> = self.file.iter().filter_map(|(section, _)| section).collect();
        sections.sort_unstable();
        sections.dedup();

        for (index, section) in sections.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{section}:")?;

            let Some(properties) = self.file.section(Some(*section)) else {
                continue;
            };
            let mut options: Vec<&str> = properties.iter().map(|(option, _)| option).collect();
            options.sort_unstable();
            for option in options {
                let value = properties.get(option).unwrap_or_default();
                match self.env_name(section, option) {
                    Some(env) => writeln!(f, " {option:<20} = {value:<20} ({env})")?,
                    None => writeln!(f, " {option:<20} = {value}")?,
                }
            }
        }
        Ok(())
    }
}

/// The compiled `UrlPatterns` configuration. A URL is cached iff the
/// include pattern matches at its start and the exclude pattern does not.
pub struct UrlPatterns {
    include: Regex,
    exclude: Option<Regex>,
}

impl UrlPatterns {
    pub fn should_mirror(&self, url: &str) -> bool {
        match_at_start(&self.include, url)
            && !self
                .exclude
                .as_ref()
                .is_some_and(|exclude| match_at_start(exclude, url))
    }
}

fn match_at_start(pattern: &Regex, text: &str) -> bool {
    pattern.find(text).is_some_and(|found| found.start() == 0)
}

/// Convert a CamelCase option name into its SNAKE_UPPER form.
fn snake_upper(camel: &str) -> String {
    let mut result = String::with_capacity(camel.len() + 4);
    for (index, character) in camel.chars().enumerate() {
        if character.is_ascii_uppercase() && index > 0 {
            result.push('_');
        }
        result.push(character.to_ascii_uppercase());
    }
    result
}

/// Convert a duration string like `14 days` or a bare number of seconds.
/// Unparseable input converts to 0.
fn str_to_seconds(value: &str) -> i64 {
    let trimmed = value.trim();
    if let Ok(seconds) = trimmed.parse::<i64>() {
        return seconds;
    }
    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    match humantime::parse_duration(&compact) {
        Ok(duration) => duration.as_secs() as i64,
        Err(_) => 0,
    }
}

fn str_to_bool(value: &str) -> bool {
    matches!(value.trim().to_uppercase().as_str(), "1" | "ON" | "TRUE" | "YES")
}

/// Locate the real git command on `PATH`, skipping any candidate that
/// resolves to this wrapper.
pub fn find_git() -> String {
    let this = this_executable();
    if let Ok(candidates) = which::which_all("git") {
        for candidate in candidates {
            let resolved = candidate.canonicalize().unwrap_or_else(|_| candidate.clone());
            if this.as_ref() != Some(&resolved) {
                debug!(
                    "Found real git command as {} (resolving to {}).",
                    candidate.display(),
                    resolved.display()
                );
                return candidate.to_string_lossy().into_owned();
            }
        }
    }

    warn!("Can't find git command! Please specify manually in the config file!");
    "/usr/bin/git".to_string()
}

fn this_executable() -> Option<PathBuf> {
    env::current_exe().ok().and_then(|path| path.canonicalize().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn seconds_conversion() {
        assert_eq!(str_to_seconds("10"), 10);
        assert_eq!(str_to_seconds("-300"), -300);
        assert_eq!(str_to_seconds("10 seconds"), 10);
        assert_eq!(str_to_seconds("2 minutes"), 120);
        assert_eq!(str_to_seconds("1 hour"), 3600);
        assert_eq!(str_to_seconds("14 days"), 14 * 86400);
        assert_eq!(str_to_seconds("garbage"), 0);
    }

    #[test]
    fn bool_conversion() {
        for value in ["1", "on", "True", "YES"] {
            assert!(str_to_bool(value), "{value} should be true");
        }
        for value in ["0", "off", "False", "no", "whatever"] {
            assert!(!str_to_bool(value), "{value} should be false");
        }
    }

    #[test]
    fn snake_upper_conversion() {
        assert_eq!(snake_upper("UpdateInterval"), "UPDATE_INTERVAL");
        assert_eq!(snake_upper("WarnIfLockedFor"), "WARN_IF_LOCKED_FOR");
        assert_eq!(snake_upper("Retries"), "RETRIES");
    }

    #[test]
    fn compiled_defaults() {
        let config = Config::new();
        assert_eq!(config.get_int("Clone", "Retries"), 3);
        assert_eq!(config.get_seconds("Command", "LockTimeout"), 3600);
        assert_eq!(config.get_seconds("MirrorHandling", "CleanupAfter"), 14 * 86400);
        assert!(config.get_bool("LFS", "PerMirrorStorage"));
        assert_eq!(config.get_str("Clone", "CloneStyle"), "Full");
    }

    #[test]
    #[serial]
    fn environment_override() {
        unsafe { env::set_var("GITCACHE_UPDATE_INTERVAL", "3600") };
        let config = Config::new();
        assert_eq!(config.get_seconds("MirrorHandling", "UpdateInterval"), 3600);
        unsafe { env::remove_var("GITCACHE_UPDATE_INTERVAL") };
        assert_eq!(config.get_seconds("MirrorHandling", "UpdateInterval"), 0);
    }

    #[test]
    fn case_insensitive_lookup() {
        let config = Config::new();
        assert_eq!(config.get_int("clone", "retries"), 3);
    }

    #[test]
    #[serial]
    fn save_and_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("config");

        let config = Config::new();
        config.save(&file).unwrap();
        assert!(file.exists());

        fs::write(
            &file,
            "[MirrorHandling]\nupdateinterval = 600 seconds\n",
        )
        .unwrap();

        let mut loaded = Config::new();
        assert!(loaded.load(&file));
        assert_eq!(loaded.get_seconds("MirrorHandling", "UpdateInterval"), 600);
        // untouched options keep their defaults
        assert_eq!(loaded.get_int("Clone", "Retries"), 3);
    }

    #[test]
    fn load_of_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::new();
        assert!(!config.load(&tmp.path().join("config")));
    }

    #[test]
    fn display_lists_env_names() {
        let config = Config::new();
        let dump = config.to_string();
        assert!(dump.contains("MirrorHandling:"));
        assert!(dump.contains("GITCACHE_UPDATE_INTERVAL"));
        assert!(dump.contains("GITCACHE_CLONE_COMMAND_TIMEOUT"));
    }

    #[test]
    #[serial]
    fn empty_exclude_never_matches() {
        let config = Config::new();
        let patterns = config.url_patterns().unwrap();
        assert!(patterns.should_mirror("https://github.com/seeraven/gitcache"));
    }

    #[test]
    #[serial]
    fn url_pattern_filtering() {
        unsafe { env::set_var("GITCACHE_URLPATTERNS_EXCLUDE_REGEX", ".*github.*") };
        let config = Config::new();
        let patterns = config.url_patterns().unwrap();
        assert!(!patterns.should_mirror("https://github.com/seeraven/gitcache"));
        assert!(patterns.should_mirror("https://gitlab.com/some/repo"));
        unsafe { env::remove_var("GITCACHE_URLPATTERNS_EXCLUDE_REGEX") };
    }
}
