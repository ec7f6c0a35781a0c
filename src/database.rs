/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::{debug, error, warn};
use serde_derive::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::urls;

/// Meta information of a single mirror.
///
/// The field names are fixed by the on-disk JSON format.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MirrorEntry {
    pub url: String,
    #[serde(rename = "last-update-time")]
    pub last_update_time: f64,
    #[serde(rename = "mirror-updates")]
    pub mirror_updates: u64,
    #[serde(rename = "lfs-updates", default)]
    pub lfs_updates: u64,
    pub clones: u64,
    pub updates: u64,
}

/// A statistics counter of a mirror.
#[derive(Clone, Copy, Debug)]
pub enum Counter {
    MirrorUpdates,
    LfsUpdates,
    Clones,
    Updates,
}

/// Database of all mirrors along with their meta information.
///
/// The database is stored as a JSON map keyed by the mirror path relative
/// to the cache directory. In memory all keys are absolute. Every access
/// holds an exclusive lock on the sibling lock file; database operations
/// are short, so the lock acquisition blocks without a timeout.
pub struct Database {
    cache_dir: PathBuf,
    db_file: PathBuf,
    lock_file: PathBuf,
}

impl Database {
    pub fn new(cache_dir: &Path) -> Self {
        if let Err(error) = fs::create_dir_all(cache_dir) {
            error!("Can't create cache directory {}: {}", cache_dir.display(), error);
        }
        Database {
            cache_dir: cache_dir.to_path_buf(),
            db_file: cache_dir.join("db"),
            lock_file: cache_dir.join("db.lock"),
        }
    }

    /// Add a new entry with zeroed counters and the current time as the
    /// last update time.
    pub fn add(&self, url: &str, path: &Path) {
        self.with_lock(true, |entries| {
            entries.insert(
                path.to_path_buf(),
                MirrorEntry {
                    url: url.to_string(),
                    last_update_time: unix_now(),
                    mirror_updates: 0,
                    lfs_updates: 0,
                    clones: 0,
                    updates: 0,
                },
            );
        });
    }

    pub fn remove(&self, path: &Path) {
        self.with_lock(true, |entries| {
            if entries.remove(path).is_none() {
                warn!("Mirror {} was not part of the database.", path.display());
            }
        });
    }

    /// Set the last update time to now and count the mirror update.
    pub fn save_update_time(&self, path: &Path) {
        self.with_lock(true, |entries| match entries.get_mut(path) {
            Some(entry) => {
                entry.last_update_time = unix_now();
                entry.mirror_updates += 1;
            }
            None => warn!("Mirror {} was not part of the database.", path.display()),
        });
    }

    pub fn increment_counter(&self, path: &Path, counter: Counter) {
        self.with_lock(true, |entries| match entries.get_mut(path) {
            Some(entry) => match counter {
                Counter::MirrorUpdates => entry.mirror_updates += 1,
                Counter::LfsUpdates => entry.lfs_updates += 1,
                Counter::Clones => entry.clones += 1,
                Counter::Updates => entry.updates += 1,
            },
            None => warn!("Mirror {} was not part of the database.", path.display()),
        });
    }

    pub fn clear_counters(&self, path: &Path) {
        self.with_lock(true, |entries| {
            if let Some(entry) = entries.get_mut(path) {
                entry.mirror_updates = 0;
                entry.lfs_updates = 0;
                entry.clones = 0;
                entry.updates = 0;
            }
        });
    }

    pub fn get_all(&self) -> BTreeMap<PathBuf, MirrorEntry> {
        self.with_lock(false, |entries| entries.clone())
    }

    pub fn get(&self, path: &Path) -> Option<MirrorEntry> {
        self.with_lock(false, |entries| entries.get(path).cloned())
    }

    pub fn get_url_for_path(&self, path: &Path) -> Option<String> {
        self.get(path).map(|entry| entry.url)
    }

    /// Seconds since the last update of the mirror, 0 if unknown.
    pub fn time_since_last_update(&self, path: &Path) -> f64 {
        match self.get(path) {
            Some(entry) => (unix_now() - entry.last_update_time).max(0.0),
            None => 0.0,
        }
    }

    fn with_lock<T>(
        &self,
        mutated: bool,
        action: impl FnOnce(&mut BTreeMap<PathBuf, MirrorEntry>) -> T,
    ) -> T {
        let lock = self.lock();
        let mut entries = self.load();
        let result = action(&mut entries);
        if mutated {
            self.save(&entries);
        }
        drop(lock);
        result
    }

    fn lock(&self) -> Option<File> {
        let file = match OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_file)
        {
            Ok(file) => file,
            Err(error) => {
                error!(
                    "Unable to open lockfile {}: {}",
                    self.lock_file.display(),
                    error
                );
                return None;
            }
        };
        if let Err(error) = file.lock_exclusive() {
            error!(
                "Unable to lock lockfile {}: {}",
                self.lock_file.display(),
                error
            );
            return None;
        }
        Some(file)
    }

    fn load(&self) -> BTreeMap<PathBuf, MirrorEntry> {
        if !self.db_file.exists() {
            return BTreeMap::new();
        }

        let raw = match fs::read(&self.db_file) {
            Ok(raw) => raw,
            Err(error) => {
                error!("Can't read database {}: {}", self.db_file.display(), error);
                return BTreeMap::new();
            }
        };
        let parsed: BTreeMap<String, MirrorEntry> = match serde_json::from_slice(&raw) {
            Ok(parsed) => parsed,
            Err(error) => {
                error!("Can't parse database {}: {}", self.db_file.display(), error);
                return BTreeMap::new();
            }
        };

        parsed
            .into_iter()
            .map(|(key, entry)| {
                let path = if Path::new(&key).is_absolute() {
                    PathBuf::from(key)
                } else {
                    urls::lexical_normalize(&self.cache_dir.join(key))
                };
                (path, entry)
            })
            .collect()
    }

    fn save(&self, entries: &BTreeMap<PathBuf, MirrorEntry>) {
        let on_disk: BTreeMap<String, &MirrorEntry> = entries
            .iter()
            .map(|(path, entry)| {
                let key = path
                    .strip_prefix(&self.cache_dir)
                    .unwrap_or(path)
                    .to_string_lossy()
                    .into_owned();
                (key, entry)
            })
            .collect();

        match serde_json::to_string(&on_disk) {
            Ok(serialized) => {
                if let Err(error) = fs::write(&self.db_file, serialized) {
                    error!("Can't write database {}: {}", self.db_file.display(), error);
                }
            }
            Err(error) => error!("Can't serialize database: {}", error),
        }
        debug!("Saved database with {} entries.", entries.len());
    }
}

fn unix_now() -> f64 {
    OffsetDateTime::now_utc().unix_timestamp() as f64
}
