//! File-backed durable store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<group>/.lock                 advisory lock, taken per operation
//! <root>/<group>/queues/<hash>.q       one queue file per name
//! <root>/<group>/intents/<hash>.intent one marker per reliable subscriber name
//! ```
//!
//! File names are a blake3 hash of the queue name so arbitrary names map to
//! safe paths; the real name lives in each file's header frame.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::storage::traits::{DurableEntry, DurableStore, QueueKey, StorageError};

use super::file_lock::FileLock;
use super::queue_file;
use super::PersistentConfig;

const QUEUES_DIR: &str = "queues";
const INTENTS_DIR: &str = "intents";
const QUEUE_EXT: &str = "q";
const INTENT_EXT: &str = "intent";

/// Durable store keeping each group's queues in a shared directory.
///
/// Any number of stores (in this process or others) may point at the same
/// root; every operation holds the group's file lock while it runs.
#[derive(Debug)]
pub struct FileDurableStore {
    root: PathBuf,
    config: PersistentConfig,
    /// Queue file lengths as this store last left them.
    tails: Mutex<HashMap<PathBuf, u64>>,
}

impl FileDurableStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    /// Returns `BackendError` if the root cannot be created.
    pub fn open(root: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(root).map_err(|e| {
            StorageError::BackendError(format!(
                "failed to create store root {}: {e}",
                root.display()
            ))
        })?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
            tails: Mutex::new(HashMap::new()),
        })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tails(&self) -> MutexGuard<'_, HashMap<PathBuf, u64>> {
        self.tails.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_queue(&self, key: &QueueKey, path: &Path) -> Result<Vec<DurableEntry>, StorageError> {
        let contents = queue_file::read(path)?;
        if contents.skipped > 0 {
            tracing::warn!(queue = %key, skipped = contents.skipped, "durable queue had unreadable records");
        }
        Ok(contents.entries)
    }

    fn group_dir(&self, group: &str) -> PathBuf {
        let safe = !group.is_empty()
            && group != "."
            && group != ".."
            && group
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if safe {
            self.root.join(group)
        } else {
            self.root.join(format!("g-{}", file_stem(group)))
        }
    }

    fn queue_path(&self, key: &QueueKey) -> PathBuf {
        self.group_dir(&key.group)
            .join(QUEUES_DIR)
            .join(format!("{}.{QUEUE_EXT}", file_stem(&key.name)))
    }

    fn intent_path(&self, key: &QueueKey) -> PathBuf {
        self.group_dir(&key.group)
            .join(INTENTS_DIR)
            .join(format!("{}.{INTENT_EXT}", file_stem(&key.name)))
    }

    /// Lock an existing group container.
    fn lock_group(&self, group: &str) -> Result<FileLock, StorageError> {
        let dir = self.group_dir(group);
        if !dir.is_dir() {
            return Err(StorageError::GroupUnavailable(group.to_string()));
        }
        FileLock::acquire(&dir).map_err(|e| {
            StorageError::BackendError(format!("failed to lock group {group}: {e}"))
        })
    }

    /// Names recorded in the header frames of files with `ext` under `sub`.
    fn names_in(
        &self,
        group: &str,
        sub: &str,
        ext: &str,
        require_entries: bool,
    ) -> Result<BTreeSet<String>, StorageError> {
        let dir = self.group_dir(group).join(sub);
        let mut names = BTreeSet::new();
        let listing = match fs::read_dir(&dir) {
            Ok(listing) => listing,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };

        for item in listing {
            let path = item?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }
            if require_entries && !queue_file::has_entries(&path)? {
                continue;
            }
            match queue_file::read_header(&path) {
                Ok(Some(header)) => {
                    names.insert(header.name);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable queue file");
                }
            }
        }
        Ok(names)
    }
}

fn file_stem(name: &str) -> String {
    blake3::hash(name.as_bytes()).to_hex().as_str()[..32].to_string()
}

impl DurableStore for FileDurableStore {
    fn open_group(&self, group: &str) -> Result<(), StorageError> {
        let dir = self.group_dir(group);
        if !dir.is_dir() && !self.config.create_missing_groups {
            return Err(StorageError::GroupUnavailable(group.to_string()));
        }
        fs::create_dir_all(dir.join(QUEUES_DIR))?;
        fs::create_dir_all(dir.join(INTENTS_DIR))?;
        Ok(())
    }

    fn append(&self, key: &QueueKey, entry: &DurableEntry) -> Result<(), StorageError> {
        let _lock = self.lock_group(&key.group)?;
        let path = self.queue_path(key);
        let known_end = self.tails().get(&path).copied();
        let appended = queue_file::append(
            &path,
            key,
            entry,
            self.config.sync_on_write,
            self.config.max_queue_bytes,
            known_end,
        );
        match appended {
            Ok(end) => {
                self.tails().insert(path, end);
                Ok(())
            }
            Err(e) => {
                self.tails().remove(&path);
                Err(e)
            }
        }
    }

    fn read_all(&self, key: &QueueKey) -> Result<Vec<DurableEntry>, StorageError> {
        let _lock = self.lock_group(&key.group)?;
        self.read_queue(key, &self.queue_path(key))
    }

    fn clear(&self, key: &QueueKey) -> Result<(), StorageError> {
        let _lock = self.lock_group(&key.group)?;
        let path = self.queue_path(key);
        self.tails().remove(&path);
        queue_file::remove(&path)
    }

    fn take_all(&self, key: &QueueKey) -> Result<Vec<DurableEntry>, StorageError> {
        let _lock = self.lock_group(&key.group)?;
        let path = self.queue_path(key);
        self.tails().remove(&path);
        // The file goes even if unreadable; nothing more can be recovered from it.
        let contents = self.read_queue(key, &path);
        queue_file::remove(&path)?;
        match contents {
            Ok(entries) => Ok(entries),
            Err(StorageError::Corrupted(reason)) => {
                tracing::warn!(queue = %key, %reason, "discarded corrupt durable queue");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn queue_names(&self, group: &str) -> Result<BTreeSet<String>, StorageError> {
        let _lock = self.lock_group(group)?;
        self.names_in(group, QUEUES_DIR, QUEUE_EXT, true)
    }

    fn set_intent(&self, key: &QueueKey, active: bool) -> Result<(), StorageError> {
        let _lock = self.lock_group(&key.group)?;
        let path = self.intent_path(key);
        if active {
            if !path.exists() {
                queue_file::write_new(&path, key, self.config.sync_on_write)?;
            }
            Ok(())
        } else {
            queue_file::remove(&path)
        }
    }

    fn intents(&self, group: &str) -> Result<BTreeSet<String>, StorageError> {
        let _lock = self.lock_group(group)?;
        self.names_in(group, INTENTS_DIR, INTENT_EXT, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;
    use chrono::Utc;
    use tempfile::tempdir;

    fn store(root: &Path) -> FileDurableStore {
        FileDurableStore::open(root, PersistentConfig::default().with_sync_on_write(false)).unwrap()
    }

    #[test]
    fn test_group_must_be_opened() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let key = QueueKey::new("group.test", "n");

        let err = store
            .append(&key, &DurableEntry::new(Utc::now(), Payload::Null))
            .unwrap_err();
        assert!(matches!(err, StorageError::GroupUnavailable(_)));

        store.open_group("group.test").unwrap();
        store
            .append(&key, &DurableEntry::new(Utc::now(), Payload::Null))
            .unwrap();
        assert_eq!(store.read_all(&key).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_group_not_created_when_disabled() {
        let dir = tempdir().unwrap();
        let config = PersistentConfig {
            create_missing_groups: false,
            ..PersistentConfig::default()
        };
        let store = FileDurableStore::open(dir.path(), config).unwrap();
        assert!(store.open_group("absent").is_err());
    }

    #[test]
    fn test_two_stores_share_one_root() {
        let dir = tempdir().unwrap();
        let writer = store(dir.path());
        let reader = store(dir.path());
        writer.open_group("g").unwrap();
        reader.open_group("g").unwrap();

        let key = QueueKey::new("g", "name with / slashes");
        for i in 0..3 {
            writer
                .append(&key, &DurableEntry::new(Utc::now(), Payload::Int(i)))
                .unwrap();
        }

        assert_eq!(
            reader.queue_names("g").unwrap(),
            BTreeSet::from(["name with / slashes".to_string()])
        );
        let taken: Vec<_> = reader
            .take_all(&key)
            .unwrap()
            .into_iter()
            .filter_map(|e| e.payload.as_int())
            .collect();
        assert_eq!(taken, vec![0, 1, 2]);
        assert!(writer.read_all(&key).unwrap().is_empty());
        assert!(writer.queue_names("g").unwrap().is_empty());
    }

    #[test]
    fn test_intent_markers() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.open_group("g").unwrap();
        let key = QueueKey::new("g", "n");

        store.set_intent(&key, true).unwrap();
        store.set_intent(&key, true).unwrap();
        assert_eq!(store.intents("g").unwrap(), BTreeSet::from(["n".to_string()]));

        store.set_intent(&key, false).unwrap();
        assert!(store.intents("g").unwrap().is_empty());
    }

    #[test]
    fn test_odd_group_names_stay_inside_root() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.open_group("../escape").unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].starts_with("g-"));
    }
}
