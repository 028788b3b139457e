//! Main FeedStore struct tying all components together.

use crate::error::{FeedError, Result};
use crate::feed::{FeedHandle, FeedManager, WatchFilter};
use crate::mutations::MutationLog;
use crate::types::{ChangeKind, Cursor, StoreStats};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base path for the store directory.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Sync the mutation log every N appends.
    pub sync_interval: u64,

    /// Credit granted to a new subscription before its first grant.
    /// One unit is enough for precise backpressure; raise it to trade
    /// backpressure latency for throughput.
    pub initial_credit: u64,

    /// Cap on a subscription's outstanding credit. Bounds in-flight
    /// entries and sizes the delivery channel.
    pub max_credit: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./feedstore"),
            create_if_missing: true,
            sync_interval: 100,
            initial_credit: 1,
            max_credit: 64,
        }
    }
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"TFD\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

type Rows = BTreeMap<Vec<u8>, Vec<u8>>;

/// Persisted row state: a snapshot of every table as of one cursor.
///
/// Rows are rebuilt on open from the newest snapshot plus a replay of
/// log entries past its watermark. A snapshot is written before any
/// compaction, so raising the log floor never strands row state.
#[derive(Serialize, Deserialize)]
struct TableSnapshot {
    as_of: Cursor,
    tables: HashMap<String, Rows>,
}

/// A row-oriented key-value store with a change feed.
///
/// The store keeps named tables of `key -> value` rows. Every committed
/// mutation is appended to the mutation log under one commit lock, so a
/// change is visible to table readers if and only if it is visible in
/// the log; the whole feed relies on that invariant. Rows live in
/// memory and are rebuilt on open from the newest snapshot plus a
/// replay of the retained log.
pub struct FeedStore {
    /// Store configuration.
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Mutation log (shared with feed producers).
    log: Arc<MutationLog>,

    /// Table registry and rows.
    tables: RwLock<HashMap<String, Rows>>,

    /// Live subscriptions.
    feeds: Arc<FeedManager>,

    /// Serializes commits: the single ordering authority for cursors.
    commit_lock: Mutex<()>,
}

impl FeedStore {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(FeedError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        Self::write_manifest(&config.path)?;

        let lock_file = Self::acquire_lock(&config.path)?;
        let log = Arc::new(MutationLog::open_with_sync_interval(
            config.path.join("mutations.log"),
            config.sync_interval,
        )?);
        let feeds = Arc::new(FeedManager::new(config.initial_credit, config.max_credit));

        let store = Self {
            config,
            _lock_file: lock_file,
            log,
            tables: RwLock::new(HashMap::new()),
            feeds,
            commit_lock: Mutex::new(()),
        };
        store.save_snapshot()?;
        Ok(store)
    }

    /// Open an existing store, rebuilding rows from the newest snapshot
    /// plus a replay of log entries past its watermark.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;

        let lock_file = Self::acquire_lock(&config.path)?;
        let log = Arc::new(MutationLog::open_with_sync_interval(
            config.path.join("mutations.log"),
            config.sync_interval,
        )?);
        let feeds = Arc::new(FeedManager::new(config.initial_credit, config.max_credit));

        let snapshot = Self::load_snapshot(&config.path)?;
        let mut tables = snapshot.tables;

        // Replay changes committed after the snapshot. Entries for
        // tables dropped since they were logged are skipped.
        for entry in log.iter_retained() {
            let entry = entry?;
            if entry.cursor <= snapshot.as_of {
                continue;
            }
            if let Some(rows) = tables.get_mut(&entry.table) {
                match entry.kind {
                    ChangeKind::Put => {
                        rows.insert(entry.key, entry.value.unwrap_or_default());
                    }
                    ChangeKind::Delete => {
                        rows.remove(&entry.key);
                    }
                }
            }
        }

        Ok(Self {
            config,
            _lock_file: lock_file,
            log,
            tables: RwLock::new(tables),
            feeds,
            commit_lock: Mutex::new(()),
        })
    }

    // --- Table Operations ---

    /// Create a table. Watching it starts observing mutations from the
    /// watch's cursor onward, like any other table.
    pub fn create_table(&self, name: &str) -> Result<()> {
        let _commit = self.commit_lock.lock();
        {
            let mut tables = self.tables.write();
            if tables.contains_key(name) {
                return Err(FeedError::TableExists(name.to_string()));
            }
            tables.insert(name.to_string(), Rows::new());
        }
        self.save_snapshot()
    }

    /// Drop a table. Existing subscriptions on it stay open and simply
    /// stop seeing new matches; already-logged entries are untouched.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        let _commit = self.commit_lock.lock();
        {
            let mut tables = self.tables.write();
            if tables.remove(name).is_none() {
                return Err(FeedError::TableNotFound(name.to_string()));
            }
        }
        self.save_snapshot()
    }

    /// Whether a table exists.
    pub fn has_table(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }

    /// Names of all tables.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    // --- Commit Surface ---

    /// Write a row and record the change.
    ///
    /// Log append, row apply, and feed notification happen under one
    /// commit lock, making the mutation one atomic step.
    pub fn put(&self, table: &str, key: &[u8], value: &[u8]) -> Result<Cursor> {
        let _commit = self.commit_lock.lock();

        let mut tables = self.tables.write();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| FeedError::TableNotFound(table.to_string()))?;

        let entry = self.log.append(table, key, ChangeKind::Put, Some(value))?;
        rows.insert(key.to_vec(), value.to_vec());
        drop(tables);

        self.feeds.on_commit(entry.cursor);
        Ok(entry.cursor)
    }

    /// Delete a row and record the change. A delete is recorded even if
    /// the key is absent (a blind tombstone).
    pub fn delete(&self, table: &str, key: &[u8]) -> Result<Cursor> {
        let _commit = self.commit_lock.lock();

        let mut tables = self.tables.write();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| FeedError::TableNotFound(table.to_string()))?;

        let entry = self.log.append(table, key, ChangeKind::Delete, None)?;
        rows.remove(key);
        drop(tables);

        self.feeds.on_commit(entry.cursor);
        Ok(entry.cursor)
    }

    /// Read a row.
    pub fn get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let tables = self.tables.read();
        let rows = tables
            .get(table)
            .ok_or_else(|| FeedError::TableNotFound(table.to_string()))?;
        Ok(rows.get(key).cloned())
    }

    /// Number of rows in a table.
    pub fn row_count(&self, table: &str) -> Result<usize> {
        let tables = self.tables.read();
        let rows = tables
            .get(table)
            .ok_or_else(|| FeedError::TableNotFound(table.to_string()))?;
        Ok(rows.len())
    }

    // --- Feed Operations ---

    /// Watch a table, narrowed by key prefix, from `resume` (exclusive).
    ///
    /// Use [`current_cursor`](FeedStore::current_cursor) as `resume` to
    /// watch "from now". The table must exist at watch time
    /// (`TableNotFound`); dropping it mid-subscription is not an error.
    pub fn watch(&self, table: &str, key_prefix: &[u8], resume: Cursor) -> Result<FeedHandle> {
        if !self.has_table(table) {
            return Err(FeedError::TableNotFound(table.to_string()));
        }
        self.feeds
            .watch(&self.log, WatchFilter::new(table, key_prefix), resume)
    }

    /// The cursor of the most recent commit. Strictly increases with
    /// every commit.
    pub fn current_cursor(&self) -> Cursor {
        self.log.head()
    }

    /// Discard log entries below `cursor`, clamped so no live
    /// subscription's position is crossed. Returns the number of
    /// entries removed. New watches from below the new floor fail with
    /// `CursorTooOld`.
    pub fn compact_below(&self, cursor: Cursor) -> Result<u64> {
        let _commit = self.commit_lock.lock();

        // Snapshot first: row state must never depend on entries below
        // the new floor.
        self.save_snapshot()?;

        let target = match self.feeds.min_live_position() {
            Some(pos) => cursor.min(pos.next()),
            None => cursor,
        };
        self.log.compact_below(target)
    }

    /// Force all pending log appends and the row snapshot to disk.
    pub fn sync(&self) -> Result<()> {
        let _commit = self.commit_lock.lock();
        self.log.sync()?;
        self.save_snapshot()
    }

    // --- Store Operations ---

    /// Get store statistics.
    pub fn stats(&self) -> StoreStats {
        let tables = self.tables.read();
        StoreStats {
            table_count: tables.len(),
            row_count: tables.values().map(|rows| rows.len() as u64).sum(),
            entry_count: self.log.entry_count(),
            log_bytes: self.log.size(),
            subscription_count: self.feeds.subscription_count(),
            head: self.log.head(),
            oldest_retained: self.log.oldest_retained(),
        }
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // --- Private Helpers ---

    /// Write the row snapshot. Callers serialize against commits (the
    /// commit lock or exclusive ownership).
    fn save_snapshot(&self) -> Result<()> {
        let snapshot = TableSnapshot {
            as_of: self.log.head(),
            tables: self.tables.read().clone(),
        };
        let encoded = rmp_serde::to_vec(&snapshot)?;

        let tmp = self.config.path.join("tables.bin.tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        fs::rename(tmp, self.config.path.join("tables.bin"))?;
        Ok(())
    }

    fn load_snapshot(path: &Path) -> Result<TableSnapshot> {
        let snapshot_path = path.join("tables.bin");
        if !snapshot_path.exists() {
            return Ok(TableSnapshot {
                as_of: Cursor::ORIGIN,
                tables: HashMap::new(),
            });
        }
        let mut encoded = Vec::new();
        File::open(snapshot_path)?.read_to_end(&mut encoded)?;
        Ok(rmp_serde::from_slice(&encoded)?)
    }

    fn write_manifest(path: &Path) -> Result<()> {
        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let manifest_path = path.join("MANIFEST");
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(FeedError::InvalidFormat("invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(FeedError::InvalidFormat(format!(
                "unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| FeedError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for FeedStore {
    fn drop(&mut self) {
        // Best-effort sync on drop.
        let _ = self.sync();
    }
}
