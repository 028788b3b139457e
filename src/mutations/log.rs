//! Append-only mutation log.

use crate::error::{FeedError, Result};
use crate::types::{ChangeKind, Cursor, LogEntry};
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes preceding every log entry.
const ENTRY_MAGIC: &[u8; 4] = b"MUT\0";

/// Current entry format version.
const ENTRY_VERSION: u8 = 1;

/// Mutable log bookkeeping, guarded as a unit.
struct LogState {
    /// Cursor of the newest entry (`Cursor::ORIGIN` while empty).
    head: Cursor,
    /// Oldest cursor still on disk; everything below was compacted away.
    floor: Cursor,
    /// Byte length of valid data (may trail the physical file after a
    /// truncated-tail recovery).
    file_size: u64,
    writes_since_sync: u64,
}

/// Append-only, file-backed log of committed row changes.
///
/// The log assigns each appended entry the next cursor in a single
/// total order across all tables. Entries are immutable once written
/// and are only ever removed from the front, via [`compact_below`].
///
/// [`compact_below`]: MutationLog::compact_below
pub struct MutationLog {
    path: PathBuf,

    /// Log file handle. Outermost lock; `state` and `index` are only
    /// taken while holding it when more than one is needed.
    file: Mutex<File>,

    state: Mutex<LogState>,

    /// Cursor-to-offset index, rebuilt by scanning on open.
    index: RwLock<super::CursorIndex>,

    /// Sync every N appends (1 = sync every append).
    sync_interval: u64,
}

impl MutationLog {
    /// Default sync interval, balancing durability and throughput.
    const DEFAULT_SYNC_INTERVAL: u64 = 100;

    /// Open or create a mutation log with the default sync interval.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_sync_interval(path, Self::DEFAULT_SYNC_INTERVAL)
    }

    /// Open or create a mutation log with a custom sync interval.
    pub fn open_with_sync_interval(path: impl AsRef<Path>, sync_interval: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let physical_size = file.metadata()?.len();

        // Rebuild the cursor index by scanning. A torn entry at the
        // tail (crash mid-append) truncates the scan; the next append
        // overwrites the garbage.
        let mut index = super::CursorIndex::new();
        let mut head = Cursor::ORIGIN;
        let mut offset = 0u64;
        file.seek(SeekFrom::Start(0))?;
        while offset < physical_size {
            match Self::read_entry(&mut file) {
                Ok(entry) => {
                    index.push(entry.cursor, offset);
                    head = entry.cursor;
                    offset = file.stream_position()?;
                }
                Err(e) => {
                    tracing::warn!(
                        offset,
                        error = %e,
                        "truncating mutation log at unreadable entry"
                    );
                    break;
                }
            }
        }

        let floor = index.first().unwrap_or_else(|| Cursor::ORIGIN.next());

        Ok(Self {
            path,
            file: Mutex::new(file),
            state: Mutex::new(LogState {
                head,
                floor,
                file_size: offset,
                writes_since_sync: 0,
            }),
            index: RwLock::new(index),
            sync_interval: sync_interval.max(1),
        })
    }

    /// Append a committed row change and assign it the next cursor.
    pub fn append(
        &self,
        table: &str,
        key: &[u8],
        kind: ChangeKind,
        value: Option<&[u8]>,
    ) -> Result<LogEntry> {
        let mut file = self.file.lock();
        let mut state = self.state.lock();

        let cursor = state.head.next();
        let entry = LogEntry {
            cursor,
            table: table.to_string(),
            key: key.to_vec(),
            kind,
            value: value.map(|v| v.to_vec()),
        };

        let offset = state.file_size;
        file.seek(SeekFrom::Start(offset))?;
        Self::write_entry(&mut file, &entry)?;
        let new_size = file.stream_position()?;

        self.index.write().push(cursor, offset);
        state.head = cursor;
        state.file_size = new_size;

        state.writes_since_sync += 1;
        if state.writes_since_sync >= self.sync_interval {
            file.sync_all()?;
            state.writes_since_sync = 0;
        }

        Ok(entry)
    }

    /// Force all pending appends to disk.
    pub fn sync(&self) -> Result<()> {
        let file = self.file.lock();
        let mut state = self.state.lock();
        file.sync_all()?;
        state.writes_since_sync = 0;
        Ok(())
    }

    /// Read the entry at `cursor`.
    ///
    /// Returns `Ok(None)` when `cursor` is beyond the head, and
    /// `CursorTooOld` when it fell below the compaction floor.
    pub fn entry_at(&self, cursor: Cursor) -> Result<Option<LogEntry>> {
        let mut file = self.file.lock();

        let (head, floor) = {
            let state = self.state.lock();
            (state.head, state.floor)
        };
        if cursor < floor {
            return Err(FeedError::CursorTooOld(cursor, floor));
        }
        if cursor > head {
            return Ok(None);
        }

        let offset = self.index.read().lookup(cursor).ok_or_else(|| {
            FeedError::Corruption(format!("cursor {:?} missing from log index", cursor))
        })?;

        file.seek(SeekFrom::Start(offset))?;
        let entry = Self::read_entry(&mut file)?;
        if entry.cursor != cursor {
            return Err(FeedError::Corruption(format!(
                "log entry at offset {} has cursor {:?}, expected {:?}",
                offset, entry.cursor, cursor
            )));
        }
        Ok(Some(entry))
    }

    /// Iterate entries strictly after `cursor`, up to the head at call
    /// time. A cursor equal to the head yields an empty iterator.
    ///
    /// Iteration is not isolated from concurrent compaction; entries
    /// read after the floor passed them surface as corruption errors
    /// rather than silent gaps.
    pub fn read_from(&self, cursor: Cursor) -> Result<LogIterator<'_>> {
        let file = self.file.lock();
        let state = self.state.lock();

        if cursor.next() < state.floor {
            return Err(FeedError::CursorTooOld(cursor, state.floor));
        }

        let end = state.file_size;
        let offset = if cursor >= state.head {
            end
        } else {
            self.index.read().lookup(cursor.next()).ok_or_else(|| {
                FeedError::Corruption(format!("cursor {:?} missing from log index", cursor.next()))
            })?
        };
        drop(state);
        drop(file);

        Ok(LogIterator {
            log: self,
            offset,
            end,
        })
    }

    /// Iterate every entry still on disk, oldest first.
    pub fn iter_retained(&self) -> LogIterator<'_> {
        let end = self.state.lock().file_size;
        LogIterator {
            log: self,
            offset: 0,
            end,
        }
    }

    /// Cursor of the newest entry, or `Cursor::ORIGIN` while empty.
    pub fn head(&self) -> Cursor {
        self.state.lock().head
    }

    /// Oldest cursor still retained.
    pub fn oldest_retained(&self) -> Cursor {
        self.state.lock().floor
    }

    /// Number of entries on disk.
    pub fn entry_count(&self) -> u64 {
        self.index.read().len() as u64
    }

    /// Bytes of valid log data.
    pub fn size(&self) -> u64 {
        self.state.lock().file_size
    }

    /// Physically discard entries with cursors below `cursor`.
    ///
    /// The newest entry is always retained so the head survives a
    /// reopen. Returns the number of entries removed. Callers are
    /// responsible for not compacting past live readers; see
    /// `FeedStore::compact_below` for the clamped entry point.
    pub fn compact_below(&self, cursor: Cursor) -> Result<u64> {
        let mut file = self.file.lock();
        let mut state = self.state.lock();

        let target = cursor.min(state.head);
        if target <= state.floor {
            return Ok(0);
        }

        let start_off = self.index.read().lookup(target).ok_or_else(|| {
            FeedError::Corruption(format!("cursor {:?} missing from log index", target))
        })?;

        // Entries are contiguous, so the retained suffix is a straight
        // byte copy into a fresh file swapped in by rename.
        let tmp_path = self.path.with_extension("log.tmp");
        let mut tmp = File::create(&tmp_path)?;
        file.seek(SeekFrom::Start(start_off))?;
        let retained_bytes = state.file_size - start_off;
        io::copy(&mut (&mut *file).take(retained_bytes), &mut tmp)?;
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path)?;
        let new_file = OpenOptions::new().read(true).write(true).open(&self.path)?;

        let removed = {
            let mut index = self.index.write();
            let before = index.len();
            index.truncate_below(target, start_off);
            (before - index.len()) as u64
        };

        state.floor = target;
        state.file_size = retained_bytes;
        *file = new_file;

        tracing::debug!(removed, floor = ?target, "compacted mutation log");
        Ok(removed)
    }

    // --- Entry framing ---

    fn checksum(entry: &LogEntry) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&entry.cursor.value().to_le_bytes());
        hasher.update(entry.table.as_bytes());
        hasher.update(&entry.key);
        if let Some(ref value) = entry.value {
            hasher.update(value);
        }
        hasher.finalize()
    }

    fn write_entry(file: &mut File, entry: &LogEntry) -> Result<()> {
        file.write_all(ENTRY_MAGIC)?;
        file.write_all(&[ENTRY_VERSION])?;

        let kind_byte = match entry.kind {
            ChangeKind::Put => 0u8,
            ChangeKind::Delete => 1u8,
        };
        file.write_all(&[kind_byte])?;

        file.write_all(&entry.cursor.value().to_le_bytes())?;

        let table_bytes = entry.table.as_bytes();
        file.write_all(&(table_bytes.len() as u16).to_le_bytes())?;
        file.write_all(table_bytes)?;

        file.write_all(&(entry.key.len() as u32).to_le_bytes())?;
        file.write_all(&entry.key)?;

        if let Some(ref value) = entry.value {
            file.write_all(&(value.len() as u32).to_le_bytes())?;
            file.write_all(value)?;
        }

        file.write_all(&Self::checksum(entry).to_le_bytes())?;
        Ok(())
    }

    fn read_entry(file: &mut File) -> Result<LogEntry> {
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != ENTRY_MAGIC {
            return Err(FeedError::InvalidFormat("invalid entry magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != ENTRY_VERSION {
            return Err(FeedError::InvalidFormat(format!(
                "unsupported entry version: {}",
                version[0]
            )));
        }

        let mut kind_byte = [0u8; 1];
        file.read_exact(&mut kind_byte)?;
        let kind = match kind_byte[0] {
            0 => ChangeKind::Put,
            1 => ChangeKind::Delete,
            b => {
                return Err(FeedError::InvalidFormat(format!(
                    "unknown change kind: {}",
                    b
                )))
            }
        };

        let mut cursor_bytes = [0u8; 8];
        file.read_exact(&mut cursor_bytes)?;
        let cursor = Cursor::from_value(u64::from_le_bytes(cursor_bytes));

        let mut table_len_bytes = [0u8; 2];
        file.read_exact(&mut table_len_bytes)?;
        let table_len = u16::from_le_bytes(table_len_bytes) as usize;
        let mut table_bytes = vec![0u8; table_len];
        file.read_exact(&mut table_bytes)?;
        let table = String::from_utf8(table_bytes)
            .map_err(|_| FeedError::InvalidFormat("table name is not UTF-8".into()))?;

        let mut key_len_bytes = [0u8; 4];
        file.read_exact(&mut key_len_bytes)?;
        let key_len = u32::from_le_bytes(key_len_bytes) as usize;
        let mut key = vec![0u8; key_len];
        file.read_exact(&mut key)?;

        let value = match kind {
            ChangeKind::Put => {
                let mut value_len_bytes = [0u8; 4];
                file.read_exact(&mut value_len_bytes)?;
                let value_len = u32::from_le_bytes(value_len_bytes) as usize;
                let mut value = vec![0u8; value_len];
                file.read_exact(&mut value)?;
                Some(value)
            }
            ChangeKind::Delete => None,
        };

        let entry = LogEntry {
            cursor,
            table,
            key,
            kind,
            value,
        };

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored = u32::from_le_bytes(checksum_bytes);
        let computed = Self::checksum(&entry);
        if stored != computed {
            return Err(FeedError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        Ok(entry)
    }
}

/// Iterator over log entries, bounded by the head at creation time.
pub struct LogIterator<'a> {
    log: &'a MutationLog,
    offset: u64,
    end: u64,
}

impl Iterator for LogIterator<'_> {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.end {
            return None;
        }

        let mut file = self.log.file.lock();
        if let Err(e) = file.seek(SeekFrom::Start(self.offset)) {
            self.offset = self.end;
            return Some(Err(e.into()));
        }
        match MutationLog::read_entry(&mut file) {
            Ok(entry) => {
                self.offset = file.stream_position().unwrap_or(self.end);
                Some(Ok(entry))
            }
            Err(e) => {
                self.offset = self.end;
                Some(Err(e))
            }
        }
    }
}
