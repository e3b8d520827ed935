//! Local persistence using redb.
//!
//! One database file per library, holding:
//! - Characters keyed by id (JSON `StoredCharacter`)
//! - Pending sync operations and delete tombstones
//! - Image blobs stored apart from their character
//! - Schema metadata
//!
//! The local store is the source of truth for availability: every write
//! lands here before the remote store is contacted.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::types::StoredCharacter;

// Submodules
mod images;
mod pending;

use images::IMAGES_TABLE;
use pending::PENDING_TABLE;

pub use pending::{PendingEntry, PendingOp};

// Table definitions
pub(crate) const CHARACTERS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("characters");
pub(crate) const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Current on-disk layout version
pub const SCHEMA_VERSION: u64 = 1;
const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Durable on-device character collection
#[derive(Clone)]
pub struct LocalStore {
    path: PathBuf,
    db: Arc<RwLock<Option<Database>>>,
}

impl LocalStore {
    /// Create a handle for the database at `path`. Nothing is opened until
    /// [`initialize`](Self::initialize).
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            db: Arc::new(RwLock::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.db.read().is_some()
    }

    /// Open (or create) the database and verify it can be read.
    ///
    /// Any schema mismatch or undecodable record is reported as
    /// `StoreError::StorageOpen`; nothing is rewritten or dropped, so the
    /// caller can decide whether to [`reset`](Self::reset).
    pub fn initialize(&self) -> StoreResult<()> {
        let mut guard = self.db.write();
        if guard.is_some() {
            return Ok(());
        }

        let db = Self::open_database(&self.path)?;
        Self::verify_records(&db)?;

        info!(path = ?self.path, "Local store opened");
        *guard = Some(db);
        Ok(())
    }

    fn open_database(path: &Path) -> StoreResult<Database> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::open)?;
        }

        let db = Database::create(path).map_err(StoreError::open)?;

        let write_txn = db.begin_write().map_err(StoreError::open)?;
        {
            let mut meta = write_txn.open_table(META_TABLE).map_err(StoreError::open)?;
            let stored = meta
                .get(SCHEMA_VERSION_KEY)
                .map_err(StoreError::open)?
                .map(|v| v.value());
            match stored {
                None => {
                    meta.insert(SCHEMA_VERSION_KEY, SCHEMA_VERSION)
                        .map_err(StoreError::open)?;
                }
                Some(version) if version == SCHEMA_VERSION => {}
                Some(version) => {
                    return Err(StoreError::StorageOpen(format!(
                        "schema version {} is not supported (expected {})",
                        version, SCHEMA_VERSION
                    )));
                }
            }

            let _ = write_txn.open_table(CHARACTERS_TABLE).map_err(StoreError::open)?;
            let _ = write_txn.open_table(PENDING_TABLE).map_err(StoreError::open)?;
            let _ = write_txn.open_table(IMAGES_TABLE).map_err(StoreError::open)?;
        }
        write_txn.commit().map_err(StoreError::open)?;

        Ok(db)
    }

    fn verify_records(db: &Database) -> StoreResult<()> {
        let read_txn = db.begin_read().map_err(StoreError::open)?;
        let table = read_txn.open_table(CHARACTERS_TABLE).map_err(StoreError::open)?;
        for entry in table.iter().map_err(StoreError::open)? {
            let (key, value) = entry.map_err(StoreError::open)?;
            if let Err(e) = decode(value.value()) {
                return Err(StoreError::StorageOpen(format!(
                    "character '{}' is unreadable: {}",
                    key.value(),
                    e
                )));
            }
        }
        Ok(())
    }

    /// Destroy the database file and start over with an empty store.
    pub fn reset(&self) -> StoreResult<()> {
        let mut guard = self.db.write();
        // Dropping the handle releases the file lock
        guard.take();

        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        warn!(path = ?self.path, "Local store reset, all local characters removed");

        *guard = Some(Self::open_database(&self.path)?);
        Ok(())
    }

    pub(crate) fn read<T>(
        &self,
        f: impl FnOnce(&ReadTransaction) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StoreError::NotInitialized)?;
        let read_txn = db.begin_read()?;
        f(&read_txn)
    }

    /// Run `f` in a write transaction; database failures surface as `Write`.
    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&WriteTransaction) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StoreError::NotInitialized)?;
        let run = || -> StoreResult<T> {
            let write_txn = db.begin_write()?;
            let out = f(&write_txn)?;
            write_txn.commit()?;
            Ok(out)
        };
        run().map_err(StoreError::into_write)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Character Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Load every stored character, in id order.
    pub fn get_all(&self) -> StoreResult<Vec<StoredCharacter>> {
        self.read(|txn| {
            let table = txn.open_table(CHARACTERS_TABLE)?;
            let mut characters = Vec::new();
            for entry in table.iter()? {
                let (_, value) = entry?;
                characters.push(decode(value.value())?);
            }
            Ok(characters)
        })
    }

    /// Load a single character.
    ///
    /// Returns `None` if no character with the given id exists.
    pub fn get(&self, id: &str) -> StoreResult<Option<StoredCharacter>> {
        self.read(|txn| {
            let table = txn.open_table(CHARACTERS_TABLE)?;
            let found = table.get(id)?;
            match found {
                Some(v) => Ok(Some(decode(v.value())?)),
                None => Ok(None),
            }
        })
    }

    /// Insert or overwrite a character.
    pub fn put(&self, record: &StoredCharacter) -> StoreResult<()> {
        let data = serde_json::to_vec(record)?;
        self.write(|txn| {
            let mut table = txn.open_table(CHARACTERS_TABLE)?;
            table.insert(record.id.as_str(), data.as_slice())?;
            Ok(())
        })?;
        debug!(id = %record.id, "Character written locally");
        Ok(())
    }

    /// Delete a character together with its image and any pending mark.
    ///
    /// Returns whether the character existed.
    pub fn delete(&self, id: &str) -> StoreResult<bool> {
        self.write(|txn| {
            let existed = txn.open_table(CHARACTERS_TABLE)?.remove(id)?.is_some();
            txn.open_table(IMAGES_TABLE)?.remove(id)?;
            txn.open_table(PENDING_TABLE)?.remove(id)?;
            Ok(existed)
        })
    }

    /// Physically remove every non-example character whose id is not in
    /// `keep`. Characters with a pending operation are left alone. Returns
    /// how many were removed.
    pub fn cleanup(&self, keep: &HashSet<String>) -> StoreResult<usize> {
        let removed = self.write(|txn| {
            let mut characters = txn.open_table(CHARACTERS_TABLE)?;
            let mut images = txn.open_table(IMAGES_TABLE)?;
            let pending = txn.open_table(PENDING_TABLE)?;

            let mut doomed = Vec::new();
            for entry in characters.iter()? {
                let (key, value) = entry?;
                let record = decode(value.value())?;
                if record.is_example || keep.contains(key.value()) {
                    continue;
                }
                if pending.get(key.value())?.is_some() {
                    continue;
                }
                doomed.push(key.value().to_string());
            }

            for id in &doomed {
                characters.remove(id.as_str())?;
                images.remove(id.as_str())?;
            }
            Ok(doomed.len())
        })?;

        if removed > 0 {
            info!(removed, "Removed suppressed local duplicates");
        }
        Ok(removed)
    }
}

pub(crate) fn decode(bytes: &[u8]) -> StoreResult<StoredCharacter> {
    Ok(serde_json::from_slice(bytes)?)
}
