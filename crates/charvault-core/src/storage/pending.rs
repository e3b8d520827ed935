//! Pending Operations - local writes not yet confirmed by the remote store
//!
//! Every local save of a syncable character leaves an `Upsert` mark and
//! every delete leaves a `Delete` tombstone. Marks are cleared once the
//! remote store acknowledges them, so an interrupted process still knows
//! what to push on the next sync. Marks are ordered by a monotonically
//! increasing sequence number kept in the meta table.

use redb::{ReadableTable, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};

use super::{LocalStore, CHARACTERS_TABLE, IMAGES_TABLE, META_TABLE};
use crate::error::StoreResult;
use crate::types::{now_millis, StoredCharacter};

/// Table for pending marks (key: character id, value: JSON `PendingMark`)
pub(crate) const PENDING_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("pending");

const PENDING_SEQ_KEY: &str = "pending_seq";

/// What still has to reach the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingOp {
    Upsert,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingMark {
    op: PendingOp,
    seq: u64,
    marked_at: i64,
}

/// A pending operation as listed by [`LocalStore::pending`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: String,
    pub op: PendingOp,
    pub seq: u64,
    pub marked_at: i64,
}

fn write_mark(txn: &WriteTransaction, id: &str, op: PendingOp) -> StoreResult<u64> {
    let seq = {
        let mut meta = txn.open_table(META_TABLE)?;
        let next = meta.get(PENDING_SEQ_KEY)?.map(|v| v.value()).unwrap_or(0) + 1;
        meta.insert(PENDING_SEQ_KEY, next)?;
        next
    };

    let mark = PendingMark {
        op,
        seq,
        marked_at: now_millis(),
    };
    let data = serde_json::to_vec(&mark)?;
    let mut pending = txn.open_table(PENDING_TABLE)?;
    pending.insert(id, data.as_slice())?;
    Ok(seq)
}

impl LocalStore {
    /// Write a character, its optional image and an `Upsert` mark atomically.
    ///
    /// The image is written in the same transaction as the record, so a
    /// reader never sees a character whose image reference dangles locally.
    pub fn put_pending(&self, record: &StoredCharacter, image: Option<&[u8]>) -> StoreResult<u64> {
        let data = serde_json::to_vec(record)?;
        self.write(|txn| {
            {
                let mut characters = txn.open_table(CHARACTERS_TABLE)?;
                characters.insert(record.id.as_str(), data.as_slice())?;
            }
            if let Some(bytes) = image {
                let mut images = txn.open_table(IMAGES_TABLE)?;
                images.insert(record.id.as_str(), bytes)?;
            }
            write_mark(txn, &record.id, PendingOp::Upsert)
        })
    }

    /// Delete a character and leave a tombstone for the next sync.
    ///
    /// The tombstone is written even if the character was not stored
    /// locally (it may exist only remotely). Returns whether a local
    /// character was removed.
    pub fn delete_with_tombstone(&self, id: &str) -> StoreResult<bool> {
        self.write(|txn| {
            let existed = txn.open_table(CHARACTERS_TABLE)?.remove(id)?.is_some();
            txn.open_table(IMAGES_TABLE)?.remove(id)?;
            write_mark(txn, id, PendingOp::Delete)?;
            Ok(existed)
        })
    }

    /// Clear the mark for `id`, but only if it is still the mark with `seq`.
    ///
    /// A newer mark (the character was edited again while a push was in
    /// flight) is left in place. Returns whether a mark was removed.
    pub fn clear_pending(&self, id: &str, seq: u64) -> StoreResult<bool> {
        self.write(|txn| {
            let mut pending = txn.open_table(PENDING_TABLE)?;
            let current = match pending.get(id)? {
                Some(v) => Some(serde_json::from_slice::<PendingMark>(v.value())?),
                None => None,
            };
            match current {
                Some(mark) if mark.seq == seq => {
                    pending.remove(id)?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    /// The pending mark for a single id, if any.
    pub fn pending_for(&self, id: &str) -> StoreResult<Option<PendingEntry>> {
        self.read(|txn| {
            let table = txn.open_table(PENDING_TABLE)?;
            let found = table.get(id)?;
            match found {
                Some(v) => {
                    let mark: PendingMark = serde_json::from_slice(v.value())?;
                    Ok(Some(PendingEntry {
                        id: id.to_string(),
                        op: mark.op,
                        seq: mark.seq,
                        marked_at: mark.marked_at,
                    }))
                }
                None => Ok(None),
            }
        })
    }

    /// All pending operations, oldest mark first.
    pub fn pending(&self) -> StoreResult<Vec<PendingEntry>> {
        let mut entries = self.read(|txn| {
            let table = txn.open_table(PENDING_TABLE)?;
            let mut entries = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                let mark: PendingMark = serde_json::from_slice(value.value())?;
                entries.push(PendingEntry {
                    id: key.value().to_string(),
                    op: mark.op,
                    seq: mark.seq,
                    marked_at: mark.marked_at,
                });
            }
            Ok(entries)
        })?;
        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }
}
