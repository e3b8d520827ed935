//! In-process remote store
//!
//! Keeps the authoritative collection in memory. Used for tests, demos
//! and offline development; failure injection simulates an unreliable
//! network (offline mode, failing ids, failing the next N calls, latency,
//! images that become visible late).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::RemoteStore;
use crate::error::{StoreError, StoreResult};
use crate::types::{now_millis, Source, StoredCharacter};

/// Per-operation call counters
#[derive(Debug, Default)]
struct CallCounts {
    fetch_all: AtomicUsize,
    upsert: AtomicUsize,
    delete: AtomicUsize,
    put_image: AtomicUsize,
    fetch_image: AtomicUsize,
}

/// In-memory [`RemoteStore`]
#[derive(Debug, Default)]
pub struct MemoryRemote {
    /// Characters in insertion order
    records: Mutex<Vec<StoredCharacter>>,
    images: Mutex<HashMap<String, Vec<u8>>>,
    offline: AtomicBool,
    fail_next: AtomicUsize,
    failing_ids: Mutex<HashSet<String>>,
    /// id -> number of image fetches that still report "not found"
    hidden_images: Mutex<HashMap<String, usize>>,
    latency: Mutex<Option<Duration>>,
    calls: CallCounts,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record exactly as given, bypassing stamping and failures.
    pub fn insert(&self, record: StoredCharacter) {
        let mut records = self.records.lock();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    /// Seed an image, bypassing failures.
    pub fn insert_image(&self, id: &str, data: Vec<u8>) {
        self.images.lock().insert(id.to_string(), data);
    }

    /// Current remote contents, in insertion order.
    pub fn records(&self) -> Vec<StoredCharacter> {
        self.records.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<StoredCharacter> {
        self.records.lock().iter().find(|r| r.id == id).cloned()
    }

    pub fn has_image(&self, id: &str) -> bool {
        self.images.lock().contains_key(id)
    }

    /// Fail every call until switched back online.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `n` calls of any kind.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail every call that targets `id`.
    pub fn fail_id(&self, id: &str) {
        self.failing_ids.lock().insert(id.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_next.store(0, Ordering::SeqCst);
        self.failing_ids.lock().clear();
        self.offline.store(false, Ordering::SeqCst);
    }

    /// Report the image of `id` as missing for the next `fetches` lookups.
    pub fn hide_image_for(&self, id: &str, fetches: usize) {
        self.hidden_images.lock().insert(id.to_string(), fetches);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn fetch_all_calls(&self) -> usize {
        self.calls.fetch_all.load(Ordering::SeqCst)
    }

    pub fn upsert_calls(&self) -> usize {
        self.calls.upsert.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.calls.delete.load(Ordering::SeqCst)
    }

    pub fn fetch_image_calls(&self) -> usize {
        self.calls.fetch_image.load(Ordering::SeqCst)
    }

    pub fn put_image_calls(&self) -> usize {
        self.calls.put_image.load(Ordering::SeqCst)
    }

    /// Apply latency and injected failures for a call touching `id`.
    async fn gate(&self, operation: &str, id: Option<&str>) -> StoreResult<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Network(format!("{}: remote is offline", operation)));
        }

        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(StoreError::Network(format!("{}: injected failure", operation)));
        }

        if let Some(id) = id {
            if self.failing_ids.lock().contains(id) {
                return Err(StoreError::Network(format!(
                    "{}: injected failure for '{}'",
                    operation, id
                )));
            }
        }
        Ok(())
    }
}

impl RemoteStore for MemoryRemote {
    async fn fetch_all(&self) -> StoreResult<Vec<StoredCharacter>> {
        self.calls.fetch_all.fetch_add(1, Ordering::SeqCst);
        self.gate("fetch_all", None).await?;
        Ok(self.records())
    }

    async fn upsert(&self, record: &StoredCharacter) -> StoreResult<StoredCharacter> {
        self.calls.upsert.fetch_add(1, Ordering::SeqCst);
        self.gate("upsert", Some(&record.id)).await?;

        let mut stored = record.clone();
        stored.source = Source::Cloud;
        stored.updated_at = record.updated_at.max(now_millis());
        self.insert(stored.clone());
        debug!(id = %stored.id, "Remote upsert");
        Ok(stored)
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        self.gate("delete", Some(id)).await?;

        self.images.lock().remove(id);
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() != before)
    }

    async fn put_image(&self, id: &str, data: &[u8]) -> StoreResult<()> {
        self.calls.put_image.fetch_add(1, Ordering::SeqCst);
        self.gate("put_image", Some(id)).await?;
        self.insert_image(id, data.to_vec());
        Ok(())
    }

    async fn fetch_image(&self, id: &str) -> StoreResult<Option<Vec<u8>>> {
        self.calls.fetch_image.fetch_add(1, Ordering::SeqCst);
        self.gate("fetch_image", Some(id)).await?;

        {
            let mut hidden = self.hidden_images.lock();
            if let Some(remaining) = hidden.get_mut(id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Ok(None);
                }
            }
        }
        Ok(self.images.lock().get(id).cloned())
    }
}
