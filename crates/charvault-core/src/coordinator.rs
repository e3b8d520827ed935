//! HybridStore - the entry point for the character library
//!
//! HybridStore coordinates LocalStore, a RemoteStore and the merge rules:
//! - Every write lands in the local store first and is marked pending
//! - The remote store is contacted opportunistically (authenticated only,
//!   bounded by a timeout) and its failures degrade to local-only
//! - The merged, deduplicated view is cached and served without I/O
//! - Changes are announced on a broadcast channel
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use charvault_core::{AuthHandle, CharacterMeta, CharacterPayload, HybridStore, MemoryRemote, StoreConfig};
//!
//! let store = HybridStore::open(
//!     StoreConfig::new("~/.charvault/data"),
//!     Arc::new(MemoryRemote::new()),
//!     AuthHandle::new(true),
//! );
//! store.initialize().await?;
//!
//! let saved = store
//!     .save_character(CharacterPayload::new("Thal"), CharacterMeta::default())
//!     .await?;
//! let report = store.sync_to_cloud().await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, Mutex as AsyncMutex, RwLock as AsyncRwLock};
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::dedup::{dedupe, merge_collections, same_identity, DedupPolicy};
use crate::error::{StoreError, StoreResult};
use crate::events::{EventBus, StoreEvent};
use crate::health::{self, HealthReport};
use crate::remote::{AuthHandle, RemoteStore};
use crate::retry::retry_until_some;
use crate::status::{StoreState, SyncStatus, SyncStatusTracker};
use crate::storage::{LocalStore, PendingEntry, PendingOp};
use crate::types::{
    new_character_id, now_millis, validate_save, CharacterImage, CharacterMeta, CharacterPayload,
    LoadedCharacter, Source, StoredCharacter, SyncReport,
};

/// Local-first character library with remote reconciliation
pub struct HybridStore<R: RemoteStore> {
    config: StoreConfig,
    local: LocalStore,
    remote: Arc<R>,
    auth: AuthHandle,
    /// Merged, deduplicated view served to callers
    view: RwLock<Vec<StoredCharacter>>,
    state: RwLock<StoreState>,
    status: SyncStatusTracker,
    events: EventBus,
    /// Serializes saves and deletes per character id
    id_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    /// Held for the duration of a sync pass
    sync_lock: AsyncMutex<()>,
    /// Shared by saves, deletes and sync pushes; taken exclusively while
    /// the view is rebuilt from storage or storage is repaired
    write_gate: AsyncRwLock<()>,
}

impl<R: RemoteStore> HybridStore<R> {
    /// Construct a store. Nothing is opened until [`initialize`](Self::initialize).
    pub fn open(config: StoreConfig, remote: Arc<R>, auth: AuthHandle) -> Self {
        let local = LocalStore::new(config.db_path());
        let events = EventBus::new(config.event_capacity);
        Self {
            config,
            local,
            remote,
            auth,
            view: RwLock::new(Vec::new()),
            state: RwLock::new(StoreState::Uninitialized),
            status: SyncStatusTracker::new(),
            events,
            id_locks: Mutex::new(HashMap::new()),
            sync_lock: AsyncMutex::new(()),
            write_gate: AsyncRwLock::new(()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    pub fn state(&self) -> StoreState {
        self.state.read().clone()
    }

    /// Current sync status.
    pub fn status(&self) -> SyncStatus {
        self.status.set_authenticated(self.auth.is_authenticated());
        self.status.snapshot()
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Open the local store and build the merged view.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::StorageOpen` if the local database is unusable;
    /// the store is left in `StoreState::Error` and
    /// [`reset_local`](Self::reset_local) is the recovery path. Remote
    /// failures are logged and never returned.
    pub async fn initialize(&self) -> StoreResult<()> {
        self.set_state(StoreState::Initializing);
        info!(path = ?self.local.path(), "Initializing character store");

        if let Err(e) = self.local.initialize() {
            error!(error = %e, "Local store could not be opened");
            self.set_state(StoreState::Error(e.to_string()));
            return Err(e);
        }

        if let Err(e) = self.rebuild_view().await {
            error!(error = %e, "Failed to build the character view");
            self.set_state(StoreState::Error(e.to_string()));
            return Err(e);
        }

        self.set_state(StoreState::Ready);
        info!(characters = self.view.read().len(), "Character store ready");
        Ok(())
    }

    /// Re-read the local store (and the remote store when authenticated)
    /// and rebuild the view. Nothing is pushed.
    pub async fn refresh(&self) -> StoreResult<()> {
        self.ensure_ready()?;
        self.rebuild_view().await
    }

    /// Destroy the local database and return to `Uninitialized`.
    ///
    /// Pending operations that never reached the remote store are lost.
    pub fn reset_local(&self) -> StoreResult<()> {
        self.local.reset()?;
        self.view.write().clear();
        self.status.finish_sync(false, false, 0);
        self.set_state(StoreState::Uninitialized);
        warn!("Local character store reset");
        Ok(())
    }

    async fn rebuild_view(&self) -> StoreResult<()> {
        let authenticated = self.auth.is_authenticated();
        self.status.set_authenticated(authenticated);

        // Fetched before taking the write gate
        let fetch_started = now_millis();
        let mut remote = Vec::new();
        let mut reached_remote = false;
        if authenticated {
            match self.remote_call(self.remote.fetch_all()).await {
                Ok(records) => {
                    reached_remote = true;
                    remote = records;
                }
                Err(e) => {
                    warn!(error = %e, "Remote fetch failed, continuing local-only");
                    self.status.record_remote_failure();
                }
            }
        }
        remote.retain(|r| !r.is_example);
        for record in &mut remote {
            record.source = Source::Cloud;
        }

        let _gate = self.write_gate.write().await;
        let mut local = self.local.get_all()?;
        let pending = self.local.pending()?;
        let pending_ids: HashSet<&str> = pending.iter().map(|p| p.id.as_str()).collect();
        let tombstoned: HashSet<&str> = pending
            .iter()
            .filter(|p| p.op == PendingOp::Delete)
            .map(|p| p.id.as_str())
            .collect();
        remote.retain(|r| !tombstoned.contains(r.id.as_str()));

        if reached_remote {
            let remote_ids: HashSet<&str> = remote.iter().map(|r| r.id.as_str()).collect();
            let mut stale = Vec::new();
            local.retain(|r| {
                // Settled after the fetch started: the fetch could not see it
                let gone = r.is_cloud()
                    && !r.is_example
                    && r.updated_at < fetch_started
                    && !pending_ids.contains(r.id.as_str())
                    && !remote_ids.contains(r.id.as_str());
                if gone {
                    stale.push(r.id.clone());
                }
                !gone
            });
            for id in stale {
                // Deleted remotely since it was cached
                if let Err(e) = self.local.delete(&id) {
                    warn!(id = %id, error = %e, "Failed to drop stale cached character");
                }
            }
        }

        let merged = merge_collections(&[local.as_slice(), remote.as_slice()], &self.config.dedup_policy);

        if reached_remote {
            self.cache_remote_winners(&local, &merged, &pending_ids);
        }

        let report = health::check(&merged);
        if !report.is_healthy {
            warn!(issues = report.issues.len(), "Character library has health issues");
        }

        debug!(
            local = local.len(),
            remote = remote.len(),
            merged = merged.len(),
            "Merged character view"
        );
        *self.view.write() = merged;

        self.status
            .finish_sync(reached_remote, report.has_conflicts(), pending.len());
        self.publish_status();
        Ok(())
    }

    /// Keep a local copy of every cloud record that won the merge, so the
    /// library stays available offline. A pending local edit is never
    /// overwritten; the next sync pushes it.
    fn cache_remote_winners(
        &self,
        local: &[StoredCharacter],
        merged: &[StoredCharacter],
        pending_ids: &HashSet<&str>,
    ) {
        let by_id: HashMap<&str, &StoredCharacter> =
            local.iter().map(|r| (r.id.as_str(), r)).collect();
        for record in merged.iter().filter(|r| r.is_cloud()) {
            if pending_ids.contains(record.id.as_str()) {
                debug!(id = %record.id, "Keeping pending local edit over cloud copy");
                continue;
            }
            if by_id.get(record.id.as_str()) == Some(&record) {
                continue;
            }
            if let Err(e) = self.local.put(record) {
                warn!(id = %record.id, error = %e, "Failed to cache remote character");
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════════

    /// The cached merged view. No I/O.
    pub fn get_characters(&self) -> Vec<StoredCharacter> {
        self.view.read().clone()
    }

    /// A single character from the cached view.
    pub fn get_character(&self, id: &str) -> Option<StoredCharacter> {
        self.view.read().iter().find(|r| r.id == id).cloned()
    }

    /// Resolve a character together with its separately stored image.
    ///
    /// The image is looked up locally, then remotely when authenticated,
    /// with bounded retries. When every attempt comes up empty the
    /// character is returned without its image.
    pub async fn load_character_with_image(&self, id: &str) -> StoreResult<Option<LoadedCharacter>> {
        self.ensure_ready()?;
        let character = self.get_character(id);
        let Some(character) = character else {
            return Ok(None);
        };
        if character.payload.image.is_none() {
            return Ok(Some(LoadedCharacter {
                character,
                image: None,
            }));
        }

        let policy = self.config.image_retry_policy();
        let image = match retry_until_some(&policy, "load_image", |_| self.fetch_image_once(id)).await
        {
            Ok(Some(bytes)) => Some(bytes),
            Ok(None) => {
                warn!(id = %id, attempts = policy.attempts, "Image not available, returning metadata only");
                None
            }
            Err(e) => {
                warn!(id = %id, error = %e, "Image load failed, returning metadata only");
                None
            }
        };

        Ok(Some(LoadedCharacter { character, image }))
    }

    async fn fetch_image_once(&self, id: &str) -> StoreResult<Option<Vec<u8>>> {
        if let Some(bytes) = self.local.get_image(id)? {
            return Ok(Some(bytes));
        }
        if !self.auth.is_authenticated() {
            return Ok(None);
        }
        let fetched = self.remote_call(self.remote.fetch_image(id)).await?;
        if let Some(bytes) = &fetched {
            if let Err(e) = self.local.put_image(id, bytes) {
                warn!(id = %id, error = %e, "Failed to cache remote image");
            }
        }
        Ok(fetched)
    }

    /// Audit the cached view. Read-only.
    pub fn check_library_health_status(&self) -> HealthReport {
        health::check(&self.view.read())
    }

    /// Operations still waiting for the remote store, oldest first.
    pub fn pending(&self) -> StoreResult<Vec<PendingEntry>> {
        self.local.pending()
    }

    pub fn pending_ids(&self) -> StoreResult<Vec<String>> {
        Ok(self.local.pending()?.into_iter().map(|p| p.id).collect())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Writes
    // ═══════════════════════════════════════════════════════════════════════

    /// Create or update a character.
    ///
    /// The record is written locally (with a pending mark) before the
    /// remote store is tried. A remote failure leaves the record pending
    /// for the next [`sync_to_cloud`](Self::sync_to_cloud) and is not
    /// returned as an error.
    ///
    /// # Errors
    ///
    /// - `StoreError::Validation` for a blank name or id, an empty image, or
    ///   an attempt to overwrite an example character
    /// - `StoreError::Write` if the local write failed; the view is unchanged
    pub async fn save_character(
        &self,
        payload: CharacterPayload,
        meta: CharacterMeta,
    ) -> StoreResult<StoredCharacter> {
        validate_save(&payload, &meta)?;
        self.ensure_ready()?;

        let id = meta.id.clone().unwrap_or_else(new_character_id);
        let _gate = self.write_gate.read().await;
        let lock = self.id_lock(&id);
        let _guard = lock.lock().await;

        let previous = self.local.get(&id)?;
        if let Some(prev) = &previous {
            if prev.is_example && !meta.is_example {
                return Err(StoreError::Validation(format!(
                    "example character '{}' is read-only",
                    id
                )));
            }
        }

        let mut payload = payload;
        if let Some(image) = &meta.image {
            payload.image = Some(CharacterImage {
                content_type: image.content_type.clone(),
                len: image.bytes.len() as u64,
            });
        }

        let floor = previous.map(|p| p.updated_at + 1).unwrap_or(0);
        let record = StoredCharacter {
            id: id.clone(),
            payload,
            source: Source::Local,
            updated_at: now_millis().max(floor),
            is_example: meta.is_example,
        };
        let image = meta.image.as_ref().map(|i| i.bytes.as_slice());

        let stored = if record.is_example {
            // Examples never leave the device
            self.local.put(&record)?;
            if let Some(bytes) = image {
                self.local.put_image(&id, bytes)?;
            }
            record
        } else {
            let seq = self.local.put_pending(&record, image)?;
            debug!(id = %id, seq, "Character saved locally");
            self.try_push(record, seq).await
        };

        self.apply_to_view(stored.clone());
        self.refresh_pending_count();
        self.events.publish(StoreEvent::CharacterSaved { id });
        Ok(stored)
    }

    /// Push a freshly saved record. Returns the record the view should hold.
    async fn try_push(&self, record: StoredCharacter, seq: u64) -> StoredCharacter {
        if !self.auth.is_authenticated() {
            return record;
        }
        match self.push_upsert(&record).await {
            Ok(cloud) => {
                self.settle(&cloud, seq);
                cloud
            }
            Err(e) => {
                warn!(id = %record.id, error = %e, "Remote save failed, character stays pending");
                self.status.record_remote_failure();
                record
            }
        }
    }

    /// Upload a record and, if it references one, its local image.
    async fn push_upsert(&self, record: &StoredCharacter) -> StoreResult<StoredCharacter> {
        let mut stored = self.remote_call(self.remote.upsert(record)).await?;
        stored.source = Source::Cloud;
        if record.payload.image.is_some() {
            if let Some(bytes) = self.local.get_image(&record.id)? {
                self.remote_call(self.remote.put_image(&record.id, &bytes))
                    .await?;
            }
        }
        Ok(stored)
    }

    /// Record a remote acknowledgement locally: keep the cloud copy and
    /// clear the pending mark it answers.
    fn settle(&self, cloud: &StoredCharacter, seq: u64) {
        if let Err(e) = self.local.put(cloud) {
            warn!(id = %cloud.id, error = %e, "Failed to store acknowledged character");
            return;
        }
        if let Err(e) = self.local.clear_pending(&cloud.id, seq) {
            warn!(id = %cloud.id, error = %e, "Failed to clear pending mark");
        }
    }

    /// Delete a character.
    ///
    /// The local delete and its tombstone are written first; the remote
    /// delete is attempted afterwards and, if it fails, retried by the next
    /// sync. Returns whether a local character was removed.
    pub async fn delete_character(&self, id: &str) -> StoreResult<bool> {
        self.ensure_ready()?;

        let _gate = self.write_gate.read().await;
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;

        let is_example = match self.local.get(id)? {
            Some(existing) => existing.is_example,
            None => self.get_character(id).is_some_and(|c| c.is_example),
        };
        if is_example {
            return Err(StoreError::Validation(format!(
                "example character '{}' cannot be deleted",
                id
            )));
        }

        let removed = self.local.delete_with_tombstone(id)?;
        self.view.write().retain(|r| r.id != id);
        info!(id = %id, removed, "Character deleted locally");

        if self.auth.is_authenticated() {
            match self.remote_call(self.remote.delete(id)).await {
                Ok(_) => {
                    if let Some(mark) = self.local.pending_for(id)? {
                        self.local.clear_pending(id, mark.seq)?;
                    }
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "Remote delete failed, tombstone kept");
                    self.status.record_remote_failure();
                }
            }
        }

        self.refresh_pending_count();
        self.events.publish(StoreEvent::CharacterDeleted { id: id.to_string() });
        Ok(removed)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sync
    // ═══════════════════════════════════════════════════════════════════════

    /// Push every pending operation to the remote store.
    ///
    /// Each operation is counted on its own; a failure never aborts the
    /// pass. When not authenticated, every pending operation is `skipped`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::SyncInProgress` if another pass is running.
    /// Local storage failures abort the pass.
    pub async fn sync_to_cloud(&self) -> StoreResult<SyncReport> {
        self.ensure_ready()?;
        let _flight = self
            .sync_lock
            .try_lock()
            .map_err(|_| StoreError::SyncInProgress)?;

        self.set_state(StoreState::Syncing);
        self.status.begin_sync();
        self.publish_status();

        let outcome = self.run_sync().await;
        self.set_state(StoreState::Ready);

        let (report, completed) = match outcome {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Sync aborted");
                let pending = self.local.pending().map(|p| p.len()).unwrap_or(0);
                self.status.finish_sync(false, true, pending);
                self.publish_status();
                return Err(e);
            }
        };

        let health = {
            let mut view = self.view.write();
            let merged = dedupe(&view, &self.config.dedup_policy);
            *view = merged;
            health::check(&view)
        };
        let pending = self.local.pending()?.len();
        self.status
            .finish_sync(completed, report.failed > 0 || health.has_conflicts(), pending);

        info!(
            success = report.success,
            failed = report.failed,
            skipped = report.skipped,
            "Sync complete"
        );
        self.events.publish(report.into());
        self.publish_status();
        Ok(report)
    }

    /// Returns the report and whether the pass reached the remote store
    /// without failures.
    async fn run_sync(&self) -> StoreResult<(SyncReport, bool)> {
        let pending = self.local.pending()?;
        let mut report = SyncReport::default();

        let authenticated = self.auth.is_authenticated();
        self.status.set_authenticated(authenticated);
        if !authenticated {
            report.skipped = pending.len();
            info!(skipped = report.skipped, "Not authenticated, nothing pushed");
            return Ok((report, false));
        }

        for entry in pending {
            let _gate = self.write_gate.read().await;
            let lock = self.id_lock(&entry.id);
            let _guard = lock.lock().await;

            // A concurrent save or delete may have replaced or settled the mark
            let Some(mark) = self.local.pending_for(&entry.id)? else {
                report.skipped += 1;
                continue;
            };

            match mark.op {
                PendingOp::Upsert => {
                    let record = match self.local.get(&mark.id)? {
                        Some(record) if !record.is_example => record,
                        _ => {
                            debug!(id = %mark.id, "Nothing to push, dropping mark");
                            self.local.clear_pending(&mark.id, mark.seq)?;
                            report.skipped += 1;
                            continue;
                        }
                    };
                    match self.push_upsert(&record).await {
                        Ok(cloud) => {
                            self.settle(&cloud, mark.seq);
                            self.apply_to_view(cloud);
                            report.success += 1;
                        }
                        Err(e) => {
                            warn!(id = %mark.id, error = %e, "Failed to push character");
                            self.status.record_remote_failure();
                            report.failed += 1;
                        }
                    }
                }
                PendingOp::Delete => match self.remote_call(self.remote.delete(&mark.id)).await {
                    Ok(existed) => {
                        debug!(id = %mark.id, existed, "Tombstone pushed");
                        self.local.clear_pending(&mark.id, mark.seq)?;
                        report.success += 1;
                    }
                    Err(e) => {
                        warn!(id = %mark.id, error = %e, "Failed to push delete");
                        self.status.record_remote_failure();
                        report.failed += 1;
                    }
                },
            }
        }

        Ok((report, report.failed == 0))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Repair
    // ═══════════════════════════════════════════════════════════════════════

    /// Collapse duplicates with the aggressive policy, replace the view and
    /// physically remove suppressed local copies.
    ///
    /// Writes are held off for the duration, and characters with a pending
    /// operation are never removed from storage.
    ///
    /// Returns the number of records removed from the view.
    pub async fn emergency_fix_duplicates(&self) -> StoreResult<usize> {
        self.ensure_ready()?;
        let _gate = self.write_gate.write().await;

        let (removed, keep, health) = {
            let mut view = self.view.write();
            let fixed = dedupe(&view, &DedupPolicy::AGGRESSIVE);
            let removed = view.len() - fixed.len();
            *view = fixed;
            let keep: HashSet<String> = view.iter().map(|r| r.id.clone()).collect();
            (removed, keep, health::check(&view))
        };

        let purged = self.local.cleanup(&keep)?;
        self.status.set_conflicts(health.has_conflicts());
        info!(removed, purged, "Emergency duplicate repair complete");

        self.events.publish(StoreEvent::DuplicatesRepaired { removed });
        Ok(removed)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════════

    fn ensure_ready(&self) -> StoreResult<()> {
        if self.state.read().is_ready() {
            Ok(())
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    fn set_state(&self, state: StoreState) {
        debug!(%state, "Store state");
        *self.state.write() = state;
    }

    fn publish_status(&self) {
        self.events.publish(StoreEvent::StatusChanged(self.status.snapshot()));
    }

    fn refresh_pending_count(&self) {
        match self.local.pending() {
            Ok(pending) => self.status.set_pending(pending.len()),
            Err(e) => warn!(error = %e, "Failed to count pending operations"),
        }
    }

    /// Lock guarding mutations of `id`. Entries nobody holds are pruned.
    fn id_lock(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.id_locks.lock();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(id.to_string()).or_default().clone()
    }

    /// Run a remote call under the configured time budget.
    async fn remote_call<T>(&self, call: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        let budget = self.config.remote_timeout();
        match tokio::time::timeout(budget, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(budget.as_millis() as u64)),
        }
    }

    /// Replace the same-identity record in place (or append) and re-dedupe.
    fn apply_to_view(&self, record: StoredCharacter) {
        let policy = self.config.dedup_policy;
        let mut view = self.view.write();
        let mut next = Vec::with_capacity(view.len() + 1);
        let mut placed = false;
        for existing in view.drain(..) {
            if existing.id == record.id || same_identity(&existing, &record, &policy) {
                if !placed {
                    next.push(record.clone());
                    placed = true;
                }
            } else {
                next.push(existing);
            }
        }
        if !placed {
            next.push(record);
        }
        *view = dedupe(&next, &policy);
    }
}
