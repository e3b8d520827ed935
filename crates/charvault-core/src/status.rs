//! Coordinator lifecycle and sync status tracking
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  StoreState: coordinator lifecycle                              │
//! │  Uninitialized ──► Initializing ──► Ready ◄──► Syncing          │
//! │                         │                                       │
//! │                         └──► Error (local store unusable)       │
//! │                                                                 │
//! │  SyncStatus: what the UI shows                                  │
//! │  ├── is_authenticated                                           │
//! │  ├── is_syncing                                                 │
//! │  ├── last_sync_time                                             │
//! │  └── has_conflicts                                              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Lifecycle of a `HybridStore`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StoreState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    /// A sync pass is running; reads and writes are still served
    Syncing,
    /// The local store could not be opened
    Error(String),
}

impl StoreState {
    /// Whether the merged view can be served and mutated.
    pub fn is_ready(&self) -> bool {
        matches!(self, StoreState::Ready | StoreState::Syncing)
    }
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreState::Uninitialized => write!(f, "Uninitialized"),
            StoreState::Initializing => write!(f, "Initializing"),
            StoreState::Ready => write!(f, "Ready"),
            StoreState::Syncing => write!(f, "Syncing"),
            StoreState::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

/// Snapshot of sync state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_authenticated: bool,
    pub is_syncing: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Unresolved duplicates or operations the remote store did not accept
    pub has_conflicts: bool,
    /// Local operations waiting for the remote store
    pub pending_count: usize,
    /// Remote failures since the last successful sync
    pub remote_failures: u64,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.is_authenticated { "cloud" } else { "local-only" };
        write!(f, "{}", mode)?;
        if self.is_syncing {
            write!(f, ", syncing")?;
        }
        match self.last_sync_time {
            Some(t) => write!(f, ", last synced {}", t.format("%Y-%m-%d %H:%M:%S UTC"))?,
            None => write!(f, ", never synced")?,
        }
        if self.pending_count > 0 {
            write!(f, ", {} pending", self.pending_count)?;
        }
        if self.has_conflicts {
            write!(f, ", has conflicts")?;
        }
        Ok(())
    }
}

/// Shared holder for [`SyncStatus`], updated by the coordinator.
#[derive(Debug, Default)]
pub struct SyncStatusTracker {
    inner: RwLock<SyncStatus>,
}

impl SyncStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SyncStatus {
        self.inner.read().clone()
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.inner.write().is_authenticated = authenticated;
    }

    pub fn set_pending(&self, pending_count: usize) {
        self.inner.write().pending_count = pending_count;
    }

    pub fn begin_sync(&self) {
        self.inner.write().is_syncing = true;
    }

    /// Close a sync pass (or an initialization that reached the remote store).
    ///
    /// `reached_remote` stamps `last_sync_time` and resets the failure
    /// counter; otherwise the previous time is kept.
    pub fn finish_sync(&self, reached_remote: bool, has_conflicts: bool, pending_count: usize) {
        let mut status = self.inner.write();
        status.is_syncing = false;
        status.has_conflicts = has_conflicts;
        status.pending_count = pending_count;
        if reached_remote {
            status.last_sync_time = Some(Utc::now());
            status.remote_failures = 0;
        }
    }

    pub fn record_remote_failure(&self) {
        self.inner.write().remote_failures += 1;
    }

    pub fn set_conflicts(&self, has_conflicts: bool) {
        self.inner.write().has_conflicts = has_conflicts;
    }
}
