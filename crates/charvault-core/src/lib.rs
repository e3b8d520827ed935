//! Charvault Core Library
//!
//! Local-first character library with cloud reconciliation.
//!
//! ## Overview
//!
//! Characters are written to an on-device redb database first and pushed
//! to a remote store when the user is signed in. Both collections are
//! merged into one deduplicated view, so a character that exists locally
//! and in the cloud is shown once.
//!
//! ## Core Principles
//!
//! - **Local-first**: every operation works offline; pushes catch up later
//! - **Best-effort remote**: network failures degrade to local-only, never
//!   to errors
//! - **Deterministic merge**: the same inputs always yield the same view
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use charvault_core::{AuthHandle, CharacterMeta, CharacterPayload, HybridStore, MemoryRemote, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = HybridStore::open(
//!         StoreConfig::new("~/.charvault/data"),
//!         Arc::new(MemoryRemote::new()),
//!         AuthHandle::new(false),
//!     );
//!     store.initialize().await?;
//!
//!     store
//!         .save_character(CharacterPayload::new("Thal"), CharacterMeta::default())
//!         .await?;
//!
//!     for character in store.get_characters() {
//!         println!("{} ({})", character.name(), character.source);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod dedup;
pub mod error;
pub mod events;
pub mod health;
pub mod logging;
pub mod remote;
pub mod retry;
pub mod status;
pub mod storage;
pub mod types;

// Re-exports
pub use config::StoreConfig;
pub use coordinator::HybridStore;
pub use dedup::{dedupe, merge_collections, normalize_name, DedupPolicy};
pub use error::{StoreError, StoreResult};
pub use events::{EventBus, StoreEvent};
pub use health::{HealthIssue, HealthReport};
pub use remote::{AuthHandle, HttpRemote, MemoryRemote, RemoteStore};
pub use retry::RetryPolicy;
pub use status::{StoreState, SyncStatus, SyncStatusTracker};
pub use storage::{LocalStore, PendingEntry, PendingOp};
pub use types::*;
