//! Remote (authoritative) character store
//!
//! The remote store is advisory: every call may fail independently and a
//! failure never touches local state. The coordinator only calls it while
//! the user is authenticated, and wraps each call in a timeout.
//!
//! Two implementations ship with the crate:
//! - [`MemoryRemote`]: process-local collection with failure injection
//! - [`HttpRemote`]: REST client for a per-user character collection

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{StoreError, StoreResult};
use crate::types::StoredCharacter;

mod http;
mod memory;

pub use http::HttpRemote;
pub use memory::MemoryRemote;

/// Network client for the authoritative per-user collection
pub trait RemoteStore: Send + Sync + 'static {
    /// Fetch the whole collection.
    fn fetch_all(&self) -> impl Future<Output = StoreResult<Vec<StoredCharacter>>> + Send;

    /// Create or replace a character; returns the record as stored remotely.
    fn upsert(
        &self,
        record: &StoredCharacter,
    ) -> impl Future<Output = StoreResult<StoredCharacter>> + Send;

    /// Delete a character. Returns whether it existed remotely.
    fn delete(&self, id: &str) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Upload the image belonging to a character.
    fn put_image(&self, id: &str, data: &[u8]) -> impl Future<Output = StoreResult<()>> + Send;

    /// Download the image belonging to a character, if the remote has it.
    fn fetch_image(&self, id: &str) -> impl Future<Output = StoreResult<Option<Vec<u8>>>> + Send;
}

/// No remote configured: behaves as permanently offline.
impl<R: RemoteStore> RemoteStore for Option<R> {
    async fn fetch_all(&self) -> StoreResult<Vec<StoredCharacter>> {
        match self {
            Some(remote) => remote.fetch_all().await,
            None => Err(not_configured()),
        }
    }

    async fn upsert(&self, record: &StoredCharacter) -> StoreResult<StoredCharacter> {
        match self {
            Some(remote) => remote.upsert(record).await,
            None => Err(not_configured()),
        }
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        match self {
            Some(remote) => remote.delete(id).await,
            None => Err(not_configured()),
        }
    }

    async fn put_image(&self, id: &str, data: &[u8]) -> StoreResult<()> {
        match self {
            Some(remote) => remote.put_image(id, data).await,
            None => Err(not_configured()),
        }
    }

    async fn fetch_image(&self, id: &str) -> StoreResult<Option<Vec<u8>>> {
        match self {
            Some(remote) => remote.fetch_image(id).await,
            None => Err(not_configured()),
        }
    }
}

fn not_configured() -> StoreError {
    StoreError::Network("no remote store configured".to_string())
}

/// Authentication flag owned by the auth collaborator.
///
/// Cloning shares the flag; the coordinator reads it before every remote
/// call.
#[derive(Debug, Clone, Default)]
pub struct AuthHandle {
    authenticated: Arc<AtomicBool>,
}

impl AuthHandle {
    pub fn new(authenticated: bool) -> Self {
        Self {
            authenticated: Arc::new(AtomicBool::new(authenticated)),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }
}
