//! Image Storage - character images kept apart from the character record
//!
//! Images are large compared to the rest of a character, so they live in
//! their own table keyed by character id. The record only carries a
//! `CharacterImage` reference (content type and length).

use redb::{ReadableTable, TableDefinition};

use super::LocalStore;
use crate::error::StoreResult;

/// Table for image bytes (key: character id, value: raw bytes)
pub(crate) const IMAGES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("images");

impl LocalStore {
    /// Store the image for a character, replacing any previous one.
    pub fn put_image(&self, id: &str, data: &[u8]) -> StoreResult<()> {
        self.write(|txn| {
            let mut table = txn.open_table(IMAGES_TABLE)?;
            table.insert(id, data)?;
            Ok(())
        })
    }

    /// Load the image for a character.
    ///
    /// Returns `None` if no image is stored.
    pub fn get_image(&self, id: &str) -> StoreResult<Option<Vec<u8>>> {
        self.read(|txn| {
            let table = txn.open_table(IMAGES_TABLE)?;
            let found = table.get(id)?;
            Ok(found.map(|v| v.value().to_vec()))
        })
    }

    /// Delete the image for a character. Returns whether one existed.
    pub fn delete_image(&self, id: &str) -> StoreResult<bool> {
        self.write(|txn| {
            let mut table = txn.open_table(IMAGES_TABLE)?;
            let existed = table.remove(id)?.is_some();
            Ok(existed)
        })
    }
}
