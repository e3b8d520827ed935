//! Core types for the character store

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{StoreError, StoreResult};

/// Generate a fresh character id.
///
/// ULIDs sort by creation time, so the local table iterates oldest first.
pub fn new_character_id() -> String {
    Ulid::new().to_string()
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Provenance of a stored character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Written by this device
    Local,
    /// Returned by the authoritative remote store
    Cloud,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Local => write!(f, "local"),
            Source::Cloud => write!(f, "cloud"),
        }
    }
}

/// Reference to an image stored separately from its character.
///
/// The bytes live under the character's id in the image table (locally)
/// or behind the image endpoint (remotely).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterImage {
    /// MIME type, e.g. `image/png`
    pub content_type: String,
    /// Size in bytes
    pub len: u64,
}

/// The generated character document.
///
/// Only `name` (and the image reference) is interpreted by the store.
/// Every other field is carried through verbatim in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterPayload {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<CharacterImage>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl CharacterPayload {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: None,
            fields: serde_json::Map::new(),
        }
    }

    /// Builder-style helper for attaching an opaque field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// A character as persisted by either store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCharacter {
    pub id: String,
    pub payload: CharacterPayload,
    pub source: Source,
    /// Milliseconds since the Unix epoch, set by the store that last wrote it
    pub updated_at: i64,
    /// Seed content: read-only, never synced, never deduplicated
    #[serde(default)]
    pub is_example: bool,
}

impl StoredCharacter {
    pub fn name(&self) -> &str {
        &self.payload.name
    }

    pub fn is_cloud(&self) -> bool {
        self.source == Source::Cloud
    }
}

/// Raw image attached to a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Caller-supplied metadata for `save_character`.
#[derive(Debug, Clone, Default)]
pub struct CharacterMeta {
    /// Existing id to overwrite (edit/regenerate); `None` creates a new character
    pub id: Option<String>,
    pub is_example: bool,
    pub image: Option<ImageData>,
}

impl CharacterMeta {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn example() -> Self {
        Self {
            is_example: true,
            ..Default::default()
        }
    }
}

/// Check the identity fields of a save request.
pub(crate) fn validate_save(payload: &CharacterPayload, meta: &CharacterMeta) -> StoreResult<()> {
    if payload.name.trim().is_empty() {
        return Err(StoreError::Validation("character name is required".to_string()));
    }
    if let Some(id) = &meta.id {
        if id.trim().is_empty() {
            return Err(StoreError::Validation("character id must not be blank".to_string()));
        }
        if id.contains('/') {
            return Err(StoreError::Validation(format!(
                "character id '{}' contains '/'",
                id
            )));
        }
    }
    if let Some(image) = &meta.image {
        if image.bytes.is_empty() {
            return Err(StoreError::Validation("image data is empty".to_string()));
        }
    }
    Ok(())
}

/// A character resolved together with its separately stored image.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedCharacter {
    pub character: StoredCharacter,
    /// `None` when there is no image or it could not be fetched in time
    pub image: Option<Vec<u8>>,
}

/// Outcome counters of a sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} synced, {} failed, {} skipped",
            self.success, self.failed, self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_id_is_unique() {
        let a = new_character_id();
        let b = new_character_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 26);
    }

    #[test]
    fn test_payload_keeps_unknown_fields() {
        let json = r#"{"name":"Thal","class":"ranger","traits":["calm","wry"]}"#;
        let payload: CharacterPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.name, "Thal");
        assert_eq!(payload.fields["class"], "ranger");

        let back: serde_json::Value = serde_json::to_value(&payload).unwrap();
        let original: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_stored_character_wire_format() {
        let record = StoredCharacter {
            id: "a".to_string(),
            payload: CharacterPayload::new("Thal"),
            source: Source::Cloud,
            updated_at: 5,
            is_example: false,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["source"], "cloud");
        assert_eq!(json["updatedAt"], 5);
        assert_eq!(json["isExample"], false);
    }

    #[test]
    fn test_validate_rejects_blank_name() {
        let err = validate_save(&CharacterPayload::new("   "), &CharacterMeta::default());
        assert!(matches!(err, Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_blank_id() {
        let err = validate_save(&CharacterPayload::new("Thal"), &CharacterMeta::with_id(""));
        assert!(matches!(err, Err(StoreError::Validation(_))));

        let err = validate_save(&CharacterPayload::new("Thal"), &CharacterMeta::with_id("a/b"));
        assert!(matches!(err, Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_sync_report_display() {
        let report = SyncReport {
            success: 2,
            failed: 1,
            skipped: 0,
        };
        assert_eq!(report.to_string(), "2 synced, 1 failed, 0 skipped");
    }
}
