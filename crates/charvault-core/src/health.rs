//! Library health diagnostics
//!
//! A read-only audit of a character collection. Reports structural
//! problems; never changes anything. The coordinator runs it after every
//! merge. Records sharing an id are conflicts and the cue for the manual
//! repair path (`HybridStore::emergency_fix_duplicates`); characters that
//! only share a name are reported for review.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dedup::normalize_name;
use crate::types::StoredCharacter;

/// A single structural problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HealthIssue {
    /// More than one record carries this id
    DuplicateId { id: String, count: usize },
    /// Distinct ids share the same normalized name
    DuplicateName { name: String, ids: Vec<String> },
    /// A required field is empty or unset
    MissingField { id: String, field: String },
}

impl fmt::Display for HealthIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthIssue::DuplicateId { id, count } => {
                write!(f, "id '{}' appears {} times", id, count)
            }
            HealthIssue::DuplicateName { name, ids } => {
                write!(f, "name '{}' is shared by {}", name, ids.join(", "))
            }
            HealthIssue::MissingField { id, field } => {
                write!(f, "character '{}' is missing '{}'", id, field)
            }
        }
    }
}

/// Result of [`check`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub is_healthy: bool,
    pub issues: Vec<HealthIssue>,
    /// Number of records audited
    pub checked: usize,
}

impl HealthReport {
    pub fn has_duplicates(&self) -> bool {
        self.issues.iter().any(|i| {
            matches!(
                i,
                HealthIssue::DuplicateId { .. } | HealthIssue::DuplicateName { .. }
            )
        })
    }

    /// Issues the merge can resolve: records sharing an id. Characters that
    /// merely share a name are distinct and stay diagnostic only.
    pub fn has_conflicts(&self) -> bool {
        self.issues
            .iter()
            .any(|i| matches!(i, HealthIssue::DuplicateId { .. }))
    }

    pub fn duplicate_ids(&self) -> Vec<&str> {
        self.issues
            .iter()
            .filter_map(|i| match i {
                HealthIssue::DuplicateId { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Audit `records`.
///
/// Example records are excluded from duplicate detection but still checked
/// for missing fields. Issues are listed duplicates-by-id first, then
/// duplicates-by-name, then missing fields, each in input order.
pub fn check(records: &[StoredCharacter]) -> HealthReport {
    let mut issues = Vec::new();

    // id -> count, in first-seen order
    let mut id_order: Vec<&str> = Vec::new();
    let mut id_counts: HashMap<&str, usize> = HashMap::new();
    // normalized name -> distinct ids, in first-seen order
    let mut name_order: Vec<String> = Vec::new();
    let mut name_ids: HashMap<String, Vec<String>> = HashMap::new();

    for record in records.iter().filter(|r| !r.is_example) {
        let count = id_counts.entry(record.id.as_str()).or_insert(0);
        if *count == 0 {
            id_order.push(record.id.as_str());
        }
        *count += 1;

        let name = normalize_name(record.name());
        if name.is_empty() {
            continue;
        }
        let ids = name_ids.entry(name.clone()).or_insert_with(|| {
            name_order.push(name);
            Vec::new()
        });
        if !ids.contains(&record.id) {
            ids.push(record.id.clone());
        }
    }

    for id in id_order {
        let count = id_counts[id];
        if count > 1 {
            issues.push(HealthIssue::DuplicateId {
                id: id.to_string(),
                count,
            });
        }
    }

    for name in name_order {
        if let Some(ids) = name_ids.remove(&name) {
            if ids.len() > 1 {
                issues.push(HealthIssue::DuplicateName { name, ids });
            }
        }
    }

    for record in records {
        if record.id.trim().is_empty() {
            issues.push(HealthIssue::MissingField {
                id: record.id.clone(),
                field: "id".to_string(),
            });
        }
        if record.name().trim().is_empty() {
            issues.push(HealthIssue::MissingField {
                id: record.id.clone(),
                field: "name".to_string(),
            });
        }
        if record.updated_at <= 0 {
            issues.push(HealthIssue::MissingField {
                id: record.id.clone(),
                field: "updatedAt".to_string(),
            });
        }
    }

    HealthReport {
        is_healthy: issues.is_empty(),
        issues,
        checked: records.len(),
    }
}
