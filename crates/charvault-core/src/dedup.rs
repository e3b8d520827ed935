//! Deduplication of character collections
//!
//! Merges one or more collections into a canonical one where every
//! identity is represented by exactly one record.
//!
//! ## Algorithm
//!
//! ```text
//! 1. Group records sharing an identity key
//!    ├── same id               (strict_id_match)
//!    └── same normalized name  (fuzzy_name_match)
//!    Groups are transitive: a~b by id and b~c by name puts a, b, c together.
//!    Example records are never grouped.
//! 2. Pick one winner per group
//!    ├── cloud beats local     (prefer_cloud)
//!    ├── newer beats older     (prefer_newer)
//!    └── first seen wins ties
//! 3. Emit winners in the input order of the winning record
//! ```
//!
//! Winners are cloned verbatim; fields are never merged.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::StoredCharacter;

/// Identity and tie-break rules for [`dedupe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupPolicy {
    pub prefer_cloud: bool,
    pub prefer_newer: bool,
    pub strict_id_match: bool,
    pub fuzzy_name_match: bool,
}

impl DedupPolicy {
    /// Policy used by the manual repair path.
    pub const AGGRESSIVE: DedupPolicy = DedupPolicy {
        prefer_cloud: true,
        prefer_newer: true,
        strict_id_match: true,
        fuzzy_name_match: false,
    };
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            prefer_cloud: true,
            prefer_newer: true,
            strict_id_match: true,
            fuzzy_name_match: false,
        }
    }
}

/// Lowercase, trim and collapse internal whitespace.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Whether `a` and `b` share an identity key under `policy`.
pub fn same_identity(a: &StoredCharacter, b: &StoredCharacter, policy: &DedupPolicy) -> bool {
    if a.is_example || b.is_example {
        return false;
    }
    if policy.strict_id_match && a.id == b.id {
        return true;
    }
    if policy.fuzzy_name_match {
        let name = normalize_name(a.name());
        return !name.is_empty() && name == normalize_name(b.name());
    }
    false
}

/// Does `candidate` outrank the current `best` of its group?
fn outranks(candidate: &StoredCharacter, best: &StoredCharacter, policy: &DedupPolicy) -> bool {
    if policy.prefer_cloud && candidate.is_cloud() != best.is_cloud() {
        return candidate.is_cloud();
    }
    if policy.prefer_newer && candidate.updated_at != best.updated_at {
        return candidate.updated_at > best.updated_at;
    }
    false
}

/// Disjoint-set over record indices
struct Groups {
    parent: Vec<usize>,
}

impl Groups {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    /// Union keeping the smaller index as root, so a root is always the
    /// first-seen member of its group.
    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Collapse `records` to one record per identity.
pub fn dedupe(records: &[StoredCharacter], policy: &DedupPolicy) -> Vec<StoredCharacter> {
    let mut groups = Groups::new(records.len());
    let mut first_by_id: HashMap<&str, usize> = HashMap::new();
    let mut first_by_name: HashMap<String, usize> = HashMap::new();

    for (i, record) in records.iter().enumerate() {
        if record.is_example {
            continue;
        }
        if policy.strict_id_match {
            match first_by_id.get(record.id.as_str()) {
                Some(&j) => groups.union(i, j),
                None => {
                    first_by_id.insert(record.id.as_str(), i);
                }
            }
        }
        if policy.fuzzy_name_match {
            let name = normalize_name(record.name());
            if !name.is_empty() {
                match first_by_name.get(&name) {
                    Some(&j) => groups.union(i, j),
                    None => {
                        first_by_name.insert(name, i);
                    }
                }
            }
        }
    }

    // root index -> winning index
    let mut winners: HashMap<usize, usize> = HashMap::new();
    for i in 0..records.len() {
        let root = groups.find(i);
        match winners.get(&root) {
            Some(&best) if !outranks(&records[i], &records[best], policy) => {}
            _ => {
                winners.insert(root, i);
            }
        }
    }

    let mut chosen: Vec<usize> = winners.into_values().collect();
    chosen.sort_unstable();
    chosen.into_iter().map(|i| records[i].clone()).collect()
}

/// Concatenate several collections (earlier ones first) and dedupe them.
pub fn merge_collections(
    collections: &[&[StoredCharacter]],
    policy: &DedupPolicy,
) -> Vec<StoredCharacter> {
    let combined: Vec<StoredCharacter> = collections
        .iter()
        .flat_map(|c| c.iter().cloned())
        .collect();
    dedupe(&combined, policy)
}
