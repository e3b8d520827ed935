//! Property-based tests for deduplication and the health checker
//!
//! Uses proptest to verify the merge invariants over arbitrary libraries.

use std::collections::HashSet;

use charvault_core::health;
use charvault_core::{dedupe, CharacterPayload, DedupPolicy, HealthIssue, Source, StoredCharacter};
use proptest::prelude::*;

// ============================================================================
// Strategy Generators
// ============================================================================

/// Small id and name pools so collisions are frequent
fn id_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "c", "d", "e"]).prop_map(str::to_string)
}

fn name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["Thal", " thal ", "THAL", "Mira", "Mira  Vex", "mira vex", "Oren"])
        .prop_map(str::to_string)
}

fn source_strategy() -> impl Strategy<Value = Source> {
    prop_oneof![Just(Source::Local), Just(Source::Cloud)]
}

fn policy_strategy() -> impl Strategy<Value = DedupPolicy> {
    (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
        |(prefer_cloud, prefer_newer, strict_id_match, fuzzy_name_match)| DedupPolicy {
            prefer_cloud,
            prefer_newer,
            strict_id_match,
            fuzzy_name_match,
        },
    )
}

/// A library where every record carries a unique `tag` field, so equal
/// records can still be told apart.
fn library_strategy(max: usize) -> impl Strategy<Value = Vec<StoredCharacter>> {
    prop::collection::vec(
        (
            id_strategy(),
            name_strategy(),
            source_strategy(),
            0..10i64,
            prop::bool::weighted(0.1),
        ),
        0..max,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(tag, (id, name, source, updated_at, is_example))| StoredCharacter {
                id,
                payload: CharacterPayload::new(name).with_field("tag", tag as u64),
                source,
                updated_at,
                is_example,
            })
            .collect()
    })
}

fn tag(record: &StoredCharacter) -> u64 {
    record.payload.fields["tag"].as_u64().unwrap()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// Deduplicating twice is the same as deduplicating once
    #[test]
    fn dedupe_is_idempotent(records in library_strategy(24), policy in policy_strategy()) {
        let once = dedupe(&records, &policy);
        let twice = dedupe(&once, &policy);
        prop_assert_eq!(once, twice);
    }

    /// Same input and policy always give the same output
    #[test]
    fn dedupe_is_deterministic(records in library_strategy(24), policy in policy_strategy()) {
        prop_assert_eq!(dedupe(&records, &policy), dedupe(&records, &policy));
    }

    /// With strict id matching no two user records share an id
    #[test]
    fn strict_ids_are_unique(records in library_strategy(24), mut policy in policy_strategy()) {
        policy.strict_id_match = true;
        let out = dedupe(&records, &policy);

        let mut seen = HashSet::new();
        for record in out.iter().filter(|r| !r.is_example) {
            prop_assert!(seen.insert(record.id.clone()), "duplicate id {}", record.id);
        }
    }

    /// Every output record is an input record, verbatim
    #[test]
    fn dedupe_never_fabricates(records in library_strategy(24), policy in policy_strategy()) {
        for record in dedupe(&records, &policy) {
            prop_assert!(records.contains(&record));
        }
    }

    /// Winners keep their relative input order
    #[test]
    fn dedupe_preserves_order(records in library_strategy(24), policy in policy_strategy()) {
        let tags: Vec<u64> = dedupe(&records, &policy).iter().map(tag).collect();
        let mut sorted = tags.clone();
        sorted.sort_unstable();
        prop_assert_eq!(tags, sorted);
    }

    /// Example records always survive
    #[test]
    fn examples_are_never_collapsed(records in library_strategy(24), policy in policy_strategy()) {
        let examples_in = records.iter().filter(|r| r.is_example).count();
        let examples_out = dedupe(&records, &policy).iter().filter(|r| r.is_example).count();
        prop_assert_eq!(examples_in, examples_out);
    }

    /// With cloud preference the cloud copy wins regardless of timestamps
    #[test]
    fn cloud_preferred_over_local(
        local_at in 0..1_000i64,
        cloud_at in 0..1_000i64,
        cloud_first in any::<bool>(),
    ) {
        let local = StoredCharacter {
            id: "a".to_string(),
            payload: CharacterPayload::new("Thal"),
            source: Source::Local,
            updated_at: local_at,
            is_example: false,
        };
        let cloud = StoredCharacter { source: Source::Cloud, updated_at: cloud_at, ..local.clone() };
        let input = if cloud_first { vec![cloud, local] } else { vec![local, cloud] };

        let out = dedupe(&input, &DedupPolicy::default());
        prop_assert_eq!(out.len(), 1);
        prop_assert_eq!(out[0].source, Source::Cloud);
        prop_assert_eq!(out[0].updated_at, cloud_at);
    }

    /// Without cloud preference the newer copy wins
    #[test]
    fn newer_wins_without_cloud_preference(
        a_at in 0..1_000i64,
        b_at in 0..1_000i64,
        a_source in source_strategy(),
        b_source in source_strategy(),
    ) {
        prop_assume!(a_at != b_at);
        let policy = DedupPolicy { prefer_cloud: false, ..DedupPolicy::default() };
        let a = StoredCharacter {
            id: "x".to_string(),
            payload: CharacterPayload::new("A"),
            source: a_source,
            updated_at: a_at,
            is_example: false,
        };
        let b = StoredCharacter {
            payload: CharacterPayload::new("B"),
            source: b_source,
            updated_at: b_at,
            ..a.clone()
        };

        let out = dedupe(&[a, b], &policy);
        prop_assert_eq!(out.len(), 1);
        prop_assert_eq!(out[0].updated_at, a_at.max(b_at));
    }

    /// Two user records sharing an id are always reported
    #[test]
    fn health_reports_duplicate_ids(records in library_strategy(24)) {
        let report = health::check(&records);

        let mut counts = std::collections::HashMap::new();
        for record in records.iter().filter(|r| !r.is_example) {
            *counts.entry(record.id.as_str()).or_insert(0usize) += 1;
        }
        for (id, count) in counts.into_iter().filter(|(_, c)| *c > 1) {
            let expected = HealthIssue::DuplicateId {
                id: id.to_string(),
                count,
            };
            prop_assert!(report.issues.contains(&expected));
            prop_assert!(!report.is_healthy);
        }
    }

    /// A strict-id deduped library never has duplicate-id issues
    #[test]
    fn deduped_library_has_no_duplicate_ids(records in library_strategy(24)) {
        let report = health::check(&dedupe(&records, &DedupPolicy::default()));
        prop_assert!(report.duplicate_ids().is_empty());
    }
}
