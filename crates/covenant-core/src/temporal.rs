//! Bi-temporal version engine (C7): every mutation of a memory writes a new
//! [`MemoryVersion`] rather than overwriting it in place, so both "when did
//! the world change" (`changed_at`) and "when was this true" (`valid_from`/
//! `valid_to`) can be queried independently.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{ChangeType, MemoryVersion, Worked};
use crate::storage::Storage;

/// Next version number for a memory is one past the current max; the very
/// first version of a memory is always 1.
pub fn next_version_number(storage: &Storage, memory_id: &str) -> Result<u32> {
    Ok(storage.max_version_number(memory_id)? + 1)
}

/// A version's `changed_at` can never precede the previous version's — guards
/// against clock skew moving the wall clock backwards between writes.
fn monotonic_changed_at(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(prev) if prev >= now => prev + chrono::Duration::microseconds(1),
        _ => now,
    }
}

#[allow(clippy::too_many_arguments)]
pub struct NewVersion<'a> {
    pub memory_id: &'a str,
    pub content: &'a str,
    pub rationale: Option<&'a str>,
    pub context: Option<&'a serde_json::Value>,
    pub tags: &'a [String],
    pub outcome: Option<&'a str>,
    pub worked: Worked,
    pub change_type: ChangeType,
    pub change_description: Option<&'a str>,
    pub valid_from: Option<DateTime<Utc>>,
}

/// Write a new version for a memory and persist it. Does not touch the
/// denormalized `memories` row — callers that want the fast-read snapshot
/// kept in sync should also call `Storage::update_memory_snapshot`.
pub fn create_version(storage: &Storage, input: NewVersion<'_>) -> Result<MemoryVersion> {
    let now = Utc::now();
    let previous = storage.current_version(input.memory_id)?;
    let version_number = previous.as_ref().map_or(1, |v| v.version_number + 1);
    let changed_at = monotonic_changed_at(previous.as_ref().map(|v| v.changed_at), now);

    let version = MemoryVersion {
        id: uuid::Uuid::new_v4().to_string(),
        memory_id: input.memory_id.to_string(),
        version_number,
        content: input.content.to_string(),
        rationale: input.rationale.map(str::to_string),
        context: input.context.cloned(),
        tags: input.tags.to_vec(),
        outcome: input.outcome.map(str::to_string),
        worked: input.worked,
        change_type: input.change_type,
        change_description: input.change_description.map(str::to_string),
        changed_at,
        valid_from: input.valid_from.unwrap_or(now),
        valid_to: None,
        invalidated_by_version_id: None,
    };
    storage.insert_version(&version)?;
    Ok(version)
}

/// Invalidate the currently-valid version of a memory, if any. Idempotent:
/// calling this on an already-invalidated version is a no-op that returns
/// `false`.
pub fn invalidate_current_version(
    storage: &Storage,
    memory_id: &str,
    invalidated_by_version_id: &str,
    invalidation_time: Option<DateTime<Utc>>,
) -> Result<bool> {
    let Some(current) = storage.current_version(memory_id)? else {
        return Ok(false);
    };
    storage.invalidate_version(
        &current.id,
        invalidated_by_version_id,
        invalidation_time.unwrap_or_else(Utc::now),
    )
}

/// Point-in-time query (§4.7): versions valid at `as_of_valid_time` as known
/// by `as_of_transaction_time` (defaults to now), newest version first.
pub fn versions_at_time(
    storage: &Storage,
    memory_id: &str,
    as_of_valid_time: DateTime<Utc>,
    as_of_transaction_time: Option<DateTime<Utc>>,
) -> Result<Vec<MemoryVersion>> {
    storage.versions_at_time(
        memory_id,
        as_of_valid_time,
        as_of_transaction_time.unwrap_or_else(Utc::now),
    )
}

/// One entry in a knowledge-evolution timeline (§4.7 trace evolution).
#[derive(Debug, Clone)]
pub struct EvolutionEntry {
    pub memory_id: String,
    pub version: MemoryVersion,
    pub is_current: bool,
}

/// `(invalidated_version_id, invalidated_by_version_id, invalidation_time)`.
#[derive(Debug, Clone)]
pub struct InvalidationLink {
    pub invalidated_version_id: String,
    pub invalidated_by_version_id: String,
    pub invalidation_time: DateTime<Utc>,
}

/// Full version timeline across a set of memories (e.g. every memory
/// referencing one entity), ordered oldest-first, plus the invalidation
/// chain extracted from it.
pub fn trace_evolution(
    storage: &Storage,
    memory_ids: &[String],
) -> Result<(Vec<EvolutionEntry>, Vec<InvalidationLink>)> {
    let versions = storage.versions_for_memories(memory_ids)?;
    let mut timeline = Vec::with_capacity(versions.len());
    let mut chain = Vec::new();

    for version in versions {
        if let (Some(invalidated_by), Some(valid_to)) =
            (&version.invalidated_by_version_id, version.valid_to)
        {
            chain.push(InvalidationLink {
                invalidated_version_id: version.id.clone(),
                invalidated_by_version_id: invalidated_by.clone(),
                invalidation_time: valid_to,
            });
        }
        timeline.push(EvolutionEntry {
            memory_id: version.memory_id.clone(),
            is_current: version.valid_to.is_none(),
            version,
        });
    }

    Ok((timeline, chain))
}

/// The "current beliefs" view: just the still-valid versions from a timeline.
pub fn current_beliefs(timeline: &[EvolutionEntry]) -> Vec<&EvolutionEntry> {
    timeline.iter().filter(|e| e.is_current).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Memory};

    fn seed_memory(storage: &Storage, id: &str) {
        let now = Utc::now();
        storage
            .insert_memory(&Memory {
                id: id.to_string(),
                project: "proj".to_string(),
                category: Category::Decision,
                content: "use sessions".to_string(),
                rationale: None,
                context: None,
                tags: Vec::new(),
                file_path: None,
                outcome: None,
                worked: Worked::Unknown,
                pinned: false,
                archived: false,
                importance_score: 0.0,
                surprise_score: 0.0,
                provenance: None,
                happened_at: None,
                created_at: now,
                updated_at: now,
            })
            .unwrap();
    }

    #[test]
    fn first_version_is_number_one() {
        let storage = Storage::open_in_memory("t1").unwrap();
        seed_memory(&storage, "m1");
        let version = create_version(
            &storage,
            NewVersion {
                memory_id: "m1",
                content: "use sessions",
                rationale: None,
                context: None,
                tags: &[],
                outcome: None,
                worked: Worked::Unknown,
                change_type: ChangeType::Created,
                change_description: None,
                valid_from: None,
            },
        )
        .unwrap();
        assert_eq!(version.version_number, 1);
        assert!(version.valid_to.is_none());
    }

    #[test]
    fn invalidating_current_version_is_idempotent() {
        let storage = Storage::open_in_memory("t2").unwrap();
        seed_memory(&storage, "m1");
        let v1 = create_version(
            &storage,
            NewVersion {
                memory_id: "m1",
                content: "use sessions",
                rationale: None,
                context: None,
                tags: &[],
                outcome: None,
                worked: Worked::Unknown,
                change_type: ChangeType::Created,
                change_description: None,
                valid_from: None,
            },
        )
        .unwrap();

        let first = invalidate_current_version(&storage, "m1", "invalidator", None).unwrap();
        assert!(first);
        let second = invalidate_current_version(&storage, "m1", "invalidator", None).unwrap();
        assert!(!second, "re-invalidating an already-closed version is a no-op");

        let fetched = storage.versions_for_memory("m1").unwrap();
        assert_eq!(fetched[0].id, v1.id);
        assert!(fetched[0].valid_to.is_some());
    }

    #[test]
    fn second_version_number_increments() {
        let storage = Storage::open_in_memory("t3").unwrap();
        seed_memory(&storage, "m1");
        create_version(
            &storage,
            NewVersion {
                memory_id: "m1",
                content: "v1",
                rationale: None,
                context: None,
                tags: &[],
                outcome: None,
                worked: Worked::Unknown,
                change_type: ChangeType::Created,
                change_description: None,
                valid_from: None,
            },
        )
        .unwrap();
        invalidate_current_version(&storage, "m1", "v2", None).unwrap();
        let v2 = create_version(
            &storage,
            NewVersion {
                memory_id: "m1",
                content: "v2",
                rationale: None,
                context: None,
                tags: &[],
                outcome: None,
                worked: Worked::Unknown,
                change_type: ChangeType::ContentUpdated,
                change_description: Some("revised"),
                valid_from: None,
            },
        )
        .unwrap();
        assert_eq!(v2.version_number, 2);
    }
}
