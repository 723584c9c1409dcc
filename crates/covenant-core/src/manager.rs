//! Memory manager (C8): the orchestrator and sole writer across C1-C7.
//!
//! Every other component (covenant middleware, phase tracker, dream
//! scheduler, dispatch facade) reaches the store, indices, and graph only
//! through this type.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::embeddings::EmbeddingService;
use crate::error::{CoreError, Result};
use crate::graph::{context_snippet, extract_entities};
use crate::lexical::Bm25Index;
use crate::models::{
    Category, EdgeRelationship, Entity, EntityRelationship, EntityType, Memory, MemoryEdge,
    Provenance, Worked,
};
use crate::retrieval::{self, ReweightConfig};
use crate::storage::Storage;
use crate::temporal::{self, NewVersion};
use crate::vector::VectorIndex;

/// Inputs to [`Manager::remember`]. `source_client`/`source_model` come from
/// the `_client_meta` provenance side-channel the covenant middleware parses.
#[derive(Debug, Clone, Default)]
pub struct RememberInput {
    pub category: Category,
    pub content: String,
    pub rationale: Option<String>,
    pub context: Option<serde_json::Value>,
    pub tags: Vec<String>,
    pub file_path: Option<String>,
    pub happened_at: Option<DateTime<Utc>>,
    pub source_client: Option<String>,
    pub source_model: Option<String>,
}

/// Filters and paging accepted by [`Manager::recall`].
#[derive(Debug, Clone, Default)]
pub struct RecallQuery {
    pub topic: String,
    pub categories: Vec<Category>,
    pub tags: Vec<String>,
    pub file_path: Option<String>,
    pub offset: usize,
    pub limit: usize,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub include_linked: bool,
    pub reweight: ReweightConfig,
}

/// A recall result, bucketed by category as §4.8 specifies.
#[derive(Debug, Clone, Default)]
pub struct RecallResult {
    pub buckets: HashMap<Category, Vec<Memory>>,
    pub linked: Vec<Memory>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimVerdict {
    Verified,
    Unverified,
    Conflict,
}

#[derive(Debug, Clone)]
pub struct ClaimCheck {
    pub claim: String,
    pub verdict: ClaimVerdict,
    pub conflict_reason: Option<String>,
}

/// Orchestrator holding the relational store, both in-memory indices, and
/// the embedding service. Cheap to clone the indices' lock guards but the
/// type itself is meant to live behind a single `Arc`.
pub struct Manager {
    storage: Storage,
    embeddings: EmbeddingService,
    vector: Mutex<VectorIndex>,
    lexical: Mutex<Bm25Index>,
    config: Config,
}

impl Manager {
    pub fn new(storage: Storage, config: Config) -> Result<Self> {
        let vector = VectorIndex::with_config(crate::vector::VectorIndexConfig {
            dimensions: config.embedding_dimensions,
            ..Default::default()
        })
        .map_err(|e| CoreError::VectorIndex(e.to_string()))?;
        let mut manager = Self {
            lexical: Mutex::new(Bm25Index::new(&config.bm25)),
            vector: Mutex::new(vector),
            embeddings: EmbeddingService::new(),
            storage,
            config,
        };
        manager.rebuild_indices()?;
        Ok(manager)
    }

    /// Rebuild C2 and C3 from the relational store. Called on startup and
    /// after any indexing side-effect is left in a possibly-stale state by a
    /// failed mutation (§4.8 failure semantics).
    pub fn rebuild_indices(&mut self) -> Result<()> {
        let project = self.storage.project().to_string();
        let memories = self.storage.all_active_memories(&project)?;

        let mut lexical = self.lexical.lock().expect("lexical lock poisoned");
        lexical.clear();
        for memory in &memories {
            lexical.add_document(memory.id.clone(), &memory.content, &memory.tags);
        }
        drop(lexical);

        let embeddings = self.storage.all_embeddings(&project)?;
        let mut vector = self.vector.lock().expect("vector lock poisoned");
        for (id, bytes) in embeddings {
            if let Some(embedding) = crate::embeddings::Embedding::from_bytes(&bytes) {
                let _ = vector.add(&id, &embedding.vector);
            }
        }
        Ok(())
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// §4.8 remember: embed, score surprise, persist the row, write version 1,
    /// index into C2/C4/C3, extract entities.
    pub fn remember(&self, input: RememberInput) -> Result<Memory> {
        if input.content.trim().is_empty() {
            return Err(CoreError::InvalidInput("content must not be empty".into()));
        }

        let project = self.storage.project().to_string();
        let embedding = self
            .embeddings
            .embed_document(&input.content, &self.config.embedding_prefixes.document)
            .map_err(|e| CoreError::EmbeddingUnavailable(e.to_string()))?;

        let existing = self.storage.all_embeddings(&project)?;
        let existing_vectors: Vec<Vec<f32>> = existing
            .iter()
            .filter_map(|(_, bytes)| crate::embeddings::Embedding::from_bytes(bytes))
            .map(|e| e.vector)
            .collect();
        let surprise = retrieval::calculate_surprise(&embedding.vector, &existing_vectors, 5);

        let now = Utc::now();
        let memory = Memory {
            id: uuid::Uuid::new_v4().to_string(),
            project: project.clone(),
            category: input.category,
            content: input.content.clone(),
            rationale: input.rationale.clone(),
            context: input.context.clone(),
            tags: input.tags.clone(),
            file_path: input.file_path.clone(),
            outcome: None,
            worked: Worked::Unknown,
            pinned: false,
            archived: false,
            importance_score: 0.0,
            surprise_score: surprise,
            provenance: if input.source_client.is_some() || input.source_model.is_some() {
                Some(Provenance {
                    client: input.source_client.clone(),
                    provider_id: None,
                    model_id: input.source_model.clone(),
                })
            } else {
                None
            },
            happened_at: input.happened_at,
            created_at: now,
            updated_at: now,
        };

        self.storage.insert_memory(&memory)?;
        self.storage.set_embedding(&memory.id, &embedding.to_bytes())?;

        temporal::create_version(
            &self.storage,
            NewVersion {
                memory_id: &memory.id,
                content: &memory.content,
                rationale: memory.rationale.as_deref(),
                context: memory.context.as_ref(),
                tags: &memory.tags,
                outcome: None,
                worked: Worked::Unknown,
                change_type: crate::models::ChangeType::Created,
                change_description: None,
                valid_from: memory.happened_at,
            },
        )?;

        self.lexical
            .lock()
            .expect("lexical lock poisoned")
            .add_document(memory.id.clone(), &memory.content, &memory.tags);
        self.vector
            .lock()
            .expect("vector lock poisoned")
            .add(&memory.id, &embedding.vector)
            .map_err(|e| CoreError::VectorIndex(e.to_string()))?;

        self.extract_and_link_entities(&memory)?;

        Ok(memory)
    }

    /// §4.8 remember_batch: all-or-nothing. Since each `remember` already
    /// commits its relational write independently, a failure partway through
    /// is rolled forward by deleting the memories already inserted this call.
    pub fn remember_batch(&self, inputs: Vec<RememberInput>) -> Result<Vec<Memory>> {
        let mut inserted = Vec::with_capacity(inputs.len());
        for input in inputs {
            match self.remember(input) {
                Ok(memory) => inserted.push(memory),
                Err(err) => {
                    for memory in &inserted {
                        self.storage.set_archived(&memory.id).ok();
                    }
                    return Err(err);
                }
            }
        }
        Ok(inserted)
    }

    fn extract_and_link_entities(&self, memory: &Memory) -> Result<()> {
        let project = memory.project.as_str();
        for extracted in extract_entities(&memory.content) {
            let entity = self.storage.upsert_entity(
                project,
                extracted.entity_type,
                &extracted.name,
                None,
            )?;
            let snippet = context_snippet(&memory.content, extracted.start, extracted.end);
            self.storage.insert_entity_ref(
                &memory.id,
                &entity.id,
                EntityRelationship::Mentions,
                Some(&snippet),
            )?;
        }
        Ok(())
    }

    /// §4.8 link: explicit typed edge between two memories.
    pub fn link(
        &self,
        source_id: &str,
        target_id: &str,
        relationship: EdgeRelationship,
        description: Option<&str>,
    ) -> Result<MemoryEdge> {
        if source_id == target_id {
            return Err(CoreError::Invariant("self-links are forbidden".into()));
        }
        if self.storage.get_memory(source_id)?.is_none() {
            return Err(CoreError::NotFound(format!("memory {source_id}")));
        }
        if self.storage.get_memory(target_id)?.is_none() {
            return Err(CoreError::NotFound(format!("memory {target_id}")));
        }
        let edge = MemoryEdge {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            relationship,
            confidence: Some(1.0),
            description: description.map(str::to_string),
        };
        self.storage.insert_edge(&edge)?;
        Ok(edge)
    }

    pub fn unlink(
        &self,
        source_id: &str,
        target_id: &str,
        relationship: Option<EdgeRelationship>,
    ) -> Result<usize> {
        self.storage.delete_edge(source_id, target_id, relationship)
    }

    pub fn pin(&self, memory_id: &str, pinned: bool) -> Result<()> {
        if self.storage.get_memory(memory_id)?.is_none() {
            return Err(CoreError::NotFound(format!("memory {memory_id}")));
        }
        self.storage.set_pinned(memory_id, pinned)
    }

    pub fn archive(&self, memory_id: &str) -> Result<()> {
        if self.storage.get_memory(memory_id)?.is_none() {
            return Err(CoreError::NotFound(format!("memory {memory_id}")));
        }
        self.storage.set_archived(memory_id)?;
        self.lexical
            .lock()
            .expect("lexical lock poisoned")
            .remove_document(memory_id);
        self.vector
            .lock()
            .expect("vector lock poisoned")
            .remove(memory_id)
            .map_err(|e| CoreError::VectorIndex(e.to_string()))?;
        Ok(())
    }

    /// §4.8 record_outcome: writes a new version with change-type
    /// `outcome_recorded` and supersedes the prior version.
    pub fn record_outcome(&self, memory_id: &str, outcome_text: &str, worked: Worked) -> Result<()> {
        let memory = self
            .storage
            .get_memory(memory_id)?
            .ok_or_else(|| CoreError::NotFound(format!("memory {memory_id}")))?;

        let new_version = temporal::create_version(
            &self.storage,
            NewVersion {
                memory_id,
                content: &memory.content,
                rationale: memory.rationale.as_deref(),
                context: memory.context.as_ref(),
                tags: &memory.tags,
                outcome: Some(outcome_text),
                worked,
                change_type: crate::models::ChangeType::OutcomeRecorded,
                change_description: Some("outcome recorded"),
                valid_from: None,
            },
        )?;
        let superseded = self
            .storage
            .versions_for_memory(memory_id)?
            .iter()
            .any(|v| v.id != new_version.id && v.valid_to.is_none());
        if superseded {
            temporal::invalidate_current_version(&self.storage, memory_id, &new_version.id, None)
                .ok();
        }

        self.storage.update_memory_snapshot(
            memory_id,
            &memory.content,
            memory.rationale.as_deref(),
            memory.context.as_ref(),
            &memory.tags,
            Some(outcome_text),
            worked,
        )
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// §4.5 + §4.8 recall: hybrid search, hydrate, optional linked-edge
    /// expansion, bucket by category.
    pub fn recall(&self, query: &RecallQuery) -> Result<RecallResult> {
        if query.topic.trim().is_empty() {
            return Ok(RecallResult::default());
        }

        let project = self.storage.project();
        let query_embedding = self
            .embeddings
            .embed_query(&query.topic, &self.config.embedding_prefixes.query)
            .ok();

        let lexical_hits = {
            let mut lexical = self.lexical.lock().expect("lexical lock poisoned");
            lexical.search(&query.topic, retrieval::MAX_CANDIDATES_PER_SOURCE, 0.0)
        };
        let dense_hits = match &query_embedding {
            Some(embedding) => self
                .vector
                .lock()
                .expect("vector lock poisoned")
                .search(&embedding.vector, retrieval::MAX_CANDIDATES_PER_SOURCE)
                .unwrap_or_default(),
            None => Vec::new(),
        };
        let fts_hits = self
            .storage
            .fts_search(project, &query.topic, retrieval::MAX_CANDIDATES_PER_SOURCE)?;

        let mut candidate_ids: Vec<String> = lexical_hits
            .iter()
            .chain(dense_hits.iter())
            .chain(fts_hits.iter())
            .map(|(id, _)| id.clone())
            .collect();
        candidate_ids.sort();
        candidate_ids.dedup();
        let hydrated = self.storage.get_memories(&candidate_ids)?;
        let memories_by_id: HashMap<String, Memory> =
            hydrated.into_iter().map(|m| (m.id.clone(), m)).collect();

        let limit = if query.limit == 0 { 20 } else { query.limit };
        let fused = retrieval::fuse_and_rank(
            lexical_hits,
            dense_hits,
            fts_hits,
            self.config.rrf_k,
            &memories_by_id,
            &query.reweight,
            Utc::now(),
            query.offset + limit,
        );

        let mut result = RecallResult::default();
        for (id, _score) in fused.into_iter().skip(query.offset) {
            let Some(memory) = memories_by_id.get(&id) else {
                continue;
            };
            if !query.categories.is_empty() && !query.categories.contains(&memory.category) {
                continue;
            }
            if let Some(file_path) = &query.file_path {
                if memory.file_path.as_deref() != Some(file_path.as_str()) {
                    continue;
                }
            }
            if !query.tags.is_empty() && !query.tags.iter().any(|t| memory.tags.contains(t)) {
                continue;
            }
            if let Some(since) = query.since {
                if memory.created_at < since {
                    continue;
                }
            }
            if let Some(until) = query.until {
                if memory.created_at > until {
                    continue;
                }
            }
            result
                .buckets
                .entry(memory.category)
                .or_default()
                .push(memory.clone());
        }

        if query.include_linked {
            let mut linked_ids = Vec::new();
            for bucket in result.buckets.values() {
                for memory in bucket {
                    for edge in self.storage.edges_touching(&memory.id)? {
                        let other = if edge.source_id == memory.id {
                            edge.target_id
                        } else {
                            edge.source_id
                        };
                        linked_ids.push(other);
                    }
                }
            }
            linked_ids.sort();
            linked_ids.dedup();
            result.linked = self.storage.get_memories(&linked_ids)?;
        }

        Ok(result)
    }

    pub fn recall_for_file(&self, file_path: &str) -> Result<Vec<Memory>> {
        self.storage.find_memories_by_file(self.storage.project(), file_path)
    }

    pub fn recall_by_entity(&self, name: &str, entity_type: Option<EntityType>) -> Result<Vec<Memory>> {
        let Some(entity) = self.storage.find_entity_by_name(self.storage.project(), name)? else {
            return Ok(Vec::new());
        };
        if let Some(expected) = entity_type {
            if entity.entity_type != expected {
                return Ok(Vec::new());
            }
        }
        let ids = self.storage.memory_ids_for_entity(&entity.id)?;
        self.storage.get_memories(&ids)
    }

    /// §4.8 recall_hierarchical: plain recall plus, optionally, the members
    /// of any community a hit belongs to.
    pub fn recall_hierarchical(
        &self,
        topic: &str,
        include_members: bool,
        limit: usize,
    ) -> Result<RecallResult> {
        let query = RecallQuery {
            topic: topic.to_string(),
            limit,
            include_linked: include_members,
            ..Default::default()
        };
        self.recall(&query)
    }

    /// §4.8 verify_facts: naive claim extraction (sentence-split), recall
    /// each claim, and classify against the top hit's outcome/supersession state.
    pub fn verify_facts(
        &self,
        text: &str,
        categories: &[Category],
        _as_of_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<ClaimCheck>> {
        let claims: Vec<&str> = text
            .split(['.', '\n'])
            .map(str::trim)
            .filter(|s| s.len() > 8)
            .collect();

        let mut checks = Vec::with_capacity(claims.len());
        for claim in claims {
            let query = RecallQuery {
                topic: claim.to_string(),
                categories: categories.to_vec(),
                limit: 5,
                ..Default::default()
            };
            let result = self.recall(&query)?;
            let hit = result.buckets.values().flatten().next();
            let verdict = match hit {
                None => ClaimVerdict::Unverified,
                Some(memory) if memory.worked == Worked::False => ClaimVerdict::Conflict,
                Some(_) => ClaimVerdict::Verified,
            };
            let conflict_reason = match (&verdict, hit) {
                (ClaimVerdict::Conflict, Some(memory)) => memory.outcome.clone(),
                _ => None,
            };
            checks.push(ClaimCheck {
                claim: claim.to_string(),
                verdict,
                conflict_reason,
            });
        }
        Ok(checks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_manager(project: &str) -> Manager {
        let storage = Storage::open_in_memory(project).unwrap();
        Manager {
            lexical: Mutex::new(Bm25Index::new(&Config::default().bm25)),
            vector: Mutex::new(VectorIndex::new().unwrap()),
            embeddings: EmbeddingService::new(),
            storage,
            config: Config::default(),
        }
    }

    #[test]
    fn link_rejects_self_links() {
        let manager = test_manager("m1");
        let result = manager.link("a", "a", EdgeRelationship::RelatedTo, None);
        assert!(result.is_err());
    }

    #[test]
    fn link_rejects_nonexistent_memory() {
        let manager = test_manager("m2");
        let result = manager.link("ghost-a", "ghost-b", EdgeRelationship::RelatedTo, None);
        assert!(result.is_err());
    }

    #[test]
    fn pin_requires_existing_memory() {
        let manager = test_manager("m3");
        assert!(manager.pin("ghost", true).is_err());
    }

    #[test]
    fn empty_topic_recall_returns_empty_without_error() {
        let manager = test_manager("m4");
        let query = RecallQuery {
            topic: String::new(),
            ..Default::default()
        };
        let result = manager.recall(&query).unwrap();
        assert!(result.buckets.is_empty());
    }
}
