//! Hybrid retrieval engine (C5): fuses lexical, dense, and full-text
//! candidate lists with Reciprocal Rank Fusion, then applies optional
//! recency/importance/pinned reweighting.
//!
//! This module is deliberately storage-agnostic: it operates on candidate
//! `(id, score)` lists already produced by C2/C3/C4 and on the metadata
//! needed to reweight them. Fanning out to the three retrievers and hydrating
//! the winning ids lives in [`crate::manager`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::Memory;

/// Per-retriever candidate cap (§4.5 step 2): each source contributes at
/// most this many ranked candidates before fusion.
pub const MAX_CANDIDATES_PER_SOURCE: usize = 50;

/// Reciprocal Rank Fusion across any number of ranked candidate lists.
/// `score(d) = Σ 1 / (k + rank_in_list(d))`, summed over every list the id
/// appears in; a list an id is absent from simply contributes nothing (an
/// unavailable retriever is handled by passing fewer lists, not by padding).
pub fn reciprocal_rank_fusion(result_lists: &[Vec<(String, f32)>], k: f32) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    for list in result_lists {
        for (rank, (id, _)) in list.iter().enumerate() {
            *scores.entry(id.clone()).or_default() += 1.0 / (k + rank as f32);
        }
    }
    let mut results: Vec<(String, f32)> = scores.into_iter().collect();
    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    results
}

/// Tunables for the optional post-fusion reweighting pass (§4.5 step 4).
#[derive(Debug, Clone, Copy)]
pub struct ReweightConfig {
    pub recency: bool,
    pub importance: bool,
    pub pinned: bool,
    pub recency_tau_days: f32,
    /// Added to a pinned memory's score; large enough that a pinned memory
    /// outranks a non-pinned one of comparable base RRF score.
    pub pinned_bonus: f32,
}

impl Default for ReweightConfig {
    fn default() -> Self {
        Self {
            recency: false,
            importance: false,
            pinned: false,
            recency_tau_days: 30.0,
            pinned_bonus: 1.0,
        }
    }
}

/// Apply recency/importance/pinned multipliers to fused scores, in place.
/// `now` is threaded in rather than read from the clock so reweighting stays
/// deterministic in tests.
pub fn reweight(
    fused: &mut [(String, f32)],
    memories: &HashMap<String, Memory>,
    cfg: &ReweightConfig,
    now: DateTime<Utc>,
) {
    for (id, score) in fused.iter_mut() {
        let Some(mem) = memories.get(id) else {
            continue;
        };
        if cfg.recency {
            let age_days = (now - mem.created_at).num_seconds().max(0) as f32 / 86400.0;
            *score *= (-age_days / cfg.recency_tau_days.max(0.001)).exp();
        }
        if cfg.importance {
            *score *= 1.0 + mem.importance_score;
        }
        if cfg.pinned && mem.pinned {
            *score += cfg.pinned_bonus;
        }
    }
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
}

/// Run the full §4.5 pipeline: fuse, reweight, truncate to `limit`. Any of
/// `lexical`, `dense`, `fts` may be empty (retriever unavailable); the
/// remaining lists are still fused — a query never fails for a missing
/// source.
pub fn fuse_and_rank(
    lexical: Vec<(String, f32)>,
    dense: Vec<(String, f32)>,
    fts: Vec<(String, f32)>,
    rrf_k: f32,
    memories: &HashMap<String, Memory>,
    reweight_cfg: &ReweightConfig,
    now: DateTime<Utc>,
    limit: usize,
) -> Vec<(String, f32)> {
    let lists = [lexical, dense, fts];
    let mut fused = reciprocal_rank_fusion(&lists, rrf_k);
    reweight(&mut fused, memories, reweight_cfg, now);
    fused.truncate(limit);
    fused
}

/// Cosine distance (`1 - cosine_similarity`) averaged over the `k` nearest
/// existing embeddings — the surprise/novelty score (§4.5, §4.8). The first
/// memory in a project is maximally surprising.
pub fn calculate_surprise(new_embedding: &[f32], existing: &[Vec<f32>], k_nearest: usize) -> f32 {
    if existing.is_empty() {
        return 1.0;
    }
    let mut distances: Vec<f32> = existing
        .iter()
        .map(|other| 1.0 - crate::embeddings::cosine_similarity(new_embedding, other))
        .collect();
    distances.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let k = k_nearest.min(distances.len());
    let avg = distances[..k].iter().sum::<f32>() / k as f32;
    avg.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Worked};

    fn memory(id: &str, created_days_ago: i64, importance: f32, pinned: bool) -> Memory {
        let now = Utc::now();
        Memory {
            id: id.to_string(),
            project: "proj".to_string(),
            category: Category::Decision,
            content: String::new(),
            rationale: None,
            context: None,
            tags: Vec::new(),
            file_path: None,
            outcome: None,
            worked: Worked::Unknown,
            pinned,
            archived: false,
            importance_score: importance,
            surprise_score: 0.0,
            provenance: None,
            happened_at: None,
            created_at: now - chrono::Duration::days(created_days_ago),
            updated_at: now,
        }
    }

    #[test]
    fn rrf_rewards_agreement_across_lists() {
        let lexical = vec![("a".to_string(), 9.0), ("b".to_string(), 5.0)];
        let dense = vec![("b".to_string(), 0.9), ("a".to_string(), 0.8)];
        let fused = reciprocal_rank_fusion(&[lexical, dense], 60.0);
        // Both appear in both lists at similar ranks; "a" leads in both lists so it wins.
        assert_eq!(fused[0].0, "a");
    }

    #[test]
    fn empty_retriever_list_does_not_break_fusion() {
        let lexical = vec![("a".to_string(), 1.0)];
        let dense = vec![];
        let fused = reciprocal_rank_fusion(&[lexical, dense], 60.0);
        assert_eq!(fused.len(), 1);
    }

    #[test]
    fn pinned_bonus_outranks_higher_base_score() {
        let mut fused = vec![("unpinned".to_string(), 0.5), ("pinned".to_string(), 0.1)];
        let mut memories = HashMap::new();
        memories.insert("unpinned".to_string(), memory("unpinned", 1, 0.0, false));
        memories.insert("pinned".to_string(), memory("pinned", 1, 0.0, true));

        let cfg = ReweightConfig {
            pinned: true,
            pinned_bonus: 1.0,
            ..Default::default()
        };
        reweight(&mut fused, &memories, &cfg, Utc::now());
        assert_eq!(fused[0].0, "pinned");
    }

    #[test]
    fn recency_decays_older_memories() {
        let mut fused = vec![("old".to_string(), 1.0), ("new".to_string(), 1.0)];
        let mut memories = HashMap::new();
        memories.insert("old".to_string(), memory("old", 365, 0.0, false));
        memories.insert("new".to_string(), memory("new", 0, 0.0, false));

        let cfg = ReweightConfig {
            recency: true,
            recency_tau_days: 30.0,
            ..Default::default()
        };
        reweight(&mut fused, &memories, &cfg, Utc::now());
        assert_eq!(fused[0].0, "new");
    }

    #[test]
    fn first_embedding_is_maximally_surprising() {
        assert_eq!(calculate_surprise(&[1.0, 0.0], &[], 5), 1.0);
    }

    #[test]
    fn identical_embedding_is_not_surprising() {
        let existing = vec![vec![1.0, 0.0, 0.0]];
        let surprise = calculate_surprise(&[1.0, 0.0, 0.0], &existing, 5);
        assert!(surprise < 0.01);
    }
}
