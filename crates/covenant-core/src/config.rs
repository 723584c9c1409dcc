//! Single configuration object for the substrate, overridable by environment.
//!
//! Every tunable named in the component contracts (BM25 constants, RRF k,
//! idle timeout, dream strategy parameters, counsel TTL, embedding prefixes)
//! lives here rather than scattered as literals, so a deployment can override
//! any of it without touching code.

use std::path::PathBuf;
use std::time::Duration;

/// Prefixes prepended to text before encoding, matching the sentence
/// encoder's training convention for asymmetric retrieval.
#[derive(Debug, Clone)]
pub struct EmbeddingPrefixes {
    pub document: String,
    pub query: String,
}

impl Default for EmbeddingPrefixes {
    fn default() -> Self {
        Self {
            document: "<doc>".to_string(),
            query: "<query>".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
    /// Multiplicity with which tag tokens are added to the document.
    pub tag_boost: usize,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            tag_boost: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DreamParams {
    pub idle_timeout: Duration,
    pub max_decisions_per_session: usize,
    pub min_decision_age_hours: i64,
    pub review_cooldown_hours: i64,
    pub evidence_threshold: usize,
    pub max_connections_per_session: usize,
    pub dry_run: bool,
}

impl Default for DreamParams {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            max_decisions_per_session: 10,
            min_decision_age_hours: 1,
            review_cooldown_hours: 72,
            evidence_threshold: 3,
            max_connections_per_session: 20,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Per-project storage root: `<root>/storage/`.
    pub storage_path: PathBuf,
    pub embedding_model_name: String,
    pub embedding_dimensions: usize,
    pub embedding_prefixes: EmbeddingPrefixes,
    pub bm25: Bm25Params,
    pub rrf_k: f32,
    /// Recency half-life-ish decay constant τ (days) used in `exp(-age_days / τ)`.
    pub recency_tau_days: f32,
    pub dream: DreamParams,
    /// Counsel token TTL (§4.9): a `context_check` grants permission for this long.
    pub counsel_ttl: Duration,
    pub vector_store_timeout: Duration,
    /// Surprise threshold separating "routine" from "novel" (Open Question in §9).
    pub surprise_novel_threshold: f32,
    pub allowed_subprocess_commands: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from(".covenant/storage"),
            embedding_model_name: "nomic-ai/nomic-embed-text-v1.5".to_string(),
            embedding_dimensions: 256,
            embedding_prefixes: EmbeddingPrefixes::default(),
            bm25: Bm25Params::default(),
            rrf_k: 60.0,
            recency_tau_days: 30.0,
            dream: DreamParams::default(),
            counsel_ttl: Duration::from_secs(300),
            vector_store_timeout: Duration::from_secs(60),
            surprise_novel_threshold: 0.35,
            allowed_subprocess_commands: Vec::new(),
        }
    }
}

impl Config {
    /// Build config from defaults overridden by process environment.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(path) = std::env::var("COVENANT_STORAGE_PATH") {
            cfg.storage_path = PathBuf::from(path);
        }
        if let Ok(dims) = std::env::var("COVENANT_EMBEDDING_DIMENSIONS") {
            if let Ok(d) = dims.parse() {
                cfg.embedding_dimensions = d;
            }
        }
        if let Ok(secs) = std::env::var("COVENANT_IDLE_TIMEOUT_SECS") {
            if let Ok(s) = secs.parse() {
                cfg.dream.idle_timeout = Duration::from_secs(s);
            }
        }
        if let Ok(secs) = std::env::var("COVENANT_COUNSEL_TTL_SECS") {
            if let Ok(s) = secs.parse() {
                cfg.counsel_ttl = Duration::from_secs(s);
            }
        }
        if let Ok(hours) = std::env::var("COVENANT_REVIEW_COOLDOWN_HOURS") {
            if let Ok(h) = hours.parse() {
                cfg.dream.review_cooldown_hours = h;
            }
        }
        if let Ok(flag) = std::env::var("COVENANT_DREAM_DRY_RUN") {
            cfg.dream.dry_run = flag == "1" || flag.eq_ignore_ascii_case("true");
        }
        if let Ok(secs) = std::env::var("QDRANT_TIMEOUT") {
            if let Ok(s) = secs.parse() {
                cfg.vector_store_timeout = Duration::from_secs(s);
            }
        }

        cfg
    }

    /// Path to the relational store file (C1).
    pub fn db_path(&self) -> PathBuf {
        self.storage_path.join("daem0nmcp.db")
    }

    /// Directory the vector collection (C3) persists into.
    pub fn vector_dir(&self) -> PathBuf {
        self.storage_path.join("qdrant")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.bm25.k1, 1.5);
        assert_eq!(cfg.bm25.b, 0.75);
        assert_eq!(cfg.rrf_k, 60.0);
        assert_eq!(cfg.counsel_ttl, Duration::from_secs(300));
        assert_eq!(cfg.dream.idle_timeout, Duration::from_secs(60));
    }
}
