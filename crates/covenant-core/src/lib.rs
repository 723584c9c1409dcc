//! # covenant-core
//!
//! Project-scoped memory substrate for AI coding agents: a bi-temporal
//! relational store, a hybrid (lexical + dense + full-text) retrieval engine,
//! and a lightweight knowledge graph, fronted by a single orchestrator.
//!
//! ## Components
//!
//! - **Relational store** (C1): a single SQLite file per project, WAL-mode,
//!   versioned migrations.
//! - **Lexical index** (C2): in-memory Okapi BM25 over memory content and tags.
//! - **Dense-vector index** (C3): HNSW (USearch) over sentence-encoder
//!   embeddings, feature-gated behind `vector-search`.
//! - **Full-text index** (C4): contentless FTS5, kept in sync by trigger.
//! - **Hybrid retrieval** (C5): Reciprocal Rank Fusion across C2/C3/C4 with
//!   optional recency/importance/pinned reweighting.
//! - **Entity & graph layer** (C6): regex-based entity extraction and
//!   community detection over the memory graph.
//! - **Bi-temporal version engine** (C7): every mutation writes an immutable
//!   version rather than overwriting in place.
//! - **Memory manager** (C8): the orchestrator, and the only writer across
//!   C1-C7.
//!
//! Covenant enforcement, phase tracking, dreaming, and tool dispatch are
//! layered on top of this crate in `covenant-mcp`.
//!
//! ## Feature flags
//!
//! - `embeddings` (default): local embedding generation with fastembed.
//! - `vector-search` (default): HNSW vector search with USearch.
//! - `bundled-sqlite` (default): statically link SQLite rather than requiring
//!   a system library.
//! - `encryption`: SQLCipher-backed encryption at rest, mutually exclusive
//!   with `bundled-sqlite`.
//! - `full`: `embeddings` + `vector-search`.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod error;
pub mod graph;
pub mod lexical;
pub mod manager;
pub mod models;
pub mod retrieval;
pub mod storage;
pub mod temporal;

#[cfg(feature = "embeddings")]
#[cfg_attr(docsrs, doc(cfg(feature = "embeddings")))]
pub mod embeddings;

#[cfg(feature = "vector-search")]
#[cfg_attr(docsrs, doc(cfg(feature = "vector-search")))]
pub mod vector;

pub use config::Config;
pub use error::{CoreError, Result};
pub use manager::{ClaimCheck, ClaimVerdict, Manager, RecallQuery, RecallResult, RememberInput};
pub use models::{
    BackgroundTask, Category, ChangeType, Community, ContextCheck, ContextTrigger, DreamResult,
    DreamResultType, DreamSession, EdgeRelationship, Entity, EntityRelationship, EntityType,
    Memory, MemoryEdge, MemoryEntityRef, MemoryVersion, Provenance, Rule, SessionState, TaskState,
    TriggerType, Worked,
};
pub use storage::Storage;

#[cfg(feature = "embeddings")]
pub use embeddings::{
    cosine_similarity, euclidean_distance, Embedding, EmbeddingError, EmbeddingService,
    EMBEDDING_DIMENSIONS,
};

#[cfg(feature = "vector-search")]
pub use vector::{VectorIndex, VectorIndexConfig, VectorIndexStats, VectorSearchError};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::{Category, Config, CoreError, Manager, Memory, RecallQuery, RememberInput, Result, Storage};

    #[cfg(feature = "embeddings")]
    pub use crate::{Embedding, EmbeddingService};

    #[cfg(feature = "vector-search")]
    pub use crate::VectorIndex;
}
