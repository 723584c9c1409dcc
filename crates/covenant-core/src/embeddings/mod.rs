//! Semantic embeddings (C3 support).
//!
//! Local embedding generation via fastembed (ONNX-based nomic-embed-text-v1.5),
//! Matryoshka-truncated to 256 dimensions. No external API calls.

mod local;

pub use local::{
    cosine_similarity, dot_product, euclidean_distance, matryoshka_truncate, Embedding,
    EmbeddingError, EmbeddingService, BATCH_SIZE, EMBEDDING_DIMENSIONS, MAX_TEXT_LENGTH,
};
