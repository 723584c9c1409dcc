//! Lexical index (C2): Okapi BM25 over tokenized memory content and tags.
//!
//! Mirrors the document/score contract of a `rank_bm25`-style index: documents
//! are tokenized and tag tokens are repeated to boost their weight, the index
//! is rebuilt lazily on the next query after a mutation, and `search` returns
//! `(doc_id, score)` pairs sorted by score descending.

use std::collections::HashMap;

use crate::config::Bm25Params;

/// Lowercase, alphanumeric-boundary tokenizer. Tokens shorter than 2 chars
/// are dropped as noise (single-letter matches rarely help lexical recall).
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|tok| tok.to_lowercase())
        .filter(|tok| tok.len() >= 2)
        .collect()
}

struct PostedDoc {
    tokens: Vec<String>,
    term_counts: HashMap<String, u32>,
    length: u32,
}

/// BM25 index over an in-memory document set. Not persisted: `Manager`
/// rebuilds it from the relational store on startup and after writes.
pub struct Bm25Index {
    k1: f32,
    b: f32,
    tag_boost: usize,
    documents: HashMap<String, PostedDoc>,
    dirty: bool,
    df: HashMap<String, u32>,
    avgdl: f32,
}

impl Bm25Index {
    pub fn new(params: &Bm25Params) -> Self {
        Self {
            k1: params.k1,
            b: params.b,
            tag_boost: params.tag_boost,
            documents: HashMap::new(),
            dirty: true,
            df: HashMap::new(),
            avgdl: 0.0,
        }
    }

    pub fn add_document(&mut self, doc_id: impl Into<String>, text: &str, tags: &[String]) {
        let mut tokens = tokenize(text);
        for tag in tags {
            for tok in tokenize(tag) {
                for _ in 0..self.tag_boost {
                    tokens.push(tok.clone());
                }
            }
        }
        let mut term_counts = HashMap::new();
        for tok in &tokens {
            *term_counts.entry(tok.clone()).or_insert(0) += 1;
        }
        let length = tokens.len() as u32;
        self.documents.insert(
            doc_id.into(),
            PostedDoc {
                tokens,
                term_counts,
                length,
            },
        );
        self.dirty = true;
    }

    pub fn remove_document(&mut self, doc_id: &str) {
        if self.documents.remove(doc_id).is_some() {
            self.dirty = true;
        }
    }

    pub fn clear(&mut self) {
        self.documents.clear();
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn rebuild(&mut self) {
        self.df.clear();
        let mut total_len: u64 = 0;
        for doc in self.documents.values() {
            total_len += doc.length as u64;
            for term in doc.term_counts.keys() {
                *self.df.entry(term.clone()).or_insert(0) += 1;
            }
        }
        self.avgdl = if self.documents.is_empty() {
            0.0
        } else {
            total_len as f32 / self.documents.len() as f32
        };
        self.dirty = false;
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.documents.len() as f32;
        let df = *self.df.get(term).unwrap_or(&0) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Raw BM25 score per document for a query, unsorted.
    pub fn get_scores(&mut self, query: &str) -> HashMap<String, f32> {
        if self.dirty {
            self.rebuild();
        }
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || self.documents.is_empty() {
            return HashMap::new();
        }

        let idfs: HashMap<&str, f32> = query_tokens
            .iter()
            .map(|t| (t.as_str(), self.idf(t)))
            .collect();

        let mut scores = HashMap::with_capacity(self.documents.len());
        for (doc_id, doc) in &self.documents {
            let mut score = 0.0_f32;
            for term in &query_tokens {
                let f = *doc.term_counts.get(term).unwrap_or(&0) as f32;
                if f == 0.0 {
                    continue;
                }
                let idf = idfs[term.as_str()];
                let denom = f + self.k1 * (1.0 - self.b + self.b * doc.length as f32 / self.avgdl.max(1.0));
                score += idf * (f * (self.k1 + 1.0)) / denom;
            }
            scores.insert(doc_id.clone(), score);
        }
        scores
    }

    pub fn search(&mut self, query: &str, top_k: usize, threshold: f32) -> Vec<(String, f32)> {
        let scores = self.get_scores(query);
        let mut results: Vec<(String, f32)> = scores
            .into_iter()
            .filter(|(_, score)| *score > threshold)
            .collect();
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Bm25Params {
        Bm25Params {
            k1: 1.5,
            b: 0.75,
            tag_boost: 3,
        }
    }

    #[test]
    fn exact_term_outranks_unrelated_document() {
        let mut idx = Bm25Index::new(&params());
        idx.add_document("a", "migrate authentication to session tokens", &[]);
        idx.add_document("b", "refactor the logging subsystem", &[]);

        let results = idx.search("authentication session", 10, 0.0);
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn tag_boost_increases_score() {
        let mut idx = Bm25Index::new(&params());
        idx.add_document("a", "some unrelated text entirely", &["auth".to_string()]);
        idx.add_document("b", "some unrelated text entirely", &[]);

        let scores = idx.get_scores("auth");
        assert!(scores.get("a").copied().unwrap_or(0.0) > scores.get("b").copied().unwrap_or(0.0));
    }

    #[test]
    fn removed_document_drops_out_of_results() {
        let mut idx = Bm25Index::new(&params());
        idx.add_document("a", "rate limiting middleware", &[]);
        idx.remove_document("a");

        assert!(idx.search("rate limiting", 10, 0.0).is_empty());
    }
}
