//! In-memory vector index with cosine similarity search.
//!
//! One `VectorIndex` backs one partition.

use std::collections::HashMap;

use crate::eid::Eid;

/// In-memory vector index for one partition.
///
/// Stores embeddings keyed by item ID, supporting:
/// - Insert/update/remove operations
/// - Top-k cosine similarity search
#[derive(Debug, Clone)]
pub struct VectorIndex {
    entries: HashMap<Eid, Vec<f32>>,
    dimensions: usize,
}

/// Search result from the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub id: Eid,
    /// Cosine similarity score (-1.0 to 1.0)
    pub score: f32,
}

impl VectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            entries: HashMap::new(),
            dimensions,
        }
    }

    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            dimensions,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace an entry. Returns the embedding it replaced.
    ///
    /// Returns an error if the embedding has the wrong length or zero norm.
    pub fn insert(&mut self, id: Eid, embedding: Vec<f32>) -> Result<Option<Vec<f32>>, IndexError> {
        if embedding.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }

        if Self::l2_norm(&embedding) < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        Ok(self.entries.insert(id, embedding))
    }

    pub fn remove(&mut self, id: &Eid) -> Option<Vec<f32>> {
        self.entries.remove(id)
    }

    pub fn contains(&self, id: &Eid) -> bool {
        self.entries.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Eid, &Vec<f32>)> {
        self.entries.iter()
    }

    /// Search for the `limit` most similar vectors.
    ///
    /// Results are sorted by similarity score (highest first). Ties are broken
    /// by id so equal scores come back in a stable order.
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<SearchResult>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let query_norm = Self::l2_norm(query);
        if query_norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        let mut results: Vec<SearchResult> = self
            .entries
            .iter()
            .map(|(id, embedding)| SearchResult {
                id: id.clone(),
                score: Self::cosine_similarity(query, embedding, query_norm),
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(limit);

        Ok(results)
    }

    fn l2_norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Assumes query_norm is precomputed for efficiency.
    fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
        let target_norm = Self::l2_norm(target);
        if target_norm < f32::EPSILON {
            return 0.0;
        }

        let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
        dot_product / (query_norm * target_norm)
    }
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,

    #[error("Partition storage error: {0}")]
    Storage(#[from] crate::semantic::storage::VectorStorageError),

    #[error("Partition {0} lock poisoned")]
    Poisoned(&'static str),
}
