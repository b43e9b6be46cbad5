//! Similarity search over report descriptions and photos.
//!
//! - `embeddings`: fastembed-backed text and image embedding gateway
//! - `index`: in-memory vector index with cosine similarity search
//! - `storage`: binary persistence for one partition
//! - `partitions`: the four lost/found x text/image partitions

pub mod embeddings;
mod index;
pub mod partitions;
mod storage;

pub use embeddings::{model_id_hash, EmbeddingError, EmbeddingGateway, FastembedGateway};
pub use index::{IndexError, SearchResult, VectorIndex};
pub use partitions::{LocalIndex, Modality, Partition, SimilarityIndex};
pub use storage::VectorStorageError;
