use crate::error::IngestError;
use serde::{Deserialize, Serialize};

/// Distance function used to rank index hits. Lower is more similar.
///
/// Squared Euclidean is the only metric this engine ships; the enum exists so
/// persisted snapshots record which metric their distances were computed under.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    SquaredL2,
}

/// Engine configuration, constructed once at startup and passed by reference.
///
/// All knobs that affect chunk boundaries, embedding identity, or ranking live
/// here; nothing in the core reads the process environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Chunk window length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
    /// Default number of chunks returned per query.
    pub top_k: usize,
    /// Hits with similarity `1 / (1 + distance)` below this are dropped.
    /// Zero disables the filter.
    pub similarity_threshold: f32,
    /// Identifier of the embedding model; persisted with the index so that
    /// vectors from different models are never compared.
    pub embedding_model: String,
    /// Base URL of an embeddings service. When unset the built-in hashed
    /// n-gram embedder is used.
    pub embedding_endpoint: Option<String>,
    /// Expected embedding dimension.
    pub embedding_dimensions: usize,
    pub metric: DistanceMetric,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            top_k: 5,
            similarity_threshold: 0.0,
            embedding_model: crate::embeddings::HASHED_NGRAM_MODEL_ID.to_string(),
            embedding_endpoint: None,
            embedding_dimensions: crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS,
            metric: DistanceMetric::SquaredL2,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(IngestError::InvalidConfig(
                "top_k must be at least 1".to_string(),
            ));
        }
        if !self.similarity_threshold.is_finite()
            || !(0.0..1.0).contains(&self.similarity_threshold)
        {
            return Err(IngestError::InvalidConfig(format!(
                "similarity_threshold ({}) must be in [0, 1)",
                self.similarity_threshold
            )));
        }
        if self.embedding_model.trim().is_empty() {
            return Err(IngestError::InvalidConfig(
                "embedding_model must not be empty".to_string(),
            ));
        }
        if self.embedding_dimensions == 0 {
            return Err(IngestError::InvalidConfig(
                "embedding_dimensions must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
