use crate::error::RetrievalError;
use crate::models::{ChunkRecord, IndexHit};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Nearest-neighbor search over the persisted corpus vectors.
#[async_trait]
pub trait VectorSearch {
    fn vector_count(&self) -> usize;

    fn vector_dimension(&self) -> Option<usize>;

    async fn nearest(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<IndexHit>, RetrievalError>;
}

/// Position→chunk_id bridging plus metadata lookup for search hits.
#[async_trait]
pub trait ChunkLookup {
    fn chunk_id_at(&self, position: usize) -> Option<String>;

    async fn fetch_chunks(
        &self,
        chunk_ids: &[String],
    ) -> Result<BTreeMap<String, ChunkRecord>, RetrievalError>;
}
