use crate::error::RetrievalError;
use crate::models::ChunkRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Durable chunk_id → metadata mapping. Backed by a `BTreeMap` so the
/// serialized JSON document is stable across runs and diffs cleanly.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct MetadataStore {
    chunks: BTreeMap<String, ChunkRecord>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Insert or overwrite the record under its chunk_id.
    pub fn put(&mut self, record: ChunkRecord) {
        self.chunks.insert(record.chunk_id.clone(), record);
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.chunks.contains_key(chunk_id)
    }

    pub fn get(&self, chunk_id: &str) -> Result<&ChunkRecord, RetrievalError> {
        self.chunks
            .get(chunk_id)
            .ok_or_else(|| RetrievalError::NotFound(chunk_id.to_string()))
    }

    /// Batch fetch. Fails with the first missing id; callers reconstruct
    /// their own ordering from the ids they passed in.
    pub fn get_many(
        &self,
        chunk_ids: &[String],
    ) -> Result<BTreeMap<String, ChunkRecord>, RetrievalError> {
        chunk_ids
            .iter()
            .map(|chunk_id| Ok((chunk_id.clone(), self.get(chunk_id)?.clone())))
            .collect()
    }

    /// Drop every record belonging to `source_id`; returns how many were
    /// removed. This is the mutation side of the replace-by-source policy.
    pub fn remove_source(&mut self, source_id: &str) -> usize {
        let before = self.chunks.len();
        self.chunks.retain(|_, record| record.source_id != source_id);
        before - self.chunks.len()
    }

    pub fn ids_for_source(&self, source_id: &str) -> Vec<String> {
        self.chunks
            .values()
            .filter(|record| record.source_id == source_id)
            .map(|record| record.chunk_id.clone())
            .collect()
    }

    pub fn unique_sources(&self) -> usize {
        self.chunks
            .values()
            .map(|record| record.source_id.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn records(&self) -> impl Iterator<Item = &ChunkRecord> {
        self.chunks.values()
    }
}
