use crate::config::DistanceMetric;
use crate::error::{IngestError, RetrievalError};
use crate::index::FlatIndex;
use crate::metadata::MetadataStore;
use crate::models::{ChunkRecord, DocumentFingerprint, IndexHit, IndexStats};
use crate::traits::{ChunkLookup, VectorSearch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

pub const VECTORS_FILE: &str = "vectors.bin";
pub const BRIDGE_FILE: &str = "bridge.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const MANIFEST_FILE: &str = "manifest.json";
const LOCK_FILE: &str = ".ingest.lock";

/// Snapshot-level bookkeeping: which model produced the vectors, how many
/// there are, and which documents contributed them.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotManifest {
    pub snapshot_id: Uuid,
    pub model_id: Option<String>,
    pub dimension: Option<usize>,
    pub vector_count: usize,
    pub metric: DistanceMetric,
    pub created_at: DateTime<Utc>,
    pub documents: BTreeMap<String, DocumentFingerprint>,
}

impl SnapshotManifest {
    fn empty() -> Self {
        Self {
            snapshot_id: Uuid::new_v4(),
            model_id: None,
            dimension: None,
            vector_count: 0,
            metric: DistanceMetric::SquaredL2,
            created_at: Utc::now(),
            documents: BTreeMap::new(),
        }
    }
}

/// The complete persisted state of a corpus: vector arena, position→chunk_id
/// bridge, metadata store, and manifest. Writers mutate a snapshot in memory
/// and commit it whole; readers load it whole and never see partial writes.
#[derive(Debug, Clone)]
pub struct CorpusSnapshot {
    index: FlatIndex,
    bridge: Vec<String>,
    store: MetadataStore,
    manifest: SnapshotManifest,
}

impl Default for CorpusSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl CorpusSnapshot {
    pub fn empty() -> Self {
        Self {
            index: FlatIndex::new(),
            bridge: Vec::new(),
            store: MetadataStore::new(),
            manifest: SnapshotManifest::empty(),
        }
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn manifest(&self) -> &SnapshotManifest {
        &self.manifest
    }

    pub fn chunk_id_for_position(&self, position: usize) -> Option<&str> {
        self.bridge.get(position).map(String::as_str)
    }

    /// Load a snapshot from `dir`, failing if any file is missing or the
    /// parts disagree with each other.
    pub fn load(dir: &Path) -> Result<Self, RetrievalError> {
        let manifest: SnapshotManifest =
            serde_json::from_slice(&fs::read(dir.join(MANIFEST_FILE))?)?;
        let bridge: Vec<String> = serde_json::from_slice(&fs::read(dir.join(BRIDGE_FILE))?)?;
        let store: MetadataStore = serde_json::from_slice(&fs::read(dir.join(METADATA_FILE))?)?;
        let index = FlatIndex::read_from(&dir.join(VECTORS_FILE))?;

        let snapshot = Self {
            index,
            bridge,
            store,
            manifest,
        };
        snapshot.verify()?;
        debug!(
            dir = %dir.display(),
            vectors = snapshot.index.len(),
            "corpus snapshot loaded"
        );
        Ok(snapshot)
    }

    /// Load, or start empty when no snapshot has ever been committed to
    /// `dir`. A directory with a manifest but missing sibling files is still
    /// an error: that is corruption, not a fresh start.
    pub fn load_or_empty(dir: &Path) -> Result<Self, RetrievalError> {
        if dir.join(MANIFEST_FILE).exists() {
            Self::load(dir)
        } else {
            Ok(Self::empty())
        }
    }

    /// Cross-check every part against the others. Any disagreement means the
    /// persisted corpus can no longer be trusted for retrieval.
    pub fn verify(&self) -> Result<(), RetrievalError> {
        if self.index.len() != self.bridge.len() {
            return Err(RetrievalError::IndexCorruption(format!(
                "index holds {} vectors but the bridge maps {} positions",
                self.index.len(),
                self.bridge.len()
            )));
        }
        if self.store.len() != self.bridge.len() {
            return Err(RetrievalError::IndexCorruption(format!(
                "bridge maps {} positions but the metadata store holds {} records",
                self.bridge.len(),
                self.store.len()
            )));
        }
        if self.manifest.vector_count != self.index.len() {
            return Err(RetrievalError::IndexCorruption(format!(
                "manifest records {} vectors but the index holds {}",
                self.manifest.vector_count,
                self.index.len()
            )));
        }
        if self.manifest.dimension != self.index.dimension() {
            return Err(RetrievalError::IndexCorruption(format!(
                "manifest dimension {:?} disagrees with index dimension {:?}",
                self.manifest.dimension,
                self.index.dimension()
            )));
        }

        let mut seen = HashSet::with_capacity(self.bridge.len());
        for chunk_id in &self.bridge {
            if !seen.insert(chunk_id.as_str()) {
                return Err(RetrievalError::IndexCorruption(format!(
                    "bridge maps two positions to chunk {chunk_id}"
                )));
            }
            if !self.store.contains(chunk_id) {
                return Err(RetrievalError::IndexCorruption(format!(
                    "bridge entry {chunk_id} has no metadata record"
                )));
            }
        }
        Ok(())
    }

    /// Replace (or first ingest) one source's chunks. The surviving rows of
    /// every other source keep their relative order; the prior rows of this
    /// source are dropped and the new rows appended. Everything is validated
    /// before the snapshot mutates, so a failure leaves it untouched.
    /// Returns whether a previous ingestion of this source was replaced.
    pub fn replace_source(
        &mut self,
        fingerprint: DocumentFingerprint,
        records: Vec<ChunkRecord>,
        embeddings: Vec<Vec<f32>>,
        model_id: &str,
    ) -> Result<bool, IngestError> {
        if records.len() != embeddings.len() {
            return Err(IngestError::InvalidArgument(format!(
                "{} chunks but {} embeddings",
                records.len(),
                embeddings.len()
            )));
        }
        if let Some(existing) = &self.manifest.model_id {
            if existing != model_id {
                return Err(IngestError::EmbedderMismatch {
                    expected: existing.clone(),
                    actual: model_id.to_string(),
                });
            }
        }
        if let Some(dimension) = self.manifest.dimension {
            for vector in &embeddings {
                if vector.len() != dimension {
                    return Err(IngestError::DimensionMismatch {
                        expected: dimension,
                        actual: vector.len(),
                    });
                }
            }
        }

        let source_id = fingerprint.source_id.clone();
        let replaced = self.manifest.documents.contains_key(&source_id);

        let (mut index, mut bridge, mut store) = if replaced {
            // Rebuild the arena without the rows of the replaced source.
            let mut index = FlatIndex::new();
            let mut bridge = Vec::new();
            let mut store = MetadataStore::new();
            for (position, chunk_id) in self.bridge.iter().enumerate() {
                let record = self
                    .store
                    .get(chunk_id)
                    .map_err(|error| IngestError::Corruption(error.to_string()))?;
                if record.source_id == source_id {
                    continue;
                }
                let row = self.index.row(position).ok_or_else(|| {
                    IngestError::Corruption(format!(
                        "bridge position {position} has no vector row"
                    ))
                })?;
                index.add(&[row.to_vec()])?;
                bridge.push(chunk_id.clone());
                store.put(record.clone());
            }
            (index, bridge, store)
        } else {
            (self.index.clone(), self.bridge.clone(), self.store.clone())
        };

        index.add(&embeddings)?;
        for record in records {
            bridge.push(record.chunk_id.clone());
            store.put(record);
        }

        self.manifest.model_id = Some(model_id.to_string());
        self.manifest.dimension = index.dimension();
        self.manifest.vector_count = index.len();
        self.manifest.documents.insert(source_id, fingerprint);
        self.index = index;
        self.bridge = bridge;
        self.store = store;

        Ok(replaced)
    }

    /// Persist the snapshot to `dir`: every file is written to a temporary
    /// sibling first and renamed into place, the manifest last, so a reader
    /// never observes a partially written snapshot.
    pub fn commit(&mut self, dir: &Path) -> Result<(), IngestError> {
        self.verify()
            .map_err(|error| IngestError::Corruption(error.to_string()))?;

        self.manifest.snapshot_id = Uuid::new_v4();
        self.manifest.created_at = Utc::now();

        fs::create_dir_all(dir)?;

        let vectors_tmp = dir.join(format!("{VECTORS_FILE}.tmp"));
        self.index.write_to(&vectors_tmp)?;

        let bridge_tmp = dir.join(format!("{BRIDGE_FILE}.tmp"));
        fs::write(&bridge_tmp, serde_json::to_vec_pretty(&self.bridge)?)?;

        let metadata_tmp = dir.join(format!("{METADATA_FILE}.tmp"));
        fs::write(&metadata_tmp, serde_json::to_vec_pretty(&self.store)?)?;

        let manifest_tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
        fs::write(&manifest_tmp, serde_json::to_vec_pretty(&self.manifest)?)?;

        fs::rename(vectors_tmp, dir.join(VECTORS_FILE))?;
        fs::rename(bridge_tmp, dir.join(BRIDGE_FILE))?;
        fs::rename(metadata_tmp, dir.join(METADATA_FILE))?;
        fs::rename(manifest_tmp, dir.join(MANIFEST_FILE))?;

        info!(
            dir = %dir.display(),
            snapshot_id = %self.manifest.snapshot_id,
            vectors = self.index.len(),
            sources = self.manifest.documents.len(),
            "corpus snapshot committed"
        );
        Ok(())
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            total_chunks: self.index.len(),
            embedding_dimension: self.index.dimension(),
            metadata_count: self.store.len(),
            unique_sources: self.store.unique_sources(),
            model_id: self.manifest.model_id.clone(),
        }
    }
}

#[async_trait]
impl VectorSearch for CorpusSnapshot {
    fn vector_count(&self) -> usize {
        self.index.len()
    }

    fn vector_dimension(&self) -> Option<usize> {
        self.index.dimension()
    }

    async fn nearest(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<IndexHit>, RetrievalError> {
        self.index.search(query_vector, k)
    }
}

#[async_trait]
impl ChunkLookup for CorpusSnapshot {
    fn chunk_id_at(&self, position: usize) -> Option<String> {
        self.bridge.get(position).cloned()
    }

    async fn fetch_chunks(
        &self,
        chunk_ids: &[String],
    ) -> Result<BTreeMap<String, ChunkRecord>, RetrievalError> {
        self.store.get_many(chunk_ids)
    }
}

/// Exclusive-creation lock file serializing ingestion runs against one
/// snapshot directory. The append-only position scheme and replace-by-source
/// policy are not safe under interleaved writers.
#[derive(Debug)]
pub struct IngestLock {
    path: PathBuf,
}

impl IngestLock {
    pub fn acquire(dir: &Path) -> Result<Self, IngestError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE);
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => Err(
                IngestError::LockHeld(format!("another ingestion owns {}", path.display())),
            ),
            Err(error) => Err(IngestError::Io(error)),
        }
    }
}

impl Drop for IngestLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FormatTag;
    use tempfile::tempdir;

    fn fingerprint(source_id: &str) -> DocumentFingerprint {
        DocumentFingerprint {
            source_id: source_id.to_string(),
            source_name: format!("{source_id}.txt"),
            source_path: format!("/tmp/{source_id}.txt"),
            format: FormatTag::PlainText,
            checksum: "checksum".to_string(),
            ingested_at: Utc::now(),
        }
    }

    fn record(chunk_id: &str, source_id: &str) -> ChunkRecord {
        ChunkRecord {
            chunk_id: chunk_id.to_string(),
            source_id: source_id.to_string(),
            source_name: format!("{source_id}.txt"),
            chunk_index: 0,
            start_offset: 0,
            end_offset: 4,
            overlap_with_prev: 0,
            page_number: None,
            section_label: None,
            text: format!("text of {chunk_id}"),
        }
    }

    fn seeded_snapshot() -> CorpusSnapshot {
        let mut snapshot = CorpusSnapshot::empty();
        snapshot
            .replace_source(
                fingerprint("doc-a"),
                vec![record("a1", "doc-a"), record("a2", "doc-a")],
                vec![vec![0.0, 0.0], vec![1.0, 0.0]],
                "hashed-ngram-v1",
            )
            .expect("ingest doc-a");
        snapshot
            .replace_source(
                fingerprint("doc-b"),
                vec![record("b1", "doc-b")],
                vec![vec![0.0, 5.0]],
                "hashed-ngram-v1",
            )
            .expect("ingest doc-b");
        snapshot
    }

    #[test]
    fn replace_source_drops_only_that_sources_chunks() {
        let mut snapshot = seeded_snapshot();
        let replaced = snapshot
            .replace_source(
                fingerprint("doc-a"),
                vec![record("a3", "doc-a")],
                vec![vec![2.0, 2.0]],
                "hashed-ngram-v1",
            )
            .expect("re-ingest doc-a");

        assert!(replaced);
        assert_eq!(snapshot.index().len(), 2);
        assert!(!snapshot.store().contains("a1"));
        assert!(!snapshot.store().contains("a2"));
        assert!(snapshot.store().contains("a3"));
        assert!(snapshot.store().contains("b1"));
        snapshot.verify().expect("consistent after replace");
    }

    #[test]
    fn model_mix_is_rejected() {
        let mut snapshot = seeded_snapshot();
        let result = snapshot.replace_source(
            fingerprint("doc-c"),
            vec![record("c1", "doc-c")],
            vec![vec![1.0, 1.0]],
            "other-model",
        );
        assert!(matches!(result, Err(IngestError::EmbedderMismatch { .. })));
        snapshot.verify().expect("snapshot untouched");
        assert_eq!(snapshot.index().len(), 3);
    }

    #[test]
    fn dimension_mix_is_rejected_without_mutation() {
        let mut snapshot = seeded_snapshot();
        let result = snapshot.replace_source(
            fingerprint("doc-c"),
            vec![record("c1", "doc-c")],
            vec![vec![1.0, 1.0, 1.0]],
            "hashed-ngram-v1",
        );
        assert!(matches!(
            result,
            Err(IngestError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
        assert_eq!(snapshot.index().len(), 3);
        assert!(!snapshot.store().contains("c1"));
    }

    #[test]
    fn commit_then_load_round_trips() {
        let dir = tempdir().expect("tempdir");
        let mut snapshot = seeded_snapshot();
        snapshot.commit(dir.path()).expect("commit");

        let restored = CorpusSnapshot::load(dir.path()).expect("load");
        assert_eq!(restored.index(), snapshot.index());
        assert_eq!(restored.store(), snapshot.store());
        assert_eq!(
            restored.manifest().model_id,
            snapshot.manifest().model_id
        );
        assert_eq!(restored.chunk_id_for_position(2), Some("b1"));
    }

    #[test]
    fn load_or_empty_starts_fresh_without_manifest() {
        let dir = tempdir().expect("tempdir");
        let snapshot = CorpusSnapshot::load_or_empty(dir.path()).expect("load");
        assert_eq!(snapshot.index().len(), 0);
    }

    #[test]
    fn missing_bridge_file_is_corruption_not_fresh_start() {
        let dir = tempdir().expect("tempdir");
        let mut snapshot = seeded_snapshot();
        snapshot.commit(dir.path()).expect("commit");
        fs::remove_file(dir.path().join(BRIDGE_FILE)).expect("remove bridge");

        assert!(CorpusSnapshot::load_or_empty(dir.path()).is_err());
    }

    #[test]
    fn tampered_bridge_fails_verification() {
        let dir = tempdir().expect("tempdir");
        let mut snapshot = seeded_snapshot();
        snapshot.commit(dir.path()).expect("commit");

        let bridge_path = dir.path().join(BRIDGE_FILE);
        let mut bridge: Vec<String> =
            serde_json::from_slice(&fs::read(&bridge_path).expect("read")).expect("parse");
        bridge.pop();
        fs::write(&bridge_path, serde_json::to_vec_pretty(&bridge).expect("encode"))
            .expect("write");

        assert!(matches!(
            CorpusSnapshot::load(dir.path()),
            Err(RetrievalError::IndexCorruption(_))
        ));
    }

    #[test]
    fn lock_is_exclusive_and_released_on_drop() {
        let dir = tempdir().expect("tempdir");
        let lock = IngestLock::acquire(dir.path()).expect("first lock");
        assert!(matches!(
            IngestLock::acquire(dir.path()),
            Err(IngestError::LockHeld(_))
        ));
        drop(lock);
        IngestLock::acquire(dir.path()).expect("lock after release");
    }
}
