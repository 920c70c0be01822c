use crate::config::EngineConfig;
use crate::embeddings::Embedder;
use crate::error::RetrievalError;
use crate::models::{
    ContextBlock, QueryFilters, RetrievalOutcome, ScoredChunk, SourceReference,
};
use crate::traits::{ChunkLookup, VectorSearch};
use std::fmt::Write as _;
use tracing::debug;

/// Translates a natural-language query into ranked, source-attributed
/// context. The single public entry point of the retrieval path.
pub struct Retriever<'a, S> {
    embedder: &'a dyn Embedder,
    corpus: &'a S,
    config: &'a EngineConfig,
}

impl<'a, S> Retriever<'a, S>
where
    S: VectorSearch + ChunkLookup + Sync,
{
    pub fn new(embedder: &'a dyn Embedder, corpus: &'a S, config: &'a EngineConfig) -> Self {
        Self {
            embedder,
            corpus,
            config,
        }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        self.retrieve_filtered(query, top_k, &QueryFilters::default())
            .await
    }

    /// Retrieve with the configured default breadth.
    pub async fn retrieve_default(&self, query: &str) -> Result<RetrievalOutcome, RetrievalError> {
        self.retrieve(query, self.config.top_k).await
    }

    pub async fn retrieve_filtered(
        &self,
        query: &str,
        top_k: usize,
        filters: &QueryFilters,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        if top_k == 0 {
            return Err(RetrievalError::InvalidArgument(
                "top_k must be at least 1".to_string(),
            ));
        }
        if query.trim().is_empty() {
            return Err(RetrievalError::InvalidArgument(
                "query is empty".to_string(),
            ));
        }

        // An empty corpus is not an error: callers decide whether to answer
        // ungrounded.
        if self.corpus.vector_count() == 0 {
            return Ok(RetrievalOutcome {
                query: query.to_string(),
                hits: Vec::new(),
                context: ContextBlock::Unavailable,
            });
        }

        let query_vector = self.embedder.embed(query)?;
        if let Some(dimension) = self.corpus.vector_dimension() {
            if query_vector.len() != dimension {
                return Err(RetrievalError::DimensionMismatch {
                    expected: dimension,
                    actual: query_vector.len(),
                });
            }
        }

        // Filters and thresholds discard hits after the fact, so over-fetch
        // to keep top_k results reachable.
        let narrowing = !filters.is_empty() || self.config.similarity_threshold > 0.0;
        let fetch_k = if narrowing { top_k * 2 } else { top_k };

        let index_hits = self.corpus.nearest(&query_vector, fetch_k).await?;
        debug!(query_len = query.len(), hits = index_hits.len(), "index search done");

        let chunk_ids: Vec<String> = index_hits
            .iter()
            .map(|hit| {
                self.corpus.chunk_id_at(hit.position).ok_or_else(|| {
                    RetrievalError::IndexCorruption(format!(
                        "index position {} has no chunk_id mapping",
                        hit.position
                    ))
                })
            })
            .collect::<Result<_, _>>()?;

        let records = self
            .corpus
            .fetch_chunks(&chunk_ids)
            .await
            .map_err(|error| match error {
                // A bridged id that is missing from the metadata store is a
                // store-level inconsistency, not a caller mistake.
                RetrievalError::NotFound(id) => RetrievalError::IndexCorruption(format!(
                    "bridge entry {id} has no metadata record"
                )),
                other => other,
            })?;

        let mut hits = Vec::new();
        for (hit, chunk_id) in index_hits.iter().zip(chunk_ids.into_iter()) {
            let record = records.get(&chunk_id).cloned().ok_or_else(|| {
                RetrievalError::IndexCorruption(format!(
                    "bridge entry {chunk_id} has no metadata record"
                ))
            })?;
            let scored = ScoredChunk {
                chunk_id,
                distance: hit.distance,
                rank: 0,
                record,
            };
            if self.config.similarity_threshold > 0.0
                && scored.similarity() < self.config.similarity_threshold
            {
                continue;
            }
            if !filters.matches(&scored.record) {
                continue;
            }
            hits.push(scored);
            if hits.len() == top_k {
                break;
            }
        }
        for (index, hit) in hits.iter_mut().enumerate() {
            hit.rank = index + 1;
        }

        let context = assemble_context(&hits);
        Ok(RetrievalOutcome {
            query: query.to_string(),
            hits,
            context,
        })
    }
}

/// Concatenate hit texts in rank order, each prefixed by a citation header,
/// and collect one reference per distinct source location.
fn assemble_context(hits: &[ScoredChunk]) -> ContextBlock {
    if hits.is_empty() {
        return ContextBlock::Unavailable;
    }

    let mut text = String::new();
    let mut references: Vec<SourceReference> = Vec::new();

    for hit in hits {
        let mut header = format!(
            "[Chunk {} - Source: {}",
            hit.rank, hit.record.source_name
        );
        if let Some(page) = hit.record.page_number {
            let _ = write!(header, ", Page: {page}");
        }
        if let Some(section) = &hit.record.section_label {
            let _ = write!(header, ", Section: {section}");
        }
        let _ = write!(header, ", Similarity: {:.2}]", hit.similarity());

        text.push_str(&header);
        text.push('\n');
        text.push_str(&hit.record.text);
        text.push_str("\n\n");

        let already_cited = references.iter().any(|reference| {
            reference.source_name == hit.record.source_name
                && reference.page_number == hit.record.page_number
                && reference.section_label == hit.record.section_label
        });
        if !already_cited {
            references.push(SourceReference {
                source_name: hit.record.source_name.clone(),
                chunk_id: hit.chunk_id.clone(),
                page_number: hit.record.page_number,
                section_label: hit.record.section_label.clone(),
            });
        }
    }

    ContextBlock::Assembled { text, references }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkRecord, DocumentFingerprint, FormatTag, IndexHit};
    use crate::snapshot::CorpusSnapshot;
    use crate::embeddings::CharacterNgramEmbedder;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::BTreeMap;

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

    fn record(chunk_id: &str, source_id: &str, text: &str) -> ChunkRecord {
        ChunkRecord {
            chunk_id: chunk_id.to_string(),
            source_id: source_id.to_string(),
            source_name: format!("{source_id}.txt"),
            chunk_index: 0,
            start_offset: 0,
            end_offset: text.chars().count(),
            overlap_with_prev: 0,
            page_number: Some(1),
            section_label: None,
            text: text.to_string(),
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            embedding_dimensions: 16,
            ..EngineConfig::default()
        }
    }

    fn seeded_corpus(embedder: &CharacterNgramEmbedder) -> CorpusSnapshot {
        let mut snapshot = CorpusSnapshot::empty();
        for (source, texts) in [
            ("doc-a", ["hydraulic pump pressure", "valve maintenance steps"]),
            ("doc-b", ["electrical wiring diagram", "breaker panel layout"]),
        ] {
            let records: Vec<ChunkRecord> = texts
                .iter()
                .enumerate()
                .map(|(index, text)| record(&format!("{source}-{index}"), source, text))
                .collect();
            let embeddings: Vec<Vec<f32>> = texts
                .iter()
                .map(|text| embedder.embed(text).expect("embed"))
                .collect();
            snapshot
                .replace_source(fingerprint(source), records, embeddings, embedder.model_id())
                .expect("seed corpus");
        }
        snapshot
    }

    #[tokio::test]
    async fn empty_corpus_signals_no_context() {
        let embedder = CharacterNgramEmbedder { dimensions: 16 };
        let corpus = CorpusSnapshot::empty();
        let config = test_config();
        let retriever = Retriever::new(&embedder, &corpus, &config);

        let outcome = retriever.retrieve("anything at all", 5).await.expect("retrieve");
        assert!(outcome.hits.is_empty());
        assert_eq!(outcome.context, ContextBlock::Unavailable);
    }

    #[tokio::test]
    async fn top_k_hits_are_ranked_by_ascending_distance() {
        let embedder = CharacterNgramEmbedder { dimensions: 16 };
        let corpus = seeded_corpus(&embedder);
        let config = test_config();
        let retriever = Retriever::new(&embedder, &corpus, &config);

        let outcome = retriever
            .retrieve("hydraulic pump pressure", 3)
            .await
            .expect("retrieve");

        assert_eq!(outcome.hits.len(), 3);
        assert_eq!(outcome.hits[0].rank, 1);
        assert_eq!(outcome.hits[0].chunk_id, "doc-a-0");
        for pair in outcome.hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
        assert!(outcome.context.is_available());
        let text = outcome.context.text().expect("context text");
        assert!(text.contains("[Chunk 1 - Source: doc-a.txt"));
        assert!(text.contains("hydraulic pump pressure"));
    }

    #[tokio::test]
    async fn zero_top_k_is_invalid() {
        let embedder = CharacterNgramEmbedder { dimensions: 16 };
        let corpus = seeded_corpus(&embedder);
        let config = test_config();
        let retriever = Retriever::new(&embedder, &corpus, &config);

        assert!(matches!(
            retriever.retrieve("query", 0).await,
            Err(RetrievalError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn query_embedder_dimension_mismatch_is_fatal() {
        let index_embedder = CharacterNgramEmbedder { dimensions: 16 };
        let corpus = seeded_corpus(&index_embedder);
        let query_embedder = CharacterNgramEmbedder { dimensions: 24 };
        let config = test_config();
        let retriever = Retriever::new(&query_embedder, &corpus, &config);

        assert!(matches!(
            retriever.retrieve("hydraulic pump", 2).await,
            Err(RetrievalError::DimensionMismatch {
                expected: 16,
                actual: 24
            })
        ));
    }

    #[tokio::test]
    async fn source_filter_narrows_results() {
        let embedder = CharacterNgramEmbedder { dimensions: 16 };
        let corpus = seeded_corpus(&embedder);
        let config = test_config();
        let retriever = Retriever::new(&embedder, &corpus, &config);

        let filters = QueryFilters {
            source: Some("doc-b".to_string()),
            ..QueryFilters::default()
        };
        let outcome = retriever
            .retrieve_filtered("wiring diagram", 4, &filters)
            .await
            .expect("retrieve");

        assert!(!outcome.hits.is_empty());
        assert!(outcome
            .hits
            .iter()
            .all(|hit| hit.record.source_name == "doc-b.txt"));
    }

    struct BrokenBridge {
        inner: CorpusSnapshot,
    }

    #[async_trait]
    impl VectorSearch for BrokenBridge {
        fn vector_count(&self) -> usize {
            self.inner.vector_count()
        }

        fn vector_dimension(&self) -> Option<usize> {
            self.inner.vector_dimension()
        }

        async fn nearest(
            &self,
            query_vector: &[f32],
            k: usize,
        ) -> Result<Vec<IndexHit>, RetrievalError> {
            self.inner.nearest(query_vector, k).await
        }
    }

    #[async_trait]
    impl ChunkLookup for BrokenBridge {
        fn chunk_id_at(&self, _position: usize) -> Option<String> {
            None
        }

        async fn fetch_chunks(
            &self,
            chunk_ids: &[String],
        ) -> Result<BTreeMap<String, ChunkRecord>, RetrievalError> {
            self.inner.fetch_chunks(chunk_ids).await
        }
    }

    #[tokio::test]
    async fn missing_bridge_entry_surfaces_as_corruption() {
        let embedder = CharacterNgramEmbedder { dimensions: 16 };
        let corpus = BrokenBridge {
            inner: seeded_corpus(&embedder),
        };
        let config = test_config();
        let retriever = Retriever::new(&embedder, &corpus, &config);

        assert!(matches!(
            retriever.retrieve("hydraulic pump", 2).await,
            Err(RetrievalError::IndexCorruption(_))
        ));
    }

    #[tokio::test]
    async fn references_are_deduplicated_by_location() {
        let embedder = CharacterNgramEmbedder { dimensions: 16 };
        let corpus = seeded_corpus(&embedder);
        let config = test_config();
        let retriever = Retriever::new(&embedder, &corpus, &config);

        let outcome = retriever.retrieve("pump valve", 4).await.expect("retrieve");
        match &outcome.context {
            ContextBlock::Assembled { references, .. } => {
                // Two sources, both on page 1 with no section: one reference
                // per source.
                assert_eq!(references.len(), 2);
            }
            ContextBlock::Unavailable => panic!("expected assembled context"),
        }
    }

    #[tokio::test]
    async fn retrieval_is_identical_after_persist_and_restore() {
        let embedder = CharacterNgramEmbedder { dimensions: 16 };
        let mut corpus = seeded_corpus(&embedder);
        let config = test_config();

        let dir = tempfile::tempdir().expect("tempdir");
        corpus.commit(dir.path()).expect("commit");
        let restored = CorpusSnapshot::load(dir.path()).expect("load");

        let before = Retriever::new(&embedder, &corpus, &config)
            .retrieve("valve maintenance", 3)
            .await
            .expect("retrieve");
        let after = Retriever::new(&embedder, &restored, &config)
            .retrieve("valve maintenance", 3)
            .await
            .expect("retrieve");

        assert_eq!(before, after);
    }
}
