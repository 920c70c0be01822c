pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod ingest;
pub mod metadata;
pub mod models;
pub mod retriever;
pub mod snapshot;
pub mod traits;

pub use chunking::{
    build_chunks, chunk_text, normalize_whitespace, prepare_document, ChunkWindow, PreparedText,
};
pub use config::{DistanceMetric, EngineConfig};
pub use embeddings::{
    embedder_from_config, CharacterNgramEmbedder, Embedder, HttpEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS, HASHED_NGRAM_MODEL_ID,
};
pub use error::{EmbedError, IngestError, RetrievalError};
pub use index::FlatIndex;
pub use ingest::{
    digest_file, discover_text_files, ingest_document, ingest_folder, load_text_document,
};
pub use metadata::MetadataStore;
pub use models::{
    ChunkRecord, ContextBlock, Document, DocumentBody, DocumentFingerprint,
    FolderIngestionReport, FormatTag, IndexHit, IndexStats, IngestionReport, PageText,
    QueryFilters, RetrievalOutcome, ScoredChunk, SkippedFile, SourceReference,
};
pub use retriever::Retriever;
pub use snapshot::{CorpusSnapshot, IngestLock, SnapshotManifest};
pub use traits::{ChunkLookup, VectorSearch};
