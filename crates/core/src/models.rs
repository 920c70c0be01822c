use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FormatTag {
    PlainText,
    Markdown,
}

/// Identity and provenance of an ingested document, persisted in the snapshot
/// manifest and used to drive the replace-by-source policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentFingerprint {
    pub source_id: String,
    pub source_name: String,
    pub source_path: String,
    pub format: FormatTag,
    pub checksum: String,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Raw text of a document, either as one body or split per page by the
/// upstream extractor. Parsing raw formats is the extractor's problem; the
/// engine only ever sees text.
#[derive(Debug, Clone)]
pub enum DocumentBody {
    Whole(String),
    Pages(Vec<PageText>),
}

/// An ingestion input. Exists only for the duration of an ingestion run.
#[derive(Debug, Clone)]
pub struct Document {
    pub fingerprint: DocumentFingerprint,
    pub body: DocumentBody,
}

/// Durable metadata for one chunk, keyed by `chunk_id` in the metadata store.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub source_id: String,
    pub source_name: String,
    pub chunk_index: u64,
    /// Char offset of the chunk start within the cleaned document text.
    pub start_offset: usize,
    pub end_offset: usize,
    pub overlap_with_prev: usize,
    pub page_number: Option<u32>,
    pub section_label: Option<String>,
    pub text: String,
}

/// A raw nearest-neighbor hit: an index position and its squared-L2 distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexHit {
    pub position: usize,
    pub distance: f32,
}

/// One ranked retrieval hit with its metadata joined back in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub distance: f32,
    /// 1-based; rank 1 is the smallest distance.
    pub rank: usize,
    pub record: ChunkRecord,
}

impl ScoredChunk {
    /// Distance folded into (0, 1], higher is more similar.
    pub fn similarity(&self) -> f32 {
        1.0 / (1.0 + self.distance)
    }
}

/// A deduplicated source citation for the answer footer.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceReference {
    pub source_name: String,
    pub chunk_id: String,
    pub page_number: Option<u32>,
    pub section_label: Option<String>,
}

/// The assembled, source-attributed context handed to a generator, or the
/// explicit signal that the corpus had nothing to offer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ContextBlock {
    Assembled {
        text: String,
        references: Vec<SourceReference>,
    },
    Unavailable,
}

impl ContextBlock {
    pub fn is_available(&self) -> bool {
        matches!(self, ContextBlock::Assembled { .. })
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            ContextBlock::Assembled { text, .. } => Some(text),
            ContextBlock::Unavailable => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalOutcome {
    pub query: String,
    pub hits: Vec<ScoredChunk>,
    pub context: ContextBlock,
}

/// Metadata filters applied after the index search, before ranking is
/// truncated. String filters match case-insensitive substrings; the page
/// filter is exact.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct QueryFilters {
    pub source: Option<String>,
    pub section: Option<String>,
    pub page: Option<u32>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.section.is_none() && self.page.is_none()
    }

    pub fn matches(&self, record: &ChunkRecord) -> bool {
        if let Some(source) = &self.source {
            if !record
                .source_name
                .to_lowercase()
                .contains(&source.to_lowercase())
            {
                return false;
            }
        }
        if let Some(section) = &self.section {
            match &record.section_label {
                Some(label) if label.to_lowercase().contains(&section.to_lowercase()) => {}
                _ => return false,
            }
        }
        if let Some(page) = self.page {
            if record.page_number != Some(page) {
                return false;
            }
        }
        true
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexStats {
    pub total_chunks: usize,
    pub embedding_dimension: Option<usize>,
    pub metadata_count: usize,
    pub unique_sources: usize,
    pub model_id: Option<String>,
}

/// Outcome of ingesting one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestionReport {
    pub source_id: String,
    pub source_name: String,
    pub chunk_count: usize,
    pub replaced_previous: bool,
}

pub struct SkippedFile {
    pub path: std::path::PathBuf,
    pub reason: String,
}

pub struct FolderIngestionReport {
    pub reports: Vec<IngestionReport>,
    pub skipped_files: Vec<SkippedFile>,
}

impl FolderIngestionReport {
    pub fn total_chunks(&self) -> usize {
        self.reports.iter().map(|report| report.chunk_count).sum()
    }
}
