use crate::chunking::{build_chunks, prepare_document};
use crate::config::EngineConfig;
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::models::{
    Document, DocumentBody, DocumentFingerprint, FolderIngestionReport, FormatTag,
    IngestionReport, SkippedFile,
};
use crate::snapshot::CorpusSnapshot;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Recursively find ingestible text documents under `folder`, sorted for
/// deterministic ingestion order.
pub fn discover_text_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if format_for_path(entry.path()).is_some() {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

fn format_for_path(path: &Path) -> Option<FormatTag> {
    let extension = path.extension().and_then(|ext| ext.to_str())?;
    if extension.eq_ignore_ascii_case("txt") {
        Some(FormatTag::PlainText)
    } else if extension.eq_ignore_ascii_case("md") {
        Some(FormatTag::Markdown)
    } else {
        None
    }
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn source_id_for_path(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Read one text document from disk, fingerprinting it for the manifest.
pub fn load_text_document(path: &Path) -> Result<Document, IngestError> {
    let format = format_for_path(path).ok_or_else(|| {
        IngestError::InvalidArgument(format!(
            "unsupported document format: {}",
            path.display()
        ))
    })?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
        })?;
    let checksum = digest_file(path)?;
    let text = fs::read_to_string(path)?;

    Ok(Document {
        fingerprint: DocumentFingerprint {
            source_id: source_id_for_path(path),
            source_name: name.to_string(),
            source_path: path.to_string_lossy().to_string(),
            format,
            checksum,
            ingested_at: Utc::now(),
        },
        body: DocumentBody::Whole(text),
    })
}

/// Ingest one document into the snapshot: clean, chunk, embed, then swap the
/// source's rows in. All embedding and validation happens before the snapshot
/// mutates, so a failure anywhere leaves it exactly as it was. The caller
/// persists the result with [`CorpusSnapshot::commit`].
pub fn ingest_document(
    snapshot: &mut CorpusSnapshot,
    document: &Document,
    embedder: &dyn Embedder,
    config: &EngineConfig,
) -> Result<IngestionReport, IngestError> {
    config.validate()?;

    let manifest = snapshot.manifest();
    if manifest.metric != config.metric {
        return Err(IngestError::InvalidConfig(format!(
            "distance metric {:?} does not match the snapshot's {:?}",
            config.metric, manifest.metric
        )));
    }
    if let Some(model_id) = &manifest.model_id {
        if model_id != embedder.model_id() {
            return Err(IngestError::EmbedderMismatch {
                expected: model_id.clone(),
                actual: embedder.model_id().to_string(),
            });
        }
    }
    if let Some(dimension) = manifest.dimension {
        if dimension != embedder.dimensions() {
            return Err(IngestError::DimensionMismatch {
                expected: dimension,
                actual: embedder.dimensions(),
            });
        }
    }

    let prepared = prepare_document(document)?;
    let records = build_chunks(
        &document.fingerprint,
        &prepared,
        config.chunk_size,
        config.chunk_overlap,
    )?;

    let texts: Vec<String> = records.iter().map(|record| record.text.clone()).collect();
    let embeddings = embedder.embed_batch(&texts)?;
    if embeddings.len() != records.len() {
        return Err(IngestError::InvalidArgument(format!(
            "embedder returned {} vectors for {} chunks",
            embeddings.len(),
            records.len()
        )));
    }
    for vector in &embeddings {
        if vector.len() != embedder.dimensions() {
            return Err(IngestError::DimensionMismatch {
                expected: embedder.dimensions(),
                actual: vector.len(),
            });
        }
    }

    let chunk_count = records.len();
    let replaced_previous = snapshot.replace_source(
        document.fingerprint.clone(),
        records,
        embeddings,
        embedder.model_id(),
    )?;

    info!(
        source = %document.fingerprint.source_name,
        chunks = chunk_count,
        replaced = replaced_previous,
        "document ingested"
    );

    Ok(IngestionReport {
        source_id: document.fingerprint.source_id.clone(),
        source_name: document.fingerprint.source_name.clone(),
        chunk_count,
        replaced_previous,
    })
}

/// Ingest every text document under `folder`, best effort: a document that
/// fails to load or embed is reported as skipped instead of aborting the
/// batch, while each ingested document remains all-or-nothing.
pub fn ingest_folder(
    snapshot: &mut CorpusSnapshot,
    folder: &Path,
    embedder: &dyn Embedder,
    config: &EngineConfig,
) -> Result<FolderIngestionReport, IngestError> {
    let files = discover_text_files(folder);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no text documents found in {}",
            folder.display()
        )));
    }

    let mut reports = Vec::new();
    let mut skipped_files = Vec::new();

    for path in files {
        let outcome = load_text_document(&path)
            .and_then(|document| ingest_document(snapshot, &document, embedder, config));

        match outcome {
            Ok(report) => reports.push(report),
            Err(error) => {
                warn!(path = %path.display(), reason = %error, "skipped document");
                skipped_files.push(SkippedFile {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(FolderIngestionReport {
        reports,
        skipped_files,
    })
}
