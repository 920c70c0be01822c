use chrono::Utc;
use clap::{Parser, Subcommand};
use doc_rag_core::{
    embedder_from_config, ingest_folder, CorpusSnapshot, EngineConfig, IngestLock, QueryFilters,
    Retriever, HASHED_NGRAM_MODEL_ID,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "doc-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the persisted corpus snapshot
    #[arg(long, default_value = "./data", env = "DOC_RAG_DATA_DIR")]
    data_dir: PathBuf,

    /// Embedding model identifier
    #[arg(long, default_value = HASHED_NGRAM_MODEL_ID, env = "DOC_RAG_EMBEDDING_MODEL")]
    embedding_model: String,

    /// Embeddings service base URL; omit to use the built-in hashed embedder
    #[arg(long, env = "DOC_RAG_EMBEDDING_ENDPOINT")]
    embedding_endpoint: Option<String>,

    /// Embedding dimension
    #[arg(long, default_value = "384")]
    embedding_dimensions: usize,

    /// Chunk window length in characters
    #[arg(long, default_value = "500")]
    chunk_size: usize,

    /// Characters shared between consecutive chunks
    #[arg(long, default_value = "50")]
    chunk_overlap: usize,

    /// Drop hits whose similarity falls below this value
    #[arg(long, default_value = "0.0")]
    similarity_threshold: f32,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest every .txt/.md document in a folder into the snapshot.
    Ingest {
        /// Folder searched recursively for documents.
        #[arg(long)]
        folder: String,
    },
    /// Retrieve ranked, source-attributed context for a query.
    Query {
        /// Free-text query
        #[arg(long)]
        query: String,
        /// Number of chunks to return.
        #[arg(long, default_value = "5")]
        top_k: usize,
        /// Only return chunks whose source name contains this string.
        #[arg(long)]
        source: Option<String>,
        /// Only return chunks whose section label contains this string.
        #[arg(long)]
        section: Option<String>,
        /// Only return chunks from this page.
        #[arg(long)]
        page: Option<u32>,
        /// Print the assembled context block after the hit list.
        #[arg(long, default_value_t = false)]
        show_context: bool,
    },
    /// Print snapshot statistics.
    Stats,
    /// Check the persisted snapshot for corruption.
    Verify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = EngineConfig {
        chunk_size: cli.chunk_size,
        chunk_overlap: cli.chunk_overlap,
        similarity_threshold: cli.similarity_threshold,
        embedding_model: cli.embedding_model.clone(),
        embedding_endpoint: cli.embedding_endpoint.clone(),
        embedding_dimensions: cli.embedding_dimensions,
        ..EngineConfig::default()
    };
    config
        .validate()
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    let embedder =
        embedder_from_config(&config).map_err(|error| anyhow::anyhow!(error.to_string()))?;

    info!(
        version = app_version,
        model = %embedder.model_id(),
        started_at = %Utc::now().to_rfc3339(),
        "doc-rag boot"
    );

    match cli.command {
        Command::Ingest { folder } => {
            let _lock = IngestLock::acquire(&cli.data_dir)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            let mut snapshot = CorpusSnapshot::load_or_empty(&cli.data_dir)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            let report = ingest_folder(
                &mut snapshot,
                std::path::Path::new(&folder),
                embedder.as_ref(),
                &config,
            )
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            if !report.skipped_files.is_empty() {
                warn!(
                    "skipped_files={} for folder={}",
                    report.skipped_files.len(),
                    folder
                );
                for skipped in &report.skipped_files {
                    warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped document");
                }
            }

            snapshot
                .commit(&cli.data_dir)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            for document in &report.reports {
                println!(
                    "{}: {} chunks{}",
                    document.source_name,
                    document.chunk_count,
                    if document.replaced_previous {
                        " (replaced previous ingestion)"
                    } else {
                        ""
                    }
                );
            }
            println!(
                "{} chunks across {} documents ingested at {}",
                report.total_chunks(),
                report.reports.len(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Query {
            query,
            top_k,
            source,
            section,
            page,
            show_context,
        } => {
            let snapshot = CorpusSnapshot::load_or_empty(&cli.data_dir)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            let retriever = Retriever::new(embedder.as_ref(), &snapshot, &config);
            let filters = QueryFilters {
                source,
                section,
                page,
            };

            let outcome = retriever
                .retrieve_filtered(&query, top_k, &filters)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            println!("query: {}", outcome.query);
            if outcome.hits.is_empty() {
                println!("no context available");
            }
            for hit in &outcome.hits {
                println!(
                    "[{}] distance={:.4} similarity={:.2} chunk={} source={}",
                    hit.rank,
                    hit.distance,
                    hit.similarity(),
                    hit.chunk_id,
                    hit.record.source_name
                );
                if let Some(page) = hit.record.page_number {
                    println!("  page={page}");
                }
                if let Some(section) = &hit.record.section_label {
                    println!("  section={section}");
                }
                println!("  chunk_text:\n{}", hit.record.text);
            }

            if show_context {
                match outcome.context.text() {
                    Some(text) => println!("context:\n{text}"),
                    None => println!("context: no context available"),
                }
            }
        }
        Command::Stats => {
            let snapshot = CorpusSnapshot::load_or_empty(&cli.data_dir)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            let stats = snapshot.stats();

            println!("total_chunks: {}", stats.total_chunks);
            println!(
                "embedding_dimension: {}",
                stats
                    .embedding_dimension
                    .map(|dimension| dimension.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
            println!("metadata_count: {}", stats.metadata_count);
            println!("unique_sources: {}", stats.unique_sources);
            println!(
                "model: {}",
                stats.model_id.unwrap_or_else(|| "-".to_string())
            );
        }
        Command::Verify => {
            let snapshot = CorpusSnapshot::load(&cli.data_dir)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            snapshot
                .verify()
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!(
                "snapshot ok: {} vectors, {} sources",
                snapshot.stats().total_chunks,
                snapshot.stats().unique_sources
            );
        }
    }

    Ok(())
}
