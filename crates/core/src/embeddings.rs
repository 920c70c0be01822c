use crate::config::EngineConfig;
use crate::error::EmbedError;
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;
pub const HASHED_NGRAM_MODEL_ID: &str = "hashed-ngram-v1";

/// Text-to-vector seam. Implementations must be deterministic for a fixed
/// model identifier and must emit the same dimension on every call; the
/// engine rejects anything else rather than truncating or padding.
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Deterministic offline embedder: FNV-hashed character trigrams bucketed
/// into a fixed-size vector, L2-normalized. No model download, no network;
/// good enough for tests and air-gapped corpora.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn model_id(&self) -> &str {
        HASHED_NGRAM_MODEL_ID
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return Ok(vector);
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        Ok(vector)
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Client for an Ollama-compatible `/api/embed` endpoint. The blocking
/// reqwest client is bridged into async callers with `block_in_place`, so
/// this type expects to run under a multi-threaded runtime.
pub struct HttpEmbedder {
    endpoint: Url,
    model: String,
    dimensions: usize,
    client: reqwest::blocking::Client,
}

impl HttpEmbedder {
    pub fn new(endpoint: &str, model: &str, dimensions: usize) -> Result<Self, EmbedError> {
        let endpoint = Url::parse(endpoint)?;
        Ok(Self {
            endpoint,
            model: model.to_string(),
            dimensions,
            client: reqwest::blocking::Client::new(),
        })
    }

    fn embed_batch_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()?;

        if !response.status().is_success() {
            return Err(EmbedError::Backend(format!(
                "embeddings endpoint {} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let payload: EmbedResponse = response.json()?;
        if payload.embeddings.len() != texts.len() {
            return Err(EmbedError::Backend(format!(
                "requested {} embeddings, endpoint returned {}",
                texts.len(),
                payload.embeddings.len()
            )));
        }

        Ok(payload.embeddings)
    }
}

impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed_batch(std::slice::from_ref(&text.to_string()))?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::Backend("endpoint returned no embedding".to_string()))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        tokio::task::block_in_place(|| self.embed_batch_blocking(texts))
    }
}

/// Build the process-wide embedder once, from validated configuration. The
/// handle is passed by reference to ingestion and retrieval call sites;
/// dropping it is the teardown.
pub fn embedder_from_config(config: &EngineConfig) -> Result<Box<dyn Embedder>, EmbedError> {
    match &config.embedding_endpoint {
        Some(endpoint) => Ok(Box::new(HttpEmbedder::new(
            endpoint,
            &config.embedding_model,
            config.embedding_dimensions,
        )?)),
        None => {
            if config.embedding_model != HASHED_NGRAM_MODEL_ID {
                return Err(EmbedError::Backend(format!(
                    "model {:?} needs an embedding endpoint; only {HASHED_NGRAM_MODEL_ID:?} runs locally",
                    config.embedding_model
                )));
            }
            Ok(Box::new(CharacterNgramEmbedder {
                dimensions: config.embedding_dimensions,
            }))
        }
    }
}
