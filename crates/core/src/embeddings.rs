use crate::error::ModelError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT: usize = 384;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ModelError::invalid_response(self.name(), "empty embedding batch"))
    }
}

/// Offline embedder hashing character trigrams into a fixed-size,
/// L2-normalized vector. Deterministic across runs and machines, so a local
/// store built without an embedding service can be queried later without
/// re-embedding. Lexical only: `salary` and `income` do not land close.
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

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn gram_bucket(gram: &[char], buckets: usize) -> usize {
    let mut hash = FNV_OFFSET;
    let mut utf8 = [0u8; 4];
    for ch in gram {
        for byte in ch.encode_utf8(&mut utf8).bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    (hash % buckets as u64) as usize
}

impl CharacterNgramEmbedder {
    /// Whitespace runs count as one space, so layout differences between
    /// extractors do not move the vector. Texts shorter than three
    /// characters hash as a single gram.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let chars = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
            .chars()
            .collect::<Vec<_>>();

        match chars.len() {
            0 => return vector,
            1 | 2 => {
                let bucket = gram_bucket(&chars, vector.len());
                vector[bucket] += 1.0;
            }
            _ => {
                for gram in chars.windows(3) {
                    let bucket = gram_bucket(gram, vector.len());
                    vector[bucket] += 1.0;
                }
            }
        }

        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        vector.iter_mut().for_each(|value| *value /= norm);
        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn name(&self) -> &str {
        "char-trigram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

#[derive(Debug, Clone)]
pub struct HttpEmbedderConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub dimensions: usize,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Client for an embedding service speaking the `/embeddings` contract
/// (`{model, input}` in, `{data: [{index, embedding}]}` out).
pub struct HttpEmbedder {
    config: HttpEmbedderConfig,
    client: Client,
}

impl HttpEmbedder {
    pub fn new(config: HttpEmbedderConfig) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| ModelError::unavailable(config.model.clone(), error))?;
        Ok(Self { config, client })
    }

    fn url(&self) -> String {
        format!("{}/embeddings", self.config.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn name(&self) -> &str {
        &self.config.model
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(self.url()).json(&EmbeddingRequest {
            model: &self.config.model,
            input: texts,
        });
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                ModelError::Timeout {
                    model: self.config.model.clone(),
                    after: self.config.timeout,
                }
            } else {
                ModelError::unavailable(self.config.model.clone(), error)
            }
        })?;

        if !response.status().is_success() {
            return Err(ModelError::unavailable(
                self.config.model.clone(),
                format!("embedding service returned {}", response.status()),
            ));
        }

        let payload: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| ModelError::invalid_response(self.config.model.clone(), error))?;

        order_embeddings(payload, texts.len(), self.config.dimensions, &self.config.model)
    }
}

fn order_embeddings(
    payload: EmbeddingResponse,
    expected: usize,
    dimensions: usize,
    model: &str,
) -> Result<Vec<Vec<f32>>, ModelError> {
    if payload.data.len() != expected {
        return Err(ModelError::invalid_response(
            model,
            format!("expected {expected} embeddings, got {}", payload.data.len()),
        ));
    }

    let mut ordered: Vec<Option<Vec<f32>>> = vec![None; expected];
    for (position, row) in payload.data.into_iter().enumerate() {
        let slot = row.index.unwrap_or(position);
        if slot >= expected || ordered[slot].is_some() {
            return Err(ModelError::invalid_response(
                model,
                format!("embedding index {slot} is out of range or repeated"),
            ));
        }
        if row.embedding.len() != dimensions {
            return Err(ModelError::invalid_response(
                model,
                format!(
                    "embedding dimension {} != {dimensions}",
                    row.embedding.len()
                ),
            ));
        }
        ordered[slot] = Some(row.embedding);
    }

    Ok(ordered.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Monthly salary credited").await.unwrap();
        let second = embedder.embed("Monthly salary credited").await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn layout_and_case_do_not_change_the_vector() {
        let embedder = CharacterNgramEmbedder::default();
        assert_eq!(
            embedder.embed_one("Monthly  salary\ncredited"),
            embedder.embed_one("monthly salary credited")
        );
    }

    #[test]
    fn short_and_empty_texts_are_handled() {
        let embedder = CharacterNgramEmbedder { dimensions: 16 };
        assert!(embedder.embed_one("   ").iter().all(|value| *value == 0.0));

        let short = embedder.embed_one("ID");
        let norm = short.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vectors = embedder
            .embed_batch(&["abc".to_string(), "".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|vector| vector.len() == 32));
    }

    #[test]
    fn service_rows_are_reordered_by_index() {
        let payload = EmbeddingResponse {
            data: vec![
                EmbeddingRow {
                    index: Some(1),
                    embedding: vec![0.0, 1.0],
                },
                EmbeddingRow {
                    index: Some(0),
                    embedding: vec![1.0, 0.0],
                },
            ],
        };

        let ordered = order_embeddings(payload, 2, 2, "test").unwrap();
        assert_eq!(ordered, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn wrong_dimension_is_an_invalid_response() {
        let payload = EmbeddingResponse {
            data: vec![EmbeddingRow {
                index: None,
                embedding: vec![1.0],
            }],
        };

        let error = order_embeddings(payload, 1, 3, "test").unwrap_err();
        assert!(matches!(error, ModelError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn unreachable_service_is_reported_unavailable() {
        let embedder = HttpEmbedder::new(HttpEmbedderConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            model: "all-MiniLM-L6-v2".to_string(),
            api_key: None,
            dimensions: 384,
            timeout: Duration::from_secs(2),
        })
        .unwrap();

        let error = embedder.embed("anything").await.unwrap_err();
        assert!(matches!(
            error,
            ModelError::Unavailable { .. } | ModelError::Timeout { .. }
        ));
    }
}
