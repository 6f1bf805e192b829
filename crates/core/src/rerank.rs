use crate::error::ModelError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Query-aware relevance model used for the second ranking pass.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    /// Returns one score per passage, in passage order.
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f64>, ModelError>;
}

#[derive(Debug, Clone)]
pub struct HttpRerankerConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct RerankRow {
    index: usize,
    score: f64,
}

/// Cross-encoder served behind a `/rerank` endpoint
/// (`{query, texts}` in, `[{index, score}]` out).
pub struct HttpReranker {
    config: HttpRerankerConfig,
    client: Client,
}

impl HttpReranker {
    pub fn new(config: HttpRerankerConfig) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| ModelError::unavailable(config.model.clone(), error))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f64>, ModelError> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self
            .client
            .post(format!("{}/rerank", self.config.endpoint.trim_end_matches('/')))
            .json(&RerankRequest {
                query,
                texts: passages,
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
                format!("rerank service returned {}", response.status()),
            ));
        }

        let rows: Vec<RerankRow> = response
            .json()
            .await
            .map_err(|error| ModelError::invalid_response(self.config.model.clone(), error))?;

        scores_in_passage_order(rows, passages.len(), &self.config.model)
    }
}

fn scores_in_passage_order(
    rows: Vec<RerankRow>,
    expected: usize,
    model: &str,
) -> Result<Vec<f64>, ModelError> {
    let mut scores: Vec<Option<f64>> = vec![None; expected];
    for row in rows {
        let slot = scores.get_mut(row.index).filter(|slot| slot.is_none());
        match slot {
            Some(slot) if row.score.is_finite() => *slot = Some(row.score),
            _ => {
                return Err(ModelError::invalid_response(
                    model,
                    format!("unexpected rerank row for index {}", row.index),
                ))
            }
        }
    }

    scores
        .into_iter()
        .enumerate()
        .map(|(index, score)| {
            score.ok_or_else(|| {
                ModelError::invalid_response(model, format!("no rerank score for passage {index}"))
            })
        })
        .collect()
}
