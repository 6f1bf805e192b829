use crate::models::{Chunk, Collection, VectorMatch};
use crate::traits::VectorIndex;
use crate::StoreError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

pub struct QdrantStore {
    endpoint: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        vector_size: usize,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint)?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
            vector_size,
        })
    }

    fn collection_url(&self, collection: Collection) -> String {
        format!("{}/collections/{}", self.endpoint, collection.name())
    }

    pub async fn ensure_collection(&self, collection: Collection) -> Result<(), StoreError> {
        let response = self.client.get(self.collection_url(collection)).send().await?;

        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.collection_url(collection))
            .json(&json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": "Cosine"
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        Ok(())
    }
}

fn backend_error(status: StatusCode) -> StoreError {
    StoreError::BackendResponse {
        backend: "qdrant".to_string(),
        details: status.to_string(),
    }
}

/// Qdrant only accepts integers or UUIDs as point ids; the first 128 bits of
/// the hex chunk id keep the mapping deterministic.
pub fn point_id(chunk_id: &str) -> Uuid {
    let prefix = chunk_id.get(..32).unwrap_or(chunk_id);
    u128::from_str_radix(prefix, 16)
        .map(Uuid::from_u128)
        .unwrap_or_else(|_| Uuid::from_u128(fnv1a_128(chunk_id.as_bytes())))
}

fn fnv1a_128(bytes: &[u8]) -> u128 {
    let mut hash: u128 = 0x6c62272e07bb014262b821756295c58d;
    for byte in bytes {
        hash ^= u128::from(*byte);
        hash = hash.wrapping_mul(0x0000000001000000000000000000013B);
    }
    hash
}

fn application_filter(application_id: &str) -> Value {
    json!({ "key": "application_id", "match": { "value": application_id } })
}

fn malformed(details: String) -> StoreError {
    StoreError::BackendResponse {
        backend: "qdrant".to_string(),
        details,
    }
}

fn parse_matches(parsed: &Value) -> Result<Vec<VectorMatch>, StoreError> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("search response without a result array".to_string()))?;

    hits.iter()
        .enumerate()
        .map(|(position, hit)| {
            let payload = hit
                .pointer("/payload")
                .cloned()
                .ok_or_else(|| malformed(format!("search hit {position} has no payload")))?;
            let chunk: Chunk = serde_json::from_value(payload).map_err(|error| {
                malformed(format!("search hit {position} has an invalid payload: {error}"))
            })?;
            let score = hit
                .pointer("/score")
                .and_then(Value::as_f64)
                .ok_or_else(|| malformed(format!("search hit {position} has no score")))?;
            Ok(VectorMatch {
                chunk,
                distance: 1.0 - score,
            })
        })
        .collect()
}

#[async_trait]
impl VectorIndex for QdrantStore {
    fn backend(&self) -> &str {
        "qdrant"
    }

    async fn upsert(
        &self,
        collection: Collection,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), StoreError> {
        if chunks.len() != embeddings.len() {
            return Err(StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: format!(
                    "embedding count {} doesn't match chunk count {}",
                    embeddings.len(),
                    chunks.len()
                ),
            });
        }

        let points = chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, embedding)| {
                if embedding.len() != self.vector_size {
                    return Err(StoreError::DimensionMismatch {
                        collection: collection.name().to_string(),
                        expected: self.vector_size,
                        actual: embedding.len(),
                    });
                }

                Ok(json!({
                    "id": point_id(&chunk.id),
                    "vector": embedding,
                    "payload": serde_json::to_value(chunk)?,
                }))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        self.ensure_collection(collection).await?;

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url(collection)))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        Ok(())
    }

    async fn remove_stale(
        &self,
        collection: Collection,
        application_id: &str,
        document: &str,
        keep_below: usize,
    ) -> Result<(), StoreError> {
        let response = self
            .client
            .post(format!(
                "{}/points/delete?wait=true",
                self.collection_url(collection)
            ))
            .json(&json!({
                "filter": {
                    "must": [
                        application_filter(application_id),
                        { "key": "document", "match": { "value": document } },
                        { "key": "chunk_index", "range": { "gte": keep_below } }
                    ]
                }
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
            return Ok(());
        }
        Err(backend_error(response.status()))
    }

    async fn query(
        &self,
        collection: Collection,
        vector: &[f32],
        limit: usize,
        application_id: Option<&str>,
    ) -> Result<Vec<VectorMatch>, StoreError> {
        if vector.len() != self.vector_size {
            return Err(StoreError::DimensionMismatch {
                collection: collection.name().to_string(),
                expected: self.vector_size,
                actual: vector.len(),
            });
        }

        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(application_id) = application_id {
            body["filter"] = json!({ "must": [application_filter(application_id)] });
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url(collection)))
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        parse_matches(&parsed)
    }

    async fn count(&self, collection: Collection) -> Result<usize, StoreError> {
        let response = self
            .client
            .post(format!("{}/points/count", self.collection_url(collection)))
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: "count response without result.count".to_string(),
            })
    }

    async fn clear(&self, collection: Collection) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.collection_url(collection))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
            return Ok(());
        }
        Err(backend_error(response.status()))
    }
}
