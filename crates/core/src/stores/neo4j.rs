use crate::models::{Chunk, GraphSync};
use crate::traits::GraphIndex;
use crate::StoreError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Neo4jConfig {
    pub endpoint: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

pub struct Neo4jStore {
    config: Neo4jConfig,
    client: Client,
}

impl Neo4jStore {
    pub fn new(config: Neo4jConfig) -> Result<Self, StoreError> {
        url::Url::parse(&config.endpoint)?;
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn tx_url(&self) -> String {
        format!(
            "{}/db/{}/tx/commit",
            self.config.endpoint.trim_end_matches('/'),
            self.config.database
        )
    }

    async fn run(&self, statement: &str, parameters: Value) -> Result<Value, StoreError> {
        let response = self
            .client
            .post(self.tx_url())
            .basic_auth(&self.config.username, Some(&self.config.password))
            .json(&json!({
                "statements": [
                    {
                        "statement": statement,
                        "parameters": parameters
                    }
                ]
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::BackendResponse {
                backend: "neo4j".to_string(),
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;
        if let Some(message) = first_error(&body) {
            return Err(StoreError::BackendResponse {
                backend: "neo4j".to_string(),
                details: message,
            });
        }
        Ok(body)
    }

    /// Issues a trivial statement to find out whether the server answers.
    pub async fn probe(&self) -> Result<(), StoreError> {
        self.run("RETURN 1", json!({})).await.map(|_| ())
    }
}

fn first_error(body: &Value) -> Option<String> {
    body.pointer("/errors/0/message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn first_count(body: &Value) -> usize {
    body.pointer("/results/0/data/0/row/0")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize
}

fn graph_rows(chunks: &[Chunk]) -> Vec<Value> {
    chunks
        .iter()
        .map(|chunk| {
            json!({
                "application_id": chunk.application_id,
                "document_key": format!("{}/{}", chunk.application_id, chunk.document),
                "document_name": chunk.document,
                "document_type": chunk.document_type.as_str(),
                "source_path": chunk.source_path,
                "chunk_id": chunk.id,
                "chunk_index": chunk.chunk_index,
                "collection": chunk.collection().name(),
            })
        })
        .collect()
}

#[async_trait]
impl GraphIndex for Neo4jStore {
    async fn sync_application_graph(&self, chunks: &[Chunk]) -> Result<usize, StoreError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let rows = graph_rows(chunks);
        let cypher = r#"
            UNWIND $rows AS row
            MERGE (app:Application {application_id: row.application_id})
            MERGE (doc:Document {document_key: row.document_key})
            SET doc.name = row.document_name,
                doc.document_type = row.document_type,
                doc.source_path = row.source_path
            MERGE (app)-[:SUBMITTED]->(doc)
            MERGE (c:Chunk {chunk_id: row.chunk_id})
            SET c.chunk_index = row.chunk_index,
                c.collection = row.collection
            MERGE (doc)-[:HAS_CHUNK]->(c)
            RETURN count(c) AS chunk_count;
        "#;

        let body = self.run(cypher, json!({ "rows": rows })).await?;
        Ok(first_count(&body))
    }
}

/// Graph mirror whose availability is decided once, up front. Syncing
/// through an unavailable link reports a skip instead of a silent no-op.
pub enum GraphLink {
    Connected(Box<dyn GraphIndex>),
    Unavailable { reason: String },
}

impl GraphLink {
    pub async fn connect(config: Neo4jConfig) -> Self {
        let store = match Neo4jStore::new(config) {
            Ok(store) => store,
            Err(error) => {
                warn!(error = %error, "graph store misconfigured");
                return GraphLink::Unavailable {
                    reason: error.to_string(),
                };
            }
        };

        match store.probe().await {
            Ok(()) => GraphLink::Connected(Box::new(store)),
            Err(error) => {
                warn!(error = %error, "graph store unreachable");
                GraphLink::Unavailable {
                    reason: error.to_string(),
                }
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, GraphLink::Connected(_))
    }

    pub async fn sync(&self, chunks: &[Chunk]) -> Result<GraphSync, StoreError> {
        match self {
            GraphLink::Connected(graph) => Ok(GraphSync::Synced {
                relations: graph.sync_application_graph(chunks).await?,
            }),
            GraphLink::Unavailable { reason } => Ok(GraphSync::Skipped {
                reason: reason.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::build_chunks;
    use crate::models::DocumentType;

    #[test]
    fn documents_are_keyed_by_file_name() {
        let mut chunks = build_chunks(
            "APP-1",
            DocumentType::BankStatement,
            "data/APP-1/bank_statement_march.txt",
            "March salary 14,000 AED.",
        );
        chunks.extend(build_chunks(
            "APP-1",
            DocumentType::BankStatement,
            "data/APP-1/bank_statement_april.txt",
            "April salary 14,000 AED.",
        ));

        let rows = graph_rows(&chunks);
        assert_eq!(rows[0]["document_key"], "APP-1/bank_statement_march.txt");
        assert_eq!(rows[1]["document_key"], "APP-1/bank_statement_april.txt");
        assert_eq!(rows[1]["document_type"], "bank_statement");
    }

    #[test]
    fn transaction_errors_are_surfaced() {
        let body = json!({
            "results": [],
            "errors": [{ "code": "Neo.ClientError", "message": "syntax error" }]
        });
        assert_eq!(first_error(&body).as_deref(), Some("syntax error"));
        assert_eq!(first_error(&json!({ "results": [], "errors": [] })), None);
    }

    #[test]
    fn chunk_count_is_read_from_first_row() {
        let body = json!({
            "results": [{ "columns": ["chunk_count"], "data": [{ "row": [4] }] }],
            "errors": []
        });
        assert_eq!(first_count(&body), 4);
    }

    #[tokio::test]
    async fn unavailable_link_reports_skip() {
        let link = GraphLink::Unavailable {
            reason: "driver missing".to_string(),
        };
        assert!(!link.is_connected());
        let outcome = link.sync(&[]).await.unwrap();
        assert_eq!(
            outcome,
            GraphSync::Skipped {
                reason: "driver missing".to_string()
            }
        );
    }

    #[tokio::test]
    async fn unreachable_server_connects_as_unavailable() {
        let link = GraphLink::connect(Neo4jConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            database: "neo4j".to_string(),
            username: "neo4j".to_string(),
            password: "password".to_string(),
            timeout: Duration::from_secs(2),
        })
        .await;
        assert!(!link.is_connected());
    }
}
