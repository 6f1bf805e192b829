use crate::embeddings::{
    CharacterNgramEmbedder, Embedder, HttpEmbedder, HttpEmbedderConfig,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
use crate::error::{ModelError, StoreError};
use crate::extractor::{DocumentExtractor, OcrConfig};
use crate::orchestrator::Retriever;
use crate::ranker::HybridWeights;
use crate::rerank::{HttpReranker, HttpRerankerConfig, Reranker};
use crate::stores::{GraphLink, LocalVectorStore, Neo4jConfig, QdrantStore};
use crate::traits::VectorIndex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone)]
pub enum EmbeddingBackend {
    Local { dimensions: usize },
    Http {
        endpoint: String,
        model: String,
        api_key: Option<String>,
        dimensions: usize,
    },
}

impl EmbeddingBackend {
    pub fn dimensions(&self) -> usize {
        match self {
            EmbeddingBackend::Local { dimensions } | EmbeddingBackend::Http { dimensions, .. } => {
                *dimensions
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RerankerSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub enum StoreBackend {
    Local { dir: PathBuf },
    Qdrant { endpoint: String },
}

/// Everything needed to build the long-lived services of a process. Models
/// and stores are created once by [`RetrievalServices::from_config`], shared
/// by ingestion and queries, and released by
/// [`RetrievalServices::shutdown`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub embedding: EmbeddingBackend,
    pub reranker: Option<RerankerSettings>,
    pub store: StoreBackend,
    pub state_dir: PathBuf,
    pub ocr: OcrConfig,
    pub graph: Option<Neo4jConfig>,
    pub model_timeout: Duration,
    pub weights: HybridWeights,
    pub default_top_k: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let state_dir = PathBuf::from("data/databases");
        Self {
            embedding: EmbeddingBackend::Local {
                dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            },
            reranker: None,
            store: StoreBackend::Local {
                dir: state_dir.join("vector_store"),
            },
            state_dir,
            ocr: OcrConfig::default(),
            graph: None,
            model_timeout: Duration::from_secs(30),
            weights: HybridWeights::default(),
            default_top_k: 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct RetrievalServices {
    pub config: PipelineConfig,
    pub extractor: DocumentExtractor,
    pub embedder: Arc<dyn Embedder>,
    pub reranker: Option<Arc<dyn Reranker>>,
    pub index: Arc<dyn VectorIndex>,
    pub graph: Option<GraphLink>,
}

impl RetrievalServices {
    pub async fn from_config(config: PipelineConfig) -> Result<Self, ServiceError> {
        let embedder: Arc<dyn Embedder> = match &config.embedding {
            EmbeddingBackend::Local { dimensions } => Arc::new(CharacterNgramEmbedder {
                dimensions: *dimensions,
            }),
            EmbeddingBackend::Http {
                endpoint,
                model,
                api_key,
                dimensions,
            } => Arc::new(HttpEmbedder::new(HttpEmbedderConfig {
                endpoint: endpoint.clone(),
                model: model.clone(),
                api_key: api_key.clone(),
                dimensions: *dimensions,
                timeout: config.model_timeout,
            })?),
        };

        let reranker = match &config.reranker {
            Some(settings) => {
                let reranker: Arc<dyn Reranker> = Arc::new(HttpReranker::new(HttpRerankerConfig {
                    endpoint: settings.endpoint.clone(),
                    model: settings.model.clone(),
                    api_key: settings.api_key.clone(),
                    timeout: config.model_timeout,
                })?);
                Some(reranker)
            }
            None => None,
        };

        let index: Arc<dyn VectorIndex> = match &config.store {
            StoreBackend::Local { dir } => Arc::new(LocalVectorStore::open(dir.clone())?),
            StoreBackend::Qdrant { endpoint } => Arc::new(QdrantStore::new(
                endpoint.clone(),
                config.embedding.dimensions(),
                config.model_timeout,
            )?),
        };

        let graph = match &config.graph {
            Some(graph_config) => Some(GraphLink::connect(graph_config.clone()).await),
            None => None,
        };

        info!(
            embedder = embedder.name(),
            dimensions = embedder.dimensions(),
            reranker = reranker.as_ref().map(|reranker| reranker.name()).unwrap_or("none"),
            store = index.backend(),
            graph = graph.as_ref().map_or("disabled", |link| if link.is_connected() {
                "connected"
            } else {
                "unavailable"
            }),
            "retrieval services loaded"
        );

        Ok(Self {
            extractor: DocumentExtractor::new(config.ocr.clone()),
            config,
            embedder,
            reranker,
            index,
            graph,
        })
    }

    pub fn retriever(&self) -> Retriever {
        Retriever::new(
            self.embedder.clone(),
            self.reranker.clone(),
            self.index.clone(),
        )
        .with_weights(self.config.weights)
        .with_model_timeout(self.config.model_timeout)
    }

    pub async fn shutdown(self) -> Result<(), StoreError> {
        self.index.flush().await?;
        info!(store = self.index.backend(), "retrieval services released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn default_services_are_local_and_offline() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let config = PipelineConfig {
            store: StoreBackend::Local {
                dir: dir.path().join("vector_store"),
            },
            state_dir: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        };

        let services = RetrievalServices::from_config(config).await?;
        assert_eq!(services.index.backend(), "local");
        assert_eq!(services.embedder.dimensions(), DEFAULT_EMBEDDING_DIMENSIONS);
        assert!(services.reranker.is_none());
        assert!(services.graph.is_none());
        assert!(!services.retriever().has_reranker());
        assert_eq!(services.config.default_top_k, 3);

        services.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn invalid_qdrant_endpoint_fails_construction() {
        let config = PipelineConfig {
            store: StoreBackend::Qdrant {
                endpoint: "::not-a-url::".to_string(),
            },
            ..PipelineConfig::default()
        };
        assert!(matches!(
            RetrievalServices::from_config(config).await,
            Err(ServiceError::Store(StoreError::Url(_)))
        ));
    }
}
