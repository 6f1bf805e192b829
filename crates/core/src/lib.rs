pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod ranker;
pub mod rerank;
pub mod stores;
pub mod traits;

pub use chunking::{
    build_chunks, chunk_text, document_name, make_chunk_id, normalize_whitespace, split_sentences,
    ChunkingConfig, SentenceChunks,
};
pub use config::{
    EmbeddingBackend, PipelineConfig, RerankerSettings, RetrievalServices, ServiceError,
    StoreBackend,
};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, HttpEmbedder, HttpEmbedderConfig,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{ExtractError, IngestError, ModelError, RetrievalError, StoreError};
pub use extractor::{
    DocumentExtractor, OcrConfig, OcrEndpointConfig, SourceFormat, TextExtractor,
};
pub use ingest::{
    clear_collections, discover_application_dirs, discover_application_files, IngestLock,
    IngestionDriver,
};
pub use models::{
    Chunk, ChunkMetadata, Collection, DocumentType, FailedFile, FailureKind, GraphSync,
    IngestionReport, RetrievalResult, SearchQuery, VectorMatch,
};
pub use orchestrator::{format_context, Retriever};
pub use ranker::{apply_rerank, keyword_score, rank_candidates, semantic_score, HybridWeights};
pub use rerank::{HttpReranker, HttpRerankerConfig, Reranker};
pub use stores::{GraphLink, LocalVectorStore, Neo4jConfig, Neo4jStore, QdrantStore};
pub use traits::{GraphIndex, VectorIndex};
