use anyhow::{anyhow, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use eligibility_rag_core::{
    clear_collections, Collection, EmbeddingBackend, IngestLock, IngestionDriver,
    IngestionReport, Neo4jConfig, OcrConfig, OcrEndpointConfig, PipelineConfig,
    RerankerSettings, RetrievalServices, SearchQuery, StoreBackend, DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "eligibility-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Vector store backend
    #[arg(long, value_enum, env = "RAG_STORE", default_value = "local")]
    store: StoreKind,

    /// Directory holding the local vector store and the ingestion lock
    #[arg(long, env = "RAG_STATE_DIR", default_value = "data/databases")]
    state_dir: PathBuf,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// OpenAI-compatible embedding service; the local n-gram embedder is used when unset
    #[arg(long, env = "RAG_EMBEDDING_ENDPOINT")]
    embedding_endpoint: Option<String>,

    #[arg(long, env = "RAG_EMBEDDING_MODEL", default_value = "all-MiniLM-L6-v2")]
    embedding_model: String,

    #[arg(long, env = "RAG_EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    #[arg(long, env = "RAG_EMBEDDING_DIMENSIONS", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,

    /// Cross-encoder rerank service; reranking is disabled when unset
    #[arg(long, env = "RAG_RERANKER_ENDPOINT")]
    reranker_endpoint: Option<String>,

    #[arg(
        long,
        env = "RAG_RERANKER_MODEL",
        default_value = "cross-encoder/ms-marco-MiniLM-L-6-v2"
    )]
    reranker_model: String,

    #[arg(long, env = "RAG_RERANKER_API_KEY", hide_env_values = true)]
    reranker_api_key: Option<String>,

    /// OCR service for image documents; falls back to the tesseract binary when unset
    #[arg(long, env = "RAG_OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    #[arg(long, env = "TESSERACT_BIN", default_value = "tesseract")]
    tesseract_bin: String,

    /// Neo4j HTTP URL; graph sync is disabled when unset
    #[arg(long, env = "NEO4J_URL")]
    neo4j_url: Option<String>,

    #[arg(long, env = "NEO4J_DB", default_value = "neo4j")]
    neo4j_db: String,

    #[arg(long, env = "NEO4J_USER", default_value = "neo4j")]
    neo4j_user: String,

    #[arg(long, env = "NEO4J_PASSWORD", default_value = "password", hide_env_values = true)]
    neo4j_password: String,

    /// Upper bound for a single embedding, rerank or OCR call
    #[arg(long, env = "RAG_MODEL_TIMEOUT_SECS", default_value_t = 30)]
    model_timeout_secs: u64,

    /// Chunks rendered by `context` when `--top-k` is not given
    #[arg(long, env = "RAG_DEFAULT_TOP_K", default_value_t = PipelineConfig::default().default_top_k)]
    default_top_k: usize,
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreKind {
    Local,
    Qdrant,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest every application directory under a root folder.
    Ingest {
        /// Folder with one sub-directory per application.
        #[arg(long, env = "RAG_DOCUMENTS_ROOT", default_value = "data/documents")]
        root: PathBuf,
    },
    /// Hybrid search across all collections.
    Search {
        #[arg(long)]
        query: String,
        /// Restrict results to one application.
        #[arg(long)]
        application_id: Option<String>,
        #[arg(long, default_value = "10")]
        top_k: usize,
        /// Skip the cross-encoder stage.
        #[arg(long, default_value_t = false)]
        no_rerank: bool,
    },
    /// Print the formatted context block handed to the language model.
    Context {
        #[arg(long)]
        query: String,
        #[arg(long)]
        application_id: Option<String>,
        /// Defaults to `--default-top-k`.
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Show chunk counts per collection.
    Stats,
    /// Remove stored chunks from one collection, or from all of them.
    Clear {
        /// One of resumes, application_summaries, income_patterns.
        #[arg(long)]
        collection: Option<String>,
    },
}

impl Cli {
    fn pipeline_config(&self) -> PipelineConfig {
        let model_timeout = Duration::from_secs(self.model_timeout_secs);

        let embedding = match &self.embedding_endpoint {
            Some(endpoint) => EmbeddingBackend::Http {
                endpoint: endpoint.clone(),
                model: self.embedding_model.clone(),
                api_key: self.embedding_api_key.clone(),
                dimensions: self.embedding_dimensions,
            },
            None => EmbeddingBackend::Local {
                dimensions: self.embedding_dimensions,
            },
        };

        let reranker = self
            .reranker_endpoint
            .as_ref()
            .map(|endpoint| RerankerSettings {
                endpoint: endpoint.clone(),
                model: self.reranker_model.clone(),
                api_key: self.reranker_api_key.clone(),
            });

        let store = match self.store {
            StoreKind::Local => StoreBackend::Local {
                dir: self.state_dir.join("vector_store"),
            },
            StoreKind::Qdrant => StoreBackend::Qdrant {
                endpoint: self.qdrant_url.clone(),
            },
        };

        let ocr = OcrConfig {
            endpoint: self.ocr_endpoint.as_ref().map(|endpoint| OcrEndpointConfig {
                endpoint: endpoint.clone(),
                api_key: None,
                timeout: model_timeout,
            }),
            tesseract_binary: self.tesseract_bin.clone(),
            tesseract_timeout: model_timeout,
        };

        let graph = self.neo4j_url.as_ref().map(|endpoint| Neo4jConfig {
            endpoint: endpoint.clone(),
            database: self.neo4j_db.clone(),
            username: self.neo4j_user.clone(),
            password: self.neo4j_password.clone(),
            timeout: model_timeout,
        });

        PipelineConfig {
            embedding,
            reranker,
            store,
            state_dir: self.state_dir.clone(),
            ocr,
            graph,
            model_timeout,
            default_top_k: self.default_top_k,
            ..PipelineConfig::default()
        }
    }
}

fn print_report(report: &IngestionReport) {
    println!("run {} ({} applications)", report.run_id, report.applications);
    println!(
        "files: discovered={} processed={} extraction_failures={} model_failures={} storage_failures={} unsupported={}",
        report.files_discovered,
        report.files_processed,
        report.failed_extractions,
        report.model_failures,
        report.storage_failures,
        report.skipped_unsupported
    );
    for (document_type, chunks) in &report.chunks_by_type {
        let files = report.files_by_type.get(document_type).copied().unwrap_or(0);
        println!("  {document_type}: files={files} chunks={chunks}");
    }
    for (collection, count) in &report.collection_counts {
        println!("  collection {collection}: {count}");
    }
    for failure in &report.failures {
        println!(
            "  failed [{}] {}: {}",
            failure.kind,
            failure.path.display(),
            failure.reason
        );
    }
    if let Some(graph) = &report.graph {
        println!("graph: {graph:?}");
    }
    println!("{} chunks indexed", report.total_chunks());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "eligibility-rag boot"
    );

    let services = RetrievalServices::from_config(cli.pipeline_config())
        .await
        .context("failed to load retrieval services")?;

    match cli.command {
        Command::Ingest { root } => {
            let _lock = IngestLock::acquire(&services.config.state_dir)?;
            let mut driver = IngestionDriver::new(
                &services.extractor,
                services.embedder.as_ref(),
                services.index.as_ref(),
                services.config.model_timeout,
            );
            if let Some(graph) = &services.graph {
                driver = driver.with_graph(graph);
            }

            let report = driver.run(&root).await?;
            if !report.failures.is_empty() {
                warn!(failed = report.failures.len(), "some documents were not indexed");
            }
            print_report(&report);
        }
        Command::Search {
            query,
            application_id,
            top_k,
            no_rerank,
        } => {
            let mut search = SearchQuery::new(query, top_k);
            if let Some(application_id) = application_id {
                search = search.for_application(application_id);
            }
            if no_rerank || !services.retriever().has_reranker() {
                search = search.without_rerank();
            }

            let results = services.retriever().hybrid_search(&search).await?;
            println!("query: {}", search.text);
            for (position, result) in results.iter().enumerate() {
                println!(
                    "{}. score={:.4} hybrid={:.4} semantic={:.4} keyword={:.4} rerank={} [{} / {}] chunk {}/{}",
                    position + 1,
                    result.final_score(),
                    result.hybrid_score,
                    result.semantic_score,
                    result.keyword_score,
                    result
                        .rerank_score
                        .map_or_else(|| "-".to_string(), |score| format!("{score:.4}")),
                    result.metadata.application_id,
                    result.metadata.document_type,
                    result.metadata.chunk_index + 1,
                    result.metadata.total_chunks
                );
                println!("   {}", result.text);
            }
        }
        Command::Context {
            query,
            application_id,
            top_k,
        } => {
            let top_k = top_k.unwrap_or(services.config.default_top_k);
            let context = services
                .retriever()
                .get_rag_context(&query, application_id.as_deref(), top_k)
                .await?;
            println!("{context}");
        }
        Command::Stats => {
            let stats = services.retriever().collection_stats().await?;
            for (collection, count) in &stats {
                println!("{collection}: {count}");
            }
            println!("total: {}", stats.values().sum::<usize>());
        }
        Command::Clear { collection } => {
            let targets = match collection {
                Some(name) => vec![Collection::from_name(&name)
                    .ok_or_else(|| anyhow!("unknown collection `{name}`"))?],
                None => Collection::ALL.to_vec(),
            };
            let _lock = IngestLock::acquire(&services.config.state_dir)?;
            clear_collections(services.index.as_ref(), &targets).await?;
            for target in &targets {
                println!("cleared {target}");
            }
        }
    }

    services.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_top_k_falls_back_to_the_configured_default() {
        let cli = Cli::parse_from(["eligibility-rag", "context", "--query", "income"]);
        assert_eq!(cli.pipeline_config().default_top_k, 3);
        assert!(matches!(cli.command, Command::Context { top_k: None, .. }));

        let cli = Cli::parse_from([
            "eligibility-rag",
            "--default-top-k",
            "5",
            "context",
            "--query",
            "income",
        ]);
        assert_eq!(cli.pipeline_config().default_top_k, 5);
    }

    #[test]
    fn search_keeps_its_own_default_depth() {
        let cli = Cli::parse_from(["eligibility-rag", "search", "--query", "banking"]);
        assert!(matches!(cli.command, Command::Search { top_k: 10, .. }));
    }
}
