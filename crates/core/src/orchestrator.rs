use crate::embeddings::Embedder;
use crate::error::{ModelError, RetrievalError};
use crate::models::{Collection, RetrievalResult, SearchQuery};
use crate::ranker::{apply_rerank, rank_candidates, HybridWeights};
use crate::rerank::Reranker;
use crate::traits::VectorIndex;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Query entry point: embeds the query, gathers nearest chunks from every
/// collection, ranks them and optionally reranks.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
    index: Arc<dyn VectorIndex>,
    weights: HybridWeights,
    model_timeout: Duration,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            embedder,
            reranker,
            index,
            weights: HybridWeights::default(),
            model_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_weights(mut self, weights: HybridWeights) -> Self {
        self.weights = weights.normalized();
        self
    }

    pub fn with_model_timeout(mut self, model_timeout: Duration) -> Self {
        self.model_timeout = model_timeout;
        self
    }

    pub fn has_reranker(&self) -> bool {
        self.reranker.is_some()
    }

    async fn bounded<T, F>(&self, model: &str, call: F) -> Result<T, ModelError>
    where
        F: Future<Output = Result<T, ModelError>>,
    {
        tokio::time::timeout(self.model_timeout, call)
            .await
            .map_err(|_| ModelError::Timeout {
                model: model.to_string(),
                after: self.model_timeout,
            })?
    }

    pub async fn hybrid_search(
        &self,
        query: &SearchQuery,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        if query.top_k == 0 {
            return Err(RetrievalError::InvalidArgument(
                "top_k must be at least 1".to_string(),
            ));
        }

        let query_vector = self
            .bounded(self.embedder.name(), self.embedder.embed(&query.text))
            .await?;

        let limit = query.top_k.saturating_mul(2);
        let mut candidates = Vec::new();
        for collection in Collection::ALL {
            let matches = self
                .index
                .query(
                    collection,
                    &query_vector,
                    limit,
                    query.application_id.as_deref(),
                )
                .await?;
            candidates.extend(matches);
        }

        let mut results = rank_candidates(&query.text, candidates, query.top_k, self.weights);

        if query.rerank && !results.is_empty() {
            let reranker = self.reranker.as_ref().ok_or_else(|| {
                ModelError::unavailable("reranker", "reranking requested but no reranker is configured")
            })?;
            let passages = results
                .iter()
                .map(|result| result.text.clone())
                .collect::<Vec<_>>();
            let scores = self
                .bounded(reranker.name(), reranker.score(&query.text, &passages))
                .await?;
            if scores.len() != passages.len() {
                return Err(ModelError::invalid_response(
                    reranker.name(),
                    format!("{} scores for {} passages", scores.len(), passages.len()),
                )
                .into());
            }
            apply_rerank(&mut results, &scores);
        }

        results.truncate(query.top_k);
        debug!(
            query = %query.text,
            application_id = ?query.application_id,
            results = results.len(),
            reranked = query.rerank,
            "hybrid search"
        );
        Ok(results)
    }

    /// Renders the best chunks as numbered `[Document i: type]` blocks for
    /// an LLM prompt. Reranks whenever a reranker is configured.
    pub async fn get_rag_context(
        &self,
        query: &str,
        application_id: Option<&str>,
        top_k: usize,
    ) -> Result<String, RetrievalError> {
        let search = SearchQuery {
            text: query.to_string(),
            application_id: application_id.map(str::to_string),
            top_k,
            rerank: self.has_reranker(),
        };
        let results = self.hybrid_search(&search).await?;
        Ok(format_context(&results))
    }

    pub async fn collection_stats(&self) -> Result<BTreeMap<Collection, usize>, RetrievalError> {
        let mut stats = BTreeMap::new();
        for collection in Collection::ALL {
            stats.insert(collection, self.index.count(collection).await?);
        }
        Ok(stats)
    }
}

pub fn format_context(results: &[RetrievalResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(position, result)| {
            format!(
                "[Document {}: {}]\n{}\n",
                position + 1,
                result.metadata.document_type,
                result.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::build_chunks;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::{Chunk, DocumentType, VectorMatch};
    use crate::StoreError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeIndex {
        matches: Vec<(Collection, VectorMatch)>,
        seen_filters: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl VectorIndex for FakeIndex {
        fn backend(&self) -> &str {
            "fake"
        }

        async fn upsert(
            &self,
            _collection: Collection,
            _chunks: &[Chunk],
            _embeddings: &[Vec<f32>],
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn remove_stale(
            &self,
            _collection: Collection,
            _application_id: &str,
            _document: &str,
            _keep_below: usize,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn query(
            &self,
            collection: Collection,
            _vector: &[f32],
            limit: usize,
            application_id: Option<&str>,
        ) -> Result<Vec<VectorMatch>, StoreError> {
            if let Ok(mut seen) = self.seen_filters.lock() {
                seen.push(application_id.map(str::to_string));
            }
            Ok(self
                .matches
                .iter()
                .filter(|(owner, _)| *owner == collection)
                .map(|(_, hit)| hit.clone())
                .take(limit)
                .collect())
        }

        async fn count(&self, collection: Collection) -> Result<usize, StoreError> {
            Ok(self
                .matches
                .iter()
                .filter(|(owner, _)| *owner == collection)
                .count())
        }

        async fn clear(&self, _collection: Collection) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct FixedReranker {
        scores: Vec<f64>,
    }

    #[async_trait]
    impl Reranker for FixedReranker {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn score(&self, _query: &str, passages: &[String]) -> Result<Vec<f64>, ModelError> {
            Ok(self.scores.iter().copied().take(passages.len()).collect())
        }
    }

    struct FailingReranker;

    #[async_trait]
    impl Reranker for FailingReranker {
        fn name(&self) -> &str {
            "cross-encoder"
        }

        async fn score(&self, _query: &str, _passages: &[String]) -> Result<Vec<f64>, ModelError> {
            Err(ModelError::unavailable("cross-encoder", "weights not loaded"))
        }
    }

    struct SlowReranker;

    #[async_trait]
    impl Reranker for SlowReranker {
        fn name(&self) -> &str {
            "slow"
        }

        async fn score(&self, _query: &str, passages: &[String]) -> Result<Vec<f64>, ModelError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![0.0; passages.len()])
        }
    }

    fn hit(document_type: DocumentType, text: &str, distance: f64) -> (Collection, VectorMatch) {
        let chunk = build_chunks("APP-000001", document_type, "doc", text)
            .pop()
            .expect("fixture text produces a chunk");
        (
            document_type.collection(),
            VectorMatch { chunk, distance },
        )
    }

    fn fixture() -> FakeIndex {
        FakeIndex {
            matches: vec![
                hit(DocumentType::Resume, "Branch operations lead.", 0.30),
                hit(DocumentType::BankStatement, "Salary credit 14,000 AED.", 0.20),
                hit(DocumentType::CreditReport, "Credit score 702.", 0.45),
            ],
            ..FakeIndex::default()
        }
    }

    fn retriever(index: FakeIndex, reranker: Option<Arc<dyn Reranker>>) -> Retriever {
        Retriever::new(
            Arc::new(CharacterNgramEmbedder::default()),
            reranker,
            Arc::new(index),
        )
    }

    #[tokio::test]
    async fn results_merge_collections_by_hybrid_score() {
        let retriever = retriever(fixture(), None);
        let results = retriever
            .hybrid_search(&SearchQuery::new("salary", 3).without_rerank())
            .await
            .expect("search should succeed");

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].metadata.document_type, DocumentType::BankStatement);
        assert!(results.iter().all(|result| result.rerank_score.is_none()));
    }

    #[tokio::test]
    async fn application_filter_reaches_every_collection() {
        let index = Arc::new(fixture());
        let retriever = Retriever::new(
            Arc::new(CharacterNgramEmbedder::default()),
            None,
            index.clone(),
        );
        retriever
            .hybrid_search(&SearchQuery::new("x", 2).for_application("APP-9").without_rerank())
            .await
            .expect("search should succeed");

        let seen = index.seen_filters.lock().expect("lock").clone();
        assert_eq!(seen.len(), Collection::ALL.len());
        assert!(seen.iter().all(|filter| filter.as_deref() == Some("APP-9")));
    }

    #[tokio::test]
    async fn reranker_reorders_and_final_list_is_top_k() {
        let reranker: Arc<dyn Reranker> = Arc::new(FixedReranker {
            scores: vec![0.1, 0.2, 0.9],
        });
        let retriever = retriever(fixture(), Some(reranker));
        let results = retriever
            .hybrid_search(&SearchQuery::new("salary", 1))
            .await
            .expect("search should succeed");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rerank_score, Some(0.2));
    }

    #[tokio::test]
    async fn failing_reranker_fails_the_query() {
        let retriever = retriever(fixture(), Some(Arc::new(FailingReranker)));
        let error = retriever
            .hybrid_search(&SearchQuery::new("salary", 2))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            RetrievalError::Model(ModelError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn rerank_without_a_model_is_an_error() {
        let retriever = retriever(fixture(), None);
        let error = retriever
            .hybrid_search(&SearchQuery::new("salary", 2))
            .await
            .unwrap_err();
        assert!(matches!(error, RetrievalError::Model(_)));
    }

    #[tokio::test]
    async fn slow_reranker_times_out() {
        let retriever = retriever(fixture(), Some(Arc::new(SlowReranker)))
            .with_model_timeout(Duration::from_millis(50));
        let error = retriever
            .hybrid_search(&SearchQuery::new("salary", 2))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            RetrievalError::Model(ModelError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn zero_top_k_is_rejected() {
        let retriever = retriever(fixture(), None);
        let error = retriever
            .hybrid_search(&SearchQuery::new("salary", 0))
            .await
            .unwrap_err();
        assert!(matches!(error, RetrievalError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn empty_query_is_ranked_by_semantic_score() {
        let retriever = retriever(fixture(), None);
        let results = retriever
            .hybrid_search(&SearchQuery::new("", 3).without_rerank())
            .await
            .expect("empty query should not fail");

        let distances_order = results
            .iter()
            .map(|result| result.metadata.document_type)
            .collect::<Vec<_>>();
        assert_eq!(
            distances_order,
            vec![
                DocumentType::BankStatement,
                DocumentType::Resume,
                DocumentType::CreditReport
            ]
        );
        assert!(results.iter().all(|result| result.keyword_score == 0.0));
    }

    #[tokio::test]
    async fn context_is_rendered_as_numbered_documents() {
        let retriever = retriever(fixture(), None);
        let context = retriever
            .get_rag_context("salary", None, 2)
            .await
            .expect("context should render");

        assert!(context.starts_with("[Document 1: bank_statement]\nSalary credit 14,000 AED.\n"));
        assert!(context.contains("\n\n[Document 2: "));
    }

    #[tokio::test]
    async fn stats_count_each_collection() {
        let retriever = retriever(fixture(), None);
        let stats = retriever.collection_stats().await.expect("stats");
        assert_eq!(stats.get(&Collection::IncomePatterns), Some(&2));
        assert_eq!(stats.get(&Collection::Resumes), Some(&1));
        assert_eq!(stats.get(&Collection::ApplicationSummaries), Some(&0));
    }
}
