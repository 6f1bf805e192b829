use crate::models::{Chunk, Collection, VectorMatch};
use crate::StoreError;
use async_trait::async_trait;

/// Persistent nearest-neighbour index over chunk embeddings, partitioned
/// into named collections. Writes upsert by chunk id.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn backend(&self) -> &str;

    async fn upsert(
        &self,
        collection: Collection,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), StoreError>;

    /// Drops chunks of one application document (matched by file name)
    /// whose index is at or past `keep_below`, left over from a longer
    /// earlier version.
    async fn remove_stale(
        &self,
        collection: Collection,
        application_id: &str,
        document: &str,
        keep_below: usize,
    ) -> Result<(), StoreError>;

    /// Nearest chunks by cosine distance, closest first.
    async fn query(
        &self,
        collection: Collection,
        vector: &[f32],
        limit: usize,
        application_id: Option<&str>,
    ) -> Result<Vec<VectorMatch>, StoreError>;

    async fn count(&self, collection: Collection) -> Result<usize, StoreError>;

    async fn clear(&self, collection: Collection) -> Result<(), StoreError>;

    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
pub trait GraphIndex: Send + Sync {
    /// Mirrors application -> document -> chunk relations; returns the
    /// number of chunk relations written.
    async fn sync_application_graph(&self, chunks: &[Chunk]) -> Result<usize, StoreError>;
}
