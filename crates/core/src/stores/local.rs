use crate::models::{Chunk, Collection, VectorMatch};
use crate::traits::VectorIndex;
use crate::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    chunk: Chunk,
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CollectionFile {
    name: String,
    dimensions: Option<usize>,
    records: BTreeMap<String, StoredRecord>,
}

/// Directory-backed vector store: one JSON file per collection, searched
/// by brute-force cosine distance. Writers serialize on the inner lock and
/// every write is persisted atomically before it returns.
pub struct LocalVectorStore {
    dir: PathBuf,
    collections: RwLock<HashMap<Collection, CollectionFile>>,
}

impl LocalVectorStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut collections = HashMap::new();
        for collection in Collection::ALL {
            let path = collection_path(&dir, collection);
            if !path.exists() {
                continue;
            }
            let bytes = fs::read(&path)?;
            let file: CollectionFile = serde_json::from_slice(&bytes)?;
            collections.insert(collection, file);
        }

        Ok(Self {
            dir,
            collections: RwLock::new(collections),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn persist(&self, collection: Collection, file: &CollectionFile) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(file)?;
        let mut staged = NamedTempFile::new_in(&self.dir)?;
        staged.write_all(&bytes)?;
        staged.as_file().sync_all()?;
        staged
            .persist(collection_path(&self.dir, collection))
            .map_err(|error| StoreError::Io(error.error))?;
        Ok(())
    }
}

fn collection_path(dir: &Path, collection: Collection) -> PathBuf {
    dir.join(format!("{}.json", collection.name()))
}

pub fn cosine_distance(left: &[f32], right: &[f32]) -> f64 {
    let mut dot = 0f64;
    let mut left_norm = 0f64;
    let mut right_norm = 0f64;
    for (a, b) in left.iter().zip(right) {
        let (a, b) = (f64::from(*a), f64::from(*b));
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return 1.0;
    }
    1.0 - dot / (left_norm.sqrt() * right_norm.sqrt())
}

#[async_trait]
impl VectorIndex for LocalVectorStore {
    fn backend(&self) -> &str {
        "local"
    }

    async fn upsert(
        &self,
        collection: Collection,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), StoreError> {
        if chunks.len() != embeddings.len() {
            return Err(StoreError::BackendResponse {
                backend: "local".to_string(),
                details: format!(
                    "embedding count {} doesn't match chunk count {}",
                    embeddings.len(),
                    chunks.len()
                ),
            });
        }
        if chunks.is_empty() {
            return Ok(());
        }

        let mut guard = self.collections.write().map_err(|_| StoreError::Poisoned)?;
        let mut file = guard.get(&collection).cloned().unwrap_or_else(|| CollectionFile {
            name: collection.name().to_string(),
            ..CollectionFile::default()
        });

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            let expected = *file.dimensions.get_or_insert(embedding.len());
            if embedding.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    collection: collection.name().to_string(),
                    expected,
                    actual: embedding.len(),
                });
            }
            file.records.insert(
                chunk.id.clone(),
                StoredRecord {
                    chunk: chunk.clone(),
                    embedding: embedding.clone(),
                },
            );
        }

        self.persist(collection, &file)?;
        guard.insert(collection, file);
        Ok(())
    }

    async fn remove_stale(
        &self,
        collection: Collection,
        application_id: &str,
        document: &str,
        keep_below: usize,
    ) -> Result<(), StoreError> {
        let mut guard = self.collections.write().map_err(|_| StoreError::Poisoned)?;
        let Some(current) = guard.get(&collection) else {
            return Ok(());
        };

        let is_stale = |record: &StoredRecord| {
            record.chunk.application_id == application_id
                && record.chunk.document == document
                && record.chunk.chunk_index >= keep_below
        };
        if !current.records.values().any(is_stale) {
            return Ok(());
        }

        let mut file = current.clone();
        file.records.retain(|_, record| !is_stale(record));
        self.persist(collection, &file)?;
        guard.insert(collection, file);
        Ok(())
    }

    async fn query(
        &self,
        collection: Collection,
        vector: &[f32],
        limit: usize,
        application_id: Option<&str>,
    ) -> Result<Vec<VectorMatch>, StoreError> {
        let guard = self.collections.read().map_err(|_| StoreError::Poisoned)?;
        let Some(file) = guard.get(&collection) else {
            return Ok(Vec::new());
        };

        if let Some(expected) = file.dimensions {
            if vector.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    collection: collection.name().to_string(),
                    expected,
                    actual: vector.len(),
                });
            }
        }

        let mut matches: Vec<VectorMatch> = file
            .records
            .values()
            .filter(|record| {
                application_id.map_or(true, |wanted| record.chunk.application_id == wanted)
            })
            .map(|record| VectorMatch {
                chunk: record.chunk.clone(),
                distance: cosine_distance(vector, &record.embedding),
            })
            .collect();

        matches.sort_by(|left, right| {
            left.distance
                .total_cmp(&right.distance)
                .then_with(|| left.chunk.id.cmp(&right.chunk.id))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    async fn count(&self, collection: Collection) -> Result<usize, StoreError> {
        let guard = self.collections.read().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.get(&collection).map_or(0, |file| file.records.len()))
    }

    async fn clear(&self, collection: Collection) -> Result<(), StoreError> {
        let mut guard = self.collections.write().map_err(|_| StoreError::Poisoned)?;
        guard.remove(&collection);
        let path = collection_path(&self.dir, collection);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
