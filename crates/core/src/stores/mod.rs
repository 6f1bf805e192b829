pub mod local;
pub mod neo4j;
pub mod qdrant;

pub use local::LocalVectorStore;
pub use neo4j::{GraphLink, Neo4jConfig, Neo4jStore};
pub use qdrant::QdrantStore;
