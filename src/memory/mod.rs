//! 记忆层：记录快照、存储后端（内存 / SQLite）、检索与保留策略

pub mod record;
pub mod retention;
pub mod retriever;
pub mod sqlite;
pub mod store;
pub mod tokenizer;

pub use record::{MemoryFilter, MemoryRecord};
pub use retention::{apply_retention, MaxAge, MaxCount, RetentionPolicy};
pub use retriever::{KeywordOverlapScorer, MemoryRetriever, RelevanceScorer};
pub use sqlite::SqliteMemoryStore;
pub use store::{InMemoryStore, MemoryStore};
