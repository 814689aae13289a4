pub mod models;
pub mod pool;
pub mod vector_store;

pub use models::ChunkRow;
pub use pool::DbPool;
pub use vector_store::PgVectorStore;
