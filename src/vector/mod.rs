//! Vector index infrastructure for semantic search.
//!
//! - `index`: in-memory cosine similarity index over embedding vectors
//! - `store`: shared `RwLock` wrapper with JSON dump persistence

pub mod index;
pub mod store;

pub use index::{VectorHit, VectorIndex, VectorRecord};
pub use store::VectorStore;
