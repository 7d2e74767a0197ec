//! pulse-state: checkpoint stores.
//! Provides an atomic filesystem store and an in-memory store for tests and embedding.

pub mod fs;
pub mod mem;

pub use fs::FsCheckpointStore;
pub use mem::InMemoryCheckpointStore;
