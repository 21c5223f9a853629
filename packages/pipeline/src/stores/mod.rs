//! Checkpoint store implementations.
//!
//! Available backends:
//! - `MemoryStore` - In-memory storage for tests and dry runs
//! - `SqliteStore` - SQLite file storage used by the binary

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
