//! Persistence collaborator: storage traits and the in-memory backend

pub mod memory;
pub mod traits;

// Re-export the storage surface
pub use memory::MemoryStorage;
pub use traits::*;
