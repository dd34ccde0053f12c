//! In-memory cache backend

mod backend;

pub use backend::{MemoryConfig, MemoryStore};
