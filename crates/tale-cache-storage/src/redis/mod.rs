//! Redis backend implementation

mod backend;
mod config;

pub use backend::RedisStore;
pub use config::RedisConfig;
