//! tale-cache-core: Core traits and types for the tale-cache library
//!
//! This crate provides the foundational types and traits shared by the
//! storage backends, the server-side cache manager and the client cache.

mod clock;
mod error;
mod pattern;
mod traits;
mod types;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{CacheError, Result};
pub use pattern::{escape_glob, glob_match};
pub use traits::*;
pub use types::*;
