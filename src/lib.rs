//! mtgsage - Local-first Magic: The Gathering rules assistant
//!
//! This library parses the comprehensive rules, the glossary and card data,
//! stores them in SQLite, indexes them for similarity search and answers
//! rules questions grounded in what it retrieves.

pub mod cli;
pub mod config;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod query;
pub mod storage;

/// Re-export commonly used types
pub use config::AppConfig;
pub use extract::{Document, NormalizedDocument};
pub use index::VectorIndex;
pub use query::{QueryError, QueryPipeline};
pub use storage::Database;

/// Application-wide error type
pub use anyhow::Result;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_NAME: &str = "mtgsage";
