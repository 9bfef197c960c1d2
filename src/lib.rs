//! contextor - Token-aware project scanning with a tiered in-memory cache
//!
//! The library is organised as:
//! - cache: size-bounded tiers for listings, contents and token counts
//! - core: data model, file reading, tokenizer and rendering
//! - backends: the scan engine, ignore rules and environment checks
//! - tasks: background workers with cancellation and progress
//! - flows: Markdown export
//! - session: the pieces above wired together for a front end

pub mod backends;
pub mod cache;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod flows;
pub mod session;
pub mod tasks;

pub use config::Config;
pub use error::{CacheError, ConfigError, ScanError, TaskError};
pub use session::Session;
