//! Flows module - Operations combining a scan with the cache
//!
//! Provides:
//! - export: Assemble a scanned tree into one Markdown document

pub mod export;
