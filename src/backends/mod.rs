//! Backends module - File system traversal and environment checks
//!
//! Provides:
//! - scan: Cached, cancellable directory scans
//! - ignore_rules: Built-in and user ignore patterns
//! - doctor: Tokenizer and configuration checking

pub mod doctor;
pub mod ignore_rules;
pub mod scan;
