//! Core types for the derpcache disk cache
//!
//! This crate holds the pieces the cache crate builds on:
//! - Canonical normalization of JSON-like argument trees ([`canonical`])
//! - Explicit cache configuration ([`CacheConfig`])
//! - The shared error taxonomy ([`Error`], [`Result`])

mod error;

pub mod canonical;
pub mod config;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use config::CacheConfig;
