//! Disk-backed memoization cache for derpcache
//!
//! This crate provides the caching machinery:
//! - Deterministic key derivation over canonicalized arguments
//! - Content-addressed object storage for serialized return values
//! - A persistent digest-to-metadata index with TTL-driven pruning
//! - The orchestrator tying them together
//!
//! # Overview
//!
//! A call is described by a [`CallSpec`]: a stable callable descriptor plus
//! JSON-like positional and keyword arguments. The cache derives a digest
//! from the canonicalized arguments, and either returns the stored result
//! or invokes the callable and persists what it returns.
//!
//! # On-disk layout
//!
//! ```text
//! .derpcache/
//!   index.json    (digest -> entry metadata)
//!   d3b07384      (one serialized object per digest)
//!   c157a79a
//! ```
//!
//! # Key derivation
//!
//! Keys are computed from:
//! - The callable descriptor
//! - Positional arguments, digested as an unordered set
//! - Keyword arguments, with map keys sorted recursively
//! - The annotation, only when explicitly folded in
//!
//! # Example
//!
//! ```rust,no_run
//! use derpcache_cache::{Cache, CallSpec};
//! use derpcache_core::CacheConfig;
//!
//! let cache = Cache::new(CacheConfig::default());
//! let spec = CallSpec::new("app.fetch_rates").arg("EUR").kwarg("year", 2024);
//! let rates: Vec<f64> = cache.cache(&spec, || vec![1.08, 1.09, 1.07])?;
//! # Ok::<(), derpcache_core::Error>(())
//! ```

mod cache;
mod index;
mod keys;
mod store;

// Re-export error types at crate root
pub use derpcache_core::{CacheConfig, Error, Result};

// Re-export main types
pub use cache::{Cache, CachedFn, CallSpec};
pub use index::{CacheEntry, Index};
pub use keys::{CallKeyEnvelope, derive_key};
pub use store::ObjectStore;
