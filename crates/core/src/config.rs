//! Cache configuration
//!
//! Configuration is an explicit value constructed once and handed to every
//! cache handle, rather than process-global mutable state. The default cache
//! directory is `.derpcache/` under the current working directory;
//! `DERPCACHE_ROOT_DIR` moves it under a different parent.

use crate::{Error, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Directory name the cache lives in, created under the configured root
pub const DEFAULT_CACHE_DIR: &str = ".derpcache";

/// File name of the persisted index inside the cache directory
pub const INDEX_FILE: &str = "index.json";

/// Environment variable naming the parent directory of the cache
pub const ROOT_DIR_ENV: &str = "DERPCACHE_ROOT_DIR";

/// Default digest width in hex characters
pub const DEFAULT_DIGEST_WIDTH: usize = 8;

// SHA-256 renders to 64 hex characters
const MAX_DIGEST_WIDTH: usize = 64;

/// Settings shared by every operation on one cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    cache_dir: PathBuf,
    digest_width: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            digest_width: DEFAULT_DIGEST_WIDTH,
        }
    }
}

impl CacheConfig {
    /// Create a configuration with an explicit cache directory
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    /// Resolve the cache directory from the environment
    ///
    /// `DERPCACHE_ROOT_DIR`, when set and non-empty, names the parent under
    /// which `.derpcache/` is placed; otherwise the default configuration is
    /// returned.
    #[must_use]
    pub fn from_env() -> Self {
        let root = env::var(ROOT_DIR_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty());
        match root {
            Some(root) => Self::new(PathBuf::from(root).join(DEFAULT_CACHE_DIR)),
            None => Self::default(),
        }
    }

    /// Set the digest width in hex characters
    ///
    /// # Errors
    ///
    /// Returns a configuration error unless `1 <= width <= 64`.
    pub fn with_digest_width(mut self, width: usize) -> Result<Self> {
        if width == 0 || width > MAX_DIGEST_WIDTH {
            return Err(Error::configuration(format!(
                "digest width must be between 1 and {MAX_DIGEST_WIDTH}, got {width}"
            )));
        }
        self.digest_width = width;
        Ok(self)
    }

    /// The directory the index and object files live in
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Width of derived digests in hex characters
    #[must_use]
    pub fn digest_width(&self) -> usize {
        self.digest_width
    }

    /// Path of the persisted index file
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.cache_dir.join(INDEX_FILE)
    }
}
