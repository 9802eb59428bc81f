//! Cache orchestration
//!
//! [`Cache`] ties the pieces together: derive the digest for a call, return
//! the stored object on a hit, or invoke the callable, persist its result,
//! and record an index entry on a miss. Expired entries are pruned on every
//! lookup, so eviction is coupled to access rather than to a background
//! sweep.
//!
//! There is no locking and no atomicity across the lookup-invoke-write
//! sequence: two callers racing on the same digest may both observe a miss,
//! both invoke the callable, and the second write wins. Embedders that need
//! mutual exclusion must layer it on top.

use crate::index::{CacheEntry, Index};
use crate::keys::{CallKeyEnvelope, derive_key};
use crate::store::ObjectStore;
use chrono::Utc;
use derpcache_core::{CacheConfig, Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::convert::Infallible;
use std::fs;
use std::time::Duration;

/// Description of one memoized call
///
/// Everything the cache needs to identify a call: the caller-supplied
/// descriptor for the callable, the arguments that feed the digest, and the
/// per-call options (TTL, annotation).
#[derive(Debug, Clone)]
pub struct CallSpec {
    callable: String,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    expires_after: Option<Duration>,
    annotation: Option<String>,
    hash_annotation: bool,
}

impl CallSpec {
    /// Describe a call to the named callable
    ///
    /// The descriptor must be stable across runs; distinct logical
    /// functions must use distinct descriptors, which is the caller's
    /// responsibility.
    #[must_use]
    pub fn new(callable: impl Into<String>) -> Self {
        Self {
            callable: callable.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            expires_after: None,
            annotation: None,
            hash_annotation: false,
        }
    }

    /// Add a positional argument
    ///
    /// Positional arguments are digested as an unordered set; permuting
    /// them does not change the key.
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Add a keyword argument
    #[must_use]
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Expire the entry this long after it is written
    #[must_use]
    pub fn expires_after(mut self, ttl: Duration) -> Self {
        self.expires_after = Some(ttl);
        self
    }

    /// Attach a free-text annotation
    ///
    /// Unless [`CallSpec::hash_annotation`] is also set, the annotation is
    /// pure metadata: the same call with a different annotation maps to the
    /// same digest, and only a write (a miss) records it.
    #[must_use]
    pub fn annotation(mut self, text: impl Into<String>) -> Self {
        self.annotation = Some(text.into());
        self
    }

    /// Fold the annotation into the digest
    #[must_use]
    pub fn hash_annotation(mut self, hash: bool) -> Self {
        self.hash_annotation = hash;
        self
    }

    /// The callable descriptor
    #[must_use]
    pub fn callable(&self) -> &str {
        &self.callable
    }

    fn key_envelope(&self) -> CallKeyEnvelope {
        CallKeyEnvelope {
            callable: self.callable.clone(),
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
            annotation: if self.hash_annotation {
                self.annotation.clone()
            } else {
                None
            },
        }
    }

    fn to_entry(&self, called_at: chrono::DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            callable: self.callable.clone(),
            called_at,
            expires_after: self.expires_after.map(|ttl| ttl.as_secs_f64()),
            annotation: self
                .annotation
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(String::from),
            annotation_hashed: self.hash_annotation,
        }
    }
}

/// Handle to one on-disk cache
///
/// Construct once from a [`CacheConfig`] and pass to every operation; there
/// is no global state. The cache directory and index are created lazily on
/// the first call.
#[derive(Debug, Clone)]
pub struct Cache {
    config: CacheConfig,
    store: ObjectStore,
}

impl Cache {
    /// Create a cache handle from explicit configuration
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let store = ObjectStore::new(config.cache_dir());
        Self { config, store }
    }

    /// Create a cache handle from the environment
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(CacheConfig::from_env())
    }

    /// The configuration this handle was built from
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Memoize an infallible callable
    ///
    /// On a hit the stored value is returned and `f` is not invoked. On a
    /// miss `f` is invoked exactly once, its result persisted, and an index
    /// entry recorded. Both paths return the same value, so wrapping a call
    /// site is observationally transparent aside from latency.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Serialization`] if the result cannot be
    /// persisted (the index is left untouched), [`Error::CorruptIndex`] if
    /// the index file is unreadable, or [`Error::Io`] on filesystem
    /// failures.
    pub fn cache<T, F>(&self, call: &CallSpec, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        match self.try_cache(call, || Ok::<_, Infallible>(f()))? {
            Ok(value) => Ok(value),
            Err(never) => match never {},
        }
    }

    /// Memoize a fallible callable
    ///
    /// Like [`Cache::cache`], but a callable error propagates unchanged in
    /// the inner `Result` and nothing is cached for that call: no object is
    /// written and no index entry is recorded.
    ///
    /// # Errors
    ///
    /// The outer `Result` carries cache failures, as in [`Cache::cache`];
    /// the inner one carries the callable's own error.
    pub fn try_cache<T, E, F>(&self, call: &CallSpec, f: F) -> Result<std::result::Result<T, E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        self.init()?;
        let index = self.pruned_index()?;
        let digest = derive_key(&call.key_envelope(), self.config.digest_width());

        if index.contains(&digest) {
            tracing::debug!(digest = %digest, callable = %call.callable, "cache hit");
            return match self.store.get(&digest) {
                Ok(value) => Ok(Ok(value)),
                Err(err @ Error::NotFound { .. }) => {
                    tracing::warn!(digest = %digest, "index entry has no backing object");
                    Err(err)
                }
                Err(err) => Err(err),
            };
        }

        tracing::debug!(digest = %digest, callable = %call.callable, "cache miss; invoking callable");
        let called_at = Utc::now();
        let value = match f() {
            Ok(value) => value,
            Err(err) => return Ok(Err(err)),
        };
        self.store.put(&digest, &value)?;
        Index::upsert(&self.config.index_path(), &digest, call.to_entry(called_at))?;
        tracing::debug!(digest = %digest, "cached new entry");
        Ok(Ok(value))
    }

    /// Retrieve a stored object directly by digest
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] if no object exists for the digest.
    pub fn get_by_digest<T: DeserializeOwned>(&self, digest: &str) -> Result<T> {
        self.store.get(digest)
    }

    /// Read-only snapshot of the index
    ///
    /// With `clear_expired` set, expired entries (and their objects) are
    /// pruned before the snapshot is taken.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::CorruptIndex`] if the index file is unreadable,
    /// or [`Error::Io`] on filesystem failures.
    pub fn get_index(&self, clear_expired: bool) -> Result<Index> {
        if clear_expired {
            self.pruned_index()
        } else {
            Index::load(&self.config.index_path())
        }
    }

    /// Remove every expired entry and its backing object
    ///
    /// # Errors
    ///
    /// Fails with [`Error::CorruptIndex`] if the index file is unreadable,
    /// or [`Error::Io`] on filesystem failures.
    pub fn prune_expired(&self) -> Result<Index> {
        self.pruned_index()
    }

    /// Delete the entire cache
    ///
    /// Removes the cache directory tree, then any parent directories left
    /// empty by the removal, stopping at the first non-empty ancestor. A
    /// missing cache directory is not an error; the next cache operation
    /// behaves as a fresh miss.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Io`] if the tree cannot be removed.
    pub fn clear_all(&self) -> Result<()> {
        let dir = self.config.cache_dir();
        match fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::io(e, dir, "remove_dir_all")),
        }

        // Unwind directories the lazy init created; removal fails on the
        // first non-empty ancestor, which is where the unwinding stops.
        let mut parent = dir.parent();
        while let Some(p) = parent {
            if p.as_os_str().is_empty() || fs::remove_dir(p).is_err() {
                break;
            }
            parent = p.parent();
        }
        Ok(())
    }

    /// Wrap a callable so every call routes through the cache
    #[must_use]
    pub fn wrap<F>(&self, callable: impl Into<String>, f: F) -> CachedFn<'_, F> {
        CachedFn {
            cache: self,
            callable: callable.into(),
            expires_after: None,
            annotation: None,
            hash_annotation: false,
            f,
        }
    }

    fn init(&self) -> Result<()> {
        let dir = self.config.cache_dir();
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| Error::io(e, dir, "create_dir_all"))?;
        }
        let index_path = self.config.index_path();
        if !index_path.exists() {
            Index::default().save(&index_path)?;
        }
        Ok(())
    }

    fn pruned_index(&self) -> Result<Index> {
        let path = self.config.index_path();
        let mut index = Index::load(&path)?;
        let expired = index.split_expired(Utc::now());
        if !expired.is_empty() {
            self.store
                .delete(expired.iter().map(|(digest, _)| digest.as_str()))?;
            index.save(&path)?;
            for (digest, entry) in &expired {
                tracing::debug!(
                    digest = %digest,
                    callable = %entry.callable,
                    "pruned expired cache entry"
                );
            }
        }
        Ok(index)
    }
}

/// A callable bundled with a cache handle and fixed per-wrapper options
///
/// The closure-over-function analogue of decorating a function: build one
/// with [`Cache::wrap`], then treat [`CachedFn::call`] as the function.
/// Arguments are passed both to the key derivation and, on a miss, to the
/// wrapped callable unchanged.
#[derive(Debug, Clone)]
pub struct CachedFn<'c, F> {
    cache: &'c Cache,
    callable: String,
    expires_after: Option<Duration>,
    annotation: Option<String>,
    hash_annotation: bool,
    f: F,
}

impl<'c, F, T> CachedFn<'c, F>
where
    F: Fn(&[Value], &Map<String, Value>) -> T,
    T: Serialize + DeserializeOwned,
{
    /// Expire entries written by this wrapper after `ttl`
    #[must_use]
    pub fn expires_after(mut self, ttl: Duration) -> Self {
        self.expires_after = Some(ttl);
        self
    }

    /// Annotate entries written by this wrapper
    #[must_use]
    pub fn annotation(mut self, text: impl Into<String>) -> Self {
        self.annotation = Some(text.into());
        self
    }

    /// Fold the annotation into the digest
    #[must_use]
    pub fn hash_annotation(mut self, hash: bool) -> Self {
        self.hash_annotation = hash;
        self
    }

    /// Invoke through the cache
    ///
    /// # Errors
    ///
    /// Propagates cache failures as [`Cache::cache`] does.
    pub fn call(&self, args: &[Value], kwargs: &Map<String, Value>) -> Result<T> {
        let spec = CallSpec {
            callable: self.callable.clone(),
            args: args.to_vec(),
            kwargs: kwargs.clone(),
            expires_after: self.expires_after,
            annotation: self.annotation.clone(),
            hash_annotation: self.hash_annotation,
        };
        self.cache.cache(&spec, || (self.f)(args, kwargs))
    }
}
