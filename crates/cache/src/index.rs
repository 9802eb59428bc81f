//! Persistent digest-to-entry index
//!
//! The index is the single JSON file mapping every digest to the metadata
//! of the call that produced it. A missing file is an empty cache; a
//! present-but-unparseable file is an error, since silently discarding
//! history would surprise callers.

use chrono::{DateTime, Utc};
use derpcache_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Metadata describing one cached call
///
/// Entries are immutable once written; a digest maps to exactly one entry
/// until it is evicted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Caller-supplied identifier of the callable
    pub callable: String,
    /// When the callable was invoked (UTC)
    pub called_at: DateTime<Utc>,
    /// Time-to-live in seconds; entries without one never expire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_after: Option<f64>,
    /// Free-text label for human identification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    /// Whether the annotation was folded into the digest
    #[serde(default)]
    pub annotation_hashed: bool,
}

impl CacheEntry {
    /// The instant this entry expires, if it has a TTL
    ///
    /// TTLs that cannot be represented as a duration yield no deadline.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.expires_after?;
        let ttl = std::time::Duration::try_from_secs_f64(secs).ok()?;
        let ttl = chrono::Duration::from_std(ttl).ok()?;
        self.called_at.checked_add_signed(ttl)
    }

    /// Whether this entry has outlived its TTL at `now`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|deadline| deadline < now)
    }
}

/// Mapping from digest to entry metadata
///
/// Serialized transparently, so the on-disk form is a plain JSON object
/// keyed by digest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Index {
    entries: BTreeMap<String, CacheEntry>,
}

impl Index {
    /// Load the index from disk
    ///
    /// A missing file loads as an empty index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptIndex`] if the file exists but cannot be
    /// parsed as a digest-to-entry mapping, and [`Error::Io`] for other
    /// read failures.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(Error::io(e, path, "read")),
        };
        serde_json::from_slice(&bytes).map_err(|e| Error::corrupt_index(e, path))
    }

    /// Persist the full mapping
    ///
    /// The write is a plain overwrite; a crash mid-write can corrupt the
    /// file. See [`Index::load`] for how that surfaces.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self)
            .map_err(|e| Error::serialization(format!("failed to serialize index: {e}")))?;
        fs::write(path, json).map_err(|e| Error::io(e, path, "write"))
    }

    /// Add or replace the entry for a digest
    pub fn insert(&mut self, digest: impl Into<String>, entry: CacheEntry) {
        self.entries.insert(digest.into(), entry);
    }

    /// Read the index, add or replace one entry, and write it back
    ///
    /// # Errors
    ///
    /// Propagates the failures of [`Index::load`] and [`Index::save`].
    pub fn upsert(path: &Path, digest: impl Into<String>, entry: CacheEntry) -> Result<Self> {
        let mut index = Self::load(path)?;
        index.insert(digest, entry);
        index.save(path)?;
        Ok(index)
    }

    /// Look up the entry for a digest
    #[must_use]
    pub fn get(&self, digest: &str) -> Option<&CacheEntry> {
        self.entries.get(digest)
    }

    /// Whether a digest is present
    #[must_use]
    pub fn contains(&self, digest: &str) -> bool {
        self.entries.contains_key(digest)
    }

    /// Remove the entry for a digest
    pub fn remove(&mut self, digest: &str) -> Option<CacheEntry> {
        self.entries.remove(digest)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over digests and entries in digest order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &CacheEntry)> {
        self.entries.iter()
    }

    /// Remove and return every entry whose TTL has lapsed at `now`
    pub fn split_expired(&mut self, now: DateTime<Utc>) -> Vec<(String, CacheEntry)> {
        let mut expired = Vec::new();
        self.entries.retain(|digest, entry| {
            if entry.is_expired(now) {
                expired.push((digest.clone(), entry.clone()));
                false
            } else {
                true
            }
        });
        expired
    }

    /// Digests and entries sorted ascending by `called_at`
    #[must_use]
    pub fn sorted_by_time(&self) -> Vec<(&str, &CacheEntry)> {
        let mut ordered: Vec<_> = self
            .entries
            .iter()
            .map(|(digest, entry)| (digest.as_str(), entry))
            .collect();
        ordered.sort_by_key(|(_, entry)| entry.called_at);
        ordered
    }
}
