//! Content-addressed object storage
//!
//! Cached return values live as one file per digest directly under the
//! cache directory, next to `index.json`. Objects are serialized with
//! `serde_json` and written via a temporary file followed by a rename, so a
//! crash mid-write never leaves a truncated object behind.

use derpcache_core::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Object storage backend keyed by digest
#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    /// Create a store rooted at the cache directory
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, digest: &str) -> Result<PathBuf> {
        // Digests double as file names; anything that is not plain hex
        // (path separators above all) must be rejected before it touches
        // the filesystem.
        if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::configuration(format!(
                "digest must be a non-empty hex string, got {digest:?}"
            )));
        }
        Ok(self.root.join(digest))
    }

    /// Serialize and persist a value under its digest
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if the value cannot be serialized;
    /// nothing is written in that case. I/O failures propagate as
    /// [`Error::Io`].
    pub fn put<T: Serialize + ?Sized>(&self, digest: &str, value: &T) -> Result<()> {
        let blob = serde_json::to_vec(value).map_err(|e| {
            Error::serialization(format!("failed to serialize value for {digest}: {e}"))
        })?;
        let path = self.object_path(digest)?;

        // Write atomically using a temporary file
        let tmp_path = path.with_extension("tmp");
        let mut file =
            fs::File::create(&tmp_path).map_err(|e| Error::io(e, &tmp_path, "create"))?;
        file.write_all(&blob)
            .map_err(|e| Error::io(e, &tmp_path, "write"))?;
        file.sync_all()
            .map_err(|e| Error::io(e, &tmp_path, "sync"))?;
        drop(file);

        fs::rename(&tmp_path, &path).map_err(|e| Error::io(e, &path, "rename"))?;
        Ok(())
    }

    /// Load and deserialize the value stored under a digest
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no object exists for the digest, and
    /// [`Error::Serialization`] if the stored blob cannot be decoded as the
    /// requested type.
    pub fn get<T: DeserializeOwned>(&self, digest: &str) -> Result<T> {
        let path = self.object_path(digest)?;
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::not_found(digest)
            } else {
                Error::io(e, &path, "read")
            }
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::serialization(format!("failed to decode object {digest}: {e}")))
    }

    /// Check whether an object exists for a digest
    #[must_use]
    pub fn exists(&self, digest: &str) -> bool {
        self.object_path(digest).is_ok_and(|p| p.exists())
    }

    /// Remove the objects for the given digests
    ///
    /// Missing objects are tolerated, so deleting twice is idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if a removal fails for any reason other than the
    /// object already being gone.
    pub fn delete<I, S>(&self, digests: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for digest in digests {
            let path = self.object_path(digest.as_ref())?;
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(e, &path, "remove_file")),
            }
        }
        Ok(())
    }

    /// The directory objects are stored in
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}
