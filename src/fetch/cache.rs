// src/fetch/cache.rs

//! Content-addressed download cache
//!
//! Verified downloads live at `<root>/<algorithm>/<hex digest>`. Because the
//! key is the digest, formulas that pin the same bytes share one entry no
//! matter which URL they name.

use crate::error::Result;
use crate::hash::Checksum;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// The on-disk cache
#[derive(Debug, Clone)]
pub struct ContentCache {
    root: PathBuf,
}

/// Exclusive cross-process lock on one cache entry, released on drop
pub struct EntryLock {
    _file: File,
}

impl ContentCache {
    /// Open (creating if needed) a cache rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the bytes for `checksum` live
    pub fn path_for(&self, checksum: &Checksum) -> PathBuf {
        self.root
            .join(checksum.algorithm.name())
            .join(checksum.as_str())
    }

    /// Whether an entry exists, without verifying it
    pub fn contains(&self, checksum: &Checksum) -> bool {
        self.path_for(checksum).is_file()
    }

    /// A verified cached copy, if there is one
    ///
    /// An entry whose bytes no longer hash to its key is deleted so the
    /// caller fetches it again.
    pub fn lookup(&self, checksum: &Checksum) -> Result<Option<PathBuf>> {
        let path = self.path_for(checksum);
        if !path.is_file() {
            return Ok(None);
        }
        if checksum.matches_file(&path)? {
            debug!("Cache hit for {}", checksum);
            return Ok(Some(path));
        }
        warn!("Cached entry {} is corrupt, removing", path.display());
        fs::remove_file(&path)?;
        Ok(None)
    }

    /// Block until this process holds the entry's lock
    pub fn lock(&self, checksum: &Checksum) -> Result<EntryLock> {
        let dir = self.entry_dir(checksum)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(format!("{}.lock", checksum.as_str())))?;
        file.lock_exclusive()?;
        Ok(EntryLock { _file: file })
    }

    /// A temporary file on the same filesystem as the entry
    pub fn staging_file(&self, checksum: &Checksum) -> Result<NamedTempFile> {
        let dir = self.entry_dir(checksum)?;
        Ok(NamedTempFile::new_in(dir)?)
    }

    /// Move verified staging bytes into place
    pub fn commit(&self, staged: NamedTempFile, checksum: &Checksum) -> Result<PathBuf> {
        let path = self.path_for(checksum);
        staged.persist(&path).map_err(|e| e.error)?;
        debug!("Cached {}", path.display());
        Ok(path)
    }

    /// Remove an entry; returns whether one existed
    pub fn remove(&self, checksum: &Checksum) -> Result<bool> {
        let path = self.path_for(checksum);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn entry_dir(&self, checksum: &Checksum) -> Result<PathBuf> {
        let dir = self.root.join(checksum.algorithm.name());
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{hash_bytes, HashAlgorithm};
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_commit_and_lookup() {
        let dir = TempDir::new().unwrap();
        let cache = ContentCache::new(dir.path()).unwrap();
        let checksum = hash_bytes(HashAlgorithm::Sha256, b"source bytes");

        assert!(cache.lookup(&checksum).unwrap().is_none());

        let mut staged = cache.staging_file(&checksum).unwrap();
        staged.write_all(b"source bytes").unwrap();
        let path = cache.commit(staged, &checksum).unwrap();

        assert_eq!(path, dir.path().join("sha256").join(checksum.as_str()));
        assert_eq!(cache.lookup(&checksum).unwrap(), Some(path));
    }

    #[test]
    fn test_corrupt_entry_is_evicted() {
        let dir = TempDir::new().unwrap();
        let cache = ContentCache::new(dir.path()).unwrap();
        let checksum = hash_bytes(HashAlgorithm::Xxh128, b"expected");

        let path = cache.path_for(&checksum);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"tampered").unwrap();

        assert!(cache.contains(&checksum));
        assert!(cache.lookup(&checksum).unwrap().is_none());
        assert!(!cache.contains(&checksum));
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let cache = ContentCache::new(dir.path()).unwrap();
        let checksum = hash_bytes(HashAlgorithm::Sha256, b"x");
        assert!(!cache.remove(&checksum).unwrap());

        let mut staged = cache.staging_file(&checksum).unwrap();
        staged.write_all(b"x").unwrap();
        cache.commit(staged, &checksum).unwrap();
        assert!(cache.remove(&checksum).unwrap());
    }

    #[test]
    fn test_lock_is_reentrant_across_drops() {
        let dir = TempDir::new().unwrap();
        let cache = ContentCache::new(dir.path()).unwrap();
        let checksum = hash_bytes(HashAlgorithm::Sha256, b"x");
        drop(cache.lock(&checksum).unwrap());
        let _again = cache.lock(&checksum).unwrap();
    }
}
