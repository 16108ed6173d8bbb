// src/fetch/mod.rs

//! Resource Fetcher
//!
//! Turns a [`FetchSpec`] (ordered locations plus an integrity hash) into a
//! local path to verified bytes:
//!
//! 1. A verified cache entry for the hash short-circuits everything.
//! 2. Otherwise each location is tried in order through the transport for
//!    its scheme. Transport failures move on to the next mirror; bytes that
//!    arrive but do not match the hash fail immediately.
//! 3. Verified bytes are renamed into the content-addressed cache.
//!
//! Concurrent requests for one digest collapse into a single download.

mod cache;
mod coalesce;
mod transport;

pub use cache::{ContentCache, EntryLock};
pub use coalesce::FetchCoalescer;
pub use transport::{
    FileTransport, HttpTransport, Transport, TransportError, DEFAULT_HTTP_TIMEOUT,
};

use crate::error::{Error, Result};
use crate::hash::{hash_file, Checksum};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// What to fetch: a label for logs, locations in preference order, and the
/// hash the bytes must have
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSpec {
    pub name: String,
    pub urls: Vec<String>,
    pub checksum: Checksum,
}

impl FetchSpec {
    /// A single-location spec
    pub fn new(name: impl Into<String>, url: impl Into<String>, checksum: Checksum) -> Self {
        Self {
            name: name.into(),
            urls: vec![url.into()],
            checksum,
        }
    }

    /// Add an alternate location
    pub fn with_mirror(mut self, url: impl Into<String>) -> Self {
        self.urls.push(url.into());
        self
    }
}

/// Fetches and verifies resources into a [`ContentCache`]
pub struct Fetcher {
    cache: ContentCache,
    transports: Vec<Arc<dyn Transport>>,
    inflight: FetchCoalescer,
    pool: rayon::ThreadPool,
}

impl Fetcher {
    /// A fetcher with the HTTP(S) and `file://` transports
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        fetch_jobs: usize,
        http_timeout: Duration,
    ) -> Result<Self> {
        let http = HttpTransport::new(http_timeout).map_err(|e| Error::Config(e.to_string()))?;
        let transports: Vec<Arc<dyn Transport>> = vec![Arc::new(http), Arc::new(FileTransport)];
        Self::with_transports(cache_dir, fetch_jobs, transports)
    }

    /// A fetcher with an explicit transport set
    pub fn with_transports(
        cache_dir: impl Into<PathBuf>,
        fetch_jobs: usize,
        transports: Vec<Arc<dyn Transport>>,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(fetch_jobs.max(1))
            .thread_name(|i| format!("fetch-{}", i))
            .build()
            .map_err(|e| Error::Config(format!("failed to create fetch pool: {}", e)))?;

        Ok(Self {
            cache: ContentCache::new(cache_dir)?,
            transports,
            inflight: FetchCoalescer::new(),
            pool,
        })
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Requests answered by another in-flight request for the same hash
    pub fn coalesced_count(&self) -> u64 {
        self.inflight.coalesced_count()
    }

    /// Fetch one resource, returning the path of its verified bytes
    pub fn fetch(&self, spec: &FetchSpec) -> Result<PathBuf> {
        let key = spec.checksum.to_prefixed_string();
        self.inflight.coalesce(&key, || {
            if let Some(path) = self.cache.lookup(&spec.checksum)? {
                debug!("{}: using cached {}", spec.name, path.display());
                return Ok(path);
            }

            // Another process may be downloading the same bytes
            let _lock = self.cache.lock(&spec.checksum)?;
            if let Some(path) = self.cache.lookup(&spec.checksum)? {
                return Ok(path);
            }
            self.download(spec)
        })
    }

    /// Fetch a batch concurrently; results are in input order
    pub fn fetch_all(&self, specs: &[FetchSpec]) -> Vec<Result<PathBuf>> {
        self.pool
            .install(|| specs.par_iter().map(|spec| self.fetch(spec)).collect())
    }

    fn transport_for(&self, scheme: &str) -> Option<&Arc<dyn Transport>> {
        self.transports
            .iter()
            .find(|t| t.schemes().contains(&scheme))
    }

    fn download(&self, spec: &FetchSpec) -> Result<PathBuf> {
        if spec.urls.is_empty() {
            return Err(Error::Unreachable {
                location: spec.name.clone(),
                reason: "no locations declared".to_string(),
            });
        }

        let mut last_failure: Option<(String, String)> = None;
        let mut first_unsupported: Option<(String, String)> = None;

        for location in &spec.urls {
            let url = match Url::parse(location) {
                Ok(url) => url,
                Err(e) => {
                    warn!("{}: invalid location {}: {}", spec.name, location, e);
                    last_failure = Some((location.clone(), format!("invalid location: {}", e)));
                    continue;
                }
            };

            let Some(transport) = self.transport_for(url.scheme()) else {
                debug!("{}: no transport for scheme '{}'", spec.name, url.scheme());
                first_unsupported.get_or_insert((url.scheme().to_string(), location.clone()));
                continue;
            };

            info!("Fetching {} from {}", spec.name, location);
            let mut staged = self.cache.staging_file(&spec.checksum)?;
            match transport.download(&url, staged.as_file_mut()) {
                Ok(bytes) => debug!("{}: received {} bytes", spec.name, bytes),
                Err(e) => {
                    warn!("{}: {} failed: {}", spec.name, location, e);
                    last_failure = Some((location.clone(), e.to_string()));
                    continue;
                }
            }
            let actual = hash_file(spec.checksum.algorithm, staged.path())?;
            if actual != spec.checksum {
                return Err(Error::IntegrityMismatch {
                    location: location.clone(),
                    expected: spec.checksum.to_prefixed_string(),
                    actual: actual.to_prefixed_string(),
                });
            }

            return self.cache.commit(staged, &spec.checksum);
        }

        match (last_failure, first_unsupported) {
            (Some((location, reason)), _) => Err(Error::Unreachable { location, reason }),
            (None, Some((scheme, location))) => Err(Error::Unsupported { scheme, location }),
            (None, None) => Err(Error::Unreachable {
                location: spec.name.clone(),
                reason: "no usable location".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{hash_bytes, HashAlgorithm};
    use std::io::Write;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Serves files like `file://` and counts every download
    struct CountingTransport {
        calls: AtomicUsize,
    }

    impl Transport for CountingTransport {
        fn schemes(&self) -> &[&'static str] {
            &["file"]
        }

        fn download(&self, url: &Url, out: &mut dyn Write) -> std::result::Result<u64, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            FileTransport.download(url, out)
        }
    }

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        transport: Arc<CountingTransport>,
        fetcher: Fetcher,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let transport = Arc::new(CountingTransport {
            calls: AtomicUsize::new(0),
        });
        let fetcher =
            Fetcher::with_transports(
            root.join("cache"),
            4,
            vec![transport.clone() as Arc<dyn Transport>],
        )
        .unwrap();
        Fixture {
            _dir: dir,
            root,
            transport,
            fetcher,
        }
    }

    fn serve(root: &Path, name: &str, data: &[u8]) -> String {
        let path = root.join(name);
        std::fs::write(&path, data).unwrap();
        Url::from_file_path(&path).unwrap().to_string()
    }

    #[test]
    fn test_fetch_verifies_and_caches() {
        let fx = fixture();
        let url = serve(&fx.root, "a.tar.gz", b"archive");
        let spec = FetchSpec::new("a", url, hash_bytes(HashAlgorithm::Sha256, b"archive"));

        let path = fx.fetcher.fetch(&spec).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"archive");
        assert!(path.starts_with(fx.root.join("cache").join("sha256")));
        assert_eq!(fx.transport.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cached_bytes_skip_transport() {
        let fx = fixture();
        let url = serve(&fx.root, "a.tar.gz", b"archive");
        let spec = FetchSpec::new("a", url, hash_bytes(HashAlgorithm::Sha256, b"archive"));
        fx.fetcher.fetch(&spec).unwrap();

        // A fresh fetcher over the same cache still makes no transport call
        let again = Fetcher::with_transports(
            fx.root.join("cache"),
            1,
            vec![fx.transport.clone() as Arc<dyn Transport>],
        )
        .unwrap();
        again.fetch(&spec).unwrap();
        assert_eq!(fx.transport.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_integrity_mismatch_is_not_retried() {
        let fx = fixture();
        let wrong = serve(&fx.root, "wrong", b"tampered");
        let right = serve(&fx.root, "right", b"archive");
        let spec = FetchSpec::new("a", wrong, hash_bytes(HashAlgorithm::Sha256, b"archive"))
            .with_mirror(right);

        let err = fx.fetcher.fetch(&spec).unwrap_err();
        assert!(matches!(err, Error::IntegrityMismatch { .. }));
        assert_eq!(fx.transport.calls.load(Ordering::SeqCst), 1);
        assert!(!fx.fetcher.cache().contains(&spec.checksum));
    }

    #[test]
    fn test_mirror_fallback() {
        let fx = fixture();
        let missing = Url::from_file_path(fx.root.join("missing")).unwrap().to_string();
        let mirror = serve(&fx.root, "mirror", b"archive");
        let spec = FetchSpec::new("a", missing, hash_bytes(HashAlgorithm::Sha256, b"archive"))
            .with_mirror(mirror);

        assert!(fx.fetcher.fetch(&spec).is_ok());
        assert_eq!(fx.transport.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsupported_and_unreachable() {
        let fx = fixture();
        let checksum = hash_bytes(HashAlgorithm::Sha256, b"archive");

        let git = FetchSpec::new("a", "git://example.com/a.git", checksum.clone());
        assert!(matches!(
            fx.fetcher.fetch(&git).unwrap_err(),
            Error::Unsupported { ref scheme, .. } if scheme == "git"
        ));

        let missing = Url::from_file_path(fx.root.join("missing")).unwrap().to_string();
        let mixed = git.with_mirror(missing);
        assert!(matches!(
            fx.fetcher.fetch(&mixed).unwrap_err(),
            Error::Unreachable { .. }
        ));
    }

    #[test]
    fn test_fetch_all_shares_identical_hash() {
        let fx = fixture();
        let url = serve(&fx.root, "shared", b"shared resource");
        let checksum = hash_bytes(HashAlgorithm::Sha256, b"shared resource");
        let specs = vec![
            FetchSpec::new("x/res", url.clone(), checksum.clone()),
            FetchSpec::new("y/res", url, checksum),
        ];

        let results = fx.fetcher.fetch_all(&specs);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(fx.transport.calls.load(Ordering::SeqCst), 1);
    }
}
