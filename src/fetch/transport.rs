// src/fetch/transport.rs

//! Transports: how bytes for a location are retrieved
//!
//! A transport only moves bytes. Verification and caching belong to the
//! [`Fetcher`](super::Fetcher); a transport that returns `Ok` may still have
//! produced the wrong bytes.

use reqwest::blocking::Client;
use std::fs::File;
use std::io::{self, Write};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Default timeout for HTTP requests
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// A transport-level failure (the location could not be read)
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        Self(e.to_string())
    }
}

/// Retrieves the bytes behind a URL
pub trait Transport: Send + Sync {
    /// URL schemes this transport handles
    fn schemes(&self) -> &[&'static str];

    /// Write the bytes at `url` into `out`, returning how many were written
    fn download(&self, url: &Url, out: &mut dyn Write) -> Result<u64, TransportError>;
}

/// HTTP(S) transport using a blocking reqwest client
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("formula-engine/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn schemes(&self) -> &[&'static str] {
        &["https", "http"]
    }

    fn download(&self, url: &Url, out: &mut dyn Write) -> Result<u64, TransportError> {
        debug!("GET {}", url);
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| TransportError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError(format!("HTTP {}", response.status())));
        }

        response
            .copy_to(out)
            .map_err(|e| TransportError(format!("failed to read response: {}", e)))
    }
}

/// `file://` transport: copies a local file
#[derive(Debug, Default, Clone, Copy)]
pub struct FileTransport;

impl Transport for FileTransport {
    fn schemes(&self) -> &[&'static str] {
        &["file"]
    }

    fn download(&self, url: &Url, out: &mut dyn Write) -> Result<u64, TransportError> {
        let path = url
            .to_file_path()
            .map_err(|_| TransportError(format!("not a local path: {}", url)))?;
        let mut file = File::open(&path)
            .map_err(|e| TransportError(format!("{}: {}", path.display(), e)))?;
        Ok(io::copy(&mut file, out)?)
    }
}
