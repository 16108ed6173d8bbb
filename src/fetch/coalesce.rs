// src/fetch/coalesce.rs

//! Fetch coalescing (singleflight pattern)
//!
//! When several workers ask for the same digest at once, only the first
//! does the work. The others block on the same slot and, once it is
//! filled, share the path without verifying the bytes again. A failed
//! fetch leaves the slot empty, so the next caller tries for itself.

use crate::error::Result;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

type Slot = Arc<Mutex<Option<PathBuf>>>;

/// Coalesces concurrent fetches keyed by digest
#[derive(Default)]
pub struct FetchCoalescer {
    slots: DashMap<String, Slot>,
    coalesced_count: AtomicU64,
}

impl FetchCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fetch` unless a fetch for `key` already succeeded or is running
    pub fn coalesce<F>(&self, key: &str, fetch: F) -> Result<PathBuf>
    where
        F: FnOnce() -> Result<PathBuf>,
    {
        let slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let mut guard = slot.lock();
        if let Some(path) = guard.as_ref()
            && path.is_file()
        {
            debug!("Coalesced fetch for {}", key);
            self.coalesced_count.fetch_add(1, Ordering::Relaxed);
            return Ok(path.clone());
        }

        let path = fetch()?;
        *guard = Some(path.clone());
        Ok(path)
    }

    /// Number of requests served by another request's result
    pub fn coalesced_count(&self) -> u64 {
        self.coalesced_count.load(Ordering::Relaxed)
    }
}
