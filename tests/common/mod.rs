// tests/common/mod.rs

//! Shared helpers for formula-engine integration tests

#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use formula_engine::fetch::{FileTransport, Transport, TransportError};
use formula_engine::formula::{parse_formula, Formula, MemorySource};
use formula_engine::hash::sha256;
use formula_engine::host::{Arch, Compiler, CompilerKind, Os};
use formula_engine::{EngineConfig, Fetcher, HostFacts, InstallOptions, Orchestrator, ReceiptStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use url::Url;

/// Serves `file://` URLs and counts what was downloaded
#[derive(Default)]
pub struct CountingTransport {
    total: AtomicUsize,
    per_url: Mutex<HashMap<String, usize>>,
}

impl CountingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn count(&self, url: &str) -> usize {
        self.per_url.lock().get(url).copied().unwrap_or(0)
    }
}

impl Transport for CountingTransport {
    fn schemes(&self) -> &[&'static str] {
        &["file"]
    }

    fn download(&self, url: &Url, out: &mut dyn Write) -> Result<u64, TransportError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.per_url.lock().entry(url.to_string()).or_insert(0) += 1;
        FileTransport.download(url, out)
    }
}

/// Write a `<name>-1.0/README` tarball; returns its URL and sha256
pub fn source_archive(dir: &Path, name: &str) -> (String, String) {
    let path = dir.join(format!("{}.tar.gz", name));
    let file = fs::File::create(&path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    let contents = format!("{} sources\n", name);
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, format!("{}-1.0/README", name), contents.as_bytes())
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap();

    let bytes = fs::read(&path).unwrap();
    (Url::from_file_path(&path).unwrap().to_string(), sha256(&bytes))
}

/// Write a plain file to serve; returns its URL and sha256
pub fn served_file(dir: &Path, name: &str, data: &[u8]) -> (String, String) {
    let path = dir.join(name);
    fs::write(&path, data).unwrap();
    (Url::from_file_path(&path).unwrap().to_string(), sha256(data))
}

/// Formula header and source sections
pub fn header(name: &str, url: &str, sha: &str) -> String {
    format!(
        "[formula]\nname = \"{name}\"\nversion = \"1.0\"\n\n[source]\nurl = \"{url}\"\nsha256 = \"{sha}\"\n\n"
    )
}

pub fn dependency(name: &str, kind: &str) -> String {
    format!("[[dependencies]]\nname = \"{name}\"\nkind = \"{kind}\"\n\n")
}

pub fn formula(parts: &[&str]) -> Formula {
    parse_formula(&parts.concat()).unwrap()
}

/// Build step that populates the prefix
pub const INSTALL: &str = r#"
[[build]]
run = ["sh", "-c", "mkdir -p %(bin)s && cp README %(prefix)s/"]
"#;

pub fn linux_gcc() -> HostFacts {
    HostFacts::new(Os::Linux, Arch::X86_64, Compiler::new(CompilerKind::Gcc, Some("13.2")))
}

/// An orchestrator rooted in a temp dir, downloading through `transport`
pub struct Harness {
    pub root: TempDir,
    pub transport: Arc<CountingTransport>,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn new(root: TempDir, source: MemorySource) -> Self {
        Self::with_host(root, source, linux_gcc())
    }

    pub fn with_host(root: TempDir, source: MemorySource, host: HostFacts) -> Self {
        let config = EngineConfig::rooted_at(root.path());
        let transport = CountingTransport::new();
        let fetcher = Fetcher::with_transports(
            &config.cache_dir,
            config.fetch_jobs,
            vec![transport.clone() as Arc<dyn Transport>],
        )
        .unwrap();
        let receipts = ReceiptStore::open(&config.receipts_db).unwrap();
        let orchestrator = Orchestrator::new(config, host, Box::new(source), fetcher, receipts);
        Self {
            root,
            transport,
            orchestrator,
        }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }
}

pub fn options() -> InstallOptions {
    InstallOptions {
        run_tests: false,
        force: false,
        keep_going: false,
        jobs: 2,
    }
}

pub fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
