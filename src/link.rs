// src/link.rs

//! Linking installed prefixes into the shared tree
//!
//! Every installed formula gets `<link_dir>/opt/<name>` pointing at its
//! prefix, so dependents have a version-independent path to it. Unless the
//! formula is keg-only, each file under the prefix's [`LINKED_DIRS`] is also
//! symlinked to the same relative path under `<link_dir>`.
//!
//! A link path that already exists is replaced only when it is a symlink
//! into the same formula's cellar directory (an older version or revision).
//! Anything else there is a conflict, and nothing is linked. Once linked,
//! leftover links into other versions of the formula are removed.

use crate::error::{Error, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Prefix subdirectories whose contents are linked into the shared tree
pub const LINKED_DIRS: &[&str] = &["bin", "sbin", "lib", "include", "share", "etc"];

/// What a successful link produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Linked {
    /// The `opt/<name>` link
    pub opt: PathBuf,
    /// Files linked into the shared tree (zero for keg-only formulas)
    pub files: usize,
}

/// Creates and removes links from the shared tree into the cellar
pub struct Linker<'a> {
    link_dir: &'a Path,
    cellar: &'a Path,
}

impl<'a> Linker<'a> {
    pub fn new(link_dir: &'a Path, cellar: &'a Path) -> Self {
        Self { link_dir, cellar }
    }

    /// `<link_dir>/opt/<name>`
    pub fn opt_path(&self, name: &str) -> PathBuf {
        self.link_dir.join("opt").join(name)
    }

    /// Link `prefix` for formula `name`
    ///
    /// All link paths are checked before any is created, so a conflict
    /// leaves the shared tree untouched.
    pub fn link(&self, name: &str, prefix: &Path, keg_only: bool) -> Result<Linked> {
        let mut planned = vec![(prefix.to_path_buf(), self.opt_path(name))];
        if !keg_only {
            for dir in LINKED_DIRS {
                let root = prefix.join(dir);
                if !root.is_dir() {
                    continue;
                }
                for entry in WalkDir::new(&root).follow_links(false) {
                    let entry = entry.map_err(|e| Error::Io(io::Error::other(e)))?;
                    if entry.file_type().is_dir() {
                        continue;
                    }
                    let relative = entry
                        .path()
                        .strip_prefix(prefix)
                        .map_err(|e| Error::Io(io::Error::other(e)))?;
                    planned.push((entry.path().to_path_buf(), self.link_dir.join(relative)));
                }
            }
        }

        for (_, link) in &planned {
            match fs::symlink_metadata(link) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
                Ok(meta) if meta.file_type().is_symlink() && self.owns(name, link) => {}
                Ok(_) => {
                    return Err(Error::Conflict {
                        formula: name.to_string(),
                        with: link.display().to_string(),
                        reason: "path already exists and is not linked from this formula"
                            .to_string(),
                    });
                }
            }
        }

        for (target, link) in &planned {
            replace_symlink(target, link)?;
        }
        let stale = self.remove_links(name, |target| !target.starts_with(prefix))?;
        if stale > 0 {
            debug!("Removed {} stale links for {}", stale, name);
        }
        let files = planned.len() - 1;
        info!("Linked {} ({} files)", name, files);
        Ok(Linked {
            opt: self.opt_path(name),
            files,
        })
    }

    /// Remove every link in the shared tree that points into `name`'s
    /// cellar directory; returns how many were removed
    pub fn unlink(&self, name: &str) -> Result<usize> {
        let removed = self.remove_links(name, |_| true)?;
        if removed > 0 {
            info!("Unlinked {} ({} links)", name, removed);
        }
        Ok(removed)
    }

    /// Remove `name`'s links whose target satisfies `doomed`
    fn remove_links(&self, name: &str, doomed: impl Fn(&Path) -> bool) -> Result<usize> {
        if !self.link_dir.is_dir() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in WalkDir::new(self.link_dir).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable link tree entry: {}", e);
                    continue;
                }
            };
            if !entry.path_is_symlink() {
                continue;
            }
            let Ok(target) = fs::read_link(entry.path()) else {
                continue;
            };
            if target.starts_with(self.cellar.join(name)) && doomed(&target) {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Whether the symlink at `link` points into `<cellar>/<name>/`
    fn owns(&self, name: &str, link: &Path) -> bool {
        fs::read_link(link)
            .map(|target| target.starts_with(self.cellar.join(name)))
            .unwrap_or(false)
    }
}

/// Point `link` at `target`, replacing an existing file or symlink at `link`
///
/// Parent directories are created as needed. An existing directory is
/// never removed.
pub fn replace_symlink(target: &Path, link: &Path) -> io::Result<()> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Ok(meta) = fs::symlink_metadata(link) {
        if meta.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} is a directory", link.display()),
            ));
        }
        fs::remove_file(link)?;
    }

    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)?;
        debug!("Linked {} -> {}", link.display(), target.display());
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = target;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "symlinks not supported on this platform",
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn install(cellar: &Path, name: &str, version: &str) -> PathBuf {
        let prefix = cellar.join(name).join(version);
        fs::create_dir_all(prefix.join("bin")).unwrap();
        fs::create_dir_all(prefix.join("lib/pkgconfig")).unwrap();
        fs::create_dir_all(prefix.join("libexec")).unwrap();
        fs::write(prefix.join("bin").join(name), "#!/bin/sh\n").unwrap();
        fs::write(prefix.join("lib/pkgconfig").join(format!("{name}.pc")), "").unwrap();
        fs::write(prefix.join("libexec/helper"), "").unwrap();
        prefix
    }

    #[test]
    fn test_link_populates_shared_tree() {
        let dir = TempDir::new().unwrap();
        let cellar = dir.path().join("cellar");
        let local = dir.path().join("local");
        let prefix = install(&cellar, "tool", "1.0");

        let linked = Linker::new(&local, &cellar).link("tool", &prefix, false).unwrap();
        assert_eq!(linked.files, 2);
        assert_eq!(fs::read_link(&linked.opt).unwrap(), prefix);
        assert_eq!(
            fs::read_link(local.join("bin/tool")).unwrap(),
            prefix.join("bin/tool")
        );
        assert!(local.join("lib/pkgconfig/tool.pc").exists());
        // libexec stays private to the prefix
        assert!(!local.join("libexec").exists());
    }

    #[test]
    fn test_keg_only_gets_opt_link_only() {
        let dir = TempDir::new().unwrap();
        let cellar = dir.path().join("cellar");
        let local = dir.path().join("local");
        let prefix = install(&cellar, "tool", "1.0");

        let linked = Linker::new(&local, &cellar).link("tool", &prefix, true).unwrap();
        assert_eq!(linked.files, 0);
        assert!(local.join("opt/tool").exists());
        assert!(!local.join("bin").exists());
    }

    #[test]
    fn test_relink_replaces_older_version() {
        let dir = TempDir::new().unwrap();
        let cellar = dir.path().join("cellar");
        let local = dir.path().join("local");
        let linker = Linker::new(&local, &cellar);

        let old = install(&cellar, "tool", "1.0");
        fs::write(old.join("bin/tool-legacy"), "").unwrap();
        linker.link("tool", &old, false).unwrap();
        assert!(local.join("bin/tool-legacy").exists());
        let new = install(&cellar, "tool", "1.0_1");
        linker.link("tool", &new, false).unwrap();

        assert_eq!(fs::read_link(local.join("opt/tool")).unwrap(), new);
        assert_eq!(fs::read_link(local.join("bin/tool")).unwrap(), new.join("bin/tool"));
        // Files only the old version had are no longer linked
        assert!(fs::symlink_metadata(local.join("bin/tool-legacy")).is_err());
    }

    #[test]
    fn test_foreign_file_is_a_conflict() {
        let dir = TempDir::new().unwrap();
        let cellar = dir.path().join("cellar");
        let local = dir.path().join("local");
        let linker = Linker::new(&local, &cellar);

        let first = install(&cellar, "first", "1.0");
        fs::write(first.join("bin/shared"), "").unwrap();
        linker.link("first", &first, false).unwrap();

        let second = install(&cellar, "second", "2.0");
        fs::write(second.join("bin/shared"), "").unwrap();
        let err = linker.link("second", &second, false).unwrap_err();
        match err {
            Error::Conflict { formula, with, .. } => {
                assert_eq!(formula, "second");
                assert!(with.ends_with("bin/shared"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // Nothing from the failed link was created
        assert!(!local.join("opt/second").exists());
        assert!(!local.join("bin/second").exists());
        assert_eq!(
            fs::read_link(local.join("bin/shared")).unwrap(),
            first.join("bin/shared")
        );
    }

    #[test]
    fn test_unlink_removes_only_own_links() {
        let dir = TempDir::new().unwrap();
        let cellar = dir.path().join("cellar");
        let local = dir.path().join("local");
        let linker = Linker::new(&local, &cellar);

        let tool = install(&cellar, "tool", "1.0");
        let other = install(&cellar, "other", "1.0");
        linker.link("tool", &tool, false).unwrap();
        linker.link("other", &other, false).unwrap();

        assert_eq!(linker.unlink("tool").unwrap(), 3);
        assert!(fs::symlink_metadata(local.join("bin/tool")).is_err());
        assert!(fs::symlink_metadata(local.join("opt/tool")).is_err());
        assert!(local.join("bin/other").exists());
        assert_eq!(linker.unlink("missing").unwrap(), 0);
    }

    #[test]
    fn test_replace_symlink_refuses_directory() {
        let dir = TempDir::new().unwrap();
        let link = dir.path().join("taken");
        fs::create_dir(&link).unwrap();
        assert!(replace_symlink(Path::new("/nowhere"), &link).is_err());
        assert!(link.is_dir());
    }
}
