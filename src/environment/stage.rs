// src/environment/stage.rs

//! Unpacking fetched sources into a build directory
//!
//! Supports .tar.gz/.tgz, .tar.xz/.txz, .tar.zst and plain .tar. The format
//! is sniffed from the leading bytes because cached files are named by
//! digest, not by their original file name. Anything that is not an archive
//! is copied in as a single file.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::debug;
use xz2::read::XzDecoder;

/// Archive formats recognised by magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    TarXz,
    TarZst,
    Tar,
}

impl ArchiveFormat {
    /// Sniff the format of the file at `path`
    pub fn detect(path: &Path) -> Result<Option<Self>> {
        let mut header = [0u8; 262];
        let mut file = File::open(path)?;
        let mut filled = 0;
        while filled < header.len() {
            let n = file.read(&mut header[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        let header = &header[..filled];

        Ok(if header.starts_with(&[0x1f, 0x8b]) {
            Some(Self::TarGz)
        } else if header.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Some(Self::TarXz)
        } else if header.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Some(Self::TarZst)
        } else if header.len() >= 262 && &header[257..262] == b"ustar" {
            Some(Self::Tar)
        } else {
            None
        })
    }
}

/// Unpack `archive` into `dest`, returning the source root
///
/// The source root is `dest/<extract_dir>` when given, the single top-level
/// directory when the archive has exactly one, and `dest` otherwise. A
/// non-archive is copied to `dest/<file_name>`.
pub fn unpack(
    archive: &Path,
    dest: &Path,
    file_name: &str,
    extract_dir: Option<&str>,
) -> Result<PathBuf> {
    fs::create_dir_all(dest)?;

    let Some(format) = ArchiveFormat::detect(archive)? else {
        let target = dest.join(file_name);
        fs::copy(archive, &target)?;
        debug!("Copied {} into {}", file_name, dest.display());
        return Ok(dest.to_path_buf());
    };

    let reader = BufReader::new(File::open(archive)?);
    match format {
        ArchiveFormat::TarGz => extract_tar(GzDecoder::new(reader), dest)?,
        ArchiveFormat::TarXz => extract_tar(XzDecoder::new(reader), dest)?,
        ArchiveFormat::TarZst => extract_tar(zstd::stream::read::Decoder::new(reader)?, dest)?,
        ArchiveFormat::Tar => extract_tar(reader, dest)?,
    }
    debug!("Extracted {:?} archive into {}", format, dest.display());

    if let Some(dir) = extract_dir {
        let root = dest.join(dir);
        if !root.is_dir() {
            return Err(Error::invalid(
                file_name,
                format!("archive has no directory named {}", dir),
            ));
        }
        return Ok(root);
    }

    let entries: Vec<_> = fs::read_dir(dest)?.filter_map(|e| e.ok()).collect();
    if entries.len() == 1 && entries[0].file_type().map(|t| t.is_dir()).unwrap_or(false) {
        return Ok(entries[0].path());
    }
    Ok(dest.to_path_buf())
}

fn extract_tar<R: Read>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    archive.unpack(dest)?;
    Ok(())
}

/// Last path segment of a URL, for naming copied files
pub fn file_name_from_url(url: &str) -> String {
    url.rsplit('/')
        .next()
        .map(|s| s.split(['?', '#']).next().unwrap_or(s))
        .filter(|s| !s.is_empty())
        .unwrap_or("download")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn tar_gz_with(dir: &Path, entries: &[(&str, &str)]) -> PathBuf {
        let path = dir.join("src.tar.gz");
        let encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, contents.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    #[test]
    fn test_single_top_level_dir_becomes_root() {
        let tmp = TempDir::new().unwrap();
        let archive = tar_gz_with(
            tmp.path(),
            &[("hello-1.0/Makefile", "all:\n"), ("hello-1.0/hello.c", "int main(){}")],
        );
        assert_eq!(ArchiveFormat::detect(&archive).unwrap(), Some(ArchiveFormat::TarGz));

        let dest = tmp.path().join("build");
        let root = unpack(&archive, &dest, "src.tar.gz", None).unwrap();
        assert_eq!(root, dest.join("hello-1.0"));
        assert!(root.join("hello.c").is_file());
    }

    #[test]
    fn test_flat_archive_and_extract_dir() {
        let tmp = TempDir::new().unwrap();
        let archive = tar_gz_with(tmp.path(), &[("a.txt", "a"), ("sub/b.txt", "b")]);

        let flat = unpack(&archive, &tmp.path().join("flat"), "src.tar.gz", None).unwrap();
        assert_eq!(flat, tmp.path().join("flat"));

        let sub = unpack(&archive, &tmp.path().join("sub"), "src.tar.gz", Some("sub")).unwrap();
        assert!(sub.join("b.txt").is_file());

        assert!(unpack(&archive, &tmp.path().join("bad"), "src.tar.gz", Some("missing")).is_err());
    }

    #[test]
    fn test_plain_file_is_copied() {
        let tmp = TempDir::new().unwrap();
        let plain = tmp.path().join("blob");
        fs::write(&plain, "#!/bin/sh\necho hi\n").unwrap();

        let dest = tmp.path().join("build");
        let root = unpack(&plain, &dest, "install.sh", None).unwrap();
        assert_eq!(root, dest);
        assert!(dest.join("install.sh").is_file());
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(file_name_from_url("https://x.org/a/hello-1.0.tar.gz"), "hello-1.0.tar.gz");
        assert_eq!(file_name_from_url("https://x.org/fix.patch?raw=1"), "fix.patch");
        assert_eq!(file_name_from_url("https://x.org/"), "download");
    }
}
