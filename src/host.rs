// src/host.rs

//! Host facts: the inputs every Condition is evaluated against
//!
//! Facts are gathered once per install attempt and then frozen. Nothing
//! later in the pipeline looks at the live host again, so a plan's
//! conditional choices stay consistent for the whole attempt.

use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::process::Command;
use std::sync::OnceLock;
use strum_macros::{Display, EnumString};
use tracing::{debug, warn};

/// Host operating system family
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Os {
    #[strum(to_string = "macos", serialize = "darwin")]
    Macos,
    Linux,
    Other,
}

impl Os {
    /// The OS this binary was compiled for
    pub fn current() -> Self {
        match std::env::consts::OS {
            "macos" => Self::Macos,
            "linux" => Self::Linux,
            _ => Self::Other,
        }
    }
}

/// CPU architecture
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum Arch {
    #[serde(rename = "x86_64", alias = "intel", alias = "amd64")]
    #[strum(to_string = "x86_64", serialize = "intel", serialize = "amd64")]
    X86_64,
    #[serde(rename = "arm64", alias = "aarch64", alias = "arm")]
    #[strum(to_string = "arm64", serialize = "aarch64", serialize = "arm")]
    Arm64,
    #[serde(rename = "other")]
    #[strum(to_string = "other")]
    Other,
}

impl Arch {
    /// The architecture this binary was compiled for
    pub fn current() -> Self {
        match std::env::consts::ARCH {
            "x86_64" => Self::X86_64,
            "aarch64" => Self::Arm64,
            _ => Self::Other,
        }
    }
}

/// Compiler family
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CompilerKind {
    Clang,
    Gcc,
}

/// The active C/C++ toolchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compiler {
    /// Compiler family
    pub kind: CompilerKind,
    /// Dotted version, e.g. "13.2.0"
    pub version: Option<String>,
    /// Vendor build number (Apple clang reports e.g. 1600)
    pub build: Option<u32>,
    /// C compiler command
    pub cc: String,
    /// C++ compiler command
    pub cxx: String,
}

impl Compiler {
    /// A compiler description without probing the host
    pub fn new(kind: CompilerKind, version: Option<&str>) -> Self {
        let (cc, cxx) = match kind {
            CompilerKind::Clang => ("clang", "clang++"),
            CompilerKind::Gcc => ("gcc", "g++"),
        };
        Self {
            kind,
            version: version.map(str::to_string),
            build: None,
            cc: cc.to_string(),
            cxx: cxx.to_string(),
        }
    }

    /// Set the vendor build number
    pub fn with_build(mut self, build: u32) -> Self {
        self.build = Some(build);
        self
    }

    /// Probe `cc --version` on the host
    ///
    /// Falls back to an unversioned compiler matching the OS convention
    /// (clang on macOS, gcc elsewhere) when probing fails.
    pub fn detect() -> Self {
        let fallback = || {
            let kind = if Os::current() == Os::Macos {
                CompilerKind::Clang
            } else {
                CompilerKind::Gcc
            };
            Self::new(kind, None)
        };

        let cc = match which::which("cc") {
            Ok(path) => path,
            Err(e) => {
                warn!("No cc on PATH ({}), assuming default toolchain", e);
                return fallback();
            }
        };

        let output = match Command::new(&cc).arg("--version").output() {
            Ok(out) if out.status.success() => out,
            _ => return fallback(),
        };

        let text = String::from_utf8_lossy(&output.stdout);
        match Self::parse_version_banner(&text) {
            Some(compiler) => {
                debug!(
                    "Detected compiler: {} {:?} (build {:?})",
                    compiler.kind, compiler.version, compiler.build
                );
                compiler
            }
            None => fallback(),
        }
    }

    /// Parse the first lines of `cc --version`
    pub fn parse_version_banner(text: &str) -> Option<Self> {
        static VERSION_RE: OnceLock<Regex> = OnceLock::new();
        static BUILD_RE: OnceLock<Regex> = OnceLock::new();
        let version_re =
            VERSION_RE.get_or_init(|| Regex::new(r"(\d+\.\d+(?:\.\d+)?)").expect("valid regex"));
        let build_re =
            BUILD_RE.get_or_init(|| Regex::new(r"clang-(\d+)").expect("valid regex"));

        let first = text.lines().next()?;
        let kind = if text.contains("clang") {
            CompilerKind::Clang
        } else if first.contains("gcc") || first.contains("GCC") || text.contains("Free Software Foundation") {
            CompilerKind::Gcc
        } else {
            return None;
        };

        let version = version_re
            .captures(first)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str());
        let mut compiler = Self::new(kind, version);
        if let Some(build) = build_re
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
        {
            compiler.build = Some(build);
        }
        Some(compiler)
    }

    /// Human-readable identity, e.g. "gcc 13.2.0"
    pub fn describe(&self) -> String {
        match (&self.version, self.build) {
            (Some(v), Some(b)) => format!("{} {} (build {})", self.kind, v, b),
            (Some(v), None) => format!("{} {}", self.kind, v),
            (None, Some(b)) => format!("{} (build {})", self.kind, b),
            (None, None) => self.kind.to_string(),
        }
    }
}

/// Frozen facts about the host for one install attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFacts {
    pub os: Os,
    /// OS release, e.g. "14.5" on macOS
    pub os_version: Option<String>,
    pub arch: Arch,
    pub compiler: Compiler,
    /// Enabled build variant flags
    pub variants: BTreeSet<String>,
}

impl HostFacts {
    /// Facts for an explicit platform, used by tests and overrides
    pub fn new(os: Os, arch: Arch, compiler: Compiler) -> Self {
        Self {
            os,
            os_version: None,
            arch,
            compiler,
            variants: BTreeSet::new(),
        }
    }

    /// Detect facts from the running host
    pub fn detect() -> Self {
        let os = Os::current();
        let os_version = match os {
            Os::Macos => command_stdout("sw_vers", &["-productVersion"]),
            Os::Linux => command_stdout("uname", &["-r"]),
            Os::Other => None,
        };
        Self {
            os,
            os_version,
            arch: Arch::current(),
            compiler: Compiler::detect(),
            variants: BTreeSet::new(),
        }
    }

    /// Set the OS version
    pub fn with_os_version(mut self, version: &str) -> Self {
        self.os_version = Some(version.to_string());
        self
    }

    /// Enable a variant flag
    pub fn with_variant(mut self, variant: &str) -> Self {
        self.variants.insert(variant.to_string());
        self
    }
}

fn command_stdout(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// A dotted version parsed leniently ("13", "15.0", "2.38.1-ubuntu")
///
/// `precision` records how many components were written, so that a bound
/// like "13" compares against 13.2.0 on the major component only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LenientVersion {
    pub version: Version,
    pub precision: usize,
}

impl LenientVersion {
    /// Parse the leading numeric components of `s`
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = Vec::new();
        for piece in s.trim().split('.').take(3) {
            let digits: String = piece.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                break;
            }
            parts.push(digits.parse::<u64>().ok()?);
            if digits.len() != piece.len() {
                break;
            }
        }
        if parts.is_empty() {
            return None;
        }
        let precision = parts.len();
        parts.resize(3, 0);
        Some(Self {
            version: Version::new(parts[0], parts[1], parts[2]),
            precision,
        })
    }

    /// Compare `self` against `bound`, looking only at the components the
    /// bound spells out
    pub fn cmp_to_bound(&self, bound: &LenientVersion) -> Ordering {
        let a = &self.version;
        let b = &bound.version;
        let ours = [a.major, a.minor, a.patch];
        let theirs = [b.major, b.minor, b.patch];
        ours[..bound.precision].cmp(&theirs[..bound.precision])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gcc_banner() {
        let banner = "gcc (Ubuntu 13.2.0-23ubuntu4) 13.2.0\nCopyright (C) 2023 Free Software Foundation, Inc.\n";
        let compiler = Compiler::parse_version_banner(banner).unwrap();
        assert_eq!(compiler.kind, CompilerKind::Gcc);
        assert_eq!(compiler.version.as_deref(), Some("13.2.0"));
        assert_eq!(compiler.build, None);
    }

    #[test]
    fn test_parse_apple_clang_banner() {
        let banner = "Apple clang version 16.0.0 (clang-1600.0.26.6)\nTarget: arm64-apple-darwin24.1.0\n";
        let compiler = Compiler::parse_version_banner(banner).unwrap();
        assert_eq!(compiler.kind, CompilerKind::Clang);
        assert_eq!(compiler.version.as_deref(), Some("16.0.0"));
        assert_eq!(compiler.build, Some(1600));
        assert_eq!(compiler.describe(), "clang 16.0.0 (build 1600)");
    }

    #[test]
    fn test_parse_unknown_banner() {
        assert!(Compiler::parse_version_banner("tcc version 0.9.27\n").is_none());
    }

    #[test]
    fn test_os_arch_from_str() {
        assert_eq!("macos".parse::<Os>().unwrap(), Os::Macos);
        assert_eq!("Darwin".parse::<Os>().unwrap(), Os::Macos);
        assert_eq!("linux".parse::<Os>().unwrap(), Os::Linux);
        assert_eq!("aarch64".parse::<Arch>().unwrap(), Arch::Arm64);
        assert_eq!("intel".parse::<Arch>().unwrap(), Arch::X86_64);
        assert_eq!(Arch::Arm64.to_string(), "arm64");
        assert_eq!(Os::Macos.to_string(), "macos");
    }

    #[test]
    fn test_lenient_version_precision() {
        let v = LenientVersion::parse("13.2.0").unwrap();
        let bound = LenientVersion::parse("13").unwrap();
        assert_eq!(bound.precision, 1);
        assert_eq!(v.cmp_to_bound(&bound), Ordering::Equal);

        let newer = LenientVersion::parse("14.1").unwrap();
        assert_eq!(newer.cmp_to_bound(&bound), Ordering::Greater);

        let suffixed = LenientVersion::parse("2.38-ubuntu").unwrap();
        assert_eq!(suffixed.version, Version::new(2, 38, 0));
        assert!(LenientVersion::parse("trunk").is_none());
    }
}
