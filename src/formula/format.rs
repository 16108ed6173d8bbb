// src/formula/format.rs

//! Formula file format definitions
//!
//! Formulas are TOML documents describing one package: where its source
//! lives and how it is pinned, what it depends on, how to build it, and
//! how to check the result. Every map is a `BTreeMap` so that serializing a
//! formula is deterministic; the definition hash depends on that.

use crate::formula::condition::Condition;
use crate::hash::{hash_bytes, Checksum, HashAlgorithm};
use crate::host::{Compiler, CompilerKind, LenientVersion};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// A complete formula definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    /// Package metadata
    pub formula: FormulaSection,

    /// Primary source archive
    pub source: SourceSection,

    /// Dependency edges, in declaration order
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,

    /// Secondary downloads owned by this formula
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,

    /// Toolchains known to fail building this formula
    #[serde(default)]
    pub fails_with: Vec<FailsWith>,

    /// Formulas that cannot be installed alongside this one
    #[serde(default)]
    pub conflicts_with: Vec<ConflictSpec>,

    /// Post-install notes for the user
    #[serde(default)]
    pub caveats: Vec<CaveatSpec>,

    /// Flag and variable composition
    #[serde(default)]
    pub environment: EnvironmentSection,

    /// Build procedure
    #[serde(default)]
    pub build: Vec<StepSpec>,

    /// Test procedure (optional)
    #[serde(default)]
    pub test: Option<TestSection>,

    /// Variables for `%(name)s` substitution
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl Formula {
    /// Formula name
    pub fn name(&self) -> &str {
        &self.formula.name
    }

    /// Formula version
    pub fn version(&self) -> &str {
        &self.formula.version
    }

    /// Version plus revision, as used for install prefixes
    pub fn pkg_version(&self) -> String {
        pkg_version(&self.formula.version, self.formula.revision)
    }

    /// Hash of the full definition
    ///
    /// Install receipts record this; any change to the formula file's
    /// content invalidates them.
    pub fn definition_hash(&self) -> String {
        // Serializing plain data with string keys cannot fail
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hash_bytes(HashAlgorithm::Sha256, &canonical).value
    }

    /// Variables available before any environment exists
    pub fn static_variables(&self) -> BTreeMap<String, String> {
        let mut vars = self.variables.clone();
        vars.insert("name".to_string(), self.formula.name.clone());
        vars.insert("version".to_string(), self.formula.version.clone());
        vars
    }
}

/// Package metadata section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaSection {
    /// Package name
    pub name: String,

    /// Package version
    pub version: String,

    /// Rebuild counter for changes that keep the upstream version
    #[serde(default)]
    pub revision: u32,

    /// License identifier (SPDX)
    #[serde(default)]
    pub license: Option<String>,

    /// Short description
    #[serde(default)]
    pub desc: Option<String>,

    /// Homepage URL
    #[serde(default)]
    pub homepage: Option<String>,

    /// Reason this formula is not linked into the shared prefix
    #[serde(default)]
    pub keg_only: Option<String>,
}

/// `1.0` at revision 0, `1.0_2` at revision 2
pub fn pkg_version(version: &str, revision: u32) -> String {
    match revision {
        0 => version.to_string(),
        n => format!("{}_{}", version, n),
    }
}

/// Source archive section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSection {
    /// Primary source URL (supports `%(version)s`)
    pub url: String,

    /// Alternate locations tried in order when the primary fails
    #[serde(default)]
    pub mirrors: Vec<String>,

    /// Integrity hash of the archive
    #[serde(alias = "checksum")]
    pub sha256: Checksum,

    /// Directory name after extraction, if the archive does not have a
    /// single top-level directory
    #[serde(default)]
    pub extract_dir: Option<String>,
}

/// Dependency edge kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Needed only while building; not part of the runtime closure
    Build,
    /// Needed to build and at runtime
    #[default]
    Runtime,
    /// Needed only by the test procedure
    Test,
}

impl DependencyKind {
    /// Whether the dependency must be present during the build
    pub fn needed_for_build(&self) -> bool {
        matches!(self, Self::Build | Self::Runtime)
    }

    /// Whether the dependency persists into the dependent's runtime closure
    pub fn persists(&self) -> bool {
        matches!(self, Self::Runtime)
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Runtime => "runtime",
            Self::Test => "test",
        }
    }
}

/// A declared dependency edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Target formula name
    pub name: String,

    #[serde(default)]
    pub kind: DependencyKind,

    /// Gate for this edge
    #[serde(default)]
    pub when: Option<Condition>,

    /// Provided by macOS itself; only needed elsewhere
    #[serde(default)]
    pub uses_from_macos: bool,

    /// With `uses_from_macos`: the macOS release that started shipping it
    #[serde(default)]
    pub since: Option<String>,
}

impl DependencySpec {
    /// The condition actually gating this edge
    pub fn effective_condition(&self) -> Option<Condition> {
        let from_macos = self
            .uses_from_macos
            .then(|| Condition::uses_from_macos(self.since.as_deref()));
        match (self.when.clone(), from_macos) {
            (Some(a), Some(b)) => Some(Condition::All(vec![a, b])),
            (a, b) => a.or(b),
        }
    }
}

/// A secondary download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Resource name, unique within the formula
    pub name: String,

    /// Primary URL (supports `%(version)s`)
    pub url: String,

    #[serde(default)]
    pub mirrors: Vec<String>,

    #[serde(alias = "checksum")]
    pub sha256: Checksum,

    #[serde(default)]
    pub when: Option<Condition>,

    /// Directory (relative to the build directory) the resource is staged
    /// into; defaults to the resource name
    #[serde(default)]
    pub stage: Option<String>,

    /// Stage into the test directory instead of the build directory
    #[serde(default)]
    pub for_test: bool,
}

/// Another formula that installs the same files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSpec {
    pub name: String,
    #[serde(default)]
    pub because: Option<String>,
}

/// A caveat shown after install, optionally gated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaveatSpec {
    /// Text (supports `%(var)s`, including `%(prefix)s`)
    pub text: String,
    #[serde(default)]
    pub when: Option<Condition>,
}

/// A known toolchain failure
///
/// `version` and `build` are inclusive upper bounds: `version = "13"` with
/// `compiler = "gcc"` means gcc 13.x and everything older fails. With
/// neither bound every version of the compiler fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailsWith {
    pub compiler: CompilerKind,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub build: Option<u32>,

    #[serde(default)]
    pub cause: Option<String>,

    #[serde(default)]
    pub when: Option<Condition>,
}

impl FailsWith {
    /// Whether `compiler` falls inside this exclusion
    ///
    /// A bound that cannot be checked because the compiler did not report
    /// the corresponding number does not match.
    pub fn matches(&self, compiler: &Compiler) -> bool {
        if compiler.kind != self.compiler {
            return false;
        }
        if let Some(max_build) = self.build {
            return compiler.build.is_some_and(|b| b <= max_build);
        }
        if let Some(max_version) = &self.version {
            let (Some(active), Some(bound)) = (
                compiler.version.as_deref().and_then(LenientVersion::parse),
                LenientVersion::parse(max_version),
            ) else {
                return false;
            };
            return active.cmp_to_bound(&bound) != Ordering::Greater;
        }
        true
    }

    /// Explanation for error messages
    pub fn cause_or_default(&self) -> String {
        self.cause
            .clone()
            .unwrap_or_else(|| format!("{} is excluded by fails_with", self.compiler))
    }
}

/// Flag and variable composition section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSection {
    #[serde(default)]
    pub cflags: Vec<String>,
    #[serde(default)]
    pub cxxflags: Vec<String>,
    #[serde(default)]
    pub cppflags: Vec<String>,
    #[serde(default)]
    pub ldflags: Vec<String>,

    /// Extra variables exported to every step
    #[serde(default)]
    pub set: BTreeMap<String, String>,

    /// Force serial make
    #[serde(default)]
    pub deparallelize: bool,

    /// Conditional extensions applied on top of the defaults
    #[serde(default)]
    pub overrides: Vec<FlagOverride>,
}

/// Flags appended and variables set when a condition holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagOverride {
    pub when: Condition,
    #[serde(default)]
    pub cflags: Vec<String>,
    #[serde(default)]
    pub cxxflags: Vec<String>,
    #[serde(default)]
    pub cppflags: Vec<String>,
    #[serde(default)]
    pub ldflags: Vec<String>,
    #[serde(default)]
    pub set: BTreeMap<String, String>,
    #[serde(default)]
    pub deparallelize: Option<bool>,
}

/// One step of a build or test procedure, as written
///
/// Exactly one of `run`, `inreplace`, `patch`, `write` must be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Command argv; `*std_cmake_args` style entries expand in place
    #[serde(default)]
    pub run: Option<Vec<String>>,

    /// Declarative in-place file edit
    #[serde(default)]
    pub inreplace: Option<InreplaceSpec>,

    /// Unified diff to apply
    #[serde(default)]
    pub patch: Option<PatchSpec>,

    /// File to write
    #[serde(default)]
    pub write: Option<WriteSpec>,

    /// Symlinks to create
    #[serde(default)]
    pub symlink: Option<SymlinkSpec>,

    /// Working directory relative to the build (or test) directory
    #[serde(default)]
    pub cwd: Option<String>,

    /// Environment overrides for this step only
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Gate for this step
    #[serde(default)]
    pub when: Option<Condition>,

    /// Data piped to the command's standard input
    #[serde(default)]
    pub stdin: Option<String>,

    /// Expected exit status (test steps only; default 0)
    #[serde(default)]
    pub status: Option<i32>,

    /// Output assertions (test steps only)
    #[serde(default)]
    pub assert: Vec<AssertionSpec>,
}

/// `inreplace` step: replace `pattern` in `file`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InreplaceSpec {
    pub file: String,
    pub pattern: String,
    pub replacement: String,
    /// Treat `pattern` as a regular expression
    #[serde(default)]
    pub regex: bool,
}

/// `patch` step: a remote (hash-pinned) or inline unified diff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchSpec {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub mirrors: Vec<String>,
    #[serde(default, alias = "checksum")]
    pub sha256: Option<Checksum>,
    /// Inline diff text
    #[serde(default)]
    pub data: Option<String>,
    /// Leading path components to strip (default 1)
    #[serde(default = "default_strip")]
    pub strip: u32,
}

fn default_strip() -> u32 {
    1
}

/// `write` step: create a file with fixed contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteSpec {
    pub path: String,
    pub contents: String,
    /// Mark the file executable
    #[serde(default)]
    pub executable: bool,
}

/// `symlink` step: link `target` into the directory `into`
///
/// Without `name`, `target` is a glob and every match is linked under its
/// own file name. With `name`, one link `into/name` points at `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymlinkSpec {
    pub target: String,
    pub into: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Test procedure section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestSection {
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

/// Which captured stream an assertion reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    #[default]
    Stdout,
    Stderr,
}

/// An output assertion as written; exactly one check field is set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssertionSpec {
    #[serde(default)]
    pub stream: Stream,
    #[serde(default)]
    pub equals: Option<String>,
    #[serde(default)]
    pub contains: Option<String>,
    #[serde(default)]
    pub matches: Option<String>,
    #[serde(default)]
    pub not_contains: Option<String>,
    #[serde(default)]
    pub not_matches: Option<String>,
    #[serde(default)]
    pub path_exists: Option<String>,
}

/// Substitute `%(name)s` placeholders
///
/// Unknown placeholders are an error so that a formula cannot silently
/// reach for something it never declared (for example the prefix of a
/// package it does not depend on).
pub fn substitute(template: &str, vars: &BTreeMap<String, String>) -> Result<String, String> {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER
        .get_or_init(|| Regex::new(r"%\(([A-Za-z0-9_@:.+-]+)\)s").expect("valid regex"));

    let mut missing = None;
    let result = re.replace_all(template, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        match vars.get(key) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| key.to_string());
                caps[0].to_string()
            }
        }
    });

    match missing {
        Some(key) => Err(key),
        None => Ok(result.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Arch, HostFacts, Os};

    const SAMPLE_FORMULA: &str = r#"
[formula]
name = "btop"
version = "1.4.6"
revision = 1
license = "Apache-2.0"
desc = "Resource monitor"

[source]
url = "https://github.com/aristocratos/btop/archive/refs/tags/v%(version)s.tar.gz"
mirrors = ["https://mirror.example.org/btop-%(version)s.tar.gz"]
sha256 = "4beb90172c6acaac08c1b4a5112fb616772e214a7ef992bcbd461453295a58be"

[[dependencies]]
name = "lowdown"
kind = "build"

[[dependencies]]
name = "gcc"
when = { os = "linux" }

[[dependencies]]
name = "zlib"
uses_from_macos = true

[[fails_with]]
compiler = "clang"
build = 1600
cause = "Requires C++23 support for `std::ranges::to`"

[[fails_with]]
compiler = "gcc"
version = "13"

[[conflicts_with]]
name = "bpytop"
because = "both install a `btop` binary"

[[caveats]]
text = "Run with sudo for full process details"
when = { os = "macos" }

[environment]
ldflags = ["-L/opt/extra"]

[[environment.overrides]]
when = { os = "linux" }
cflags = ["-D_GNU_SOURCE"]

[[build]]
run = ["make", "CXX=%(cxx)s", "STRIP=true"]

[[build]]
run = ["make", "PREFIX=%(prefix)s", "install"]

[test]
[[test.steps]]
run = ["%(bin)s/btop", "--version"]
[[test.steps.assert]]
contains = "btop version: %(version)s"
"#;

    #[test]
    fn test_parse_formula() {
        let formula: Formula = toml::from_str(SAMPLE_FORMULA).unwrap();

        assert_eq!(formula.name(), "btop");
        assert_eq!(formula.version(), "1.4.6");
        assert_eq!(formula.formula.license.as_deref(), Some("Apache-2.0"));
        assert_eq!(formula.source.mirrors.len(), 1);
        assert_eq!(formula.dependencies.len(), 3);
        assert_eq!(formula.dependencies[0].kind, DependencyKind::Build);
        assert_eq!(formula.dependencies[1].kind, DependencyKind::Runtime);
        assert_eq!(formula.fails_with.len(), 2);
        assert_eq!(formula.build.len(), 2);
        assert_eq!(formula.environment.overrides.len(), 1);
        assert_eq!(formula.pkg_version(), "1.4.6_1");
        assert_eq!(formula.conflicts_with[0].name, "bpytop");
        assert!(formula.caveats[0].when.is_some());

        let test = formula.test.as_ref().unwrap();
        assert_eq!(test.steps[0].assert.len(), 1);
        assert_eq!(test.steps[0].assert[0].stream, Stream::Stdout);
    }

    #[test]
    fn test_minimal_formula() {
        let minimal = r#"
[formula]
name = "hello"
version = "1.0"

[source]
url = "https://example.com/hello-1.0.tar.gz"
sha256 = "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
"#;
        let formula: Formula = toml::from_str(minimal).unwrap();
        assert!(formula.dependencies.is_empty());
        assert!(formula.build.is_empty());
        assert!(formula.test.is_none());
        assert!(!formula.environment.deparallelize);
        assert_eq!(formula.pkg_version(), "1.0");
        assert!(formula.conflicts_with.is_empty());
    }

    #[test]
    fn test_bad_checksum_rejected_at_parse() {
        let bad = r#"
[formula]
name = "hello"
version = "1.0"

[source]
url = "https://example.com/hello-1.0.tar.gz"
sha256 = "md5:abc"
"#;
        assert!(toml::from_str::<Formula>(bad).is_err());
    }

    #[test]
    fn test_fails_with_matching() {
        let formula: Formula = toml::from_str(SAMPLE_FORMULA).unwrap();
        let clang_rule = &formula.fails_with[0];
        let gcc_rule = &formula.fails_with[1];

        let old_clang = Compiler::new(CompilerKind::Clang, Some("16.0.0")).with_build(1600);
        let new_clang = Compiler::new(CompilerKind::Clang, Some("17.0.0")).with_build(1700);
        let llvm_clang = Compiler::new(CompilerKind::Clang, Some("19.1.0"));
        assert!(clang_rule.matches(&old_clang));
        assert!(!clang_rule.matches(&new_clang));
        assert!(!clang_rule.matches(&llvm_clang));

        assert!(gcc_rule.matches(&Compiler::new(CompilerKind::Gcc, Some("13.2.0"))));
        assert!(gcc_rule.matches(&Compiler::new(CompilerKind::Gcc, Some("11"))));
        assert!(!gcc_rule.matches(&Compiler::new(CompilerKind::Gcc, Some("14.1.0"))));
        assert!(!gcc_rule.matches(&old_clang));
    }

    #[test]
    fn test_unbounded_fails_with() {
        let rule = FailsWith {
            compiler: CompilerKind::Gcc,
            version: None,
            build: None,
            cause: None,
            when: None,
        };
        assert!(rule.matches(&Compiler::new(CompilerKind::Gcc, None)));
        assert!(rule.cause_or_default().contains("gcc"));
    }

    #[test]
    fn test_effective_condition() {
        let formula: Formula = toml::from_str(SAMPLE_FORMULA).unwrap();
        let linux = HostFacts::new(
            Os::Linux,
            Arch::X86_64,
            Compiler::new(CompilerKind::Gcc, Some("14.1.0")),
        );
        let mac = HostFacts::new(
            Os::Macos,
            Arch::Arm64,
            Compiler::new(CompilerKind::Clang, Some("17.0.0")),
        );

        let zlib = formula.dependencies[2].effective_condition().unwrap();
        assert!(zlib.evaluate(&linux));
        assert!(!zlib.evaluate(&mac));
        assert!(formula.dependencies[0].effective_condition().is_none());
    }

    #[test]
    fn test_substitute() {
        let mut vars = BTreeMap::new();
        vars.insert("version".to_string(), "1.4.6".to_string());
        vars.insert("prefix:llvm".to_string(), "/cellar/llvm/19".to_string());

        assert_eq!(
            substitute("btop-%(version)s.tar.gz", &vars).unwrap(),
            "btop-1.4.6.tar.gz"
        );
        assert_eq!(
            substitute("-L%(prefix:llvm)s/lib", &vars).unwrap(),
            "-L/cellar/llvm/19/lib"
        );
        assert_eq!(
            substitute("%(prefix:gcc)s", &vars).unwrap_err(),
            "prefix:gcc"
        );
        assert_eq!(substitute("no placeholders", &vars).unwrap(), "no placeholders");
    }

    #[test]
    fn test_definition_hash_changes_with_content() {
        let formula: Formula = toml::from_str(SAMPLE_FORMULA).unwrap();
        let same: Formula = toml::from_str(SAMPLE_FORMULA).unwrap();
        assert_eq!(formula.definition_hash(), same.definition_hash());

        let mut edited = formula.clone();
        edited.build[0].run = Some(vec!["make".to_string()]);
        assert_ne!(formula.definition_hash(), edited.definition_hash());
    }
}
