// src/environment/mod.rs

//! Environment Builder: the isolated context one formula builds in
//!
//! A [`BuildEnvironment`] owns a private temporary directory holding the
//! unpacked source tree (`buildpath`), a scratch test directory
//! (`testpath`) and private `HOME`/`TMPDIR`. Its process environment is
//! assembled from scratch: nothing from the engine's own environment leaks
//! through, and only the install locations of declared dependencies appear
//! on `PATH`, in flags, and in pkg-config and CMake search paths.
//!
//! The directory is removed when the environment is dropped, whether the
//! build succeeded or not, unless `keep_builddir` is configured.

mod stage;
mod toolchain;

pub use stage::{file_name_from_url, unpack, ArchiveFormat};
pub use toolchain::{check_compiler, std_args};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::formula::{substitute, ResolvedFormula};
use crate::host::HostFacts;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// Where an already-installed dependency lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyLocation {
    pub name: String,
    pub version: String,
    pub prefix: PathBuf,
}

/// Builds [`BuildEnvironment`]s for formulas on one host
pub struct EnvironmentBuilder<'a> {
    config: &'a EngineConfig,
    host: &'a HostFacts,
}

impl<'a> EnvironmentBuilder<'a> {
    pub fn new(config: &'a EngineConfig, host: &'a HostFacts) -> Self {
        Self { config, host }
    }

    /// Fail with `ToolchainUnsupported` if the active compiler is excluded
    pub fn check_toolchain(&self, formula: &ResolvedFormula) -> Result<()> {
        check_compiler(formula, &self.host.compiler)
    }

    /// Create the environment for `formula`, seeing only `deps`
    pub fn build(
        &self,
        formula: &ResolvedFormula,
        deps: &[DependencyLocation],
    ) -> Result<BuildEnvironment> {
        self.check_toolchain(formula)?;

        let label = format!("{}-{}-", formula.name, formula.pkg_version());
        let mut tmp = tempfile::Builder::new();
        tmp.prefix(&label);
        let dir = match &self.config.build_root {
            Some(root) => {
                fs::create_dir_all(root)?;
                tmp.tempdir_in(root)?
            }
            None => tmp.tempdir()?,
        };
        let root = dir.path().to_path_buf();
        let buildpath = root.join("build");
        let testpath = root.join("test");
        let home = root.join("home");
        let tmpdir = root.join("tmp");
        for path in [&buildpath, &testpath, &home, &tmpdir] {
            fs::create_dir_all(path)?;
        }

        let prefix = self.config.prefix_for(&formula.name, &formula.pkg_version());
        let vars = self.variables(formula, deps, &prefix, &buildpath, &testpath);
        let env = self.process_env(formula, deps, &prefix, &home, &tmpdir, &vars)?;

        info!(
            "Prepared environment for {} {} in {}",
            formula.name,
            formula.pkg_version(),
            root.display()
        );

        Ok(BuildEnvironment {
            formula: formula.name.clone(),
            dir: Some(dir),
            keep: self.config.keep_builddir,
            buildpath,
            testpath,
            prefix: prefix.clone(),
            std_args: std_args(&prefix),
            vars,
            env,
        })
    }

    fn variables(
        &self,
        formula: &ResolvedFormula,
        deps: &[DependencyLocation],
        prefix: &Path,
        buildpath: &Path,
        testpath: &Path,
    ) -> BTreeMap<String, String> {
        let path = |p: &Path| p.display().to_string();
        let mut vars = formula.variables.clone();

        vars.insert("prefix".into(), path(prefix));
        for (var, sub) in [
            ("bin", "bin"),
            ("sbin", "sbin"),
            ("lib", "lib"),
            ("include", "include"),
            ("share", "share"),
            ("libexec", "libexec"),
            ("etc", "etc"),
            ("man", "share/man"),
            ("man1", "share/man/man1"),
        ] {
            vars.insert(var.into(), path(&prefix.join(sub)));
        }
        vars.insert(
            "pkgshare".into(),
            path(&prefix.join("share").join(&formula.name)),
        );
        vars.insert("buildpath".into(), path(buildpath));
        vars.insert("testpath".into(), path(testpath));
        vars.insert("jobs".into(), self.make_jobs(formula).to_string());
        vars.insert("cc".into(), self.host.compiler.cc.clone());
        vars.insert("cxx".into(), self.host.compiler.cxx.clone());
        vars.insert("os".into(), self.host.os.to_string());
        vars.insert("arch".into(), self.host.arch.to_string());

        // Only declared dependencies can be named; closure members are
        // reachable through the injected search paths instead
        for dep in deps.iter().filter(|d| formula.depends_on(&d.name)) {
            vars.insert(format!("prefix:{}", dep.name), path(&dep.prefix));
        }
        vars
    }

    fn process_env(
        &self,
        formula: &ResolvedFormula,
        deps: &[DependencyLocation],
        prefix: &Path,
        home: &Path,
        tmpdir: &Path,
        vars: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        let flags = &formula.flags;
        let joined = |parts: Vec<String>, sep: &str| parts.join(sep);
        let dep_paths = |sub: &str| -> Vec<String> {
            deps.iter()
                .map(|d| d.prefix.join(sub))
                .filter(|p| p.exists())
                .map(|p| p.display().to_string())
                .collect()
        };

        let mut path_entries = vec![prefix.join("bin").display().to_string()];
        path_entries.extend(deps.iter().map(|d| d.prefix.join("bin").display().to_string()));
        path_entries.push(self.config.system_path.clone());

        let mut cflags = vec!["-O2".to_string()];
        cflags.extend(flags.cflags.iter().cloned());
        let mut cxxflags = vec!["-O2".to_string()];
        cxxflags.extend(flags.cxxflags.iter().cloned());
        let mut cppflags: Vec<String> =
            dep_paths("include").into_iter().map(|p| format!("-I{}", p)).collect();
        cppflags.extend(flags.cppflags.iter().cloned());
        let mut ldflags: Vec<String> =
            dep_paths("lib").into_iter().map(|p| format!("-L{}", p)).collect();
        ldflags.extend(flags.ldflags.iter().cloned());

        let mut pkg_config = dep_paths("lib/pkgconfig");
        pkg_config.extend(dep_paths("share/pkgconfig"));

        let mut env = BTreeMap::new();
        env.insert("PATH".to_string(), joined(path_entries, ":"));
        env.insert("HOME".to_string(), home.display().to_string());
        env.insert("TMPDIR".to_string(), tmpdir.display().to_string());
        env.insert("LANG".to_string(), "C".to_string());
        env.insert("CC".to_string(), self.host.compiler.cc.clone());
        env.insert("CXX".to_string(), self.host.compiler.cxx.clone());
        env.insert("CFLAGS".to_string(), joined(cflags, " "));
        env.insert("CXXFLAGS".to_string(), joined(cxxflags, " "));
        env.insert("CPPFLAGS".to_string(), joined(cppflags, " "));
        env.insert("LDFLAGS".to_string(), joined(ldflags, " "));
        env.insert("PKG_CONFIG_PATH".to_string(), joined(pkg_config, ":"));
        env.insert(
            "CMAKE_PREFIX_PATH".to_string(),
            joined(
                deps.iter().map(|d| d.prefix.display().to_string()).collect(),
                ":",
            ),
        );
        env.insert("MAKEFLAGS".to_string(), format!("-j{}", self.make_jobs(formula)));

        for (key, value) in &flags.set {
            let value = substitute(value, vars).map_err(|var| unknown_variable(&formula.name, &var))?;
            env.insert(key.clone(), value);
        }

        debug!("{}: environment {:?}", formula.name, env);
        Ok(env)
    }

    fn make_jobs(&self, formula: &ResolvedFormula) -> u32 {
        if formula.flags.deparallelize {
            1
        } else {
            self.config.make_jobs
        }
    }
}

fn unknown_variable(formula: &str, var: &str) -> Error {
    if let Some(dep) = var.strip_prefix("prefix:") {
        Error::invalid(formula, format!("%({})s names undeclared dependency {}", var, dep))
    } else {
        Error::invalid(formula, format!("unknown variable %({})s", var))
    }
}

/// The isolated context for one formula's build or test
pub struct BuildEnvironment {
    formula: String,
    dir: Option<TempDir>,
    keep: bool,
    buildpath: PathBuf,
    testpath: PathBuf,
    prefix: PathBuf,
    std_args: BTreeMap<String, Vec<String>>,
    vars: BTreeMap<String, String>,
    env: BTreeMap<String, String>,
}

impl BuildEnvironment {
    pub fn formula(&self) -> &str {
        &self.formula
    }

    /// Root of the source tree; steps run here by default
    pub fn buildpath(&self) -> &Path {
        &self.buildpath
    }

    /// Scratch directory for test steps
    pub fn testpath(&self) -> &Path {
        &self.testpath
    }

    /// Install prefix
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Process environment for steps
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Substitution variables
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Expansion for a `*std_<name>` argument
    pub fn std_args(&self, name: &str) -> Option<&[String]> {
        self.std_args.get(name).map(Vec::as_slice)
    }

    /// Substitute `%(name)s` placeholders
    pub fn substitute(&self, template: &str) -> Result<String> {
        substitute(template, &self.vars).map_err(|var| unknown_variable(&self.formula, &var))
    }

    /// Point `buildpath` at the unpacked source root
    pub fn set_buildpath(&mut self, path: PathBuf) {
        self.vars
            .insert("buildpath".to_string(), path.display().to_string());
        self.buildpath = path;
    }

    /// The directory the source archive is unpacked into
    pub fn source_dir(&self) -> PathBuf {
        self.root().join("build")
    }

    /// Root of the private directory
    pub fn root(&self) -> &Path {
        self.dir
            .as_ref()
            .map(TempDir::path)
            .unwrap_or(&self.buildpath)
    }
}

impl Drop for BuildEnvironment {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        if self.keep {
            let kept = dir.keep();
            info!("Keeping build directory {}", kept.display());
        } else {
            debug!("Removing build directory {}", dir.path().display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{parse_formula, resolve};
    use crate::host::{Arch, Compiler, CompilerKind, Os};

    const FORMULA: &str = r#"
[formula]
name = "app"
version = "2.0"

[source]
url = "file:///src/app.tar.gz"
sha256 = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"

[[dependencies]]
name = "zlib"

[environment]
cflags = ["-fPIC"]
set = { ZLIB_ROOT = "%(prefix:zlib)s", DATA = "%(share)s/data" }

[[environment.overrides]]
when = { os = "linux" }
ldflags = ["-Wl,--as-needed"]
deparallelize = true
"#;

    fn host() -> HostFacts {
        HostFacts::new(
            Os::Linux,
            Arch::X86_64,
            Compiler::new(CompilerKind::Gcc, Some("14.1.0")),
        )
    }

    fn fixture() -> (TempDir, EngineConfig, Vec<DependencyLocation>) {
        let scratch = TempDir::new().unwrap();
        let mut config = EngineConfig::rooted_at(scratch.path());
        config.build_root = Some(scratch.path().join("builds"));
        config.make_jobs = 8;

        let zlib = config.prefix_for("zlib", "1.3.1");
        fs::create_dir_all(zlib.join("include")).unwrap();
        fs::create_dir_all(zlib.join("lib/pkgconfig")).unwrap();
        let unrelated = config.prefix_for("openssl", "3.4.0");
        fs::create_dir_all(unrelated.join("lib")).unwrap();

        let deps = vec![DependencyLocation {
            name: "zlib".into(),
            version: "1.3.1".into(),
            prefix: zlib,
        }];
        (scratch, config, deps)
    }

    #[test]
    fn test_environment_contents() {
        let (_scratch, config, deps) = fixture();
        let host = host();
        let formula = resolve(&parse_formula(FORMULA).unwrap(), &host).unwrap();
        let env = EnvironmentBuilder::new(&config, &host)
            .build(&formula, &deps)
            .unwrap();

        let vars = env.env();
        let zlib = deps[0].prefix.display().to_string();
        assert_eq!(vars["CC"], "gcc");
        assert_eq!(vars["CFLAGS"], "-O2 -fPIC");
        assert_eq!(vars["CPPFLAGS"], format!("-I{}/include", zlib));
        assert_eq!(vars["LDFLAGS"], format!("-L{}/lib -Wl,--as-needed", zlib));
        assert_eq!(vars["PKG_CONFIG_PATH"], format!("{}/lib/pkgconfig", zlib));
        assert_eq!(vars["MAKEFLAGS"], "-j1");
        assert_eq!(vars["ZLIB_ROOT"], zlib);
        assert!(vars["HOME"].starts_with(env.root().to_str().unwrap()));
        assert!(vars["PATH"].contains(&format!("{}/bin", zlib)));
        assert!(vars["PATH"].ends_with(crate::config::DEFAULT_SYSTEM_PATH));

        // Nothing about the unrelated install leaks in
        assert!(!vars.values().any(|v| v.contains("openssl")));
        assert!(!vars.contains_key("RUST_LOG"));
    }

    #[test]
    fn test_substitution_variables() {
        let (_scratch, config, deps) = fixture();
        let host = host();
        let formula = resolve(&parse_formula(FORMULA).unwrap(), &host).unwrap();
        let mut env = EnvironmentBuilder::new(&config, &host)
            .build(&formula, &deps)
            .unwrap();

        let prefix = config.prefix_for("app", "2.0");
        assert_eq!(
            env.substitute("%(bin)s/app --version").unwrap(),
            format!("{}/bin/app --version", prefix.display())
        );
        assert_eq!(env.substitute("%(jobs)s").unwrap(), "1");
        let err = env.substitute("%(prefix:openssl)s").unwrap_err();
        assert!(err.to_string().contains("undeclared"));

        let src = env.source_dir().join("app-2.0");
        env.set_buildpath(src.clone());
        assert_eq!(env.substitute("%(buildpath)s").unwrap(), src.display().to_string());
        assert!(env.std_args("std_cmake_args").is_some());
        assert!(env.std_args("std_cargo_args").is_none());
    }

    #[test]
    fn test_directory_released_on_drop() {
        let (_scratch, config, deps) = fixture();
        let host = host();
        let formula = resolve(&parse_formula(FORMULA).unwrap(), &host).unwrap();
        let env = EnvironmentBuilder::new(&config, &host)
            .build(&formula, &deps)
            .unwrap();
        let root = env.root().to_path_buf();
        assert!(root.join("build").is_dir());
        drop(env);
        assert!(!root.exists());
    }

    #[test]
    fn test_keep_builddir() {
        let (_scratch, mut config, deps) = fixture();
        config.keep_builddir = true;
        let host = host();
        let formula = resolve(&parse_formula(FORMULA).unwrap(), &host).unwrap();
        let env = EnvironmentBuilder::new(&config, &host)
            .build(&formula, &deps)
            .unwrap();
        let root = env.root().to_path_buf();
        drop(env);
        assert!(root.is_dir());
    }

    #[test]
    fn test_fails_with_refuses_environment() {
        let (_scratch, config, deps) = fixture();
        let host = host();
        let toml = format!("{}\n[[fails_with]]\ncompiler = \"gcc\"\n", FORMULA);
        let formula = resolve(&parse_formula(&toml).unwrap(), &host).unwrap();
        let result = EnvironmentBuilder::new(&config, &host).build(&formula, &deps);
        assert!(matches!(result, Err(Error::ToolchainUnsupported { .. })));
    }
}
