// src/environment/toolchain.rs

//! Toolchain selection and standard build-system arguments

use crate::error::{Error, Result};
use crate::formula::ResolvedFormula;
use crate::host::Compiler;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Refuse `compiler` if any of the formula's `fails_with` entries match
pub fn check_compiler(formula: &ResolvedFormula, compiler: &Compiler) -> Result<()> {
    if let Some(rule) = formula.fails_with.iter().find(|fw| fw.matches(compiler)) {
        return Err(Error::ToolchainUnsupported {
            formula: formula.name.clone(),
            compiler: compiler.describe(),
            cause: rule.cause_or_default(),
        });
    }
    debug!("{}: {} accepted", formula.name, compiler.describe());
    Ok(())
}

/// Arguments that `*std_<name>` expands into, keyed by `std_<name>`
pub fn std_args(prefix: &Path) -> BTreeMap<String, Vec<String>> {
    let prefix = prefix.display().to_string();
    let libdir = format!("{}/lib", prefix);
    let mut args = BTreeMap::new();

    args.insert(
        "std_cmake_args".to_string(),
        vec![
            format!("-DCMAKE_INSTALL_PREFIX={}", prefix),
            "-DCMAKE_INSTALL_LIBDIR=lib".to_string(),
            "-DCMAKE_BUILD_TYPE=Release".to_string(),
            "-DCMAKE_FIND_FRAMEWORK=LAST".to_string(),
            "-DCMAKE_VERBOSE_MAKEFILE=ON".to_string(),
            "-DCMAKE_PROJECT_TOP_LEVEL_INCLUDES=".to_string(),
            "-DFETCHCONTENT_FULLY_DISCONNECTED=ON".to_string(),
            "-DBUILD_TESTING=OFF".to_string(),
            "-Wno-dev".to_string(),
        ],
    );
    args.insert(
        "std_meson_args".to_string(),
        vec![
            format!("--prefix={}", prefix),
            format!("--libdir={}", libdir),
            "--buildtype=release".to_string(),
            "--wrap-mode=nofallback".to_string(),
        ],
    );
    args.insert(
        "std_configure_args".to_string(),
        vec![
            "--disable-debug".to_string(),
            "--disable-dependency-tracking".to_string(),
            format!("--prefix={}", prefix),
            format!("--libdir={}", libdir),
        ],
    );
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{parse_formula, resolve};
    use crate::host::{Arch, CompilerKind, HostFacts, Os};

    const FORMULA: &str = r#"
[formula]
name = "btop"
version = "1.4.6"

[source]
url = "file:///src/btop.tar.gz"
sha256 = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"

[[fails_with]]
compiler = "clang"
build = 1600
cause = "Requires C++23 support for `std::ranges::to`"

[[fails_with]]
compiler = "gcc"
version = "13"
when = { os = "linux" }
"#;

    fn resolved(host: &HostFacts) -> ResolvedFormula {
        resolve(&parse_formula(FORMULA).unwrap(), host).unwrap()
    }

    #[test]
    fn test_matching_compiler_refused() {
        let compiler = Compiler::new(CompilerKind::Clang, Some("16.0.0")).with_build(1600);
        let host = HostFacts::new(Os::Macos, Arch::Arm64, compiler.clone());
        let err = check_compiler(&resolved(&host), &compiler).unwrap_err();
        match err {
            Error::ToolchainUnsupported {
                formula, compiler, cause,
            } => {
                assert_eq!(formula, "btop");
                assert_eq!(compiler, "clang 16.0.0 (build 1600)");
                assert!(cause.contains("C++23"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_newer_compiler_accepted() {
        let compiler = Compiler::new(CompilerKind::Clang, Some("17.0.0")).with_build(1700);
        let host = HostFacts::new(Os::Macos, Arch::Arm64, compiler.clone());
        assert!(check_compiler(&resolved(&host), &compiler).is_ok());
    }

    #[test]
    fn test_conditional_rule() {
        let gcc13 = Compiler::new(CompilerKind::Gcc, Some("13.2.0"));
        let linux = HostFacts::new(Os::Linux, Arch::X86_64, gcc13.clone());
        assert!(check_compiler(&resolved(&linux), &gcc13).is_err());

        // The gcc rule only applies on linux
        let mac = HostFacts::new(Os::Macos, Arch::X86_64, gcc13.clone());
        assert!(check_compiler(&resolved(&mac), &gcc13).is_ok());
    }

    #[test]
    fn test_std_args_use_prefix() {
        let args = std_args(Path::new("/cellar/btop/1.4.6"));
        assert!(args["std_cmake_args"].contains(&"-DCMAKE_INSTALL_PREFIX=/cellar/btop/1.4.6".to_string()));
        assert!(args["std_configure_args"].contains(&"--prefix=/cellar/btop/1.4.6".to_string()));
        assert!(args["std_meson_args"].contains(&"--libdir=/cellar/btop/1.4.6/lib".to_string()));
    }
}
