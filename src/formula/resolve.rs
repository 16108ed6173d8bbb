// src/formula/resolve.rs

//! Applying host conditions to a formula
//!
//! A [`ResolvedFormula`] is what the rest of the pipeline consumes: every
//! `when` has been evaluated against one frozen [`HostFacts`] snapshot,
//! disabled dependencies, resources, steps and flag overrides are gone, and
//! download locations have their `%(version)s` placeholders filled in.

use crate::error::{Error, Result};
use crate::fetch::FetchSpec;
use crate::formula::condition::Condition;
use crate::formula::format::{
    pkg_version, substitute, ConflictSpec, DependencyKind, FailsWith, Formula, PatchSpec,
    StepSpec,
};
use crate::hash::Checksum;
use crate::host::HostFacts;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A dependency edge that survived condition evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub kind: DependencyKind,
}

/// A resource that survived condition evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct StagedResource {
    pub fetch: FetchSpec,
    /// Directory name to stage into
    pub stage: String,
    /// Staged into the test directory rather than the build directory
    pub for_test: bool,
}

/// Effective compiler and linker flags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags {
    pub cflags: Vec<String>,
    pub cxxflags: Vec<String>,
    pub cppflags: Vec<String>,
    pub ldflags: Vec<String>,
    pub set: BTreeMap<String, String>,
    pub deparallelize: bool,
}

/// One evaluated condition, recorded in the install receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionChoice {
    /// What the condition gated, e.g. "dependency gcc"
    pub subject: String,
    /// Rendered condition
    pub condition: String,
    /// Evaluation result
    pub held: bool,
}

/// A formula with all conditions applied for one install attempt
#[derive(Debug, Clone)]
pub struct ResolvedFormula {
    pub name: String,
    pub version: String,
    pub revision: u32,
    pub license: Option<String>,
    pub keg_only: bool,
    /// Formulas that must not be installed alongside this one
    pub conflicts: Vec<ConflictSpec>,
    /// Caveat texts whose condition held, not yet substituted
    pub caveats: Vec<String>,
    pub source: FetchSpec,
    pub extract_dir: Option<String>,
    pub dependencies: Vec<Dependency>,
    pub resources: Vec<StagedResource>,
    /// `fails_with` entries whose own condition held
    pub fails_with: Vec<FailsWith>,
    pub flags: Flags,
    pub build: Vec<StepSpec>,
    /// Present when the formula declares a test procedure
    pub test: Option<Vec<StepSpec>>,
    pub variables: BTreeMap<String, String>,
    pub definition_hash: String,
    pub choices: Vec<ConditionChoice>,
}

impl ResolvedFormula {
    /// Version plus revision; names the install prefix
    pub fn pkg_version(&self) -> String {
        pkg_version(&self.version, self.revision)
    }

    /// Dependencies of the given kinds
    pub fn dependencies_where(&self, keep: impl Fn(DependencyKind) -> bool) -> Vec<&Dependency> {
        self.dependencies.iter().filter(|d| keep(d.kind)).collect()
    }

    /// Whether `name` is a declared (and enabled) dependency
    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.iter().any(|d| d.name == name)
    }

    /// Every fetch this formula needs, source first, then resources and
    /// remote patches
    pub fn fetch_specs(&self) -> Vec<FetchSpec> {
        std::iter::once(self.source.clone())
            .chain(self.resources.iter().map(|r| r.fetch.clone()))
            .chain(
                self.build
                    .iter()
                    .filter_map(|step| step.patch.as_ref())
                    .filter_map(|patch| patch_fetch_spec(&self.name, patch)),
            )
            .collect()
    }
}

/// Fetch description for a remote patch; `None` for inline patches
pub fn patch_fetch_spec(formula: &str, patch: &PatchSpec) -> Option<FetchSpec> {
    let url = patch.url.as_ref()?;
    let checksum = patch.sha256.clone()?;
    let file = url.rsplit('/').next().unwrap_or(url.as_str());
    Some(FetchSpec {
        name: format!("{}/patch:{}", formula, file),
        urls: std::iter::once(url.clone())
            .chain(patch.mirrors.iter().cloned())
            .collect(),
        checksum,
    })
}

struct Evaluator<'a> {
    host: &'a HostFacts,
    choices: Vec<ConditionChoice>,
}

impl Evaluator<'_> {
    fn check(&mut self, subject: impl FnOnce() -> String, condition: Option<&Condition>) -> bool {
        let Some(condition) = condition else {
            return true;
        };
        let held = condition.evaluate(self.host);
        self.choices.push(ConditionChoice {
            subject: subject(),
            condition: condition.to_string(),
            held,
        });
        held
    }
}

/// Evaluate every condition in `formula` against `host`
pub fn resolve(formula: &Formula, host: &HostFacts) -> Result<ResolvedFormula> {
    let name = formula.name().to_string();
    let vars = formula.static_variables();
    let expand = |s: &str| {
        substitute(s, &vars)
            .map_err(|key| Error::invalid(&name, format!("unknown variable %({})s in {}", key, s)))
    };
    let fetch_spec = |label: String, url: &str, mirrors: &[String], checksum: Checksum| -> Result<FetchSpec> {
        let mut urls = vec![expand(url)?];
        for mirror in mirrors {
            urls.push(expand(mirror)?);
        }
        Ok(FetchSpec {
            name: label,
            urls,
            checksum,
        })
    };

    let mut eval = Evaluator {
        host,
        choices: Vec::new(),
    };

    let source = fetch_spec(
        name.clone(),
        &formula.source.url,
        &formula.source.mirrors,
        formula.source.sha256.clone(),
    )?;

    let mut dependencies = Vec::new();
    for dep in &formula.dependencies {
        let condition = dep.effective_condition();
        if eval.check(|| format!("dependency {}", dep.name), condition.as_ref()) {
            dependencies.push(Dependency {
                name: dep.name.clone(),
                kind: dep.kind,
            });
        }
    }

    let mut resources = Vec::new();
    for res in &formula.resources {
        if eval.check(|| format!("resource {}", res.name), res.when.as_ref()) {
            resources.push(StagedResource {
                fetch: fetch_spec(
                    format!("{}/{}", name, res.name),
                    &res.url,
                    &res.mirrors,
                    res.sha256.clone(),
                )?,
                stage: res.stage.clone().unwrap_or_else(|| res.name.clone()),
                for_test: res.for_test,
            });
        }
    }

    let fails_with = formula
        .fails_with
        .iter()
        .filter(|fw| eval.check(|| format!("fails_with {}", fw.compiler), fw.when.as_ref()))
        .cloned()
        .collect();

    let env = &formula.environment;
    let mut flags = Flags {
        cflags: env.cflags.clone(),
        cxxflags: env.cxxflags.clone(),
        cppflags: env.cppflags.clone(),
        ldflags: env.ldflags.clone(),
        set: env.set.clone(),
        deparallelize: env.deparallelize,
    };
    for (i, ov) in env.overrides.iter().enumerate() {
        if eval.check(|| format!("environment override {}", i + 1), Some(&ov.when)) {
            flags.cflags.extend(ov.cflags.iter().cloned());
            flags.cxxflags.extend(ov.cxxflags.iter().cloned());
            flags.cppflags.extend(ov.cppflags.iter().cloned());
            flags.ldflags.extend(ov.ldflags.iter().cloned());
            flags.set.extend(ov.set.clone());
            if let Some(serial) = ov.deparallelize {
                flags.deparallelize = serial;
            }
        }
    }

    let caveats = formula
        .caveats
        .iter()
        .enumerate()
        .filter(|(i, c)| eval.check(|| format!("caveat {}", i + 1), c.when.as_ref()))
        .map(|(_, c)| c.text.clone())
        .collect();

    let build = formula
        .build
        .iter()
        .enumerate()
        .filter(|(i, step)| eval.check(|| format!("build step {}", i + 1), step.when.as_ref()))
        .map(|(_, step)| step.clone())
        .collect();

    let test = formula.test.as_ref().map(|test| {
        test.steps
            .iter()
            .enumerate()
            .filter(|(i, step)| eval.check(|| format!("test step {}", i + 1), step.when.as_ref()))
            .map(|(_, step)| step.clone())
            .collect()
    });

    Ok(ResolvedFormula {
        name: name.clone(),
        version: formula.version().to_string(),
        revision: formula.formula.revision,
        license: formula.formula.license.clone(),
        keg_only: formula.formula.keg_only.is_some(),
        conflicts: formula.conflicts_with.clone(),
        caveats,
        source,
        extract_dir: formula.source.extract_dir.clone(),
        dependencies,
        resources,
        fails_with,
        flags,
        build,
        test,
        variables: vars.clone(),
        definition_hash: formula.definition_hash(),
        choices: eval.choices,
    })
}
