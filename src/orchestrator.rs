// src/orchestrator.rs

//! Orchestrator: drives a build plan from fetch to receipt
//!
//! For each formula, in dependency order: fetch the source and resources,
//! create the build environment, unpack, run the build steps, check that
//! the prefix received files, link it into the shared tree, write the
//! install receipt, and (when asked) run the test procedure in a fresh
//! environment.
//!
//! Planning also rejects formulas whose declared conflicts are already
//! linked or are part of the same plan.
//!
//! Independent formulas build concurrently on `jobs` workers. A formula is
//! only started once everything it depends on is installed or already
//! satisfied. By default the first failure halts the plan: nothing new is
//! started and every formula not yet begun is reported as not attempted.
//! With `keep_going`, only the failed formula's dependents are abandoned.

use crate::config::EngineConfig;
use crate::environment::{
    file_name_from_url, unpack, BuildEnvironment, DependencyLocation, EnvironmentBuilder,
};
use crate::error::{CapturedOutput, Error, ErrorKind, Result};
use crate::executor::{CancelToken, Executor};
use crate::fetch::{FetchSpec, Fetcher};
use crate::formula::{FormulaSource, ResolvedFormula, StagedResource};
use crate::graph::{build_plan, BuildPlan};
use crate::host::HostFacts;
use crate::link::Linker;
use crate::receipt::{count_files, HostSnapshot, Receipt, ReceiptDependency, ReceiptStore};
use crate::test_runner::{run_tests, TestReport};
use chrono::Utc;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Pipeline stage a formula was in when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Plan,
    Fetch,
    Environment,
    Unpack,
    Build,
    Install,
    Link,
    Receipt,
    Test,
}

/// Options for one install run
#[derive(Debug, Clone, Copy)]
pub struct InstallOptions {
    /// Run test procedures after building
    pub run_tests: bool,
    /// Rebuild requested formulas even when a receipt satisfies them
    pub force: bool,
    pub keep_going: bool,
    /// Formulas built concurrently
    pub jobs: usize,
}

impl InstallOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            run_tests: false,
            force: false,
            keep_going: config.keep_going,
            jobs: config.jobs,
        }
    }
}

/// What happened to one formula in the plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Built and recorded; `verified` is `None` when no test ran
    Installed { verified: Option<bool> },
    /// An existing receipt already covered it
    Satisfied,
    Failed { stage: Stage, kind: ErrorKind },
    /// Never started, because of the named failure
    NotAttempted { blocked_by: Option<String> },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installed { verified: None } => write!(f, "installed"),
            Self::Installed { verified: Some(true) } => write!(f, "installed (tests passed)"),
            Self::Installed { verified: Some(false) } => write!(f, "installed (unverified)"),
            Self::Satisfied => write!(f, "already installed"),
            Self::Failed { stage, kind } => write!(f, "failed during {} ({})", stage, kind),
            Self::NotAttempted { blocked_by: Some(dep) } => {
                write!(f, "not attempted (blocked by {})", dep)
            }
            Self::NotAttempted { blocked_by: None } => write!(f, "not attempted"),
        }
    }
}

/// Per-formula entry of an [`InstallReport`]
#[derive(Debug, Clone)]
pub struct FormulaReport {
    pub name: String,
    pub version: String,
    pub prefix: PathBuf,
    pub outcome: Outcome,
    pub duration: Duration,
    /// Post-install notes; only filled for formulas built in this run
    pub caveats: Vec<String>,
}

/// The first failure of a run, with full context
#[derive(Debug)]
pub struct Failure {
    pub formula: String,
    pub stage: Stage,
    pub error: Error,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed during {}: {}", self.formula, self.stage, self.error)
    }
}

/// Result of executing a build plan
#[derive(Debug)]
pub struct InstallReport {
    /// Entries in plan order
    pub formulas: Vec<FormulaReport>,
    pub failure: Option<Failure>,
    /// Further failures seen under `keep_going`
    pub other_failures: Vec<Failure>,
}

impl InstallReport {
    pub fn success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn get(&self, name: &str) -> Option<&FormulaReport> {
        self.formulas.iter().find(|f| f.name == name)
    }

    pub fn outcome(&self, name: &str) -> Option<&Outcome> {
        self.get(name).map(|f| &f.outcome)
    }

    /// Names of formulas that were built, in plan order
    pub fn installed(&self) -> Vec<&str> {
        self.formulas
            .iter()
            .filter(|f| matches!(f.outcome, Outcome::Installed { .. }))
            .map(|f| f.name.as_str())
            .collect()
    }

    /// The first failure's error, if any
    pub fn into_result(self) -> Result<Vec<FormulaReport>> {
        match self.failure {
            Some(failure) => Err(failure.error),
            None => Ok(self.formulas),
        }
    }
}

#[derive(Debug)]
enum NodeStatus {
    Pending,
    Running,
    Done(Outcome),
}

struct Schedule {
    status: HashMap<String, NodeStatus>,
    durations: HashMap<String, Duration>,
    caveats: HashMap<String, Vec<String>>,
    running: usize,
    halted: bool,
    failures: Vec<Failure>,
}

impl Schedule {
    fn next_ready(&self, plan: &BuildPlan) -> Option<String> {
        if self.halted {
            return None;
        }
        plan.order()
            .iter()
            .find(|name| {
                matches!(self.status.get(*name), Some(NodeStatus::Pending))
                    && plan.graph().dependencies(name).iter().all(|(dep, _)| {
                        matches!(
                            self.status.get(*dep),
                            Some(NodeStatus::Done(
                                Outcome::Installed { .. } | Outcome::Satisfied
                            ))
                        )
                    })
            })
            .cloned()
    }

    fn block_dependents(&mut self, plan: &BuildPlan, failed: &str) {
        for dependent in plan.graph().transitive_dependents(failed) {
            if let Some(status) = self.status.get_mut(&dependent)
                && matches!(status, NodeStatus::Pending)
            {
                *status = NodeStatus::Done(Outcome::NotAttempted {
                    blocked_by: Some(failed.to_string()),
                });
            }
        }
    }

    fn halt(&mut self, failed: &str) {
        self.halted = true;
        for status in self.status.values_mut() {
            if matches!(status, NodeStatus::Pending) {
                *status = NodeStatus::Done(Outcome::NotAttempted {
                    blocked_by: Some(failed.to_string()),
                });
            }
        }
    }
}

struct Built {
    verified: Option<bool>,
    test_failure: Option<Error>,
    caveats: Vec<String>,
}

/// Drives build plans against one host, cache and receipt store
pub struct Orchestrator {
    config: EngineConfig,
    host: HostFacts,
    source: Box<dyn FormulaSource>,
    fetcher: Fetcher,
    receipts: ReceiptStore,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        host: HostFacts,
        source: Box<dyn FormulaSource>,
        fetcher: Fetcher,
        receipts: ReceiptStore,
    ) -> Self {
        Self {
            config,
            host,
            source,
            fetcher,
            receipts,
            cancel: CancelToken::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn host(&self) -> &HostFacts {
        &self.host
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub fn receipts(&self) -> &ReceiptStore {
        &self.receipts
    }

    /// Token that cancels the current run at the next step boundary
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Plan `requested`, marking nodes an existing receipt satisfies
    pub fn plan(&self, requested: &[String], options: &InstallOptions) -> Result<BuildPlan> {
        let mut plan = build_plan(self.source.as_ref(), &self.host, requested, options.run_tests)?;

        let order = plan.order().to_vec();
        for name in &order {
            let closure = plan.closure_hash(name);
            let Some(node) = plan.node(name) else {
                continue;
            };
            if node.requested && options.force {
                continue;
            }
            let formula = &node.formula;
            let satisfied = self
                .receipts
                .find(&formula.name, &formula.version, formula.revision, &closure)?
                .is_some_and(|r| {
                    r.satisfies(
                        &formula.version,
                        formula.revision,
                        &formula.definition_hash,
                        &closure,
                    )
                });
            if satisfied {
                debug!("{} {} is already installed", formula.name, formula.pkg_version());
                if let Some(node) = plan.node_mut(name) {
                    node.satisfied = true;
                }
            }
        }

        self.check_conflicts(&plan)?;
        Ok(plan)
    }

    /// Reject a plan that would link two conflicting formulas
    ///
    /// A declared conflict counts when the other formula is linked into the
    /// shared tree, or will be built by this plan. Keg-only formulas are
    /// never linked, so they conflict with nothing.
    fn check_conflicts(&self, plan: &BuildPlan) -> Result<()> {
        for node in plan.nodes() {
            let formula = &node.formula;
            if node.satisfied || formula.keg_only {
                continue;
            }
            for conflict in &formula.conflicts {
                let planned = plan
                    .node(&conflict.name)
                    .is_some_and(|other| !other.satisfied && !other.formula.keg_only);
                if planned || !self.receipts.linked(&conflict.name)?.is_empty() {
                    return Err(Error::Conflict {
                        formula: formula.name.clone(),
                        with: conflict.name.clone(),
                        reason: conflict
                            .because
                            .clone()
                            .unwrap_or_else(|| "both install the same files".to_string()),
                    });
                }
            }
        }
        Ok(())
    }

    /// Plan and install `requested`
    ///
    /// Planning errors (unknown formulas, cycles) are returned before
    /// anything is fetched. Failures after that are in the report.
    pub fn install(&self, requested: &[String], options: &InstallOptions) -> Result<InstallReport> {
        let plan = self.plan(requested, options)?;
        info!("Plan: {}", plan.order().join(" -> "));
        Ok(self.execute(&plan, options))
    }

    /// Execute an already computed plan
    pub fn execute(&self, plan: &BuildPlan, options: &InstallOptions) -> InstallReport {
        let status = plan
            .nodes()
            .map(|node| {
                let status = if node.satisfied {
                    NodeStatus::Done(Outcome::Satisfied)
                } else {
                    NodeStatus::Pending
                };
                (node.name().to_string(), status)
            })
            .collect();
        let schedule = Mutex::new(Schedule {
            status,
            durations: HashMap::new(),
            caveats: HashMap::new(),
            running: 0,
            halted: false,
            failures: Vec::new(),
        });
        let wakeup = Condvar::new();

        let workers = options.jobs.max(1).min(plan.len().max(1));
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| self.worker(plan, options, &schedule, &wakeup));
            }
        });

        let schedule = schedule.into_inner();
        self.report(plan, schedule)
    }

    fn worker(
        &self,
        plan: &BuildPlan,
        options: &InstallOptions,
        schedule: &Mutex<Schedule>,
        wakeup: &Condvar,
    ) {
        loop {
            let name = {
                let mut state = schedule.lock();
                loop {
                    if let Some(name) = state.next_ready(plan) {
                        state.status.insert(name.clone(), NodeStatus::Running);
                        state.running += 1;
                        break name;
                    }
                    if state.running == 0 {
                        wakeup.notify_all();
                        return;
                    }
                    wakeup.wait(&mut state);
                }
            };

            let started = Instant::now();
            let result = self.install_one(plan, &name, options);
            let elapsed = started.elapsed();

            let mut state = schedule.lock();
            state.running -= 1;
            state.durations.insert(name.clone(), elapsed);
            match result {
                Ok(built) => {
                    let verified = built.verified;
                    if !built.caveats.is_empty() {
                        state.caveats.insert(name.clone(), built.caveats);
                    }
                    state
                        .status
                        .insert(name.clone(), NodeStatus::Done(Outcome::Installed { verified }));
                    if let Some(error) = built.test_failure {
                        // The artifact stays installed, so dependents may proceed
                        state.failures.push(Failure {
                            formula: name.clone(),
                            stage: Stage::Test,
                            error,
                        });
                        if !options.keep_going {
                            state.halt(&name);
                        }
                    }
                }
                Err((stage, error)) => {
                    error!("{} failed during {}: {}", name, stage, error);
                    state.status.insert(
                        name.clone(),
                        NodeStatus::Done(Outcome::Failed {
                            stage,
                            kind: error.kind(),
                        }),
                    );
                    state.failures.push(Failure {
                        formula: name.clone(),
                        stage,
                        error,
                    });
                    if options.keep_going {
                        state.block_dependents(plan, &name);
                    } else {
                        state.halt(&name);
                    }
                }
            }
            drop(state);
            wakeup.notify_all();
        }
    }

    fn report(&self, plan: &BuildPlan, mut schedule: Schedule) -> InstallReport {
        let formulas = plan
            .nodes()
            .map(|node| {
                let formula = &node.formula;
                let outcome = match schedule.status.remove(node.name()) {
                    Some(NodeStatus::Done(outcome)) => outcome,
                    _ => Outcome::NotAttempted { blocked_by: None },
                };
                let version = formula.pkg_version();
                FormulaReport {
                    name: formula.name.clone(),
                    prefix: self.config.prefix_for(&formula.name, &version),
                    version,
                    outcome,
                    duration: schedule
                        .durations
                        .get(node.name())
                        .copied()
                        .unwrap_or_default(),
                    caveats: schedule.caveats.remove(node.name()).unwrap_or_default(),
                }
            })
            .collect();

        let mut failures = schedule.failures.into_iter();
        InstallReport {
            formulas,
            failure: failures.next(),
            other_failures: failures.collect(),
        }
    }

    fn install_one(
        &self,
        plan: &BuildPlan,
        name: &str,
        options: &InstallOptions,
    ) -> std::result::Result<Built, (Stage, Error)> {
        let node = plan
            .node(name)
            .ok_or_else(|| (Stage::Plan, Error::FormulaNotFound(name.to_string())))?;
        let formula = &node.formula;
        if self.cancel.is_cancelled() {
            return Err((Stage::Plan, Error::Cancelled(name.to_string())));
        }
        info!("==> Installing {} {}", formula.name, formula.pkg_version());

        // Fetch
        let specs = formula.fetch_specs();
        let mut fetched = Vec::with_capacity(specs.len());
        for result in self.fetcher.fetch_all(&specs) {
            fetched.push(result.map_err(|e| (Stage::Fetch, e))?);
        }
        let fetched: HashMap<&str, &Path> = specs
            .iter()
            .zip(fetched.iter())
            .map(|(spec, path)| (spec.name.as_str(), path.as_path()))
            .collect();

        // Environment
        let builder = EnvironmentBuilder::new(&self.config, &self.host);
        let deps = self.locations(plan, &plan.build_inputs(name));
        let mut env = builder
            .build(formula, &deps)
            .map_err(|e| (Stage::Environment, e))?;

        // Unpack
        self.stage_source(formula, &fetched, &mut env)
            .map_err(|e| (Stage::Unpack, e))?;
        let buildpath = env.buildpath().to_path_buf();
        self.stage_resources(formula, &fetched, false, &buildpath)
            .map_err(|e| (Stage::Unpack, e))?;

        // Build
        let prefix = self.config.prefix_for(&formula.name, &formula.pkg_version());
        let closure = plan.closure_hash(name);
        self.receipts
            .forget(&formula.name, &formula.version, formula.revision, &closure)
            .map_err(|e| (Stage::Receipt, e))?;
        if prefix.exists() {
            debug!("Removing previous install at {}", prefix.display());
            self.unlink(&formula.name).map_err(|e| (Stage::Link, e))?;
            fs::remove_dir_all(&prefix).map_err(|e| (Stage::Build, e.into()))?;
        }
        let mut executor = Executor::new(
            &env,
            &self.fetcher,
            self.config.step_timeout(),
            self.cancel.clone(),
        );
        let built = executor.run_build(&formula.build);
        self.write_log(formula, executor.log());
        built.map_err(|e| (Stage::Build, e))?;
        let caveats = formula
            .caveats
            .iter()
            .map(|text| env.substitute(text))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| (Stage::Install, e))?;
        drop(env);

        // Install check
        let file_count = count_files(&prefix);
        if file_count == 0 {
            return Err((
                Stage::Install,
                Error::BuildFailed {
                    formula: formula.name.clone(),
                    step: formula.build.len(),
                    command: "install".to_string(),
                    output: CapturedOutput {
                        exit_code: None,
                        stdout: String::new(),
                        stderr: format!("nothing was installed into {}", prefix.display()),
                    },
                },
            ));
        }

        // Link
        let linker = Linker::new(&self.config.link_dir, &self.config.cellar);
        let linked = linker
            .link(&formula.name, &prefix, formula.keg_only)
            .map_err(|e| (Stage::Link, e))?;
        self.mark_unlinked(&formula.name)
            .map_err(|e| (Stage::Receipt, e))?;
        debug!(
            "{} linked at {} ({} files)",
            formula.name,
            linked.opt.display(),
            linked.files
        );

        // Receipt
        let mut receipt = self.receipt_for(plan, formula, &prefix, file_count);
        receipt.linked = !formula.keg_only;
        receipt.caveats = caveats.clone();
        let receipt_id = self
            .receipts
            .record(&receipt)
            .map_err(|e| (Stage::Receipt, e))?;
        info!(
            "Installed {} {} ({} files) to {}",
            formula.name,
            formula.pkg_version(),
            file_count,
            prefix.display()
        );

        // Test
        let Some(steps) = formula.test.as_ref().filter(|_| options.run_tests) else {
            if options.run_tests {
                warn!("{} has no test procedure", formula.name);
            }
            return Ok(Built {
                verified: None,
                test_failure: None,
                caveats,
            });
        };
        let report = self
            .run_test_procedure(plan, formula, steps, &fetched)
            .map_err(|e| (Stage::Test, e))?;
        let passed = report.outcome.passed();
        self.receipts
            .set_verified(receipt_id, passed)
            .map_err(|e| (Stage::Receipt, e))?;

        Ok(Built {
            verified: Some(passed),
            test_failure: report.into_result(&formula.name).err(),
            caveats,
        })
    }

    /// Remove `name`'s links from the shared tree
    fn unlink(&self, name: &str) -> Result<()> {
        Linker::new(&self.config.link_dir, &self.config.cellar).unlink(name)?;
        self.mark_unlinked(name)
    }

    fn mark_unlinked(&self, name: &str) -> Result<()> {
        for receipt in self.receipts.linked(name)? {
            if let Some(id) = receipt.id {
                self.receipts.set_linked(id, false)?;
            }
        }
        Ok(())
    }

    fn run_test_procedure(
        &self,
        plan: &BuildPlan,
        formula: &ResolvedFormula,
        steps: &[crate::formula::StepSpec],
        fetched: &HashMap<&str, &Path>,
    ) -> Result<TestReport> {
        let deps = self.locations(plan, &plan.test_inputs(&formula.name));
        let env = EnvironmentBuilder::new(&self.config, &self.host).build(formula, &deps)?;
        self.stage_resources(formula, fetched, true, env.testpath())?;

        let mut executor = Executor::new(
            &env,
            &self.fetcher,
            self.config.step_timeout(),
            self.cancel.clone(),
        );
        run_tests(&mut executor, steps)
    }

    /// Run the test procedure of an installed formula
    pub fn test(&self, name: &str) -> Result<TestReport> {
        let options = InstallOptions {
            run_tests: true,
            force: false,
            keep_going: false,
            jobs: 1,
        };
        let plan = self.plan(&[name.to_string()], &options)?;
        let node = plan
            .node(name)
            .ok_or_else(|| Error::FormulaNotFound(name.to_string()))?;
        let formula = &node.formula;
        let closure = plan.closure_hash(name);
        let receipt = self
            .receipts
            .find(&formula.name, &formula.version, formula.revision, &closure)?
            .ok_or_else(|| {
                Error::FormulaNotFound(format!(
                    "{} {} is not installed",
                    name,
                    formula.pkg_version()
                ))
            })?;

        let Some(steps) = formula.test.as_ref() else {
            return Err(Error::invalid(name, "formula has no test procedure"));
        };

        let test_resources: Vec<FetchSpec> = formula
            .resources
            .iter()
            .filter(|r| r.for_test)
            .map(|r| r.fetch.clone())
            .collect();
        let mut paths = Vec::with_capacity(test_resources.len());
        for result in self.fetcher.fetch_all(&test_resources) {
            paths.push(result?);
        }
        let fetched: HashMap<&str, &Path> = test_resources
            .iter()
            .zip(paths.iter())
            .map(|(spec, path)| (spec.name.as_str(), path.as_path()))
            .collect();

        let report = self.run_test_procedure(&plan, formula, steps, &fetched)?;
        if let Some(id) = receipt.id {
            self.receipts.set_verified(id, report.outcome.passed())?;
        }
        Ok(report)
    }

    /// Fetch everything `requested` needs without building
    pub fn fetch(&self, requested: &[String]) -> Result<Vec<(FetchSpec, Result<PathBuf>)>> {
        let plan = build_plan(self.source.as_ref(), &self.host, requested, false)?;
        let specs: Vec<FetchSpec> = plan
            .nodes()
            .flat_map(|node| node.formula.fetch_specs())
            .collect();
        let results = self.fetcher.fetch_all(&specs);
        Ok(specs.into_iter().zip(results).collect())
    }

    fn locations(&self, plan: &BuildPlan, names: &[String]) -> Vec<DependencyLocation> {
        names
            .iter()
            .filter_map(|dep| plan.node(dep))
            .map(|node| {
                let version = node.formula.pkg_version();
                DependencyLocation {
                    name: node.formula.name.clone(),
                    prefix: self.config.prefix_for(&node.formula.name, &version),
                    version,
                }
            })
            .collect()
    }

    fn stage_source(
        &self,
        formula: &ResolvedFormula,
        fetched: &HashMap<&str, &Path>,
        env: &mut BuildEnvironment,
    ) -> Result<()> {
        let archive = fetched
            .get(formula.source.name.as_str())
            .ok_or_else(|| Error::invalid(&formula.name, "source was not fetched"))?;
        let file_name = formula
            .source
            .urls
            .first()
            .map(|u| file_name_from_url(u))
            .unwrap_or_else(|| formula.name.clone());
        let root = unpack(
            archive,
            &env.source_dir(),
            &file_name,
            formula.extract_dir.as_deref(),
        )?;
        debug!("{}: source root {}", formula.name, root.display());
        env.set_buildpath(root);
        Ok(())
    }

    fn stage_resources(
        &self,
        formula: &ResolvedFormula,
        fetched: &HashMap<&str, &Path>,
        for_test: bool,
        base: &Path,
    ) -> Result<()> {
        let wanted = formula.resources.iter().filter(|r| r.for_test == for_test);
        for resource in wanted {
            let StagedResource { fetch, stage, .. } = resource;
            let archive = fetched.get(fetch.name.as_str()).ok_or_else(|| {
                Error::invalid(&formula.name, format!("resource {} was not fetched", fetch.name))
            })?;
            let file_name = fetch
                .urls
                .first()
                .map(|u| file_name_from_url(u))
                .unwrap_or_else(|| stage.clone());
            let dest = base.join(stage);
            let root = unpack(archive, &dest, &file_name, None)?;
            debug!("{}: staged {} at {}", formula.name, fetch.name, root.display());
        }
        Ok(())
    }

    fn receipt_for(
        &self,
        plan: &BuildPlan,
        formula: &ResolvedFormula,
        prefix: &Path,
        file_count: usize,
    ) -> Receipt {
        let pinned = |names: Vec<String>| -> Vec<ReceiptDependency> {
            names
                .iter()
                .filter_map(|n| plan.node(n))
                .map(|node| ReceiptDependency {
                    name: node.formula.name.clone(),
                    version: node.formula.pkg_version(),
                })
                .collect()
        };

        Receipt {
            id: None,
            name: formula.name.clone(),
            version: formula.version.clone(),
            revision: formula.revision,
            definition_hash: formula.definition_hash.clone(),
            closure_hash: plan.closure_hash(&formula.name),
            prefix: prefix.to_path_buf(),
            runtime_dependencies: pinned(plan.runtime_closure(&formula.name)),
            build_dependencies: pinned(plan.build_inputs(&formula.name)),
            choices: formula.choices.clone(),
            host: HostSnapshot::from(&self.host),
            file_count,
            verified: false,
            keg_only: formula.keg_only,
            caveats: Vec::new(),
            linked: false,
            installed_at: Utc::now(),
        }
    }

    fn write_log(&self, formula: &ResolvedFormula, log: &str) {
        let path = self.config.log_path(&formula.name, &formula.pkg_version());
        let written = fs::create_dir_all(&self.config.log_dir).and_then(|_| fs::write(&path, log));
        match written {
            Ok(()) => debug!("Build log written to {}", path.display()),
            Err(e) => warn!("Could not write build log {}: {}", path.display(), e),
        }
    }
}
