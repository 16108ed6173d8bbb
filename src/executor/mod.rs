// src/executor/mod.rs

//! Build Step Executor
//!
//! Runs a formula's steps strictly in order inside a [`BuildEnvironment`].
//! Each step moves `Pending -> Running -> Succeeded | Failed`; the first
//! failure is terminal for the formula and surfaces as
//! [`Error::BuildFailed`] with the 1-based step index and the captured
//! output. Nothing is retried here.
//!
//! Cancellation is only observed between steps: a running command is never
//! interrupted, except by the per-step timeout.

mod patch;

pub use patch::{apply_patch, PatchError};

use crate::environment::BuildEnvironment;
use crate::error::{CapturedOutput, Error, Result};
use crate::fetch::Fetcher;
use crate::formula::{
    patch_fetch_spec, InreplaceSpec, PatchSpec, StepSpec, SymlinkSpec, WriteSpec,
};
use crate::link::replace_symlink;
use regex::Regex;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Cooperative cancellation flag shared by a whole install
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; takes effect at the next step boundary
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum StepState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// What happened to one step
#[derive(Debug, Clone)]
pub struct StepRecord {
    /// 1-based position among the steps that were run
    pub index: usize,
    pub description: String,
    pub state: StepState,
    pub output: Option<CapturedOutput>,
    pub duration: Duration,
}

/// Executes steps for one formula
pub struct Executor<'a> {
    env: &'a BuildEnvironment,
    fetcher: &'a Fetcher,
    timeout: Option<Duration>,
    cancel: CancelToken,
    log: String,
}

impl<'a> Executor<'a> {
    pub fn new(
        env: &'a BuildEnvironment,
        fetcher: &'a Fetcher,
        timeout: Option<Duration>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            env,
            fetcher,
            timeout,
            cancel,
            log: String::new(),
        }
    }

    pub fn environment(&self) -> &BuildEnvironment {
        self.env
    }

    /// Accumulated log of every step run so far
    pub fn log(&self) -> &str {
        &self.log
    }

    /// Fail with `Cancelled` if cancellation was requested
    pub fn check_cancelled(&self, before: impl FnOnce() -> String) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled(before()));
        }
        Ok(())
    }

    /// Run the build steps in order in `buildpath`
    ///
    /// Returns one record per step on success. On the first failure the
    /// remaining steps stay `Pending` and `BuildFailed` is returned.
    pub fn run_build(&mut self, steps: &[StepSpec]) -> Result<Vec<StepRecord>> {
        let formula = self.env.formula().to_string();
        let base = self.env.buildpath().to_path_buf();
        let mut records: Vec<StepRecord> = steps
            .iter()
            .enumerate()
            .map(|(i, step)| StepRecord {
                index: i + 1,
                description: describe(step),
                state: StepState::Pending,
                output: None,
                duration: Duration::ZERO,
            })
            .collect();

        for (step, record) in steps.iter().zip(records.iter_mut()) {
            self.check_cancelled(|| format!("{} build step {}", formula, record.index))?;

            record.state = StepState::Running;
            info!("{}: step {}/{}: {}", formula, record.index, steps.len(), record.description);
            let started = Instant::now();
            let output = match self.execute(step, &base) {
                Ok(output) => output,
                Err(e) => CapturedOutput {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: e.to_string(),
                },
            };
            record.duration = started.elapsed();

            if output.success() {
                record.state = StepState::Succeeded;
                record.output = Some(output);
                continue;
            }

            record.state = StepState::Failed;
            warn!("{}: step {} failed: {}", formula, record.index, record.description);
            return Err(Error::BuildFailed {
                formula,
                step: record.index,
                command: record.description.clone(),
                output,
            });
        }

        info!("{}: {} build steps succeeded", formula, records.len());
        Ok(records)
    }

    /// Execute a single step with `base` as the default working directory
    ///
    /// `Err` means the step could not be carried out at all; a command that
    /// ran and exited non-zero is `Ok` with that status.
    pub fn execute(&mut self, step: &StepSpec, base: &Path) -> Result<CapturedOutput> {
        let cwd = match &step.cwd {
            Some(dir) => base.join(self.env.substitute(dir)?),
            None => base.to_path_buf(),
        };

        let header = format!("=== {} ===", describe(step));
        self.log_line(&header);

        let output = if let Some(argv) = &step.run {
            self.run_command(argv, step, &cwd)?
        } else if let Some(spec) = &step.inreplace {
            self.inreplace(spec, &cwd)?
        } else if let Some(spec) = &step.patch {
            self.patch(spec, &cwd)?
        } else if let Some(spec) = &step.write {
            self.write(spec, &cwd)?
        } else if let Some(spec) = &step.symlink {
            self.symlink(spec, &cwd)?
        } else {
            return Err(Error::invalid(self.env.formula(), "step has no action"));
        };

        self.log_output(&output);
        Ok(output)
    }

    /// Expand `*std_*` splats and `%(var)s` placeholders in an argv
    pub fn expand_args(&self, argv: &[String]) -> Result<Vec<String>> {
        let mut args = Vec::with_capacity(argv.len());
        for arg in argv {
            if let Some(list) = arg.strip_prefix('*') {
                let expansion = self.env.std_args(list).ok_or_else(|| {
                    Error::invalid(self.env.formula(), format!("unknown argument list {}", arg))
                })?;
                args.extend(expansion.iter().cloned());
            } else {
                args.push(self.env.substitute(arg)?);
            }
        }
        Ok(args)
    }

    fn run_command(&self, argv: &[String], step: &StepSpec, cwd: &Path) -> Result<CapturedOutput> {
        let args = self.expand_args(argv)?;
        let Some((program, rest)) = args.split_first() else {
            return Err(Error::invalid(self.env.formula(), "empty command"));
        };

        let mut command = Command::new(program);
        command
            .args(rest)
            .current_dir(cwd)
            .env_clear()
            .envs(self.env.env())
            .stdin(if step.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &step.env {
            command.env(key, self.env.substitute(value)?);
        }

        debug!("Running {:?} in {}", args, cwd.display());
        let mut child = command.spawn().map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to spawn {}: {}", program, e),
            ))
        })?;

        let stdin = match (&step.stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => {
                let input = self.env.substitute(input)?;
                Some(thread::spawn(move || {
                    // A command that exits without reading closes the pipe
                    let _ = pipe.write_all(input.as_bytes());
                }))
            }
            _ => None,
        };
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let exit_code = match self.timeout {
            Some(limit) => match child.wait_timeout(limit)? {
                Some(status) => status.code(),
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    warn!("{} timed out after {} seconds", program, limit.as_secs());
                    None
                }
            },
            None => child.wait()?.code(),
        };

        if let Some(handle) = stdin {
            let _ = handle.join();
        }
        let stdout = collect(stdout);
        let mut stderr = collect(stderr);
        if exit_code.is_none()
            && let Some(limit) = self.timeout
        {
            stderr.push_str(&format!("\ntimed out after {} seconds", limit.as_secs()));
        }

        Ok(CapturedOutput {
            exit_code,
            stdout,
            stderr,
        })
    }

    fn inreplace(&self, spec: &InreplaceSpec, cwd: &Path) -> Result<CapturedOutput> {
        let path = cwd.join(self.env.substitute(&spec.file)?);
        let contents = fs::read_to_string(&path)?;
        let replacement = self.env.substitute(&spec.replacement)?;

        let updated = if spec.regex {
            let re = Regex::new(&spec.pattern)
                .map_err(|e| Error::invalid(self.env.formula(), e.to_string()))?;
            if !re.is_match(&contents) {
                return Ok(failed(format!(
                    "inreplace: /{}/ did not match in {}",
                    spec.pattern, spec.file
                )));
            }
            re.replace_all(&contents, replacement.as_str()).into_owned()
        } else {
            let pattern = self.env.substitute(&spec.pattern)?;
            if !contents.contains(&pattern) {
                return Ok(failed(format!(
                    "inreplace: {:?} did not match in {}",
                    pattern, spec.file
                )));
            }
            contents.replace(&pattern, &replacement)
        };

        fs::write(&path, updated)?;
        Ok(succeeded(format!("inreplace {}", spec.file)))
    }

    fn patch(&self, spec: &PatchSpec, cwd: &Path) -> Result<CapturedOutput> {
        let diff = match (&spec.data, patch_fetch_spec(self.env.formula(), spec)) {
            (Some(data), _) => data.clone(),
            (None, Some(fetch)) => {
                let path = self.fetcher.fetch(&fetch)?;
                String::from_utf8_lossy(&fs::read(path)?).into_owned()
            }
            (None, None) => {
                return Err(Error::invalid(
                    self.env.formula(),
                    "patch needs inline data or a url with sha256",
                ));
            }
        };

        match apply_patch(cwd, &diff, spec.strip) {
            Ok(files) => Ok(succeeded(
                files
                    .iter()
                    .map(|f| format!("patched {}", relative_to(f, cwd).display()))
                    .collect::<Vec<_>>()
                    .join("\n"),
            )),
            Err(e) => Ok(failed(format!("patch: {}", e))),
        }
    }

    fn write(&self, spec: &WriteSpec, cwd: &Path) -> Result<CapturedOutput> {
        let path = cwd.join(self.env.substitute(&spec.path)?);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, self.env.substitute(&spec.contents)?)?;

        #[cfg(unix)]
        if spec.executable {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        }

        Ok(succeeded(format!("wrote {}", spec.path)))
    }

    fn symlink(&self, spec: &SymlinkSpec, cwd: &Path) -> Result<CapturedOutput> {
        let into = cwd.join(self.env.substitute(&spec.into)?);
        let target = cwd.join(self.env.substitute(&spec.target)?);

        let links = match &spec.name {
            Some(name) => vec![(target, into.join(self.env.substitute(name)?))],
            None => {
                let pattern = target.to_string_lossy().into_owned();
                let matches = glob::glob(&pattern)
                    .map_err(|e| Error::invalid(self.env.formula(), e.to_string()))?;
                let mut links = Vec::new();
                for entry in matches {
                    let path = entry.map_err(|e| Error::Io(e.into_error()))?;
                    if let Some(file_name) = path.file_name() {
                        let link = into.join(file_name);
                        links.push((path, link));
                    }
                }
                links
            }
        };
        if links.is_empty() {
            return Ok(failed(format!("symlink: no files match {}", spec.target)));
        }

        fs::create_dir_all(&into)?;
        let mut lines = Vec::with_capacity(links.len());
        for (target, link) in &links {
            replace_symlink(target, link)?;
            lines.push(format!(
                "linked {} -> {}",
                relative_to(link, cwd).display(),
                relative_to(target, cwd).display()
            ));
        }
        Ok(succeeded(lines.join("\n")))
    }

    fn log_line(&mut self, line: &str) {
        self.log.push_str(line);
        self.log.push('\n');
    }

    fn log_output(&mut self, output: &CapturedOutput) {
        if !output.stdout.is_empty() {
            self.log.push_str(&output.stdout);
            if !output.stdout.ends_with('\n') {
                self.log.push('\n');
            }
        }
        if !output.stderr.is_empty() {
            self.log.push_str(&output.stderr);
            if !output.stderr.ends_with('\n') {
                self.log.push('\n');
            }
        }
        if !output.success() {
            let status = output
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "terminated".to_string());
            self.log_line(&format!("(exit status {})", status));
        }
    }
}

/// Short human-readable description of a step
pub fn describe(step: &StepSpec) -> String {
    if let Some(argv) = &step.run {
        argv.join(" ")
    } else if let Some(spec) = &step.inreplace {
        format!("inreplace {}", spec.file)
    } else if let Some(spec) = &step.patch {
        match &spec.url {
            Some(url) => format!("patch {}", url),
            None => "patch (inline)".to_string(),
        }
    } else if let Some(spec) = &step.write {
        format!("write {}", spec.path)
    } else if let Some(spec) = &step.symlink {
        format!("symlink {} into {}", spec.target, spec.into)
    } else {
        "(empty step)".to_string()
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<thread::JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn succeeded(message: String) -> CapturedOutput {
    CapturedOutput {
        exit_code: Some(0),
        stdout: message,
        stderr: String::new(),
    }
}

fn failed(message: String) -> CapturedOutput {
    CapturedOutput {
        exit_code: Some(1),
        stdout: String::new(),
        stderr: message,
    }
}

fn relative_to(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base).unwrap_or(path).to_path_buf()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::environment::EnvironmentBuilder;
    use crate::formula::{parse_formula, resolve, ResolvedFormula};
    use crate::host::{Arch, Compiler, CompilerKind, HostFacts, Os};
    use tempfile::TempDir;

    fn formula(steps: &str) -> ResolvedFormula {
        let toml = format!(
            r#"
[formula]
name = "demo"
version = "1.0"

[source]
url = "file:///src/demo.tar.gz"
sha256 = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"

[environment]
set = {{ GREETING = "hello" }}

{}
"#,
            steps
        );
        let host = HostFacts::new(Os::Linux, Arch::X86_64, Compiler::new(CompilerKind::Gcc, None));
        resolve(&parse_formula(&toml).unwrap(), &host).unwrap()
    }

    struct Harness {
        _root: TempDir,
        config: EngineConfig,
        host: HostFacts,
        fetcher: Fetcher,
    }

    impl Harness {
        fn new() -> Self {
            let root = TempDir::new().unwrap();
            let config = EngineConfig::rooted_at(root.path());
            let fetcher = Fetcher::new(&config.cache_dir, 1, config.http_timeout()).unwrap();
            Self {
                _root: root,
                config,
                host: HostFacts::new(Os::Linux, Arch::X86_64, Compiler::new(CompilerKind::Gcc, None)),
                fetcher,
            }
        }

        fn env(&self, formula: &ResolvedFormula) -> BuildEnvironment {
            EnvironmentBuilder::new(&self.config, &self.host)
                .build(formula, &[])
                .unwrap()
        }
    }

    #[test]
    fn test_steps_run_in_order() {
        let harness = Harness::new();
        let formula = formula(
            r#"
[[build]]
write = { path = "log.txt", contents = "" }

[[build]]
run = ["sh", "-c", "echo one >> log.txt"]

[[build]]
run = ["sh", "-c", "echo $GREETING >> log.txt"]
"#,
        );
        let env = harness.env(&formula);
        let mut executor = Executor::new(&env, &harness.fetcher, None, CancelToken::new());
        let records = executor.run_build(&formula.build).unwrap();

        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.state == StepState::Succeeded));
        assert_eq!(
            fs::read_to_string(env.buildpath().join("log.txt")).unwrap(),
            "one\nhello\n"
        );
        assert!(executor.log().contains("=== sh -c echo one >> log.txt ==="));
    }

    #[test]
    fn test_failure_reports_step_and_stops() {
        let harness = Harness::new();
        let formula = formula(
            r#"
[[build]]
run = ["sh", "-c", "echo first"]

[[build]]
run = ["sh", "-c", "echo broken >&2; exit 3"]

[[build]]
run = ["sh", "-c", "touch third"]
"#,
        );
        let env = harness.env(&formula);
        let mut executor = Executor::new(&env, &harness.fetcher, None, CancelToken::new());
        let err = executor.run_build(&formula.build).unwrap_err();

        match err {
            Error::BuildFailed { formula, step, output, .. } => {
                assert_eq!(formula, "demo");
                assert_eq!(step, 2);
                assert_eq!(output.exit_code, Some(3));
                assert_eq!(output.stderr, "broken\n");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!env.buildpath().join("third").exists());
    }

    #[test]
    fn test_environment_is_not_inherited() {
        let harness = Harness::new();
        let formula = formula(
            r#"
[[build]]
run = ["sh", "-c", "test -z \"$FORMULA_ENGINE_LEAK\""]
"#,
        );
        // SAFETY: test-local variable, not read concurrently by other code
        unsafe { std::env::set_var("FORMULA_ENGINE_LEAK", "1") };
        let env = harness.env(&formula);
        let mut executor = Executor::new(&env, &harness.fetcher, None, CancelToken::new());
        assert!(executor.run_build(&formula.build).is_ok());
    }

    #[test]
    fn test_inreplace_literal_and_missing_pattern() {
        let harness = Harness::new();
        let formula = formula(
            r#"
[[build]]
write = { path = "Makefile", contents = "PREFIX = /usr/local\nLIBS = -static-libstdc++\n" }

[[build]]
inreplace = { file = "Makefile", pattern = "/usr/local", replacement = "%(prefix)s" }

[[build]]
inreplace = { file = "Makefile", pattern = "-static-\\S+", replacement = "", regex = true }

[[build]]
inreplace = { file = "Makefile", pattern = "not there", replacement = "x" }
"#,
        );
        let env = harness.env(&formula);
        let mut executor = Executor::new(&env, &harness.fetcher, None, CancelToken::new());
        let err = executor.run_build(&formula.build).unwrap_err();
        assert!(matches!(err, Error::BuildFailed { step: 4, .. }));

        let makefile = fs::read_to_string(env.buildpath().join("Makefile")).unwrap();
        assert!(makefile.contains(&format!("PREFIX = {}", env.prefix().display())));
        assert!(makefile.contains("LIBS = \n"));
    }

    #[test]
    fn test_symlink_glob_and_named_link() {
        let harness = Harness::new();
        let formula = formula(
            r#"
[[build]]
write = { path = "%(prefix)s/libexec/bin/demo", contents = "", executable = true }

[[build]]
write = { path = "%(prefix)s/libexec/bin/demo-config", contents = "" }

[[build]]
symlink = { target = "%(prefix)s/libexec/bin/*", into = "%(bin)s" }

[[build]]
symlink = { target = "%(prefix)s/libexec/bin/demo", into = "%(bin)s", name = "demo2" }

[[build]]
symlink = { target = "%(prefix)s/nothing/*", into = "%(bin)s" }
"#,
        );
        let env = harness.env(&formula);
        let mut executor = Executor::new(&env, &harness.fetcher, None, CancelToken::new());
        let err = executor.run_build(&formula.build).unwrap_err();
        match err {
            Error::BuildFailed { step, output, .. } => {
                assert_eq!(step, 5);
                assert!(output.stderr.contains("no files match"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let bin = env.prefix().join("bin");
        let libexec = env.prefix().join("libexec/bin");
        assert_eq!(fs::read_link(bin.join("demo")).unwrap(), libexec.join("demo"));
        assert_eq!(
            fs::read_link(bin.join("demo-config")).unwrap(),
            libexec.join("demo-config")
        );
        assert_eq!(fs::read_link(bin.join("demo2")).unwrap(), libexec.join("demo"));
    }

    #[test]
    fn test_inline_patch_and_std_args() {
        let harness = Harness::new();
        let formula = formula(
            r##"
[[build]]
write = { path = "version.h", contents = "#define VERSION 1\n" }

[[build]]
patch = { data = "--- a/version.h\n+++ b/version.h\n@@ -1 +1 @@\n-#define VERSION 1\n+#define VERSION 2\n" }

[[build]]
run = ["sh", "-c", "printf '%s\n' \"$@\" > args.txt", "sh", "*std_configure_args"]
"##,
        );
        let env = harness.env(&formula);
        let mut executor = Executor::new(&env, &harness.fetcher, None, CancelToken::new());
        executor.run_build(&formula.build).unwrap();

        assert_eq!(
            fs::read_to_string(env.buildpath().join("version.h")).unwrap(),
            "#define VERSION 2\n"
        );
        let args = fs::read_to_string(env.buildpath().join("args.txt")).unwrap();
        assert!(args.contains(&format!("--prefix={}", env.prefix().display())));
    }

    #[test]
    fn test_timeout_fails_step() {
        let harness = Harness::new();
        let formula = formula(
            r#"
[[build]]
run = ["sleep", "5"]
"#,
        );
        let env = harness.env(&formula);
        let mut executor = Executor::new(
            &env,
            &harness.fetcher,
            Some(Duration::from_millis(200)),
            CancelToken::new(),
        );
        match executor.run_build(&formula.build).unwrap_err() {
            Error::BuildFailed { step, output, .. } => {
                assert_eq!(step, 1);
                assert_eq!(output.exit_code, None);
                assert!(output.stderr.contains("timed out"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cancel_between_steps() {
        let harness = Harness::new();
        let formula = formula(
            r#"
[[build]]
run = ["true"]
"#,
        );
        let env = harness.env(&formula);
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut executor = Executor::new(&env, &harness.fetcher, None, cancel);
        assert!(matches!(
            executor.run_build(&formula.build),
            Err(Error::Cancelled(_))
        ));
    }

    #[test]
    fn test_cancel_lets_running_step_finish() {
        let harness = Harness::new();
        let formula = formula(
            r#"
[[build]]
run = ["sh", "-c", "touch started; while [ ! -e release ]; do sleep 0.05; done; touch first"]

[[build]]
run = ["touch", "second"]
"#,
        );
        let env = harness.env(&formula);
        let buildpath = env.buildpath().to_path_buf();
        let cancel = CancelToken::new();
        let mut executor = Executor::new(&env, &harness.fetcher, None, cancel.clone());

        let result = std::thread::scope(|scope| {
            scope.spawn(|| {
                let deadline = Instant::now() + Duration::from_secs(10);
                while !buildpath.join("started").exists() && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(20));
                }
                cancel.cancel();
                fs::write(buildpath.join("release"), "").unwrap();
            });
            executor.run_build(&formula.build)
        });

        match result {
            Err(Error::Cancelled(at)) => assert!(at.contains("step 2")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(buildpath.join("first").exists());
        assert!(!buildpath.join("second").exists());
        assert!(executor.log().contains("touch started"));
        assert!(!executor.log().contains("=== touch second ==="));
    }

    #[test]
    fn test_stdin_is_piped() {
        let harness = Harness::new();
        let formula = formula(
            r#"
[[build]]
run = ["cat"]
stdin = "%(name)s says hi"
"#,
        );
        let env = harness.env(&formula);
        let mut executor = Executor::new(&env, &harness.fetcher, None, CancelToken::new());
        let output = executor
            .execute(&formula.build[0], env.buildpath())
            .unwrap();
        assert_eq!(output.stdout, "demo says hi");
    }
}
