//! Test runner backed by `cargo` in per-worker sandboxes
//!
//! Every variant is built once with `cargo test --no-run`; its tests then run by
//! spawning the built test executables directly, so a deadline kill reaches the
//! process that is actually running the tests.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{MutationError, Result};
use crate::mutant::Mutant;
use crate::runner::{
    run_one_by_one, CompileOutcome, MutantVariant, RunnerFactory, TestCase, TestCoverage,
    TestDescriptor, TestOutcome, TestRun, TestRunner, TestSuite,
};

const SKIP_NAMES: &[&str] = &["target", "node_modules"];

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How much compiler output to keep in a CompileError reason
const MAX_REASON_LEN: usize = 2000;

fn should_skip(name: &str) -> bool {
    name.starts_with('.') || SKIP_NAMES.contains(&name)
}

/// Copy a project tree, leaving out build output and VCS folders
fn copy_dir_filtered(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if should_skip(&name.to_string_lossy()) {
            continue;
        }
        let src_path = entry.path();
        let dst_path = dst.join(&name);
        let ft = entry.file_type()?;
        if ft.is_dir() {
            copy_dir_filtered(&src_path, &dst_path)?;
        } else if ft.is_file() {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

/// Hands each worker a [`CargoRunner`] over its own copy of the project
#[derive(Debug, Clone)]
pub struct CargoRunnerFactory {
    project_root: PathBuf,
}

impl CargoRunnerFactory {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }
}

impl RunnerFactory for CargoRunnerFactory {
    fn create(&self, worker: usize) -> Result<Box<dyn TestRunner>> {
        Ok(Box::new(CargoRunner::new(&self.project_root, worker)?))
    }
}

enum ProcessOutcome {
    Finished {
        success: bool,
        stdout: String,
        stderr: String,
    },
    TimedOut,
}

/// One line of `cargo --message-format=json` output; other reasons are ignored
#[derive(Debug, Deserialize)]
struct BuildMessage {
    reason: String,
    #[serde(default)]
    executable: Option<PathBuf>,
    #[serde(default)]
    profile: Option<ArtifactProfile>,
    #[serde(default)]
    message: Option<CompilerMessage>,
}

#[derive(Debug, Deserialize)]
struct ArtifactProfile {
    test: bool,
}

#[derive(Debug, Deserialize)]
struct CompilerMessage {
    level: String,
    #[serde(default)]
    rendered: Option<String>,
}

/// Test executables and error diagnostics of one build
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BuildArtifacts {
    pub executables: Vec<PathBuf>,
    pub errors: Vec<String>,
}

/// Read test executables and compiler errors from `--message-format=json` output
pub fn parse_build_output(stdout: &str) -> BuildArtifacts {
    let mut artifacts = BuildArtifacts::default();
    for message in stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<BuildMessage>(line).ok())
    {
        match message.reason.as_str() {
            "compiler-artifact" => {
                let is_test = message.profile.is_some_and(|p| p.test);
                if let (true, Some(executable)) = (is_test, message.executable) {
                    if !artifacts.executables.contains(&executable) {
                        artifacts.executables.push(executable);
                    }
                }
            }
            "compiler-message" => {
                if let Some(CompilerMessage {
                    level,
                    rendered: Some(rendered),
                }) = message.message
                {
                    if level == "error" {
                        artifacts.errors.push(rendered);
                    }
                }
            }
            _ => {}
        }
    }
    artifacts
}

pub struct CargoRunner {
    project_root: PathBuf,
    project_name: String,
    sandbox: tempfile::TempDir,
    /// File currently holding a mutated variant
    touched: Option<PathBuf>,
    /// Test executables of the last successful build
    executables: Vec<PathBuf>,
}

impl CargoRunner {
    pub fn new(project_root: &Path, worker: usize) -> Result<Self> {
        let sandbox = tempfile::Builder::new()
            .prefix(&format!("mutation-worker-{worker}-"))
            .tempdir()?;
        copy_dir_filtered(project_root, sandbox.path())?;
        debug!(worker, sandbox = %sandbox.path().display(), "created cargo sandbox");

        let project_name = project_root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string());

        Ok(Self {
            project_root: project_root.to_path_buf(),
            project_name,
            sandbox,
            touched: None,
            executables: Vec::new(),
        })
    }

    pub fn sandbox_path(&self) -> &Path {
        self.sandbox.path()
    }

    fn cargo(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("cargo");
        cmd.args(args)
            .current_dir(self.sandbox.path())
            .env("CARGO_TARGET_DIR", self.sandbox.path().join("target"))
            .env("RUST_BACKTRACE", "0");
        cmd
    }

    /// Write the mutated source over the sandbox copy of its file
    fn install(&mut self, variant: &MutantVariant) -> Result<()> {
        let target = self.sandbox.path().join(&variant.file);
        fs::write(&target, &variant.mutated_source).map_err(|e| MutationError::FileReadError {
            file: target.clone(),
            error: e.to_string(),
        })?;
        self.touched = Some(variant.file.clone());
        Ok(())
    }

    /// Build the test targets of the sandbox as it currently is
    fn build(&mut self) -> CompileOutcome {
        self.executables.clear();
        let cmd = self.cargo(&["test", "--tests", "--no-run", "--message-format=json"]);
        match run_with_deadline(cmd, None) {
            Ok(ProcessOutcome::Finished {
                success,
                stdout,
                stderr,
            }) => {
                let artifacts = parse_build_output(&stdout);
                if !success {
                    let reason = if artifacts.errors.is_empty() {
                        tail(&stderr)
                    } else {
                        tail(&artifacts.errors.join("\n"))
                    };
                    return CompileOutcome::Failed(reason);
                }
                self.executables = artifacts.executables;
                CompileOutcome::Success
            }
            Ok(ProcessOutcome::TimedOut) => CompileOutcome::Failed("build timed out".to_string()),
            Err(e) => CompileOutcome::Failed(e.to_string()),
        }
    }

    fn test_binary(&self, executable: &Path, names: &[&str]) -> Command {
        let mut cmd = Command::new(executable);
        cmd.arg("--exact")
            .args(names)
            .current_dir(self.sandbox.path())
            .env("CARGO_MANIFEST_DIR", self.sandbox.path())
            .env("RUST_BACKTRACE", "0");
        cmd
    }

    /// Run `tests` in one invocation per test executable
    fn run_together(&self, tests: &[&TestDescriptor], deadline: Instant) -> Vec<TestRun> {
        let started = Instant::now();
        let first = tests.first().map(|t| t.id);
        let only_first = |outcome: TestOutcome, duration: Duration| -> Vec<TestRun> {
            first
                .map(|test| TestRun {
                    test,
                    outcome,
                    duration,
                })
                .into_iter()
                .collect()
        };

        if self.executables.is_empty() {
            return only_first(
                TestOutcome::Crashed("no test executables were built".to_string()),
                Duration::ZERO,
            );
        }

        let names: Vec<&str> = tests.iter().map(|t| t.name.as_str()).collect();
        let mut results = Vec::new();
        for executable in &self.executables {
            match run_with_deadline(self.test_binary(executable, &names), Some(deadline)) {
                Ok(ProcessOutcome::Finished {
                    success,
                    stdout,
                    stderr,
                }) => {
                    let parsed = parse_test_results(&stdout);
                    if !success && parsed.iter().all(|(_, passed)| *passed) {
                        // Non-zero exit without a failing test: the test binary died.
                        return only_first(TestOutcome::Crashed(tail(&stderr)), started.elapsed());
                    }
                    results.extend(parsed);
                }
                Ok(ProcessOutcome::TimedOut) => {
                    return only_first(TestOutcome::Timeout, started.elapsed());
                }
                Err(e) => return only_first(TestOutcome::Crashed(e.to_string()), started.elapsed()),
            }
        }

        let share = started.elapsed() / u32::try_from(tests.len().max(1)).unwrap_or(u32::MAX);
        tests
            .iter()
            .map(|test| {
                let failed = results
                    .iter()
                    .any(|(name, passed)| *name == test.name && !passed);
                TestRun {
                    test: test.id,
                    outcome: if failed {
                        TestOutcome::Failed
                    } else {
                        TestOutcome::Passed
                    },
                    duration: share,
                }
            })
            .collect()
    }
}

impl TestRunner for CargoRunner {
    fn discover_tests(&mut self) -> Result<Vec<TestCase>> {
        match run_with_deadline(self.cargo(&["test", "--tests", "--", "--list"]), None)? {
            ProcessOutcome::Finished {
                success: true,
                stdout,
                ..
            } => Ok(parse_test_list(&stdout)
                .into_iter()
                .map(|name| TestCase {
                    name,
                    project: self.project_name.clone(),
                })
                .collect()),
            ProcessOutcome::Finished { stderr, .. } => Err(MutationError::BuildError {
                message: tail(&stderr),
            }),
            ProcessOutcome::TimedOut => Err(MutationError::RunnerError {
                message: "test discovery timed out".to_string(),
            }),
        }
    }

    fn initial_run(&mut self, suite: &TestSuite) -> Result<Vec<TestRun>> {
        let started = Instant::now();
        let outcome = run_with_deadline(self.cargo(&["test", "--tests"]), None)?;
        let elapsed = started.elapsed();

        let stdout = match outcome {
            ProcessOutcome::Finished { stdout, stderr, .. } => {
                if !stdout.contains("test result:") {
                    return Err(MutationError::BuildError {
                        message: tail(&stderr),
                    });
                }
                stdout
            }
            ProcessOutcome::TimedOut => {
                return Err(MutationError::RunnerError {
                    message: "initial test run timed out".to_string(),
                })
            }
        };

        // libtest on stable has no per-test timings, so the wall time is shared out.
        let share = elapsed / u32::try_from(suite.len().max(1)).unwrap_or(u32::MAX);
        let results = parse_test_results(&stdout);
        Ok(suite
            .iter()
            .map(|test| {
                let passed = results
                    .iter()
                    .find(|(name, _)| *name == test.name)
                    .map_or(true, |(_, passed)| *passed);
                TestRun {
                    test: test.id,
                    outcome: if passed {
                        TestOutcome::Passed
                    } else {
                        TestOutcome::Failed
                    },
                    duration: share,
                }
            })
            .collect())
    }

    fn capture_coverage(
        &mut self,
        _suite: &TestSuite,
        _mutants: &[Mutant],
        _per_test: bool,
    ) -> Result<Vec<TestCoverage>> {
        Err(MutationError::CoverageUnsupported {
            reason: "cargo runner does not instrument mutants".to_string(),
        })
    }

    fn prepare(&mut self, variant: &MutantVariant) -> CompileOutcome {
        if let Err(e) = self.install(variant) {
            return CompileOutcome::Failed(e.to_string());
        }
        self.build()
    }

    fn run_test(&mut self, test: &TestDescriptor, deadline: Instant) -> TestOutcome {
        self.run_together(&[test], deadline)
            .into_iter()
            .next()
            .map_or(TestOutcome::Crashed("no test result".to_string()), |run| {
                run.outcome
            })
    }

    fn supports_batching(&self) -> bool {
        true
    }

    /// With `abort_on_failure` the tests run one per invocation in the given
    /// order, so nothing runs after the first failure.
    fn run_batch(
        &mut self,
        tests: &[&TestDescriptor],
        abort_on_failure: bool,
        deadline: Instant,
    ) -> Vec<TestRun> {
        if abort_on_failure && tests.len() > 1 {
            run_one_by_one(self, tests, true, deadline)
        } else {
            self.run_together(tests, deadline)
        }
    }

    fn restore(&mut self) -> Result<()> {
        if let Some(file) = self.touched.take() {
            let original = self.project_root.join(&file);
            let sandboxed = self.sandbox.path().join(&file);
            fs::copy(&original, &sandboxed).map_err(|e| MutationError::FileReadError {
                file: original,
                error: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Spawn `cmd` and poll it until it exits or `deadline` passes
fn run_with_deadline(mut cmd: Command, deadline: Option<Instant>) -> Result<ProcessOutcome> {
    let mut stdout_file = tempfile::tempfile()?;
    let mut stderr_file = tempfile::tempfile()?;
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(stdout_file.try_clone()?)
        .stderr(stderr_file.try_clone()?)
        .spawn()
        .map_err(|e| MutationError::RunnerError {
            message: format!("Failed to run {}: {e}", cmd.get_program().to_string_lossy()),
        })?;

    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None => {
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    if let Err(e) = child.kill() {
                        warn!(error = %e, "failed to kill test process");
                    }
                    let _ = child.wait();
                    return Ok(ProcessOutcome::TimedOut);
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    };

    Ok(ProcessOutcome::Finished {
        success: status.success(),
        stdout: read_back(&mut stdout_file)?,
        stderr: read_back(&mut stderr_file)?,
    })
}

fn read_back(file: &mut File) -> Result<String> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn tail(output: &str) -> String {
    let trimmed = output.trim();
    let start = trimmed.len().saturating_sub(MAX_REASON_LEN);
    let start = (start..trimmed.len())
        .find(|&i| trimmed.is_char_boundary(i))
        .unwrap_or(trimmed.len());
    trimmed[start..].to_string()
}

/// Test names from `cargo test -- --list` output
pub fn parse_test_list(output: &str) -> Vec<String> {
    let mut names: Vec<String> = output
        .lines()
        .filter_map(|line| line.trim().strip_suffix(": test"))
        .map(str::to_string)
        .collect();
    names.sort();
    names.dedup();
    names
}

/// `(name, passed)` for every `test <name> ... ok|FAILED` line of libtest output
pub fn parse_test_results(output: &str) -> Vec<(String, bool)> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("test "))
        .filter_map(|rest| rest.rsplit_once(" ... "))
        .filter_map(|(name, result)| match result.trim() {
            "ok" => Some((name.to_string(), true)),
            "FAILED" => Some((name.to_string(), false)),
            _ => None,
        })
        .collect()
}
