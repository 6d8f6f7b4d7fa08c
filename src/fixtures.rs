//! Scripted collaborators for unit tests

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::baseline::{BaselineReport, BaselineStore};
use crate::diff::{ChangeSet, DiffProvider};
use crate::error::{MutationError, Result};
use crate::frontend::{MutationSite, SourceFrontEnd};
use crate::mutant::{Fingerprint, Mutant, MutantId, MutatorKind, SourceSpan};
use crate::registry::{MutantLocation, MutantRegistry};
use crate::runner::{
    CompileOutcome, MutantVariant, RunnerFactory, TestCase, TestCoverage, TestDescriptor,
    TestOutcome, TestRun, TestRunner, TestSuite,
};
use crate::tree::{ComponentTree, FileNode, TreeBuilder};

/// `n` arithmetic mutants in `src/lib.rs`, one per line
pub fn registry_with(n: usize) -> MutantRegistry {
    let mut registry = MutantRegistry::new();
    for line in 1..=n {
        let location = MutantLocation {
            file: PathBuf::from("src/lib.rs"),
            span: SourceSpan {
                start_line: line,
                start_column: 1,
                end_line: line,
                end_column: 6,
            },
            original: "a + b".to_string(),
            replacement: "a - b".to_string(),
            site_index: line - 1,
        };
        let fingerprint = Fingerprint::compute(
            &location.file,
            MutatorKind::Arithmetic,
            &location.span,
            &location.original,
            &location.replacement,
        );
        registry.register(fingerprint, location, MutatorKind::Arithmetic);
    }
    registry
}

/// Front end over a toy format: each non-empty line names a mutator kind and becomes
/// one site. A leading `!` makes the site impossible to apply.
pub struct FakeFrontEnd;

impl SourceFrontEnd for FakeFrontEnd {
    type Ast = Vec<MutationSite>;

    fn accepts(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "rs")
    }

    fn parse(&self, path: &Path, source: &str) -> Result<Self::Ast> {
        let mut sites = Vec::new();
        for (number, line) in source.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let kind = line
                .trim_start_matches('!')
                .parse::<MutatorKind>()
                .map_err(|e| MutationError::ParseError {
                    file: path.to_path_buf(),
                    error: e.to_string(),
                })?;
            sites.push(MutationSite {
                index: sites.len(),
                kind,
                span: SourceSpan {
                    start_line: number + 1,
                    start_column: 1,
                    end_line: number + 1,
                    end_column: line.len() + 1,
                },
                original: line.to_string(),
                replacement: format!("mutated {line}"),
            });
        }
        Ok(sites)
    }

    fn mutation_sites(&self, ast: &Self::Ast) -> Vec<MutationSite> {
        ast.clone()
    }

    fn apply(&self, _ast: &Self::Ast, site: &MutationSite) -> Result<String> {
        if site.original.starts_with('!') {
            return Err(MutationError::FailedToApply {
                reason: format!("site {} cannot be rendered", site.index),
            });
        }
        Ok(format!("{} #{}", site.replacement, site.index))
    }
}

/// Build a tree of [`FakeFrontEnd`] files from `(relative path, source)` pairs
pub fn fake_tree(files: &[(&str, &str)]) -> ComponentTree<Vec<MutationSite>> {
    let mut builder = TreeBuilder::new("/project");
    for (relative, source) in files {
        let relative_path = PathBuf::from(relative);
        let ast = FakeFrontEnd.parse(&relative_path, source).unwrap();
        builder
            .add_file(FileNode {
                full_path: PathBuf::from("/project").join(relative),
                relative_path,
                source: source.to_string(),
                ast,
            })
            .unwrap();
    }
    builder.build()
}

/// What a fake runner does once a given mutant is prepared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeBehavior {
    CompileError,
    /// Every test blocks until the deadline
    Hang,
    Crash,
    Panic,
}

#[derive(Debug, Clone, Default)]
struct FakeConfig {
    tests: usize,
    behaviors: HashMap<MutantId, FakeBehavior>,
    kills: HashMap<MutantId, BTreeSet<usize>>,
    initial_failures: BTreeSet<usize>,
    coverage: Option<Vec<TestCoverage>>,
    test_delay: Duration,
    batching: bool,
    no_runners: bool,
}

#[derive(Debug, Default)]
struct Counters {
    runners_created: AtomicUsize,
    tests_executed: AtomicUsize,
    coverage_runs: AtomicUsize,
    batches: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    prepared: Mutex<Vec<MutantId>>,
    executed_tests: Mutex<Vec<(MutantId, usize)>>,
}

/// Runner factory whose runners follow a script
pub struct FakeFactory {
    config: FakeConfig,
    counters: Arc<Counters>,
}

impl FakeFactory {
    /// `tests` passing tests, no coverage support
    pub fn new(tests: usize) -> Self {
        Self {
            config: FakeConfig {
                tests,
                ..FakeConfig::default()
            },
            counters: Arc::new(Counters::default()),
        }
    }

    /// Test `test` fails while `mutant` is installed
    pub fn fail_test_for(mut self, mutant: MutantId, test: usize) -> Self {
        self.config.kills.entry(mutant).or_default().insert(test);
        self
    }

    pub fn with_behavior(mut self, mutant: MutantId, behavior: FakeBehavior) -> Self {
        self.config.behaviors.insert(mutant, behavior);
        self
    }

    pub fn with_coverage(mut self, coverage: Vec<TestCoverage>) -> Self {
        self.config.coverage = Some(coverage);
        self
    }

    pub fn with_initial_failure(mut self, test: usize) -> Self {
        self.config.initial_failures.insert(test);
        self
    }

    pub fn with_test_delay(mut self, delay: Duration) -> Self {
        self.config.test_delay = delay;
        self
    }

    pub fn with_batching(mut self) -> Self {
        self.config.batching = true;
        self
    }

    pub fn without_runners(mut self) -> Self {
        self.config.no_runners = true;
        self
    }

    pub fn suite(&self) -> TestSuite {
        TestSuite::new(test_cases(self.config.tests))
    }

    pub fn runners_created(&self) -> usize {
        self.counters.runners_created.load(Ordering::SeqCst)
    }

    pub fn tests_executed(&self) -> usize {
        self.counters.tests_executed.load(Ordering::SeqCst)
    }

    pub fn coverage_runs(&self) -> usize {
        self.counters.coverage_runs.load(Ordering::SeqCst)
    }

    pub fn batches(&self) -> usize {
        self.counters.batches.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.counters.max_running.load(Ordering::SeqCst)
    }

    /// Mutants installed in any runner, in no particular order
    pub fn prepared(&self) -> Vec<MutantId> {
        self.counters.prepared.lock().unwrap().clone()
    }

    /// Tests run against `mutant`, in execution order
    pub fn tests_run_for(&self, mutant: MutantId) -> Vec<usize> {
        self.counters
            .executed_tests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| *m == mutant)
            .map(|(_, test)| *test)
            .collect()
    }
}

impl RunnerFactory for FakeFactory {
    fn create(&self, _worker: usize) -> Result<Box<dyn TestRunner>> {
        if self.config.no_runners {
            return Err(MutationError::RunnerError {
                message: "no runner available".to_string(),
            });
        }
        self.counters.runners_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeRunner {
            config: self.config.clone(),
            counters: Arc::clone(&self.counters),
            installed: None,
        }))
    }
}

fn test_cases(count: usize) -> Vec<TestCase> {
    (0..count)
        .map(|i| TestCase {
            name: format!("tests::t{i}"),
            project: "core".to_string(),
        })
        .collect()
}

struct FakeRunner {
    config: FakeConfig,
    counters: Arc<Counters>,
    installed: Option<MutantId>,
}

impl TestRunner for FakeRunner {
    fn discover_tests(&mut self) -> Result<Vec<TestCase>> {
        Ok(test_cases(self.config.tests))
    }

    fn initial_run(&mut self, suite: &TestSuite) -> Result<Vec<TestRun>> {
        Ok(suite
            .iter()
            .map(|test| TestRun {
                test: test.id,
                outcome: if self.config.initial_failures.contains(&test.id) {
                    TestOutcome::Failed
                } else {
                    TestOutcome::Passed
                },
                // Later tests are slower.
                duration: Duration::from_millis(test.id as u64 + 1),
            })
            .collect())
    }

    fn capture_coverage(
        &mut self,
        _suite: &TestSuite,
        _mutants: &[Mutant],
        _per_test: bool,
    ) -> Result<Vec<TestCoverage>> {
        self.counters.coverage_runs.fetch_add(1, Ordering::SeqCst);
        self.config
            .coverage
            .clone()
            .ok_or_else(|| MutationError::CoverageUnsupported {
                reason: "fake runner has no instrumentation".to_string(),
            })
    }

    fn prepare(&mut self, variant: &MutantVariant) -> CompileOutcome {
        self.counters.prepared.lock().unwrap().push(variant.mutant);
        self.installed = Some(variant.mutant);
        match self.config.behaviors.get(&variant.mutant) {
            Some(FakeBehavior::CompileError) => CompileOutcome::Failed("type mismatch".to_string()),
            _ => CompileOutcome::Success,
        }
    }

    fn run_test(&mut self, test: &TestDescriptor, deadline: Instant) -> TestOutcome {
        let Some(mutant) = self.installed else {
            return TestOutcome::Crashed("no variant installed".to_string());
        };
        self.counters.tests_executed.fetch_add(1, Ordering::SeqCst);
        self.counters
            .executed_tests
            .lock()
            .unwrap()
            .push((mutant, test.id));

        let now = self.counters.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_running.fetch_max(now, Ordering::SeqCst);
        let outcome = match self.config.behaviors.get(&mutant) {
            Some(FakeBehavior::Hang) => {
                thread::sleep(deadline.saturating_duration_since(Instant::now()));
                TestOutcome::Timeout
            }
            Some(FakeBehavior::Crash) => TestOutcome::Crashed("segmentation fault".to_string()),
            Some(FakeBehavior::Panic) => {
                self.counters.running.fetch_sub(1, Ordering::SeqCst);
                panic!("runner exploded");
            }
            _ => {
                thread::sleep(self.config.test_delay);
                let killed = self
                    .config
                    .kills
                    .get(&mutant)
                    .is_some_and(|tests| tests.contains(&test.id));
                if killed {
                    TestOutcome::Failed
                } else {
                    TestOutcome::Passed
                }
            }
        };
        self.counters.running.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    fn supports_batching(&self) -> bool {
        self.config.batching
    }

    fn run_batch(
        &mut self,
        tests: &[&TestDescriptor],
        abort_on_failure: bool,
        deadline: Instant,
    ) -> Vec<TestRun> {
        self.counters.batches.fetch_add(1, Ordering::SeqCst);
        crate::runner::run_one_by_one(self, tests, abort_on_failure, deadline)
    }

    fn restore(&mut self) -> Result<()> {
        self.installed = None;
        Ok(())
    }
}

/// Baseline store kept in memory
#[derive(Default)]
pub struct MemoryBaselineStore {
    reports: Mutex<HashMap<String, BaselineReport>>,
    broken: bool,
}

impl MemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every load fails as if the stored blob were corrupt
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    pub fn get(&self, key: &str) -> Option<BaselineReport> {
        self.reports.lock().unwrap().get(key).cloned()
    }
}

impl BaselineStore for MemoryBaselineStore {
    fn load(&self, key: &str) -> Result<Option<BaselineReport>> {
        if self.broken {
            return Err(MutationError::BaselineError {
                key: key.to_string(),
                error: "corrupt".to_string(),
            });
        }
        Ok(self.get(key))
    }

    fn store(&self, key: &str, report: &BaselineReport) -> Result<()> {
        self.reports
            .lock()
            .unwrap()
            .insert(key.to_string(), report.clone());
        Ok(())
    }
}

/// Diff provider returning a fixed change set
pub struct StaticDiff(pub ChangeSet);

impl DiffProvider for StaticDiff {
    fn changes_since(&self, _target: &str) -> Result<ChangeSet> {
        Ok(self.0.clone())
    }
}
