//! Test runner contracts
//!
//! The engine never compiles or executes anything itself. A [`RunnerFactory`]
//! hands every worker its own [`TestRunner`], which owns whatever process or
//! sandbox the tests need for as long as the worker lives.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::mutant::{Mutant, MutantId};

/// Run-local test identifier (index into the [`TestSuite`])
pub type TestId = usize;

/// A test as reported by discovery, before ids are assigned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub name: String,
    /// Test project / crate the test belongs to
    pub project: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDescriptor {
    pub id: TestId,
    pub name: String,
    pub project: String,
    /// Duration measured by the initial run
    pub expected_duration: Duration,
}

/// All tests of the project, ids equal to their index
#[derive(Debug, Clone, Default)]
pub struct TestSuite {
    tests: Vec<TestDescriptor>,
}

impl TestSuite {
    pub fn new(cases: Vec<TestCase>) -> Self {
        let tests = cases
            .into_iter()
            .enumerate()
            .map(|(id, case)| TestDescriptor {
                id,
                name: case.name,
                project: case.project,
                expected_duration: Duration::ZERO,
            })
            .collect();
        Self { tests }
    }

    pub fn get(&self, id: TestId) -> Option<&TestDescriptor> {
        self.tests.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestDescriptor> {
        self.tests.iter()
    }

    pub fn ids(&self) -> Vec<TestId> {
        (0..self.tests.len()).collect()
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Store durations measured by the initial run
    pub fn record_durations(&mut self, runs: &[TestRun]) {
        for run in runs {
            if let Some(test) = self.tests.get_mut(run.test) {
                test.expected_duration = run.duration;
            }
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.tests.iter().map(|t| t.expected_duration).sum()
    }

    pub fn duration_of(&self, ids: &[TestId]) -> Duration {
        ids.iter()
            .filter_map(|id| self.get(*id))
            .map(|t| t.expected_duration)
            .sum()
    }
}

/// Outcome of one test invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed,
    Timeout,
    /// The runner or test process died abnormally
    Crashed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRun {
    pub test: TestId,
    pub outcome: TestOutcome,
    pub duration: Duration,
}

/// Tests reached by the unmutated code for the mutants it instruments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCoverage {
    pub test: TestId,
    pub covered: Vec<MutantId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    Success,
    Failed(String),
}

/// Rendered source for one mutant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutantVariant {
    pub mutant: MutantId,
    /// Path relative to the project root
    pub file: PathBuf,
    pub mutated_source: String,
}

pub trait TestRunner {
    /// List every test of the project
    fn discover_tests(&mut self) -> Result<Vec<TestCase>>;

    /// Run the whole suite once against the unmutated project
    fn initial_run(&mut self, suite: &TestSuite) -> Result<Vec<TestRun>>;

    /// Run every test once with instrumentation for `mutants`.
    ///
    /// When `per_test` is false only the union of covered mutants matters.
    fn capture_coverage(
        &mut self,
        suite: &TestSuite,
        mutants: &[Mutant],
        per_test: bool,
    ) -> Result<Vec<TestCoverage>>;

    /// Install and build the mutated variant
    fn prepare(&mut self, variant: &MutantVariant) -> CompileOutcome;

    /// Run one test against the prepared variant
    fn run_test(&mut self, test: &TestDescriptor, deadline: Instant) -> TestOutcome;

    /// Whether [`TestRunner::run_batch`] runs several tests in one invocation
    fn supports_batching(&self) -> bool {
        false
    }

    /// Run several tests against the prepared variant
    fn run_batch(
        &mut self,
        tests: &[&TestDescriptor],
        abort_on_failure: bool,
        deadline: Instant,
    ) -> Vec<TestRun> {
        run_one_by_one(self, tests, abort_on_failure, deadline)
    }

    /// Put the unmutated source back and drop any in-flight state
    fn restore(&mut self) -> Result<()>;
}

/// Run `tests` through [`TestRunner::run_test`] one at a time.
///
/// A failure ends the loop only when `abort_on_failure` is set; a timeout or crash
/// always does, since the variant's state is unknown afterwards.
pub fn run_one_by_one<R: TestRunner + ?Sized>(
    runner: &mut R,
    tests: &[&TestDescriptor],
    abort_on_failure: bool,
    deadline: Instant,
) -> Vec<TestRun> {
    let mut runs = Vec::with_capacity(tests.len());
    for test in tests {
        let started = Instant::now();
        let outcome = runner.run_test(test, deadline);
        let stop = match outcome {
            TestOutcome::Passed => false,
            TestOutcome::Failed => abort_on_failure,
            TestOutcome::Timeout | TestOutcome::Crashed(_) => true,
        };
        runs.push(TestRun {
            test: test.id,
            outcome,
            duration: started.elapsed(),
        });
        if stop {
            break;
        }
    }
    runs
}

/// Creates one exclusive runner per worker
pub trait RunnerFactory: Sync {
    fn create(&self, worker: usize) -> Result<Box<dyn TestRunner>>;
}
