//! Test selection for a single mutant

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coverage::CoverageMap;
use crate::mutant::MutantId;
use crate::runner::{TestId, TestSuite};

/// Independent optimization switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationModes {
    /// Classify mutants no test reaches as NoCoverage without running anything
    pub skip_uncovered_mutants: bool,
    /// Run only the tests that reach the mutant
    pub coverage_based_test: bool,
    /// Keep running the selected tests after the first kill
    pub disable_abort_test_on_kill: bool,
    /// Attribute coverage to individual tests instead of the whole suite
    pub capture_coverage_per_test: bool,
    /// Run each test in its own invocation and never shortcut uncovered mutants
    pub disable_test_mix: bool,
}

impl Default for OptimizationModes {
    fn default() -> Self {
        Self {
            skip_uncovered_mutants: true,
            coverage_based_test: true,
            disable_abort_test_on_kill: false,
            capture_coverage_per_test: true,
            disable_test_mix: false,
        }
    }
}

impl OptimizationModes {
    /// Every switch off: full suite for every mutant, stop on first kill
    pub fn none() -> Self {
        Self {
            skip_uncovered_mutants: false,
            coverage_based_test: false,
            disable_abort_test_on_kill: false,
            capture_coverage_per_test: false,
            disable_test_mix: false,
        }
    }

    /// Whether a coverage run is worth doing at all
    pub fn needs_coverage(&self) -> bool {
        self.skip_uncovered_mutants || self.coverage_based_test
    }
}

/// Tests to execute for one mutant, in execution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestPlan {
    pub tests: Vec<TestId>,
    /// Stop at the first failing test
    pub abort_on_first_kill: bool,
    /// Runner may execute the whole plan in one invocation
    pub allow_batching: bool,
    /// Expected runtime of the selected tests on unmutated code
    pub base_duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    NoCoverage,
    Execute(TestPlan),
}

pub fn select_tests(
    mutant: MutantId,
    coverage: Option<&CoverageMap>,
    suite: &TestSuite,
    modes: &OptimizationModes,
) -> Selection {
    let covering = coverage.map(|map| map.covering_tests(mutant));

    if let Some(covering) = &covering {
        if covering.is_empty() && modes.skip_uncovered_mutants && !modes.disable_test_mix {
            return Selection::NoCoverage;
        }
    }

    let tests = match covering {
        Some(mut covering) if modes.coverage_based_test && !covering.is_empty() => {
            // Fastest first: shortens the path to a kill.
            covering.sort_by_key(|id| {
                (
                    suite.get(*id).map(|t| t.expected_duration).unwrap_or_default(),
                    *id,
                )
            });
            covering
        }
        _ => suite.ids(),
    };

    Selection::Execute(TestPlan {
        base_duration: suite.duration_of(&tests),
        tests,
        abort_on_first_kill: !modes.disable_abort_test_on_kill,
        allow_batching: !modes.disable_test_mix,
    })
}
