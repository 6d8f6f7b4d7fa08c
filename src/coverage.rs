//! Mutant to covering-test relation
//!
//! Built once from the coverage run and read-only afterwards, so workers share it
//! by plain reference.

use std::collections::{BTreeMap, BTreeSet};

use crate::mutant::MutantId;
use crate::runner::{TestCoverage, TestId, TestSuite};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageMap {
    by_mutant: BTreeMap<MutantId, BTreeSet<TestId>>,
    /// Coverage was attributed to individual tests
    per_test: bool,
}

impl CoverageMap {
    /// Build from per-test coverage records.
    ///
    /// Without per-test capture the runner only answers "is this mutant reached at
    /// all", so every reached mutant is attributed to the whole suite.
    pub fn from_runs(runs: &[TestCoverage], suite: &TestSuite, per_test: bool) -> Self {
        let mut by_mutant: BTreeMap<MutantId, BTreeSet<TestId>> = BTreeMap::new();
        if per_test {
            for run in runs {
                for &mutant in &run.covered {
                    by_mutant.entry(mutant).or_default().insert(run.test);
                }
            }
        } else {
            let everything: BTreeSet<TestId> = suite.ids().into_iter().collect();
            for run in runs {
                for &mutant in &run.covered {
                    by_mutant.insert(mutant, everything.clone());
                }
            }
        }
        Self { by_mutant, per_test }
    }

    /// Tests that reach `mutant`, in ascending id order
    pub fn covering_tests(&self, mutant: MutantId) -> Vec<TestId> {
        self.by_mutant
            .get(&mutant)
            .map(|tests| tests.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_covered(&self, mutant: MutantId) -> bool {
        self.by_mutant
            .get(&mutant)
            .is_some_and(|tests| !tests.is_empty())
    }

    /// Mutants a single test can detect
    pub fn mutants_covered_by(&self, test: TestId) -> Vec<MutantId> {
        self.by_mutant
            .iter()
            .filter(|(_, tests)| tests.contains(&test))
            .map(|(mutant, _)| *mutant)
            .collect()
    }

    pub fn covered_count(&self) -> usize {
        self.by_mutant.values().filter(|t| !t.is_empty()).count()
    }

    pub fn is_per_test(&self) -> bool {
        self.per_test
    }
}
