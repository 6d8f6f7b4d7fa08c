//! Mutation run orchestration
//!
//! Phases, in order: generate mutants from the component tree, settle what needs no
//! execution (inactive mutators, baseline reuse, out-of-diff code), run the initial
//! and coverage passes, select tests per mutant, execute on the worker pool, score.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::aggregator::MutationRunResult;
use crate::baseline::{reconcile, BaselineReport, BaselineStore};
use crate::config::EngineOptions;
use crate::coverage::CoverageMap;
use crate::diff::DiffProvider;
use crate::error::{MutationError, Result};
use crate::frontend::{MutationSite, SourceFrontEnd};
use crate::mutant::{Fingerprint, Mutant, MutantId, MutantStatus};
use crate::optimizer::{select_tests, Selection};
use crate::registry::{ExecutionRecord, MutantLocation, MutantRegistry, MutantSnapshot};
use crate::runner::{MutantVariant, RunnerFactory, TestOutcome, TestSuite};
use crate::scheduler::{Completion, Job, Scheduler};
use crate::tree::{ComponentTree, FileNode};

/// Drives one mutation run against a component tree
pub struct Engine<'a, F: SourceFrontEnd> {
    options: &'a EngineOptions,
    front_end: &'a F,
    factory: &'a dyn RunnerFactory,
    baseline_store: Option<&'a dyn BaselineStore>,
    diff: Option<&'a dyn DiffProvider>,
}

/// Where a registered mutant came from
struct Origin<'t, A> {
    file: &'t FileNode<A>,
    site: MutationSite,
}

impl<'a, F: SourceFrontEnd> Engine<'a, F> {
    pub fn new(options: &'a EngineOptions, front_end: &'a F, factory: &'a dyn RunnerFactory) -> Self {
        Self {
            options,
            front_end,
            factory,
            baseline_store: None,
            diff: None,
        }
    }

    pub fn with_baseline_store(mut self, store: &'a dyn BaselineStore) -> Self {
        self.baseline_store = Some(store);
        self
    }

    pub fn with_diff_provider(mut self, diff: &'a dyn DiffProvider) -> Self {
        self.diff = Some(diff);
        self
    }

    /// Run every phase and return the scored result.
    ///
    /// Only setup failures surface as errors: a broken initial test run, an
    /// unreadable required baseline, a failing diff, or a runner that cannot be
    /// created. Everything that happens to a single mutant ends up as its status.
    pub fn run(
        &self,
        tree: &ComponentTree<F::Ast>,
        progress: impl FnMut(&Completion),
    ) -> Result<MutationRunResult> {
        let started = Instant::now();
        let (registry, origins) = self.generate(tree)?;
        info!(mutants = registry.len(), files = tree.file_count(), "generated mutants");

        self.settle_static(&registry)?;
        self.apply_incremental(&registry)?;

        let mut executed = 0;
        let pending = pending_mutants(&registry)?;
        if pending.is_empty() {
            info!("no mutants left to execute");
        } else {
            executed = self.execute(&registry, &origins, &pending, progress)?;
        }

        let snapshot = registry.snapshot();
        self.store_baseline(&snapshot);

        let mut result = MutationRunResult::new(
            snapshot,
            self.options.thresholds,
            self.options.score_policy,
            started.elapsed(),
        );
        result.executed = executed;
        info!(
            score = result.report.percent(),
            killed = result.counts.killed,
            survived = result.counts.survived,
            "mutation run finished"
        );
        Ok(result)
    }

    fn generate<'t>(
        &self,
        tree: &'t ComponentTree<F::Ast>,
    ) -> Result<(MutantRegistry, Vec<Origin<'t, F::Ast>>)> {
        let mut registry = MutantRegistry::new();
        let mut origins = Vec::new();

        for file in tree.files() {
            if !self.options.mutate.matches(&file.relative_path) {
                debug!(file = %file.relative_path.display(), "excluded by mutate patterns");
                continue;
            }
            for site in self.front_end.mutation_sites(&file.ast) {
                let fingerprint = Fingerprint::compute(
                    &file.relative_path,
                    site.kind,
                    &site.span,
                    &site.original,
                    &site.replacement,
                );
                let location = MutantLocation {
                    file: file.relative_path.clone(),
                    span: site.span,
                    original: site.original.clone(),
                    replacement: site.replacement.clone(),
                    site_index: site.index,
                };
                let id = registry.register(fingerprint, location, site.kind);
                debug_assert_eq!(id, origins.len());
                origins.push(Origin { file, site });
            }
        }
        Ok((registry, origins))
    }

    /// Mutants of inactive kinds never run
    fn settle_static(&self, registry: &MutantRegistry) -> Result<()> {
        for mutant in registry.mutants() {
            if !self.options.is_active(mutant.kind) {
                let reason = if self.options.ignored_mutators.contains(&mutant.kind) {
                    format!("{} mutator ignored by configuration", mutant.kind)
                } else {
                    format!("{} mutator above mutation level", mutant.kind)
                };
                registry.complete(
                    mutant.id,
                    MutantStatus::Ignored,
                    ExecutionRecord {
                        reason: Some(reason),
                        ..ExecutionRecord::default()
                    },
                )?;
            }
        }
        Ok(())
    }

    /// Baseline reuse and diff scoping
    fn apply_incremental(&self, registry: &MutantRegistry) -> Result<()> {
        let Some(since) = &self.options.since else {
            return Ok(());
        };

        let baseline = match &self.options.baseline {
            None => None,
            Some(options) => {
                let store = self.baseline_store.ok_or_else(|| MutationError::ConfigError {
                    message: format!("No store available for baseline provider {:?}", options.provider),
                })?;
                match store.load(&options.key) {
                    Ok(Some(report)) => Some(report),
                    Ok(None) if options.required => {
                        return Err(MutationError::BaselineNotFound {
                            key: options.key.clone(),
                        })
                    }
                    Err(e) if options.required => return Err(e),
                    Ok(None) => {
                        warn!(key = %options.key, "no baseline found, running all mutants");
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(key = %options.key, %e, "baseline unusable, running all mutants");
                        return Ok(());
                    }
                }
            }
        };

        let diff = self.diff.ok_or_else(|| MutationError::ConfigError {
            message: "Diff mode is enabled but no diff provider was supplied".to_string(),
        })?;
        let changes = diff
            .changes_since(&since.target)?
            .without(&since.ignore_changes_in);
        debug!(reference = %since.target, files = changes.len(), "changed files");

        reconcile(registry, baseline.as_ref(), &changes)?;
        Ok(())
    }

    fn execute(
        &self,
        registry: &MutantRegistry,
        origins: &[Origin<'_, F::Ast>],
        pending: &[Mutant],
        progress: impl FnMut(&Completion),
    ) -> Result<usize> {
        let modes = &self.options.optimizations;
        let (suite, coverage) = {
            // Setup runner lives only for the initial and coverage passes.
            let mut setup = self.factory.create(0)?;
            let mut suite = TestSuite::new(setup.discover_tests()?);
            if suite.is_empty() {
                return Err(MutationError::RunnerError {
                    message: "No tests discovered".to_string(),
                });
            }

            let initial = setup.initial_run(&suite)?;
            let failed: Vec<String> = initial
                .iter()
                .filter(|run| run.outcome != TestOutcome::Passed)
                .filter_map(|run| suite.get(run.test).map(|t| t.name.clone()))
                .collect();
            if !failed.is_empty() {
                return Err(MutationError::InitialTestFailure { failed });
            }
            suite.record_durations(&initial);
            info!(
                tests = suite.len(),
                duration_ms = suite.total_duration().as_millis() as u64,
                "initial test run passed"
            );

            let coverage = if modes.needs_coverage() {
                match setup.capture_coverage(&suite, pending, modes.capture_coverage_per_test) {
                    Ok(records) => Some(CoverageMap::from_runs(
                        &records,
                        &suite,
                        modes.capture_coverage_per_test,
                    )),
                    Err(e) if !e.is_fatal() => {
                        info!(reason = %e, "coverage unavailable, every mutant runs the full suite");
                        None
                    }
                    Err(e) => return Err(e),
                }
            } else {
                None
            };
            setup.restore()?;
            (suite, coverage)
        };

        let mut jobs = Vec::new();
        for mutant in pending {
            match select_tests(mutant.id, coverage.as_ref(), &suite, modes) {
                Selection::NoCoverage => registry.complete(
                    mutant.id,
                    MutantStatus::NoCoverage,
                    ExecutionRecord {
                        reason: Some("no test covers this mutant".to_string()),
                        ..ExecutionRecord::default()
                    },
                )?,
                Selection::Execute(plan) => match self.render(origins, mutant.id) {
                    Ok(variant) => jobs.push(Job {
                        mutant: mutant.id,
                        plan,
                        variant,
                    }),
                    Err(e) => registry.complete(
                        mutant.id,
                        MutantStatus::CompileError,
                        ExecutionRecord {
                            reason: Some(e.to_string()),
                            ..ExecutionRecord::default()
                        },
                    )?,
                },
            }
        }

        let scheduler = Scheduler::new(
            self.factory,
            &suite,
            self.options.concurrency,
            self.options.additional_timeout,
        );
        let stats = scheduler.run(registry, jobs, progress)?;
        debug!(
            max_in_flight = stats.max_in_flight,
            restarts = stats.runner_restarts,
            "scheduler finished"
        );
        Ok(stats.executed)
    }

    /// Source text for one mutant; the front end's AST is not Send, so this happens
    /// before dispatch
    fn render(&self, origins: &[Origin<'_, F::Ast>], mutant: MutantId) -> Result<MutantVariant> {
        let origin = origins
            .get(mutant)
            .ok_or(MutationError::UnknownMutant { mutant })?;
        let mutated_source = self.front_end.apply(&origin.file.ast, &origin.site)?;
        Ok(MutantVariant {
            mutant,
            file: origin.file.relative_path.clone(),
            mutated_source,
        })
    }

    fn store_baseline(&self, snapshot: &[MutantSnapshot]) {
        let (Some(options), Some(store)) = (&self.options.baseline, self.baseline_store) else {
            return;
        };
        let report = BaselineReport::from_snapshot(snapshot);
        match store.store(&options.key, &report) {
            Ok(()) => info!(key = %options.key, mutants = report.mutants.len(), "stored baseline"),
            Err(e) => warn!(key = %options.key, %e, "failed to store baseline"),
        }
    }
}

fn pending_mutants(registry: &MutantRegistry) -> Result<Vec<Mutant>> {
    let mut pending = Vec::new();
    for mutant in registry.mutants() {
        if registry.status(mutant.id)? == MutantStatus::Pending {
            pending.push(mutant.clone());
        }
    }
    Ok(pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::BaselineProvider;
    use crate::config::{BaselineOptions, FileFilter, SinceOptions};
    use crate::diff::ChangeSet;
    use crate::fixtures::{
        fake_tree, FakeBehavior, FakeFactory, FakeFrontEnd, MemoryBaselineStore, StaticDiff,
    };
    use crate::mutant::MutationLevel;
    use crate::optimizer::OptimizationModes;
    use crate::runner::TestCoverage;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn options() -> EngineOptions {
        EngineOptions {
            concurrency: 2,
            ..EngineOptions::default()
        }
    }

    fn statuses(result: &MutationRunResult) -> Vec<MutantStatus> {
        result.mutants.iter().map(|m| m.status).collect()
    }

    fn covered(test: usize, mutants: &[usize]) -> TestCoverage {
        TestCoverage {
            test,
            covered: mutants.to_vec(),
        }
    }

    fn incremental(required: bool) -> EngineOptions {
        EngineOptions {
            baseline: Some(BaselineOptions {
                provider: BaselineProvider::Disk,
                key: "shop/main".to_string(),
                location: PathBuf::from(".stryker/baselines"),
                required,
            }),
            since: Some(SinceOptions {
                target: "main".to_string(),
                ignore_changes_in: FileFilter::none(),
            }),
            ..options()
        }
    }

    #[test]
    fn test_empty_tree_scores_nan_and_passes() {
        let tree = fake_tree(&[]);
        let factory = FakeFactory::new(3);
        let result = Engine::new(&options(), &FakeFrontEnd, &factory)
            .run(&tree, |_| {})
            .unwrap();

        assert_eq!(result.counts.total(), 0);
        assert!(result.score().is_nan());
        assert_eq!(result.exit_code(), 0);
        assert_eq!(factory.runners_created(), 0);
    }

    #[test]
    fn test_first_failing_test_stops_execution() {
        let tree = fake_tree(&[("src/lib.rs", "arithmetic")]);
        let factory = FakeFactory::new(3)
            .with_coverage(vec![covered(0, &[0]), covered(1, &[0]), covered(2, &[0])])
            .fail_test_for(0, 0);

        let result = Engine::new(&options(), &FakeFrontEnd, &factory)
            .run(&tree, |_| {})
            .unwrap();

        assert_eq!(statuses(&result), vec![MutantStatus::Killed]);
        assert_eq!(factory.tests_run_for(0), vec![0]);
        assert_eq!(result.mutants[0].record.tests_run, vec![0]);
    }

    #[test]
    fn test_disable_abort_runs_every_selected_test() {
        let tree = fake_tree(&[("src/lib.rs", "arithmetic")]);
        let factory = FakeFactory::new(3)
            .with_coverage(vec![covered(0, &[0]), covered(1, &[0]), covered(2, &[0])])
            .fail_test_for(0, 0);
        let options = EngineOptions {
            optimizations: OptimizationModes {
                disable_abort_test_on_kill: true,
                ..OptimizationModes::default()
            },
            ..options()
        };

        let result = Engine::new(&options, &FakeFrontEnd, &factory)
            .run(&tree, |_| {})
            .unwrap();
        assert_eq!(result.mutants[0].record.killing_tests, vec![0]);
        assert_eq!(factory.tests_run_for(0), vec![0, 1, 2]);
    }

    #[test]
    fn test_uncovered_mutant_never_executes() {
        let tree = fake_tree(&[("src/lib.rs", "arithmetic\nequality")]);
        let factory = FakeFactory::new(2).with_coverage(vec![covered(1, &[0])]);

        let result = Engine::new(&options(), &FakeFrontEnd, &factory)
            .run(&tree, |_| {})
            .unwrap();

        assert_eq!(
            statuses(&result),
            vec![MutantStatus::Survived, MutantStatus::NoCoverage]
        );
        assert!(!factory.prepared().contains(&1));
        assert_eq!(factory.tests_run_for(0), vec![1]);
        assert_eq!(result.executed, 1);
    }

    #[test]
    fn test_without_coverage_support_full_suite_runs() {
        let tree = fake_tree(&[("src/lib.rs", "arithmetic")]);
        let factory = FakeFactory::new(3);

        let result = Engine::new(&options(), &FakeFrontEnd, &factory)
            .run(&tree, |_| {})
            .unwrap();

        assert_eq!(statuses(&result), vec![MutantStatus::Survived]);
        assert_eq!(factory.tests_run_for(0), vec![0, 1, 2]);
        assert_eq!(factory.coverage_runs(), 1);
    }

    #[test]
    fn test_counts_cover_every_mutant() {
        let tree = fake_tree(&[
            ("src/a.rs", "arithmetic\nequality\nregex\n!string"),
            ("src/b.rs", "boolean\nlogical"),
        ]);
        let factory = FakeFactory::new(2)
            .with_coverage(vec![covered(0, &[0, 1, 3]), covered(1, &[0, 4])])
            .fail_test_for(0, 1)
            .with_behavior(4, FakeBehavior::CompileError);

        let result = Engine::new(&options(), &FakeFrontEnd, &factory)
            .run(&tree, |_| {})
            .unwrap();

        assert_eq!(
            statuses(&result),
            vec![
                MutantStatus::Killed,
                MutantStatus::Survived,
                MutantStatus::Ignored,
                MutantStatus::CompileError,
                MutantStatus::CompileError,
                MutantStatus::NoCoverage,
            ]
        );
        let counts = result.counts;
        assert_eq!(
            counts.killed
                + counts.survived
                + counts.no_coverage
                + counts.ignored
                + counts.compile_error
                + counts.timeout,
            result.mutants.len()
        );
        assert_eq!(counts.unfinished, 0);
        assert!((result.score() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_ignored_mutator_and_level() {
        let tree = fake_tree(&[("src/lib.rs", "string\nmath\narithmetic")]);
        let factory = FakeFactory::new(1);
        let options = EngineOptions {
            ignored_mutators: [crate::mutant::MutatorKind::String].into_iter().collect(),
            mutation_level: MutationLevel::Standard,
            ..options()
        };

        let result = Engine::new(&options, &FakeFrontEnd, &factory)
            .run(&tree, |_| {})
            .unwrap();
        assert_eq!(
            statuses(&result),
            vec![MutantStatus::Ignored, MutantStatus::Ignored, MutantStatus::Survived]
        );
        assert!(result.mutants[0].record.reason.as_deref().unwrap().contains("ignored"));
        assert!(factory.prepared().iter().all(|id| *id == 2));
    }

    #[test]
    fn test_mutate_filter_skips_files() {
        let tree = fake_tree(&[("src/lib.rs", "arithmetic"), ("src/gen/api.rs", "arithmetic")]);
        let factory = FakeFactory::new(1);
        let options = EngineOptions {
            mutate: FileFilter::from_patterns(&["src/**".to_string(), "!src/gen/**".to_string()])
                .unwrap(),
            ..options()
        };

        let result = Engine::new(&options, &FakeFrontEnd, &factory)
            .run(&tree, |_| {})
            .unwrap();
        assert_eq!(result.mutants.len(), 1);
        assert_eq!(result.mutants[0].mutant.file, PathBuf::from("src/lib.rs"));
    }

    #[test]
    fn test_initial_failure_is_fatal() {
        let tree = fake_tree(&[("src/lib.rs", "arithmetic")]);
        let factory = FakeFactory::new(2).with_initial_failure(1);

        let err = Engine::new(&options(), &FakeFrontEnd, &factory)
            .run(&tree, |_| {})
            .unwrap_err();
        match err {
            MutationError::InitialTestFailure { failed } => {
                assert_eq!(failed, vec!["tests::t1".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(factory.prepared().is_empty());
    }

    #[test]
    fn test_batching_respects_disable_test_mix() {
        let tree = fake_tree(&[("src/lib.rs", "arithmetic")]);

        let batched = FakeFactory::new(2).with_batching();
        Engine::new(&options(), &FakeFrontEnd, &batched)
            .run(&tree, |_| {})
            .unwrap();
        assert_eq!(batched.batches(), 1);

        let isolated = FakeFactory::new(2).with_batching();
        let options = EngineOptions {
            optimizations: OptimizationModes {
                disable_test_mix: true,
                ..OptimizationModes::default()
            },
            ..options()
        };
        Engine::new(&options, &FakeFrontEnd, &isolated)
            .run(&tree, |_| {})
            .unwrap();
        assert_eq!(isolated.batches(), 0);
        assert_eq!(isolated.tests_executed(), 2);
    }

    #[test]
    fn test_progress_reports_each_execution() {
        let tree = fake_tree(&[("src/lib.rs", "arithmetic\nequality\nlogical")]);
        let factory = FakeFactory::new(1).fail_test_for(1, 0);
        let mut finished = Vec::new();

        Engine::new(&options(), &FakeFrontEnd, &factory)
            .run(&tree, |completion| finished.push((completion.mutant, completion.status)))
            .unwrap();

        finished.sort_by_key(|(mutant, _)| *mutant);
        assert_eq!(
            finished,
            vec![
                (0, MutantStatus::Survived),
                (1, MutantStatus::Killed),
                (2, MutantStatus::Survived),
            ]
        );
    }

    #[test]
    fn test_baseline_rerun_executes_nothing() {
        let tree = fake_tree(&[("src/lib.rs", "arithmetic\nequality"), ("src/b.rs", "boolean")]);
        let store = MemoryBaselineStore::new();
        let diff = StaticDiff(ChangeSet::new());
        let options = incremental(false);

        let first_factory = FakeFactory::new(2).fail_test_for(1, 0);
        let first = Engine::new(&options, &FakeFrontEnd, &first_factory)
            .with_baseline_store(&store)
            .with_diff_provider(&diff)
            .run(&tree, |_| {})
            .unwrap();
        assert_eq!(first.executed, 3);
        assert!(store.get("shop/main").is_some());

        let second_factory = FakeFactory::new(2);
        let second = Engine::new(&options, &FakeFrontEnd, &second_factory)
            .with_baseline_store(&store)
            .with_diff_provider(&diff)
            .run(&tree, |_| {})
            .unwrap();

        assert_eq!(statuses(&second), statuses(&first));
        assert_eq!(second.executed, 0);
        assert_eq!(second.reused_from_baseline, 3);
        assert_eq!(second_factory.runners_created(), 0);
        assert_eq!(
            second.mutants.iter().map(|m| &m.mutant.fingerprint).collect::<Vec<_>>(),
            first.mutants.iter().map(|m| &m.mutant.fingerprint).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_changed_region_runs_again() {
        let tree = fake_tree(&[("src/lib.rs", "arithmetic\nequality")]);
        let store = MemoryBaselineStore::new();
        let options = incremental(false);

        let empty = StaticDiff(ChangeSet::new());
        Engine::new(&options, &FakeFrontEnd, &FakeFactory::new(1))
            .with_baseline_store(&store)
            .with_diff_provider(&empty)
            .run(&tree, |_| {})
            .unwrap();

        let mut changes = ChangeSet::new();
        changes.add_lines("src/lib.rs", 2, 2);
        let diff = StaticDiff(changes);
        let factory = FakeFactory::new(1).fail_test_for(1, 0);
        let result = Engine::new(&options, &FakeFrontEnd, &factory)
            .with_baseline_store(&store)
            .with_diff_provider(&diff)
            .run(&tree, |_| {})
            .unwrap();

        assert_eq!(
            statuses(&result),
            vec![MutantStatus::Survived, MutantStatus::Killed]
        );
        assert!(result.mutants[0].record.from_baseline);
        assert_eq!(factory.prepared(), vec![1]);
    }

    #[test]
    fn test_broken_baseline_degrades_to_full_run() {
        let tree = fake_tree(&[("src/lib.rs", "arithmetic")]);
        let store = MemoryBaselineStore::broken();
        let diff = StaticDiff(ChangeSet::new());
        let factory = FakeFactory::new(1);

        let result = Engine::new(&incremental(false), &FakeFrontEnd, &factory)
            .with_baseline_store(&store)
            .with_diff_provider(&diff)
            .run(&tree, |_| {})
            .unwrap();
        assert_eq!(result.executed, 1);
        assert_eq!(result.reused_from_baseline, 0);
    }

    #[test]
    fn test_required_baseline_missing_is_fatal() {
        let tree = fake_tree(&[("src/lib.rs", "arithmetic")]);
        let store = MemoryBaselineStore::new();
        let diff = StaticDiff(ChangeSet::new());

        let result = Engine::new(&incremental(true), &FakeFrontEnd, &FakeFactory::new(1))
            .with_baseline_store(&store)
            .with_diff_provider(&diff)
            .run(&tree, |_| {});
        assert!(matches!(result, Err(MutationError::BaselineNotFound { .. })));
    }

    #[test]
    fn test_since_without_baseline_ignores_unchanged_files() {
        let tree = fake_tree(&[("src/a.rs", "arithmetic"), ("src/b.rs", "arithmetic")]);
        let mut changes = ChangeSet::new();
        changes.add_file("src/b.rs");
        let diff = StaticDiff(changes);
        let options = EngineOptions {
            since: Some(SinceOptions {
                target: "main".to_string(),
                ignore_changes_in: FileFilter::none(),
            }),
            ..options()
        };

        let result = Engine::new(&options, &FakeFrontEnd, &FakeFactory::new(1))
            .with_diff_provider(&diff)
            .run(&tree, |_| {})
            .unwrap();
        assert_eq!(
            statuses(&result),
            vec![MutantStatus::Ignored, MutantStatus::Survived]
        );
    }
}
