//! Concurrent mutant execution
//!
//! A fixed pool of scoped worker threads drains a shared job queue. Each worker owns
//! one runner for its whole life and reports every terminal status back over a
//! channel, so the progress callback always runs on the calling thread.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{MutationError, Result};
use crate::mutant::{MutantId, MutantStatus};
use crate::optimizer::TestPlan;
use crate::registry::{ExecutionRecord, MutantRegistry};
use crate::runner::{
    run_one_by_one, CompileOutcome, MutantVariant, RunnerFactory, TestDescriptor, TestOutcome,
    TestRun, TestRunner, TestSuite,
};

/// One mutant ready to run
#[derive(Debug, Clone)]
pub struct Job {
    pub mutant: MutantId,
    pub plan: TestPlan,
    pub variant: MutantVariant,
}

/// Reported once per executed mutant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub mutant: MutantId,
    pub status: MutantStatus,
    pub worker: usize,
    /// Mutants finished so far, this one included
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub executed: usize,
    pub workers: usize,
    /// Highest number of mutants executing at the same moment
    pub max_in_flight: usize,
    /// Runners thrown away after a crash or failed restore
    pub runner_restarts: usize,
}

enum WorkerEvent {
    Finished {
        mutant: MutantId,
        status: MutantStatus,
        worker: usize,
    },
    RunnerLost {
        worker: usize,
        error: MutationError,
    },
}

#[derive(Default)]
struct InFlight {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl InFlight {
    fn enter(&self) -> InFlightGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(self)
    }
}

struct InFlightGuard<'a>(&'a InFlight);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Execution {
    status: MutantStatus,
    record: ExecutionRecord,
    /// Runner state can no longer be trusted
    runner_broken: bool,
}

pub struct Scheduler<'a> {
    factory: &'a dyn RunnerFactory,
    suite: &'a TestSuite,
    concurrency: usize,
    additional_timeout: Duration,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        factory: &'a dyn RunnerFactory,
        suite: &'a TestSuite,
        concurrency: usize,
        additional_timeout: Duration,
    ) -> Self {
        Self {
            factory,
            suite,
            concurrency: concurrency.max(1),
            additional_timeout,
        }
    }

    /// Execute every job, at most `concurrency` at a time.
    ///
    /// Returns an error only when no runner could be kept alive to finish the queue.
    pub fn run(
        &self,
        registry: &MutantRegistry,
        jobs: Vec<Job>,
        mut progress: impl FnMut(&Completion),
    ) -> Result<SchedulerStats> {
        let total = jobs.len();
        if total == 0 {
            return Ok(SchedulerStats::default());
        }

        let workers = self.concurrency.min(total);
        info!(mutants = total, workers, "executing mutants");

        let queue = Mutex::new(VecDeque::from(jobs));
        let in_flight = InFlight::default();
        let restarts = AtomicUsize::new(0);
        let (events, received) = mpsc::channel();
        let mut completed = 0;
        let mut lost = Vec::new();

        thread::scope(|scope| {
            for worker in 0..workers {
                let events = events.clone();
                let (queue, in_flight, restarts) = (&queue, &in_flight, &restarts);
                scope.spawn(move || {
                    self.worker_loop(worker, queue, registry, &events, in_flight, restarts)
                });
            }
            drop(events);

            for event in received {
                match event {
                    WorkerEvent::Finished {
                        mutant,
                        status,
                        worker,
                    } => {
                        completed += 1;
                        progress(&Completion {
                            mutant,
                            status,
                            worker,
                            completed,
                            total,
                        });
                    }
                    WorkerEvent::RunnerLost { worker, error } => {
                        warn!(worker, %error, "worker stopped without a runner");
                        lost.push(error);
                    }
                }
            }
        });

        let remaining = queue.lock().unwrap_or_else(|e| e.into_inner()).len();
        if remaining > 0 {
            let cause = lost
                .pop()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "workers exited early".to_string());
            return Err(MutationError::RunnerError {
                message: format!("{remaining} mutant(s) left unexecuted: {cause}"),
            });
        }

        Ok(SchedulerStats {
            executed: completed,
            workers,
            max_in_flight: in_flight.max.load(Ordering::SeqCst),
            runner_restarts: restarts.load(Ordering::SeqCst),
        })
    }

    fn worker_loop(
        &self,
        worker: usize,
        queue: &Mutex<VecDeque<Job>>,
        registry: &MutantRegistry,
        events: &Sender<WorkerEvent>,
        in_flight: &InFlight,
        restarts: &AtomicUsize,
    ) {
        let mut runner = match self.factory.create(worker) {
            Ok(runner) => runner,
            Err(error) => {
                let _ = events.send(WorkerEvent::RunnerLost { worker, error });
                return;
            }
        };

        loop {
            let Some(job) = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front() else {
                break;
            };
            let _slot = in_flight.enter();

            if let Err(e) = registry.set_status(job.mutant, MutantStatus::NotRun) {
                warn!(mutant = job.mutant, %e, "skipping mutant that is already settled");
                continue;
            }

            let started = Instant::now();
            let execution = panic::catch_unwind(AssertUnwindSafe(|| {
                self.execute(runner.as_mut(), &job)
            }))
            .unwrap_or_else(|payload| Execution {
                status: MutantStatus::Timeout,
                record: ExecutionRecord {
                    reason: Some(format!("runner panicked: {}", panic_message(&*payload))),
                    ..ExecutionRecord::default()
                },
                runner_broken: true,
            });

            let Execution {
                status,
                mut record,
                runner_broken,
            } = execution;
            record.duration = started.elapsed();

            let restored = panic::catch_unwind(AssertUnwindSafe(|| runner.restore()))
                .unwrap_or_else(|_| {
                    Err(MutationError::RunnerError {
                        message: "restore panicked".to_string(),
                    })
                });
            if let Err(e) = &restored {
                warn!(worker, mutant = job.mutant, %e, "failed to restore runner");
            }

            if let Err(e) = registry.complete(job.mutant, status, record) {
                warn!(mutant = job.mutant, %e, "dropping duplicate result");
            } else {
                debug!(worker, mutant = job.mutant, %status, "mutant finished");
                let _ = events.send(WorkerEvent::Finished {
                    mutant: job.mutant,
                    status,
                    worker,
                });
            }

            if runner_broken || restored.is_err() {
                restarts.fetch_add(1, Ordering::SeqCst);
                match self.factory.create(worker) {
                    Ok(fresh) => runner = fresh,
                    Err(error) => {
                        let _ = events.send(WorkerEvent::RunnerLost { worker, error });
                        return;
                    }
                }
            }
        }
    }

    fn execute(&self, runner: &mut dyn TestRunner, job: &Job) -> Execution {
        if let CompileOutcome::Failed(message) = runner.prepare(&job.variant) {
            return Execution {
                status: MutantStatus::CompileError,
                record: ExecutionRecord {
                    reason: Some(message),
                    ..ExecutionRecord::default()
                },
                runner_broken: false,
            };
        }

        let tests: Vec<&TestDescriptor> = job
            .plan
            .tests
            .iter()
            .filter_map(|id| self.suite.get(*id))
            .collect();
        let deadline = Instant::now() + job.plan.base_duration + self.additional_timeout;

        let runs = if job.plan.allow_batching && runner.supports_batching() {
            runner.run_batch(&tests, job.plan.abort_on_first_kill, deadline)
        } else {
            run_one_by_one(runner, &tests, job.plan.abort_on_first_kill, deadline)
        };
        classify(&runs)
    }
}

/// Turn test outcomes into a mutant status
fn classify(runs: &[TestRun]) -> Execution {
    let mut record = ExecutionRecord {
        tests_run: runs.iter().map(|r| r.test).collect(),
        killing_tests: runs
            .iter()
            .filter(|r| r.outcome == TestOutcome::Failed)
            .map(|r| r.test)
            .collect(),
        ..ExecutionRecord::default()
    };

    if !record.killing_tests.is_empty() {
        return Execution {
            status: MutantStatus::Killed,
            record,
            runner_broken: false,
        };
    }

    for run in runs {
        match &run.outcome {
            TestOutcome::Timeout => {
                record.reason = Some("exceeded time budget".to_string());
                return Execution {
                    status: MutantStatus::Timeout,
                    record,
                    runner_broken: false,
                };
            }
            TestOutcome::Crashed(message) => {
                record.reason = Some(format!("test runner crashed: {message}"));
                return Execution {
                    status: MutantStatus::Timeout,
                    record,
                    runner_broken: true,
                };
            }
            TestOutcome::Passed | TestOutcome::Failed => {}
        }
    }

    Execution {
        status: MutantStatus::Survived,
        record,
        runner_broken: false,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
