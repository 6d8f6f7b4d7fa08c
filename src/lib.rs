//! Mutation testing engine for Rust projects
//!
//! The engine parses a project into a component tree, generates mutants from
//! every mutation site, settles what it can without running anything (ignored
//! mutators, unchanged code under a baseline, uncovered mutants), and executes
//! the rest in parallel through per-worker test runners. The result is a mutation
//! score judged against configurable thresholds.
//!
//! # Example Configuration
//!
//! ```yaml
//! version: "1.0"
//! settings:
//!   concurrency: 4
//!   additional_timeout_ms: 5000
//!   mutation_level: standard
//!   thresholds:
//!     high: 80
//!     low: 60
//!     break: 50
//!   baseline:
//!     enabled: true
//!     project: my-service
//!     version: main
//! mutate:
//!   - "src/**/*.rs"
//!   - "!src/generated/**"
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use mutation_testing_engine::{
//!     discover_project, CargoRunnerFactory, Config, Engine, MutationReport, RustFrontEnd,
//! };
//! use std::path::Path;
//!
//! let config = Config::load(Path::new("mutations.yaml")).unwrap();
//! let options = config.resolve().unwrap();
//! let tree = discover_project(Path::new("."), &RustFrontEnd).unwrap();
//! let factory = CargoRunnerFactory::new(".");
//!
//! let result = Engine::new(&options, &RustFrontEnd, &factory)
//!     .run(&tree, |_| {})
//!     .unwrap();
//! MutationReport::new(&result).print();
//! std::process::exit(i32::from(result.exit_code()));
//! ```

pub mod aggregator;
pub mod baseline;
pub mod cargo;
pub mod codegen;
pub mod config;
pub mod coverage;
pub mod diff;
pub mod engine;
pub mod error;
pub mod frontend;
pub mod matcher;
pub mod mutant;
pub mod mutator;
pub mod optimizer;
pub mod project;
pub mod registry;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod tree;

#[cfg(test)]
mod fixtures;

// Re-export main types at crate root
pub use aggregator::{MutationRunResult, ScorePolicy, StatusCounts, ThresholdLevel, Thresholds};
pub use baseline::{BaselineProvider, BaselineStore, DiskBaselineStore};
pub use cargo::CargoRunnerFactory;
pub use codegen::RustFrontEnd;
pub use config::{Config, EngineOptions, Settings};
pub use diff::{DiffProvider, GitDiffProvider};
pub use engine::Engine;
pub use error::{MutationError, Result};
pub use frontend::SourceFrontEnd;
pub use mutant::{Mutant, MutantStatus, MutationLevel, MutatorKind};
pub use optimizer::OptimizationModes;
pub use project::discover_project;
pub use report::MutationReport;
pub use runner::{RunnerFactory, TestRunner};
pub use scheduler::Completion;
pub use tree::ComponentTree;
