//! Error types for the mutation engine

use std::path::PathBuf;
use thiserror::Error;

use crate::mutant::{MutantId, MutantStatus};

/// Errors that can occur during a mutation run
///
/// Only configuration, setup and initial-build failures escape [`crate::Engine::run`].
/// Everything that goes wrong for a single mutant is recorded as a status.
#[derive(Debug, Error)]
pub enum MutationError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// A mutate/ignore glob could not be compiled
    #[error("Invalid file pattern '{pattern}': {error}")]
    InvalidPattern { pattern: String, error: String },

    /// Mutator name not part of the known set
    #[error("Unknown mutator '{name}'")]
    UnknownMutator { name: String },

    /// Thresholds out of range or out of order
    #[error("Invalid thresholds: break ({break_at}) <= low ({low}) <= high ({high}) must hold, each within 0-100")]
    InvalidThresholds { high: u8, low: u8, break_at: u8 },

    /// The same relative path was added to the component tree twice
    #[error("Duplicate component '{}' in project tree", path.display())]
    DuplicateComponent { path: PathBuf },

    /// Failed to read source file
    #[error("Failed to read file '{}': {error}", file.display())]
    FileReadError { file: PathBuf, error: String },

    /// Source front end rejected a file
    #[error("Failed to parse '{}': {error}", file.display())]
    ParseError { file: PathBuf, error: String },

    /// Mutation could not be applied to the AST
    #[error("Failed to apply mutation: {reason}")]
    FailedToApply { reason: String },

    /// Project failed to build before any mutation was applied
    #[error("Initial build failed: {message}")]
    BuildError { message: String },

    /// Tests fail on the unmutated project
    #[error("Initial test run failed, {} test(s) failing: {}", failed.len(), failed.join(", "))]
    InitialTestFailure { failed: Vec<String> },

    /// A terminal status was already recorded for this mutant
    #[error("Invalid status transition for mutant {mutant}: {from:?} -> {to:?}")]
    InvalidTransition {
        mutant: MutantId,
        from: MutantStatus,
        to: MutantStatus,
    },

    /// No mutant with this id was registered
    #[error("Unknown mutant id {mutant}")]
    UnknownMutant { mutant: MutantId },

    /// Baseline could not be read or written
    #[error("Baseline '{key}' unusable: {error}")]
    BaselineError { key: String, error: String },

    /// Baseline missing while it was required
    #[error("Baseline '{key}' not found")]
    BaselineNotFound { key: String },

    /// Test runner failed outside a mutant execution window
    #[error("Test runner error: {message}")]
    RunnerError { message: String },

    /// Runner cannot collect coverage
    #[error("Coverage capture unsupported: {reason}")]
    CoverageUnsupported { reason: String },

    /// Changed files could not be determined
    #[error("Failed to compute diff: {message}")]
    DiffError { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for mutation operations
pub type Result<T> = std::result::Result<T, MutationError>;

impl MutationError {
    /// Whether the error ends the run; the rest only degrade one mutant or one
    /// optimization
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            MutationError::FailedToApply { .. } | MutationError::CoverageUnsupported { .. }
        )
    }
}
