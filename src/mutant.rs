//! Mutant identity and static metadata

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::MutationError;

/// Run-local mutant identifier, assigned in registration order
pub type MutantId = usize;

/// Mutant families. Each kind belongs to one [`MutationLevel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MutatorKind {
    Arithmetic,
    Assignment,
    Block,
    Boolean,
    Checked,
    Equality,
    Initializer,
    Linq,
    Logical,
    Math,
    Regex,
    Statement,
    String,
    StringMethod,
    Unary,
    Update,
}

impl MutatorKind {
    pub const ALL: [MutatorKind; 16] = [
        MutatorKind::Arithmetic,
        MutatorKind::Assignment,
        MutatorKind::Block,
        MutatorKind::Boolean,
        MutatorKind::Checked,
        MutatorKind::Equality,
        MutatorKind::Initializer,
        MutatorKind::Linq,
        MutatorKind::Logical,
        MutatorKind::Math,
        MutatorKind::Regex,
        MutatorKind::Statement,
        MutatorKind::String,
        MutatorKind::StringMethod,
        MutatorKind::Unary,
        MutatorKind::Update,
    ];

    /// Lowest mutation level at which this kind is active
    pub fn level(self) -> MutationLevel {
        match self {
            MutatorKind::Arithmetic
            | MutatorKind::Block
            | MutatorKind::Equality
            | MutatorKind::Logical => MutationLevel::Basic,
            MutatorKind::Math | MutatorKind::Regex | MutatorKind::StringMethod => {
                MutationLevel::Advanced
            }
            _ => MutationLevel::Standard,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MutatorKind::Arithmetic => "arithmetic",
            MutatorKind::Assignment => "assignment",
            MutatorKind::Block => "block",
            MutatorKind::Boolean => "boolean",
            MutatorKind::Checked => "checked",
            MutatorKind::Equality => "equality",
            MutatorKind::Initializer => "initializer",
            MutatorKind::Linq => "linq",
            MutatorKind::Logical => "logical",
            MutatorKind::Math => "math",
            MutatorKind::Regex => "regex",
            MutatorKind::Statement => "statement",
            MutatorKind::String => "string",
            MutatorKind::StringMethod => "stringmethod",
            MutatorKind::Unary => "unary",
            MutatorKind::Update => "update",
        }
    }
}

impl fmt::Display for MutatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MutatorKind {
    type Err = MutationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace(['-', '_', ' '], "");
        MutatorKind::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| MutationError::UnknownMutator {
                name: s.to_string(),
            })
    }
}

/// How aggressive mutant generation is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationLevel {
    Basic,
    #[default]
    Standard,
    Advanced,
    Complete,
}

/// Line/column range of a mutated expression (1-indexed lines, 1-indexed columns)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl SourceSpan {
    pub fn overlaps_lines(&self, first: usize, last: usize) -> bool {
        self.start_line <= last && self.end_line >= first
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start_line, self.start_column)
    }
}

/// Durable identity of a mutant, stable across runs over unchanged source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(
        file: &Path,
        kind: MutatorKind,
        span: &SourceSpan,
        original: &str,
        replacement: &str,
    ) -> Self {
        let mut hasher = Sha256::new();
        // Normalise separators so fingerprints survive a platform switch.
        hasher.update(file.to_string_lossy().replace('\\', "/").as_bytes());
        hasher.update([0]);
        hasher.update(kind.name().as_bytes());
        hasher.update([0]);
        hasher.update(
            format!(
                "{}:{}-{}:{}",
                span.start_line, span.start_column, span.end_line, span.end_column
            )
            .as_bytes(),
        );
        hasher.update([0]);
        hasher.update(original.as_bytes());
        hasher.update([0]);
        hasher.update(replacement.as_bytes());
        Fingerprint(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a mutant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutantStatus {
    /// Generated, nothing decided yet
    Pending,
    /// Queued for execution
    NotRun,
    /// A test failed against the mutant
    Killed,
    /// Every selected test passed
    Survived,
    /// Exceeded its time budget, or the runner crashed
    Timeout,
    /// Mutated variant could not be built
    CompileError,
    /// Excluded by configuration, diff scope or mutation level
    Ignored,
    /// No test reaches the mutated code
    NoCoverage,
}

impl MutantStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, MutantStatus::Pending | MutantStatus::NotRun)
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            MutantStatus::Pending => 0,
            MutantStatus::NotRun => 1,
            MutantStatus::Killed => 2,
            MutantStatus::Survived => 3,
            MutantStatus::Timeout => 4,
            MutantStatus::CompileError => 5,
            MutantStatus::Ignored => 6,
            MutantStatus::NoCoverage => 7,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => MutantStatus::Pending,
            1 => MutantStatus::NotRun,
            2 => MutantStatus::Killed,
            3 => MutantStatus::Survived,
            4 => MutantStatus::Timeout,
            5 => MutantStatus::CompileError,
            6 => MutantStatus::Ignored,
            _ => MutantStatus::NoCoverage,
        }
    }
}

impl fmt::Display for MutantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MutantStatus::Pending => "pending",
            MutantStatus::NotRun => "not run",
            MutantStatus::Killed => "killed",
            MutantStatus::Survived => "survived",
            MutantStatus::Timeout => "timeout",
            MutantStatus::CompileError => "compile error",
            MutantStatus::Ignored => "ignored",
            MutantStatus::NoCoverage => "no coverage",
        };
        f.write_str(label)
    }
}

/// Static description of one mutant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutant {
    pub id: MutantId,
    pub fingerprint: Fingerprint,
    /// Path relative to the project root
    pub file: PathBuf,
    pub kind: MutatorKind,
    pub span: SourceSpan,
    pub original: String,
    pub replacement: String,
    /// Position of the site in the front end's enumeration order for this file
    pub site_index: usize,
}

impl Mutant {
    pub fn description(&self) -> String {
        format!(
            "{} -> {} at {}:{}",
            self.original,
            self.replacement,
            self.file.display(),
            self.span
        )
    }
}
