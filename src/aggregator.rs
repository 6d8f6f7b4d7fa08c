//! Mutation score and threshold evaluation

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mutant::MutantStatus;
use crate::registry::MutantSnapshot;

/// Score cut-points in percent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub high: u8,
    pub low: u8,
    #[serde(rename = "break")]
    pub break_at: u8,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high: 80,
            low: 60,
            break_at: 0,
        }
    }
}

/// Which uninformative outcomes count as detected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorePolicy {
    pub timeout_as_killed: bool,
    pub compile_error_as_killed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdLevel {
    High,
    Low,
    Danger,
    Break,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub killed: usize,
    pub survived: usize,
    pub timeout: usize,
    pub compile_error: usize,
    pub ignored: usize,
    pub no_coverage: usize,
    /// Pending or NotRun; zero after a complete run
    pub unfinished: usize,
}

impl StatusCounts {
    pub fn tally<'a>(statuses: impl IntoIterator<Item = &'a MutantStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            match status {
                MutantStatus::Killed => counts.killed += 1,
                MutantStatus::Survived => counts.survived += 1,
                MutantStatus::Timeout => counts.timeout += 1,
                MutantStatus::CompileError => counts.compile_error += 1,
                MutantStatus::Ignored => counts.ignored += 1,
                MutantStatus::NoCoverage => counts.no_coverage += 1,
                MutantStatus::Pending | MutantStatus::NotRun => counts.unfinished += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.killed
            + self.survived
            + self.timeout
            + self.compile_error
            + self.ignored
            + self.no_coverage
            + self.unfinished
    }

    /// `detected / (detected + survived)`, NaN when nothing is informative
    pub fn score(&self, policy: &ScorePolicy) -> f64 {
        let mut detected = self.killed;
        if policy.timeout_as_killed {
            detected += self.timeout;
        }
        if policy.compile_error_as_killed {
            detected += self.compile_error;
        }
        let denominator = detected + self.survived;
        if denominator == 0 {
            return f64::NAN;
        }
        detected as f64 / denominator as f64
    }
}

const PERCENT_PRECISION: f64 = 1e6;

/// A score judged against thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreReport {
    /// Fraction in 0..=1, or NaN
    pub score: f64,
    pub thresholds: Thresholds,
}

impl ScoreReport {
    pub fn new(score: f64, thresholds: Thresholds) -> Self {
        Self { score, thresholds }
    }

    /// Score in percent, rounded to a millionth so that ratios landing exactly on a
    /// cut-point compare equal to it (0.57 * 100.0 is 56.99999999999999)
    pub fn percent(&self) -> f64 {
        (self.score * 100.0 * PERCENT_PRECISION).round() / PERCENT_PRECISION
    }

    pub fn level(&self) -> ThresholdLevel {
        if self.score.is_nan() {
            return ThresholdLevel::High;
        }
        let percent = self.percent();
        if percent >= f64::from(self.thresholds.high) {
            ThresholdLevel::High
        } else if percent >= f64::from(self.thresholds.low) {
            ThresholdLevel::Low
        } else if percent >= f64::from(self.thresholds.break_at) {
            ThresholdLevel::Danger
        } else {
            ThresholdLevel::Break
        }
    }

    /// 1 when the score is below Break, 0 otherwise (NaN never breaks)
    pub fn exit_code(&self) -> u8 {
        match self.level() {
            ThresholdLevel::Break => 1,
            _ => 0,
        }
    }
}

/// Final outcome of a mutation run
#[derive(Debug, Clone)]
pub struct MutationRunResult {
    pub mutants: Vec<MutantSnapshot>,
    pub counts: StatusCounts,
    pub report: ScoreReport,
    pub policy: ScorePolicy,
    /// Mutants whose status was reused from the baseline
    pub reused_from_baseline: usize,
    /// Mutants handed to the scheduler
    pub executed: usize,
    pub duration: Duration,
}

impl MutationRunResult {
    pub fn new(
        mutants: Vec<MutantSnapshot>,
        thresholds: Thresholds,
        policy: ScorePolicy,
        duration: Duration,
    ) -> Self {
        let counts = StatusCounts::tally(mutants.iter().map(|m| &m.status));
        let report = ScoreReport::new(counts.score(&policy), thresholds);
        let reused_from_baseline = mutants.iter().filter(|m| m.record.from_baseline).count();
        Self {
            mutants,
            counts,
            report,
            policy,
            reused_from_baseline,
            executed: 0,
            duration,
        }
    }

    pub fn score(&self) -> f64 {
        self.report.score
    }

    pub fn exit_code(&self) -> u8 {
        self.report.exit_code()
    }

    pub fn survivors(&self) -> impl Iterator<Item = &MutantSnapshot> {
        self.mutants
            .iter()
            .filter(|m| m.status == MutantStatus::Survived)
    }
}
