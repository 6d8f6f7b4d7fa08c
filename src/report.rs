//! Console report for a finished mutation run

use colored::{ColoredString, Colorize};
use std::time::Duration;

use crate::aggregator::{MutationRunResult, ThresholdLevel};
use crate::mutant::MutantStatus;
use crate::registry::MutantSnapshot;

/// Printable view over a [`MutationRunResult`]
#[derive(Debug)]
pub struct MutationReport<'a> {
    result: &'a MutationRunResult,
}

impl<'a> MutationReport<'a> {
    pub fn new(result: &'a MutationRunResult) -> Self {
        Self { result }
    }

    /// Print the report to stdout
    pub fn print(&self) {
        let result = self.result;

        println!();
        println!("{}", "Mutation Testing Report".bold());
        println!("{}", "=".repeat(60));
        println!();

        for snapshot in &result.mutants {
            let mutant = &snapshot.mutant;
            println!(
                "{} {} - {} -> {}",
                status_tag(snapshot.status),
                format!("#{}", mutant.id).dimmed(),
                mutant.original,
                mutant.replacement
            );
            let mut detail = format!("{}:{} ({})", mutant.file.display(), mutant.span, mutant.kind);
            if snapshot.record.from_baseline {
                detail.push_str(" from baseline");
            }
            println!("        {}", detail.dimmed());
            if let Some(reason) = &snapshot.record.reason {
                println!("        {}", reason.dimmed());
            }
        }

        let counts = &result.counts;
        println!();
        println!("{}", "Summary".bold());
        println!("{}", "-".repeat(40));
        println!("Total mutants:     {}", counts.total());
        println!(
            "Killed:            {} {}",
            counts.killed,
            "(good - tests caught the mutation)".dimmed()
        );
        println!(
            "Survived:          {} {}",
            counts.survived,
            "(bad - tests missed the mutation)".dimmed()
        );
        if counts.timeout > 0 {
            println!("Timeouts:          {}", counts.timeout);
        }
        if counts.no_coverage > 0 {
            println!("No coverage:       {}", counts.no_coverage);
        }
        if counts.compile_error > 0 {
            println!("Compile errors:    {}", counts.compile_error);
        }
        if counts.ignored > 0 {
            println!("Ignored:           {}", counts.ignored);
        }
        if counts.unfinished > 0 {
            println!("Unfinished:        {}", counts.unfinished);
        }

        println!();
        println!("Executed:          {}", result.executed);
        if result.reused_from_baseline > 0 {
            println!("From baseline:     {}", result.reused_from_baseline);
        }
        println!("Mutation Score:    {}", self.colored_score());
        println!("Duration:          {}", format_duration(result.duration));

        let survivors: Vec<&MutantSnapshot> = result.survivors().collect();
        if !survivors.is_empty() {
            println!();
            println!(
                "{}",
                "Surviving Mutants (improve your tests!)".red().bold()
            );
            println!("{}", "-".repeat(40));
            for snapshot in survivors {
                let mutant = &snapshot.mutant;
                println!(
                    "  • {} -> {}",
                    mutant.original.yellow(),
                    mutant.replacement.yellow()
                );
                println!("    at {}:{}", mutant.file.display(), mutant.span);
            }
        }

        let thresholds = result.report.thresholds;
        println!();
        println!("{}", "Thresholds".dimmed());
        println!("{}", "-".repeat(40).dimmed());
        println!("{}", format!("high:  {}%", thresholds.high).dimmed());
        println!("{}", format!("low:   {}%", thresholds.low).dimmed());
        println!("{}", format!("break: {}%", thresholds.break_at).dimmed());
    }

    fn colored_score(&self) -> ColoredString {
        let text = format_score(self.result.score());
        match self.result.report.level() {
            ThresholdLevel::High => text.green().bold(),
            ThresholdLevel::Low => text.yellow().bold(),
            ThresholdLevel::Danger | ThresholdLevel::Break => text.red().bold(),
        }
    }
}

fn status_tag(status: MutantStatus) -> ColoredString {
    match status {
        MutantStatus::Killed => "[KILLED]".green().bold(),
        MutantStatus::Survived => "[SURVIVED]".red().bold(),
        MutantStatus::Timeout => "[TIMEOUT]".yellow().bold(),
        MutantStatus::CompileError => "[COMPILE ERROR]".yellow().bold(),
        MutantStatus::NoCoverage => "[NO COVERAGE]".red().bold(),
        MutantStatus::Ignored => "[IGNORED]".dimmed(),
        MutantStatus::Pending | MutantStatus::NotRun => "[NOT RUN]".dimmed(),
    }
}

/// Score as a percentage, or `n/a` when nothing was scorable
pub fn format_score(score: f64) -> String {
    if score.is_nan() {
        "n/a".to_string()
    } else {
        format!("{:.1}%", score * 100.0)
    }
}

/// Format duration in a human-readable way
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let mins = (secs / 60.0).floor();
        let remaining_secs = secs % 60.0;
        format!("{}m {:.0}s", mins, remaining_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_score() {
        assert_eq!(format_score(0.5), "50.0%");
        assert_eq!(format_score(1.0), "100.0%");
        assert_eq!(format_score(f64::NAN), "n/a");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    }
}
