//! Stored baselines and incremental reconciliation
//!
//! A baseline is the previous run's mutant list keyed by fingerprint. Mutants whose
//! code is outside the current diff take their status from it instead of running.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::diff::ChangeSet;
use crate::error::{MutationError, Result};
use crate::mutant::{Fingerprint, MutantStatus, MutatorKind, SourceSpan};
use crate::registry::{ExecutionRecord, MutantRegistry, MutantSnapshot};

const REPORT_SCHEMA: u32 = 1;

/// Where baselines are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineProvider {
    Disk,
    Dashboard,
    AzureFileStorage,
}

impl BaselineProvider {
    /// Parse a user-supplied provider name; `None` selects disk
    pub fn parse(supplied: Option<&str>) -> Result<Self> {
        let Some(name) = supplied else {
            return Ok(BaselineProvider::Disk);
        };
        match name.trim().to_ascii_lowercase().as_str() {
            "disk" => Ok(BaselineProvider::Disk),
            "dashboard" => Ok(BaselineProvider::Dashboard),
            "azurefilestorage" => Ok(BaselineProvider::AzureFileStorage),
            _ => Err(MutationError::ConfigError {
                message: format!("Baseline storage provider '{name}' does not exist"),
            }),
        }
    }
}

/// Storage key for a project's baseline at a given version label
pub fn baseline_key(project: &str, version: &str) -> String {
    format!("{}/{}", sanitize(project), sanitize(version))
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineMutant {
    pub fingerprint: Fingerprint,
    pub file: PathBuf,
    pub kind: MutatorKind,
    pub span: SourceSpan,
    pub status: MutantStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A prior run's mutant report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineReport {
    pub schema: u32,
    pub mutants: Vec<BaselineMutant>,
}

impl BaselineReport {
    pub fn from_snapshot(mutants: &[MutantSnapshot]) -> Self {
        Self {
            schema: REPORT_SCHEMA,
            mutants: mutants
                .iter()
                .map(|m| BaselineMutant {
                    fingerprint: m.mutant.fingerprint.clone(),
                    file: m.mutant.file.clone(),
                    kind: m.mutant.kind,
                    span: m.mutant.span,
                    status: m.status,
                    reason: m.record.reason.clone(),
                })
                .collect(),
        }
    }

    fn index(&self) -> HashMap<&Fingerprint, &BaselineMutant> {
        self.mutants.iter().map(|m| (&m.fingerprint, m)).collect()
    }
}

/// Opaque baseline storage
pub trait BaselineStore {
    /// `Ok(None)` when nothing is stored under `key`
    fn load(&self, key: &str) -> Result<Option<BaselineReport>>;
    fn store(&self, key: &str, report: &BaselineReport) -> Result<()>;
}

/// JSON files under a root folder
pub struct DiskBaselineStore {
    root: PathBuf,
}

impl DiskBaselineStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl BaselineStore for DiskBaselineStore {
    fn load(&self, key: &str) -> Result<Option<BaselineReport>> {
        let path = self.path_for(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(MutationError::BaselineError {
                    key: key.to_string(),
                    error: e.to_string(),
                })
            }
        };
        let report: BaselineReport =
            serde_json::from_str(&content).map_err(|e| MutationError::BaselineError {
                key: key.to_string(),
                error: e.to_string(),
            })?;
        if report.schema != REPORT_SCHEMA {
            return Err(MutationError::BaselineError {
                key: key.to_string(),
                error: format!("unsupported schema {}", report.schema),
            });
        }
        Ok(Some(report))
    }

    fn store(&self, key: &str, report: &BaselineReport) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(report).map_err(|e| MutationError::BaselineError {
            key: key.to_string(),
            error: e.to_string(),
        })?;
        fs::write(&path, json)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Statuses copied from the baseline
    pub reused: usize,
    /// Ignored because they are outside the diff and no baseline covers them
    pub out_of_diff: usize,
    /// Left pending for execution
    pub to_execute: usize,
    /// Baseline entries with no counterpart in this run
    pub dropped: usize,
}

/// Settle every pending mutant that the diff does not touch.
///
/// With a baseline, an unchanged mutant found by fingerprint inherits its terminal
/// status; without one it is ignored as out of scope. Changed or unknown mutants stay
/// pending so the scheduler runs them.
pub fn reconcile(
    registry: &MutantRegistry,
    baseline: Option<&BaselineReport>,
    changes: &ChangeSet,
) -> Result<ReconcileSummary> {
    let index = baseline.map(BaselineReport::index).unwrap_or_default();
    let mut summary = ReconcileSummary::default();
    let mut matched = 0;

    for mutant in registry.mutants() {
        if registry.status(mutant.id)? != MutantStatus::Pending {
            continue;
        }
        let previous = index.get(&mutant.fingerprint);
        if previous.is_some() {
            matched += 1;
        }
        if changes.touches(&mutant.file, &mutant.span) {
            summary.to_execute += 1;
            continue;
        }

        match (baseline, previous) {
            (Some(_), Some(previous)) if previous.status.is_terminal() => {
                registry.complete(
                    mutant.id,
                    previous.status,
                    ExecutionRecord {
                        reason: previous.reason.clone(),
                        from_baseline: true,
                        ..ExecutionRecord::default()
                    },
                )?;
                summary.reused += 1;
            }
            (Some(_), _) => summary.to_execute += 1,
            (None, _) => {
                registry.complete(
                    mutant.id,
                    MutantStatus::Ignored,
                    ExecutionRecord {
                        reason: Some("Mutant not in diff".to_string()),
                        ..ExecutionRecord::default()
                    },
                )?;
                summary.out_of_diff += 1;
            }
        }
    }

    if let Some(baseline) = baseline {
        summary.dropped = baseline.mutants.len().saturating_sub(matched);
        debug!(dropped = summary.dropped, "baseline mutants without counterpart");
    }
    info!(
        reused = summary.reused,
        out_of_diff = summary.out_of_diff,
        to_execute = summary.to_execute,
        "reconciled mutants against diff"
    );
    Ok(summary)
}
