//! Configuration file parsing for mutation runs

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;

use crate::aggregator::{ScorePolicy, Thresholds};
use crate::baseline::{baseline_key, BaselineProvider};
use crate::error::MutationError;
use crate::mutant::{MutationLevel, MutatorKind};
use crate::optimizer::OptimizationModes;

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub settings: Settings,
    /// Globs of files to mutate; `!` prefix excludes
    #[serde(default)]
    pub mutate: Vec<String>,
}

/// Global settings for mutation runs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum concurrent test runners
    pub concurrency: Option<usize>,
    /// Added to the expected test time of every mutant
    pub additional_timeout_ms: u64,
    pub mutation_level: MutationLevel,
    /// Mutator names to leave out
    pub ignore_mutations: Vec<String>,
    pub optimizations: OptimizationModes,
    pub thresholds: Thresholds,
    pub score: ScorePolicy,
    pub baseline: BaselineSettings,
    pub since: SinceSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: None,
            additional_timeout_ms: 5000,
            mutation_level: MutationLevel::default(),
            ignore_mutations: Vec::new(),
            optimizations: OptimizationModes::default(),
            thresholds: Thresholds::default(),
            score: ScorePolicy::default(),
            baseline: BaselineSettings::default(),
            since: SinceSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BaselineSettings {
    pub enabled: bool,
    /// `disk`, `dashboard` or `azurefilestorage`
    pub provider: Option<String>,
    pub project: String,
    pub version: String,
    /// Root folder of the disk provider
    pub location: PathBuf,
    /// Fail instead of falling back to a full run when no baseline loads
    pub required: bool,
}

impl Default for BaselineSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: None,
            project: "project".to_string(),
            version: "main".to_string(),
            location: PathBuf::from(".stryker").join("baselines"),
            required: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinceSettings {
    pub enabled: bool,
    /// Git reference to diff against
    pub target: String,
    /// Changes in matching files never put mutants back in scope
    pub ignore_changes_in: Vec<String>,
}

impl Default for SinceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            target: "main".to_string(),
            ignore_changes_in: Vec::new(),
        }
    }
}

/// Include/exclude glob filter over project-relative paths
#[derive(Debug, Clone)]
pub struct FileFilter {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl FileFilter {
    /// Accept every path
    pub fn all() -> Self {
        Self {
            include: None,
            exclude: GlobSet::empty(),
        }
    }

    /// Reject every path
    pub fn none() -> Self {
        Self {
            include: Some(GlobSet::empty()),
            exclude: GlobSet::empty(),
        }
    }

    pub fn from_patterns(patterns: &[String]) -> Result<Self, Vec<MutationError>> {
        let mut include = GlobSetBuilder::new();
        let mut exclude = GlobSetBuilder::new();
        let mut has_include = false;
        let mut errors = Vec::new();

        for raw in patterns {
            let trimmed = raw.trim();
            let (negated, body) = match trimmed.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, trimmed),
            };
            let body = body.strip_prefix("./").unwrap_or(body);
            match Glob::new(body) {
                Ok(glob) if negated => {
                    exclude.add(glob);
                }
                Ok(glob) => {
                    has_include = true;
                    include.add(glob);
                }
                Err(e) => errors.push(MutationError::InvalidPattern {
                    pattern: raw.clone(),
                    error: e.to_string(),
                }),
            }
        }

        let include = if has_include {
            Some(build_set(include, &mut errors))
        } else {
            None
        };
        let exclude = build_set(exclude, &mut errors);

        if errors.is_empty() {
            Ok(Self { include, exclude })
        } else {
            Err(errors)
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        let included = self.include.as_ref().map_or(true, |set| set.is_match(path));
        included && !self.exclude.is_match(path)
    }
}

fn build_set(builder: GlobSetBuilder, errors: &mut Vec<MutationError>) -> GlobSet {
    builder.build().unwrap_or_else(|e| {
        errors.push(MutationError::InvalidPattern {
            pattern: e.glob().unwrap_or_default().to_string(),
            error: e.to_string(),
        });
        GlobSet::empty()
    })
}

#[derive(Debug, Clone)]
pub struct BaselineOptions {
    pub provider: BaselineProvider,
    pub key: String,
    pub location: PathBuf,
    pub required: bool,
}

#[derive(Debug, Clone)]
pub struct SinceOptions {
    pub target: String,
    pub ignore_changes_in: FileFilter,
}

/// Validated configuration consumed by the engine
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub concurrency: usize,
    pub additional_timeout: Duration,
    pub mutate: FileFilter,
    pub mutation_level: MutationLevel,
    pub ignored_mutators: BTreeSet<MutatorKind>,
    pub optimizations: OptimizationModes,
    pub thresholds: Thresholds,
    pub score_policy: ScorePolicy,
    pub baseline: Option<BaselineOptions>,
    pub since: Option<SinceOptions>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            additional_timeout: Duration::from_millis(5000),
            mutate: FileFilter::all(),
            mutation_level: MutationLevel::default(),
            ignored_mutators: BTreeSet::new(),
            optimizations: OptimizationModes::default(),
            thresholds: Thresholds::default(),
            score_policy: ScorePolicy::default(),
            baseline: None,
            since: None,
        }
    }
}

impl EngineOptions {
    /// Whether mutants of `kind` are generated for execution
    pub fn is_active(&self, kind: MutatorKind) -> bool {
        kind.level() <= self.mutation_level && !self.ignored_mutators.contains(&kind)
    }
}

/// Half the available cores, never less than one
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| (n.get() / 2).max(1))
        .unwrap_or(1)
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self, MutationError> {
        let content = std::fs::read_to_string(path).map_err(|e| MutationError::ConfigError {
            message: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;

        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| MutationError::ConfigError {
                message: format!("Failed to parse config file '{}': {}", path.display(), e),
            })?;

        Ok(config)
    }

    /// Validate the configuration without building anything
    pub fn validate(&self) -> Result<(), Vec<MutationError>> {
        self.resolve().map(|_| ())
    }

    /// Check every setting and produce engine options, reporting all problems at once
    pub fn resolve(&self) -> Result<EngineOptions, Vec<MutationError>> {
        let settings = &self.settings;
        let mut errors = Vec::new();

        let concurrency = match settings.concurrency {
            Some(0) => {
                errors.push(MutationError::ConfigError {
                    message: "concurrency must be at least 1".to_string(),
                });
                1
            }
            Some(n) => n,
            None => default_concurrency(),
        };

        let t = settings.thresholds;
        if t.high > 100 || t.break_at > t.low || t.low > t.high {
            errors.push(MutationError::InvalidThresholds {
                high: t.high,
                low: t.low,
                break_at: t.break_at,
            });
        }

        let mut ignored_mutators = BTreeSet::new();
        for name in &settings.ignore_mutations {
            match name.parse::<MutatorKind>() {
                Ok(kind) => {
                    ignored_mutators.insert(kind);
                }
                Err(e) => errors.push(e),
            }
        }

        let mutate = FileFilter::from_patterns(&self.mutate).unwrap_or_else(|mut e| {
            errors.append(&mut e);
            FileFilter::all()
        });

        let baseline = if settings.baseline.enabled {
            match BaselineProvider::parse(settings.baseline.provider.as_deref()) {
                Ok(provider) => Some(BaselineOptions {
                    provider,
                    key: baseline_key(&settings.baseline.project, &settings.baseline.version),
                    location: settings.baseline.location.clone(),
                    required: settings.baseline.required,
                }),
                Err(e) => {
                    errors.push(e);
                    None
                }
            }
        } else {
            None
        };

        // A baseline comparison is always a diff run.
        let since = if settings.since.enabled || baseline.is_some() {
            let ignore_changes_in = if settings.since.ignore_changes_in.is_empty() {
                FileFilter::none()
            } else {
                FileFilter::from_patterns(&settings.since.ignore_changes_in).unwrap_or_else(
                    |mut e| {
                        errors.append(&mut e);
                        FileFilter::all()
                    },
                )
            };
            Some(SinceOptions {
                target: settings.since.target.clone(),
                ignore_changes_in,
            })
        } else {
            None
        };

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(EngineOptions {
            concurrency,
            additional_timeout: Duration::from_millis(settings.additional_timeout_ms),
            mutate,
            mutation_level: settings.mutation_level,
            ignored_mutators,
            optimizations: settings.optimizations,
            thresholds: settings.thresholds,
            score_policy: settings.score,
            baseline,
            since,
        })
    }
}
