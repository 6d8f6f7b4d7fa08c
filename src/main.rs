//! CLI for the mutation testing engine

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use mutation_testing_engine::config::{FileFilter, SinceOptions};
use mutation_testing_engine::{
    discover_project, BaselineProvider, BaselineStore, CargoRunnerFactory, Completion, Config,
    DiskBaselineStore, Engine, EngineOptions, GitDiffProvider, MutationError, MutationReport,
    RustFrontEnd,
};

/// Exit code for setup failures that stop a run before it is scored
const EXIT_FATAL: u8 = 2;

#[derive(Parser)]
#[command(name = "mutation-testing-engine")]
#[command(author, version, about = "Coverage-driven mutation testing for Rust", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run mutation tests
    Run {
        /// Path to the mutations config file
        #[arg(short, long, default_value = "mutations.yaml")]
        config: PathBuf,

        /// Project directory (defaults to current directory)
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Enable verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Only test mutants in code changed since this git reference
        #[arg(long)]
        since: Option<String>,

        /// Fail when the mutation score drops below this percentage
        #[arg(long = "break-at")]
        break_at: Option<u8>,
    },

    /// Validate configuration without running tests
    Validate {
        /// Path to the mutations config file
        #[arg(short, long, default_value = "mutations.yaml")]
        config: PathBuf,
    },

    /// Show example configuration
    Example,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            project,
            verbose,
            since,
            break_at,
        } => {
            init_logging(verbose);
            let project_dir = project.unwrap_or_else(|| PathBuf::from("."));
            match run_mutations(&config, &project_dir, since, break_at) {
                Ok(code) => ExitCode::from(code),
                Err(e) => {
                    eprintln!("{}: {:#}", "Error".red().bold(), e);
                    ExitCode::from(EXIT_FATAL)
                }
            }
        }

        Commands::Validate { config } => validate_config(&config),

        Commands::Example => {
            print_example();
            ExitCode::SUCCESS
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve the config file, reporting every problem it has
fn load_options(config_path: &Path) -> anyhow::Result<EngineOptions> {
    let config = Config::load(config_path)?;
    config.resolve().map_err(|errors| {
        let lines: Vec<String> = errors.iter().map(|e| format!("  • {e}")).collect();
        anyhow::anyhow!("Configuration errors found:\n{}", lines.join("\n"))
    })
}

fn run_mutations(
    config_path: &Path,
    project_dir: &Path,
    since: Option<String>,
    break_at: Option<u8>,
) -> anyhow::Result<u8> {
    println!("{}", "Loading configuration...".dimmed());
    let mut options = load_options(config_path)?;

    if let Some(target) = since {
        match options.since.as_mut() {
            Some(existing) => existing.target = target,
            None => {
                options.since = Some(SinceOptions {
                    target,
                    ignore_changes_in: FileFilter::none(),
                })
            }
        }
    }
    if let Some(break_at) = break_at {
        let thresholds = options.thresholds;
        if break_at > thresholds.low {
            return Err(MutationError::InvalidThresholds {
                high: thresholds.high,
                low: thresholds.low,
                break_at,
            }
            .into());
        }
        options.thresholds.break_at = break_at;
    }

    let disk_store = match &options.baseline {
        Some(baseline) => match baseline.provider {
            BaselineProvider::Disk => Some(DiskBaselineStore::new(project_dir.join(&baseline.location))),
            other => bail!("Baseline provider {other:?} is not available from the command line"),
        },
        None => None,
    };

    println!("{}", "Discovering project...".dimmed());
    let front_end = RustFrontEnd;
    let tree = discover_project(project_dir, &front_end)
        .with_context(|| format!("Failed to read project '{}'", project_dir.display()))?;
    println!("Found {} source file(s)", tree.file_count());

    let factory = CargoRunnerFactory::new(project_dir);
    let diff = GitDiffProvider::new(project_dir);
    let mut engine = Engine::new(&options, &front_end, &factory).with_diff_provider(&diff);
    if let Some(store) = &disk_store {
        engine = engine.with_baseline_store(store as &dyn BaselineStore);
    }

    println!("{}", "Running mutation tests...".green());
    let result = engine.run(&tree, print_progress)?;

    MutationReport::new(&result).print();
    Ok(result.exit_code())
}

fn print_progress(completion: &Completion) {
    println!(
        "{} mutant #{} {} (worker {})",
        format!("[{}/{}]", completion.completed, completion.total).dimmed(),
        completion.mutant,
        completion.status,
        completion.worker
    );
}

fn validate_config(config_path: &Path) -> ExitCode {
    println!("{}", "Loading configuration...".dimmed());
    let config = match Config::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    match config.validate() {
        Ok(()) => {
            println!("{} Configuration is valid!", "✓".green().bold());
            ExitCode::SUCCESS
        }
        Err(errors) => {
            for error in &errors {
                println!("{} {}", "✗".red(), error);
            }
            println!();
            println!(
                "{} {} configuration error(s)",
                "✗".red().bold(),
                errors.len()
            );
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn print_example() {
    let example = r#"# Example mutations.yaml configuration file
version: "1.0"

settings:
  concurrency: 4            # defaults to half the available cores
  additional_timeout_ms: 5000
  mutation_level: standard  # basic | standard | advanced | complete
  ignore_mutations:
    - string
    - linq

  optimizations:
    skip_uncovered_mutants: true
    coverage_based_test: true
    disable_abort_test_on_kill: false
    capture_coverage_per_test: true
    disable_test_mix: false

  thresholds:
    high: 80
    low: 60
    break: 50               # exit code 1 below this score

  score:
    timeout_as_killed: false
    compile_error_as_killed: false

  # Reuse results from the last run for code that did not change
  baseline:
    enabled: true
    provider: disk
    project: my-service
    version: main
    location: .stryker/baselines

  since:
    target: main
    ignore_changes_in:
      - "docs/**"

mutate:
  - "src/**/*.rs"
  - "!src/generated/**"
"#;

    println!("{}", example);
}
