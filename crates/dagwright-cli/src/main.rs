use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use anyhow::Result;
use std::path::PathBuf;
use std::process::ExitCode;

use dagwright_core::{
    AssertionStatus, Diagnostic, ModelStatus, ProjectConfig, RunReport, Severity,
};
use dagwright_engine::{CancellationToken, EngineError, Pipeline, RunOptions};
use dagwright_project::{Project, ProjectError};
use dagwright_store::{load_detections_csv, load_messages_json, LoadError};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Some model failed or was skipped, or an assertion did not pass
const EXIT_FAILURES: u8 = 1;

/// The project could not be loaded, resolved, compiled or connected
const EXIT_CONFIG: u8 = 2;

/// Sample rows printed per failing assertion
const PRINTED_SAMPLES: usize = 3;

/// dagwright - dependency-ordered SQL transformations
#[derive(Parser)]
#[command(name = "dagwright")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project directory containing dagwright.toml
    #[arg(long, global = true, default_value = ".")]
    project_dir: PathBuf,

    /// Directory for compiled SQL and run results (overrides target-path)
    #[arg(long, global = true)]
    target_path: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build models in dependency order
    Run(BuildArgs),

    /// Run assertions against the current relations
    Test {
        /// Only assertions on these models (same selectors as `run`)
        #[arg(short, long, num_args = 1..)]
        select: Vec<String>,
    },

    /// Build models, then run assertions
    Build(BuildArgs),

    /// Render models and assertions to target/compiled
    Compile,

    /// List models in execution order
    Ls {
        #[arg(short, long, num_args = 1..)]
        select: Vec<String>,
    },

    /// Load scraped messages and detection results into the raw sources
    Load {
        /// JSON files or directories of message files
        #[arg(long, num_args = 1..)]
        messages: Vec<PathBuf>,

        /// Detection results CSV
        #[arg(long)]
        detections: Option<PathBuf>,
    },

    /// Show the resolved configuration and test the store connection
    Debug,
}

#[derive(Args, Debug, Clone)]
struct BuildArgs {
    /// Models to build: `name`, `+name` (with ancestors), `name+` (with descendants)
    #[arg(short, long, num_args = 1..)]
    select: Vec<String>,

    /// Rebuild incremental tables from scratch
    #[arg(long)]
    full_refresh: bool,

    /// Maximum number of models built at once (overrides target.threads)
    #[arg(long)]
    threads: Option<usize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    // Project-local .env first, then the working directory's
    dotenvy::from_path(cli.project_dir.join(".env")).ok();
    dotenvy::dotenv().ok();

    match execute(&cli).await {
        Ok(code) => code,
        Err(e) => {
            match e.downcast_ref::<EngineError>() {
                Some(engine_error) => print_diagnostic(&engine_error.to_diagnostic()),
                None => eprintln!("{} {:#}", "Error:".red().bold(), e),
            }
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn execute(cli: &Cli) -> Result<ExitCode> {
    tracing::info!(project_dir = %cli.project_dir.display(), "dagwright starting");

    match &cli.command {
        Commands::Run(args) => build_command(cli, args, false).await,
        Commands::Build(args) => build_command(cli, args, true).await,
        Commands::Test { select } => test_command(cli, select).await,
        Commands::Compile => compile_command(cli).await,
        Commands::Ls { select } => ls_command(cli, select),
        Commands::Load { messages, detections } => {
            load_command(cli, messages, detections.as_ref()).await
        }
        Commands::Debug => debug_command(cli).await,
    }
}

/// Read dagwright.toml and discover models, honouring `--target-path`
fn load_project(cli: &Cli) -> Result<Project, EngineError> {
    let config_path = cli.project_dir.join(ProjectConfig::FILE_NAME);
    let mut config = ProjectConfig::from_file(&config_path).map_err(ProjectError::from)?;

    if let Some(target_path) = &cli.target_path {
        config.target_path = target_path.clone();
    }

    Ok(Project::from_config(config)?)
}

async fn open_pipeline(cli: &Cli) -> Result<Pipeline, EngineError> {
    let project = load_project(cli)?;

    if cli.verbose {
        eprintln!(
            "{} {} ({})",
            "Connecting to".cyan(),
            project.config().target.name,
            project.config().target.dialect
        );
    }

    Pipeline::connect(project).await
}

/// Run/build command - materialize the DAG, optionally followed by assertions
async fn build_command(cli: &Cli, args: &BuildArgs, with_assertions: bool) -> Result<ExitCode> {
    let pipeline = open_pipeline(cli).await?;

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Cancelling: waiting for running models to finish...".yellow());
            watcher.cancel();
        }
    });

    let options = RunOptions {
        select: args.select.clone(),
        full_refresh: args.full_refresh,
        threads: args.threads,
        cancel,
    };

    if cli.verbose {
        eprintln!(
            "{} {} models",
            "Building".cyan(),
            pipeline.graph().execution_order().len()
        );
    }

    let report = if with_assertions {
        pipeline.build(&options).await?
    } else {
        pipeline.run(&options).await?
    };

    finish(&pipeline, &report, cli.verbose)
}

/// Test command - run assertions only
async fn test_command(cli: &Cli, select: &[String]) -> Result<ExitCode> {
    let pipeline = open_pipeline(cli).await?;

    if cli.verbose {
        eprintln!(
            "{} {} assertions",
            "Running".cyan(),
            pipeline.compiled().assertions().len()
        );
    }

    let report = pipeline.test(select).await?;
    finish(&pipeline, &report, cli.verbose)
}

/// Save run_results.json, print the summary and pick the exit code
fn finish(pipeline: &Pipeline, report: &RunReport, verbose: bool) -> Result<ExitCode> {
    let path = pipeline.run_results_path();
    report.save_to_file(&path)?;

    if verbose {
        eprintln!("{} {}", "Run results saved to:".green(), path.display());
    }

    print_run_summary(report);

    if report.has_failures() {
        Ok(ExitCode::from(EXIT_FAILURES))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Compile command - write rendered SQL without building anything
async fn compile_command(cli: &Cli) -> Result<ExitCode> {
    let pipeline = open_pipeline(cli).await?;
    let written = pipeline.write_compiled()?;

    if cli.verbose {
        for path in &written {
            eprintln!("  {} {}", "Wrote".cyan(), path.display());
        }
    }

    println!(
        "{} Compiled {} models and {} assertions into {}",
        "✓".green(),
        pipeline.graph().execution_order().len(),
        pipeline.compiled().assertions().len(),
        pipeline.project().target_dir().join("compiled").display()
    );

    Ok(ExitCode::SUCCESS)
}

/// Ls command - print the execution order; needs no store
fn ls_command(cli: &Cli, select: &[String]) -> Result<ExitCode> {
    let project = load_project(cli)?;
    let graph = project.resolve().map_err(EngineError::from)?;

    let nodes = if select.is_empty() {
        graph.execution_order().to_vec()
    } else {
        graph.select(select).map_err(EngineError::from)?
    };

    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Execution Order".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    for (i, name) in nodes.iter().enumerate() {
        let model = project.registry().get(name).map_err(EngineError::from)?;
        let key = model
            .unique_key
            .as_ref()
            .map(|k| format!(", unique_key: {}", k))
            .unwrap_or_default();

        println!(
            "  {:>2}. {} {}",
            i + 1,
            name.green(),
            format!("[{} {}.{}{}]", model.materialization, model.schema, model.name, key).dimmed()
        );

        let parents = graph.parents(name);
        if cli.verbose && !parents.is_empty() {
            println!("      depends on: {}", parents.join(", "));
        }
    }

    println!();
    println!("{} models, {} assertions", nodes.len(), project.assertions().len());
    println!("{}", "=".repeat(60).bright_blue());

    Ok(ExitCode::SUCCESS)
}

/// Load command - bring raw files into the declared sources
async fn load_command(
    cli: &Cli,
    messages: &[PathBuf],
    detections: Option<&PathBuf>,
) -> Result<ExitCode> {
    if messages.is_empty() && detections.is_none() {
        return Err(anyhow::anyhow!("Nothing to load: pass --messages and/or --detections"));
    }

    let project = load_project(cli)?;
    let config = project.config();
    let store = dagwright_store::connect(&config.target, &config.project_root)
        .await
        .map_err(EngineError::from)?;

    let mut failed = false;

    if !messages.is_empty() {
        match load_messages_json(store.as_ref(), project.catalog(), messages).await {
            Ok(summary) => println!(
                "{} messages: {} files ({} skipped), {} records, {} inserted",
                "✓".green(),
                summary.files,
                summary.skipped_files,
                summary.records,
                summary.inserted
            ),
            Err(LoadError::UnknownSource(source)) => {
                return Err(anyhow::anyhow!("Source {} is not declared in {}", source, ProjectConfig::FILE_NAME));
            }
            Err(e) => {
                eprintln!("{} {}", "✗ Failed to load messages:".red(), e);
                failed = true;
            }
        }
    }

    if let Some(path) = detections {
        match load_detections_csv(store.as_ref(), project.catalog(), path).await {
            Ok(summary) => println!(
                "{} detections: {} records, {} inserted",
                "✓".green(),
                summary.records,
                summary.inserted
            ),
            Err(LoadError::UnknownSource(source)) => {
                return Err(anyhow::anyhow!("Source {} is not declared in {}", source, ProjectConfig::FILE_NAME));
            }
            Err(e) => {
                eprintln!("{} {}", "✗ Failed to load detections:".red(), e);
                failed = true;
            }
        }
    }

    Ok(if failed {
        ExitCode::from(EXIT_FAILURES)
    } else {
        ExitCode::SUCCESS
    })
}

/// Debug command - configuration and connection check
async fn debug_command(cli: &Cli) -> Result<ExitCode> {
    let project = load_project(cli)?;
    let config = project.config();

    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "dagwright debug".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("{} {}", "Project:".bold(), config.name);
    println!("{} {}", "Root:".bold(), config.project_root.display());
    println!("{} {}", "Target path:".bold(), project.target_dir().display());
    println!();

    println!("{}", "Target:".bold());
    println!("  name:    {}", config.target.name);
    println!("  type:    {}", config.target.dialect);
    println!("  threads: {}", config.target.threads);
    if let Some(path) = &config.target.path {
        println!("  path:    {}", path);
    }
    println!();

    println!("{}", "Project contents:".bold());
    println!("  models:     {}", project.registry().len());
    println!("  assertions: {}", project.assertions().len());
    println!("  sources:    {}", project.catalog().len());
    if !config.vars.is_empty() {
        let vars: Vec<&str> = config.vars.keys().map(String::as_str).collect();
        println!("  vars:       {}", vars.join(", "));
    }
    println!();

    let graph_ok = match project.resolve() {
        Ok(graph) => {
            println!("{} {} models resolve", "✓".green(), graph.execution_order().len());
            true
        }
        Err(e) => {
            print_diagnostic(&e.to_diagnostic());
            false
        }
    };

    let connection_ok = match dagwright_store::connect(&config.target, &config.project_root).await {
        Ok(store) => match store.test_connection().await {
            Ok(()) => {
                println!("{} Connection to {} successful", "✓".green(), store.name());
                true
            }
            Err(e) => {
                println!("{} Connection test failed: {}", "✗".red(), e);
                false
            }
        },
        Err(e) => {
            println!("{} Cannot connect: {}", "✗".red(), e);
            false
        }
    };

    println!();
    println!("{}", "=".repeat(60).bright_blue());

    if graph_ok && connection_ok {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_CONFIG))
    }
}

fn print_diagnostic(diag: &Diagnostic) {
    let severity = match diag.severity {
        Severity::Error => "ERROR".red().bold(),
        Severity::Warn => "WARN".yellow().bold(),
        Severity::Info => "INFO".cyan(),
    };

    eprintln!("[{}] {}: {}", severity, diag.code, diag.message);
    if let Some(location) = &diag.location {
        match location.line {
            Some(line) => eprintln!("    Location: {}:{}", location.file, line),
            None => eprintln!("    Location: {}", location.file),
        }
    }
}

fn print_run_summary(report: &RunReport) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "dagwright Run Report".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("Invocation: {}", report.invocation_id);
    println!("Target: {}", report.target);
    println!();

    if let Some(build) = &report.build {
        println!("{}", "Models:".bold());
        for result in &build.results {
            let status = match result.status {
                ModelStatus::Succeeded => "OK".green(),
                ModelStatus::Failed => "ERROR".red().bold(),
                ModelStatus::Skipped => "SKIP".yellow(),
            };
            let strategy = result
                .strategy
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());

            println!(
                "  [{}] {} {}",
                status,
                result.model,
                format!("({}, {} ms)", strategy, result.duration_ms).dimmed()
            );
            if result.status != ModelStatus::Succeeded {
                if let Some(message) = &result.message {
                    println!("      {}", message);
                }
            }
        }
        println!();

        let failed = build.count(ModelStatus::Failed);
        let skipped = build.count(ModelStatus::Skipped);
        println!("  Succeeded: {}", build.count(ModelStatus::Succeeded).to_string().green());
        if failed > 0 {
            println!("  Failed:    {}", failed.to_string().red().bold());
        } else {
            println!("  Failed:    {}", failed.to_string().green());
        }
        if skipped > 0 {
            println!("  Skipped:   {}", skipped.to_string().yellow());
        } else {
            println!("  Skipped:   {}", skipped.to_string().green());
        }
        if build.cancelled {
            println!("  {}", "Run was cancelled".yellow().bold());
        }
        println!();
    }

    if let Some(assertions) = &report.assertions {
        println!("{}", "Assertions:".bold());
        for result in &assertions.results {
            match result.status {
                AssertionStatus::Passed => {
                    println!("  [{}] {}", "PASS".green(), result.name);
                }
                AssertionStatus::Failed => {
                    println!(
                        "  [{}] {} ({} violating rows)",
                        "FAIL".red().bold(),
                        result.name,
                        result.violating_row_count
                    );
                    for row in result.sample_rows.iter().take(PRINTED_SAMPLES) {
                        println!("      {}", row.to_json().to_string().dimmed());
                    }
                }
                AssertionStatus::Error => {
                    println!("  [{}] {}", "ERROR".red().bold(), result.name);
                    if let Some(error) = &result.error {
                        println!("      {}", error);
                    }
                }
            }
        }
        println!();

        println!("  Passed: {}", assertions.count(AssertionStatus::Passed).to_string().green());
        println!("  Failed: {}", assertions.count(AssertionStatus::Failed));
        println!("  Errors: {}", assertions.count(AssertionStatus::Error));
        println!();
    }

    if report.has_failures() {
        println!("{}", "✗ Run finished with failures".red().bold());
    } else {
        println!("{}", "✓ Run completed successfully!".green().bold());
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "dagwright",
            "--project-dir",
            "medical_warehouse",
            "run",
            "--select",
            "+fct_messages",
            "dim_dates",
            "--full-refresh",
            "--threads",
            "4",
        ])
        .unwrap();

        assert_eq!(cli.project_dir, PathBuf::from("medical_warehouse"));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.select, vec!["+fct_messages", "dim_dates"]);
                assert!(args.full_refresh);
                assert_eq!(args.threads, Some(4));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["dagwright", "test", "-v", "--target-path", "out"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.target_path.as_deref(), Some("out"));
    }

    #[test]
    fn missing_project_is_a_config_error() {
        let dir = std::env::temp_dir().join("dagwright-cli-missing-project");
        let cli = Cli::try_parse_from(["dagwright", "--project-dir", dir.to_str().unwrap(), "ls"]).unwrap();

        let err = load_project(&cli).unwrap_err();
        assert!(matches!(err, EngineError::Project(ProjectError::Config(_))));
    }
}
