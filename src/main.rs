//! tf-migrate-e2e CLI entrypoint.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use tf_migrate_e2e::cli::{Cli, Commands, OutputFormat, OutputFormatter};
use tf_migrate_e2e::config::{find_config_file, ConfigParser, ConfigValidator, HarnessConfig};
use tf_migrate_e2e::drift::DriftClassifier;
use tf_migrate_e2e::error::{HarnessError, OrchestratorError, Result};
use tf_migrate_e2e::exemptions::ExemptionRuleStore;
use tf_migrate_e2e::imports::ImportResolver;
use tf_migrate_e2e::migrate::ExternalMigrationTool;
use tf_migrate_e2e::orchestrator::{
    persist_report, PhaseStatus, RunContext, ValidationOrchestrator, ValidationReport, Verdict,
};
use tf_migrate_e2e::runner::{OutputSanitizer, ProcessRunner};

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code for real drift.
const EXIT_DRIFT: u8 = 1;
/// Exit code for errors and aborted runs.
const EXIT_ERROR: u8 = 2;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::from(EXIT_ERROR);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(verdict) => exit_code(verdict),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool, format: OutputFormat) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        OutputFormat::Json => builder.json().init(),
        OutputFormat::Text => builder.init(),
    }
}

fn exit_code(verdict: Verdict) -> ExitCode {
    match verdict {
        Verdict::Pass | Verdict::Warn => ExitCode::SUCCESS,
        Verdict::Fail => ExitCode::from(EXIT_DRIFT),
        Verdict::Error => ExitCode::from(EXIT_ERROR),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<Verdict> {
    let formatter = OutputFormatter::new(cli.output);
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Run {
            resources,
            skip_old_apply,
            yes,
        } => cmd_run(config, resources, skip_old_apply, yes, &formatter).await,
        Commands::Classify {
            plan_file,
            resources,
        } => cmd_classify(&config, &plan_file, &resources, &formatter),
        Commands::Imports { dir, write } => cmd_imports(&config, &dir, write, &formatter).await,
        Commands::Rules { resources } => cmd_rules(&config, &resources, &formatter),
        Commands::Sanitize { file } => cmd_sanitize(&config, &file),
    }
}

/// Run the full validation.
async fn cmd_run(
    mut config: HarnessConfig,
    resources: Vec<String>,
    skip_old_apply: bool,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<Verdict> {
    if skip_old_apply {
        config.workspace.apply_old = false;
    }

    let rules = Arc::new(ExemptionRuleStore::from_paths(&config.exemptions).load(&resources)?);

    if !auto_approve {
        eprintln!(
            "This run creates and modifies real infrastructure from {} and {}.",
            config.workspace.old_dir.display(),
            config.workspace.new_dir.display()
        );
        eprint!("Continue? [y/N]: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Run cancelled.");
            return Ok(Verdict::Pass);
        }
    }

    let sanitizer = Arc::new(build_sanitizer(&config)?);
    let runner = ProcessRunner::from_config(&config, sanitizer);
    let migration = ExternalMigrationTool::from_config(&config.migration);
    let orchestrator = ValidationOrchestrator::new(&config, &runner, &migration, rules);
    let mut ctx = RunContext::new(&config, resources);

    let outcome = tokio::select! {
        result = orchestrator.run(&mut ctx) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match outcome {
        Some(Ok(report)) => {
            println!("{}", formatter.format_report(&report)?);
            info!("Artifacts written to {}", ctx.artifacts_dir.display());
            Ok(report.verdict)
        }
        Some(Err(e)) => {
            let report = ValidationReport::from_context(&ctx, Some(e.to_string()));
            println!("{}", formatter.format_report(&report)?);
            Err(e)
        }
        None => {
            let phase = ctx
                .phases
                .iter()
                .find(|p| p.status == PhaseStatus::Running)
                .map_or_else(|| String::from("none"), |p| p.phase.to_string());
            ctx.mark_cancelled();
            error!("Interrupted during phase {phase}");

            let cancelled = HarnessError::Orchestrator(OrchestratorError::Cancelled { phase });
            let report = ValidationReport::from_context(&ctx, Some(cancelled.to_string()));
            match persist_report(&mut ctx, &report).await {
                Ok(path) => info!("Partial report written to {}", path.display()),
                Err(e) => warn!("Failed to persist partial report: {e}"),
            }
            println!("{}", formatter.format_report(&report)?);
            if ctx.state_pushed {
                warn!("Migrated state was pushed before the interrupt");
            }
            Err(cancelled)
        }
    }
}

/// Classify a saved plan output.
fn cmd_classify(
    config: &HarnessConfig,
    plan_file: &Path,
    resources: &[String],
    formatter: &OutputFormatter,
) -> Result<Verdict> {
    let rules = ExemptionRuleStore::from_paths(&config.exemptions).load(resources)?;
    let plan = std::fs::read_to_string(plan_file)?;

    let filter = match resources {
        [only] => Some(only.as_str()),
        _ => None,
    };
    let report = DriftClassifier::new(Arc::new(rules)).classify(&plan, filter);

    println!("{}", formatter.format_drift(&report)?);

    Ok(if report.has_real_drift() {
        Verdict::Fail
    } else {
        Verdict::Pass
    })
}

/// List import annotations, optionally writing the directives file.
async fn cmd_imports(
    config: &HarnessConfig,
    dir: &Path,
    write: bool,
    formatter: &OutputFormatter,
) -> Result<Verdict> {
    let specs = ImportResolver::scan(dir)?;
    println!("{}", formatter.format_imports(&specs)?);

    if write {
        let resolver = ImportResolver::from_env(&config.variables);
        match resolver.write_directives(&specs, dir).await? {
            Some(path) => eprintln!("Wrote {}", path.display()),
            None => eprintln!("No annotations, nothing written."),
        }
    }

    Ok(Verdict::Pass)
}

/// Show the merged exemption rules.
fn cmd_rules(config: &HarnessConfig, resources: &[String], formatter: &OutputFormatter) -> Result<Verdict> {
    let rules = ExemptionRuleStore::from_paths(&config.exemptions).load(resources)?;
    println!("{}", formatter.format_rules(&rules)?);
    Ok(Verdict::Pass)
}

/// Print a sanitized copy of a file.
fn cmd_sanitize(config: &HarnessConfig, file: &Path) -> Result<Verdict> {
    let sanitizer = build_sanitizer(config)?;
    let content = std::fs::read_to_string(file)?;
    print!("{}", sanitizer.sanitize(&content));
    Ok(Verdict::Pass)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Builds the sanitizer, adding the values of the required credentials as
/// literal secrets.
fn build_sanitizer(config: &HarnessConfig) -> Result<OutputSanitizer> {
    let literals: Vec<String> = config
        .credentials
        .required
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .filter(|value| !value.trim().is_empty())
        .collect();
    debug!("Registering {} literal secret(s)", literals.len());

    Ok(OutputSanitizer::new(&config.sanitizer)?.with_literal_secrets(literals))
}

/// Loads, overrides, and validates the configuration.
///
/// Without an explicit path and with no file found, the defaults are used.
fn load_config(config_path: Option<&PathBuf>) -> Result<HarnessConfig> {
    let config_file = match config_path {
        Some(path) => Some(path.clone()),
        None => find_config_file(".").ok(),
    };

    let config = match config_file {
        Some(file) => {
            let parser = ConfigParser::new().with_base_path(
                file.parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new(".")),
            );
            parser.load_dotenv()?;
            parser.load_with_env(&file)?
        }
        None => {
            debug!("No configuration file found, using defaults");
            ConfigParser::new().load_dotenv()?;
            let mut config = HarnessConfig::default();
            ConfigParser::apply_env_overrides(&mut config)?;
            config
        }
    };

    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    Ok(config)
}
