//! CLI command definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// End-to-end validation of IaC provider migrations.
#[derive(Parser, Debug)]
#[command(name = "tf-migrate-e2e")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "TFM_E2E_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full migration validation against real infrastructure.
    Run {
        /// Limit the run to these modules (repeatable).
        #[arg(short, long = "resource", value_name = "MODULE")]
        resources: Vec<String>,

        /// Do not apply the old-version configuration first.
        #[arg(long)]
        skip_old_apply: bool,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Classify a saved plan output offline.
    Classify {
        /// File holding the human-readable plan output.
        plan_file: PathBuf,

        /// Resource-scoped exemption files to load; a single one also
        /// filters the report to that module.
        #[arg(short, long = "resource", value_name = "MODULE")]
        resources: Vec<String>,
    },

    /// List import annotations under a tree.
    Imports {
        /// Root of the configuration tree.
        dir: PathBuf,

        /// Write the import directives file into the tree.
        #[arg(short, long)]
        write: bool,
    },

    /// Show the effective exemption rules.
    Rules {
        /// Resource-scoped exemption files to merge (repeatable).
        #[arg(short, long = "resource", value_name = "MODULE")]
        resources: Vec<String>,
    },

    /// Print a sanitized copy of a file.
    Sanitize {
        /// File to sanitize.
        file: PathBuf,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "tf-migrate-e2e",
            "run",
            "--resource",
            "zone",
            "-r",
            "dns",
            "--skip-old-apply",
            "--output",
            "json",
        ])
        .expect("valid arguments");

        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Run {
                resources,
                skip_old_apply,
                yes,
            } => {
                assert_eq!(resources, vec!["zone", "dns"]);
                assert!(skip_old_apply);
                assert!(!yes);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_classify_requires_plan_file() {
        assert!(Cli::try_parse_from(["tf-migrate-e2e", "classify"]).is_err());
        let cli = Cli::try_parse_from(["tf-migrate-e2e", "classify", "plan.txt", "--log-format", "json"])
            .expect("valid arguments");
        assert_eq!(cli.log_format, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Classify { .. }));
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
