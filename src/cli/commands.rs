//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// cfconverge - Declarative Cloud Foundry reconciliation.
#[derive(Parser, Debug)]
#[command(name = "cfconverge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the manifest.
    #[arg(short, long, global = true, env = "CFCONVERGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the manifest without contacting the control plane.
    Validate {
        /// Show warnings as well as errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show what apply would change.
    Plan,

    /// Reconcile every declaration of the manifest.
    Apply {
        /// Report changes without applying them.
        #[arg(long)]
        dry_run: bool,

        /// Keep going after a failed declaration.
        #[arg(long)]
        continue_on_error: bool,
    },

    /// Inspect organizations and spaces.
    Facts {
        /// Organization to describe.
        #[arg(long)]
        org: Option<String>,

        /// Space to describe (requires --org).
        #[arg(long, requires = "org")]
        space: Option<String>,
    },

    /// Reconcile a single declaration given as JSON parameters.
    Invoke {
        /// Parameter file (reads stdin when omitted).
        #[arg(short, long)]
        params: Option<PathBuf>,
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

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_flags() {
        let cli = Cli::try_parse_from(["cfconverge", "apply", "--dry-run", "--continue-on-error"])
            .expect("valid arguments");

        assert!(matches!(
            cli.command,
            Commands::Apply {
                dry_run: true,
                continue_on_error: true
            }
        ));
        assert_eq!(cli.output, OutputFormat::Text);
    }

    #[test]
    fn test_space_requires_org() {
        assert!(Cli::try_parse_from(["cfconverge", "facts", "--space", "dev"]).is_err());

        let cli = Cli::try_parse_from([
            "cfconverge", "--output", "json", "facts", "--org", "acme", "--space", "dev",
        ])
        .expect("valid arguments");
        assert_eq!(cli.output, OutputFormat::Json);
    }
}
