//! cfconverge CLI entrypoint.
//!
//! This is the main entrypoint for the cfconverge command-line tool.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use cf_converge::cli::{Cli, Commands, OutputFormat, OutputFormatter};
use cf_converge::config::{ConfigParser, ConfigValidator, ConvergeConfig, find_config_file};
use cf_converge::error::{CfError, ConfigError, ReconcileError, Result};
use cf_converge::facts::FactsCollector;
use cf_converge::foundry::{CfClient, ClientOptions};
use cf_converge::reconciler::{Failure, ReconcileOptions, Reconciler};

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    init_logging(cli.verbose, cli.output);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            let failure = Failure::from(&e);
            emit(&formatter.format_failure(&failure));
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. Logs go to stderr, results to stdout.
fn init_logging(verbose: bool, output: OutputFormat) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    match output {
        OutputFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        OutputFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
    }
}

/// Main async entry point. Returns false if any declaration failed.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<bool> {
    match cli.command {
        Commands::Validate { warnings } => cmd_validate(cli.config.as_ref(), warnings, formatter),
        Commands::Plan => cmd_apply(cli.config.as_ref(), true, true, formatter).await,
        Commands::Apply {
            dry_run,
            continue_on_error,
        } => cmd_apply(cli.config.as_ref(), dry_run, continue_on_error, formatter).await,
        Commands::Facts { org, space } => {
            cmd_facts(cli.config.as_ref(), org.as_deref(), space.as_deref(), formatter).await
        }
        Commands::Invoke { params } => {
            cmd_invoke(cli.config.as_ref(), params.as_ref(), formatter).await
        }
    }
}

/// Validate the manifest.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let config = load_config(config_path)?;

    let validator = ConfigValidator::new();
    let result = validator.check(&config)?;

    emit(&formatter.format_validation(&result, show_warnings));
    Ok(result.is_valid())
}

/// Reconcile every declaration of the manifest.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    dry_run: bool,
    continue_on_error: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let config = load_config(config_path)?;
    ConfigValidator::new().validate(&config)?;

    let client = connect(&config).await?;
    info!(
        "Reconciling {} declarations against {} (dry run: {dry_run})",
        config.resources.len(),
        client.api_url()
    );

    let reconciler = Reconciler::new(&client, ReconcileOptions { dry_run });
    let report = reconciler
        .apply_all(&config.resources, continue_on_error)
        .await;

    emit(&formatter.format_report(&report));
    Ok(report.is_success())
}

/// Inspect organizations and spaces.
async fn cmd_facts(
    config_path: Option<&PathBuf>,
    org: Option<&str>,
    space: Option<&str>,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let config = load_target(config_path)?;
    let client = connect(&config).await?;

    let facts = FactsCollector::new(&client).collect(org, space).await?;

    emit(&formatter.format_facts(&facts));
    Ok(true)
}

/// Reconcile one declaration read from a parameter file or stdin.
async fn cmd_invoke(
    config_path: Option<&PathBuf>,
    params: Option<&PathBuf>,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let content = match params {
        Some(path) => std::fs::read_to_string(path).map_err(|e| {
            CfError::Config(ConfigError::ParseError {
                message: format!("Failed to read parameters: {e}"),
                location: Some(path.display().to_string()),
            })
        })?,
        None => {
            let mut content = String::new();
            std::io::stdin().read_to_string(&mut content)?;
            content
        }
    };

    let parser = ConfigParser::new();
    let invocation = parser.parse_invocation(&content)?;
    let config = load_target(config_path)?;
    let client = connect(&config).await?;

    let reconciler = Reconciler::new(
        &client,
        ReconcileOptions {
            dry_run: invocation.dry_run,
        },
    );
    match reconciler.apply(&invocation.resource).await {
        Ok(outcome) => {
            emit(&formatter.format_outcome(&outcome));
            Ok(true)
        }
        Err(err) => {
            emit(&formatter.format_failure(&Failure::from(err)));
            Ok(false)
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the manifest path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Loads the manifest with `.env` and environment overrides applied.
fn load_config(config_path: Option<&PathBuf>) -> Result<ConvergeConfig> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading manifest from: {}", config_file.display());

    let parser = ConfigParser::new()
        .with_base_path(config_file.parent().unwrap_or_else(|| Path::new(".")));
    parser.load_dotenv()?;

    parser.load_with_env(&config_file)
}

/// Loads connection settings, from the manifest if there is one and from the
/// environment otherwise.
fn load_target(config_path: Option<&PathBuf>) -> Result<ConvergeConfig> {
    match load_config(config_path) {
        Err(CfError::Config(ConfigError::FileNotFound { .. })) if config_path.is_none() => {
            debug!("No manifest found, reading the target from the environment");
            ConfigParser::new().load_dotenv()?;
            let mut config = ConvergeConfig::default();
            ConfigParser::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
            Ok(config)
        }
        result => result,
    }
}

/// Logs in to the control plane.
async fn connect(config: &ConvergeConfig) -> Result<CfClient> {
    let target = &config.target;
    if target.api_url.is_empty() {
        return Err(CfError::Config(ConfigError::validation(
            "api_url is required (or set CF_API_URL)",
            "target.api_url",
        )));
    }
    let password = ConfigParser::admin_password(config)?;

    let options = ClientOptions {
        validate_certs: target.validate_certs,
        timeout_secs: target.timeout_secs,
    };
    let client = CfClient::login(&target.api_url, &target.admin_user, password, options)
        .await
        .map_err(|source| ReconcileError::Auth {
            endpoint: target.api_url.clone(),
            source,
        })?;

    Ok(client)
}

/// Writes a command result to stdout.
fn emit(output: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(output.as_bytes());
    let _ = stdout.flush();
}
