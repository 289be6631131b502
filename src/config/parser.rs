//! Manifest parser for loading declarations.
//!
//! This module handles loading manifests from YAML files and environment
//! variables, and single invocations from JSON parameter objects.

use crate::error::{CfError, ConfigError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::{ConvergeConfig, Invocation, ResourceSpec};

/// Environment variable overriding `target.api_url`.
pub const ENV_API_URL: &str = "CF_API_URL";
/// Environment variable overriding `target.admin_user`.
pub const ENV_ADMIN_USER: &str = "CF_ADMIN_USER";
/// Environment variable supplying `target.admin_password`.
pub const ENV_ADMIN_PASSWORD: &str = "CF_ADMIN_PASSWORD";

/// Manifest parser.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving the `.env` file.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new manifest parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving the `.env` file.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a manifest from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ConvergeConfig> {
        let path = path.as_ref();
        info!("Loading manifest from: {}", path.display());

        if !path.exists() {
            return Err(CfError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            CfError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a manifest from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<ConvergeConfig> {
        debug!("Parsing YAML manifest");

        let config: ConvergeConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            CfError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!("Parsed {} declarations", config.resources.len());
        Ok(config)
    }

    /// Loads a manifest and applies environment overrides.
    ///
    /// `CF_API_URL`, `CF_ADMIN_USER` and `CF_ADMIN_PASSWORD` take precedence
    /// over the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<ConvergeConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Applies overrides read through `lookup` to the target settings.
    pub fn apply_env_overrides(
        config: &mut ConvergeConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) {
        if let Some(url) = lookup(ENV_API_URL) {
            debug!("Overriding target.api_url from environment");
            config.target.api_url = url;
        }

        if let Some(user) = lookup(ENV_ADMIN_USER) {
            debug!("Overriding target.admin_user from environment");
            config.target.admin_user = user;
        }

        if let Some(password) = lookup(ENV_ADMIN_PASSWORD) {
            debug!("Reading target.admin_password from environment");
            config.target.admin_password = Some(password);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                CfError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Returns the admin password of a loaded manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if neither the file nor `CF_ADMIN_PASSWORD` supplied one.
    pub fn admin_password(config: &ConvergeConfig) -> Result<&str> {
        config.target.admin_password.as_deref().ok_or_else(|| {
            CfError::Config(ConfigError::MissingEnvVar {
                name: String::from(ENV_ADMIN_PASSWORD),
            })
        })
    }

    /// Parses a single invocation: one declaration's fields plus `kind`
    /// and an optional `dry_run`.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or does not describe a declaration.
    pub fn parse_invocation(&self, content: &str) -> Result<Invocation> {
        let parse_error = |message: String| {
            CfError::Config(ConfigError::ParseError {
                message,
                location: Some(String::from("invocation parameters")),
            })
        };

        let mut params: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(content).map_err(|e| parse_error(format!("JSON parse error: {e}")))?;

        let dry_run = match params.remove("dry_run") {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Bool(b)) => b,
            Some(other) => {
                return Err(parse_error(format!("dry_run must be a boolean, got {other}")));
            }
        };

        let resource: ResourceSpec = serde_json::from_value(serde_json::Value::Object(params))
            .map_err(|e| parse_error(format!("invalid declaration: {e}")))?;

        debug!("Parsed invocation for {}", resource.declared_by());
        Ok(Invocation { resource, dry_run })
    }
}

/// Default manifest file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["cfconverge.yaml", "cfconverge.yml"];

/// Finds the manifest in the given directory or its parents, falling back to
/// the user configuration directory.
///
/// # Errors
///
/// Returns an error if no manifest is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found manifest: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    if let Some(config_path) = user_config_file().filter(|p| p.exists()) {
        info!("Found manifest: {}", config_path.display());
        return Ok(config_path);
    }

    Err(CfError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

/// `<config dir>/cfconverge/cfconverge.yaml`, if the platform has a config dir.
#[must_use]
pub fn user_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cfconverge").join(DEFAULT_CONFIG_FILES[0]))
}
