//! CLI module for the cfconverge tool.
//!
//! This module provides the command-line interface for validating,
//! planning and applying manifests against a Cloud Foundry control plane.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
