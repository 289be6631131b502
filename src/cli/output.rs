//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::facts::{Facts, OrgFacts, SpaceFacts};
use crate::reconciler::{EntryResult, Failure, Outcome, RunReport};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Declaration result row for table display.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Message")]
    message: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the results of a manifest run.
    #[must_use]
    pub fn format_report(&self, report: &RunReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    fn format_report_text(report: &RunReport) -> String {
        let mut output = String::new();

        if report.entries.is_empty() {
            output.push_str("No declarations.\n");
            return output;
        }

        let rows: Vec<ResultRow> = report
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let (status, message) = match &entry.result {
                    EntryResult::Ok(outcome) if outcome.changed => {
                        ("changed".yellow().to_string(), outcome.msg.clone())
                    }
                    EntryResult::Ok(outcome) => ("ok".green().to_string(), outcome.msg.clone()),
                    EntryResult::Failed(failure) => {
                        ("failed".red().to_string(), failure.msg.clone())
                    }
                };
                ResultRow {
                    index: i + 1,
                    status,
                    kind: entry.kind.clone(),
                    name: entry.name.clone(),
                    message: Self::truncate(&message, 80),
                }
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let ok = report.entries.len() - report.changed_count() - report.failed_count();
        let _ = write!(
            output,
            "\n{}: {} ok, {} changed, {} failed",
            if report.dry_run { "Plan" } else { "Apply" },
            ok.to_string().green(),
            report.changed_count().to_string().yellow(),
            report.failed_count().to_string().red()
        );
        if report.skipped > 0 {
            let _ = write!(output, ", {} skipped", report.skipped);
        }
        output.push('\n');

        output
    }

    /// Formats the outcome of a single invocation.
    #[must_use]
    pub fn format_outcome(&self, outcome: &Outcome) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(outcome).unwrap_or_default(),
            OutputFormat::Text => {
                let marker = if outcome.changed {
                    "changed".yellow()
                } else {
                    "ok".green()
                };
                format!("{marker}: {}\n", outcome.msg)
            }
        }
    }

    /// Formats a failure.
    #[must_use]
    pub fn format_failure(&self, failure: &Failure) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(failure).unwrap_or_default(),
            OutputFormat::Text => format!("{}: {}\n", "failed".red(), failure.msg),
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "valid": result.is_valid(),
                    "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Manifest is valid.\n", "✓".green())
                } else {
                    let mut output = format!(
                        "{} Manifest has {} errors:\n",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                    output
                };

                if show_warnings && result.warning_count() > 0 {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }

                output
            }
        }
    }

    /// Formats facts.
    #[must_use]
    pub fn format_facts(&self, facts: &Facts) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(facts).unwrap_or_default(),
            OutputFormat::Text => match facts {
                Facts::Organizations(names) => {
                    let mut output = String::new();
                    for name in names {
                        let _ = writeln!(output, "{name}");
                    }
                    output
                }
                Facts::Organization(org) => Self::format_org_text(org),
                Facts::Space(space) => Self::format_space_text(space),
            },
        }
    }

    fn format_org_text(org: &OrgFacts) -> String {
        let mut output = format!("\nOrganization: {} ({})\n", org.name.bold(), org.guid);

        if let Some(status) = &org.status {
            let _ = writeln!(output, "   Status: {status}");
        }
        if let Some(quota) = &org.quota {
            let _ = writeln!(output, "   Quota: {}", quota.name);
            for (limit, value) in &quota.limits {
                let _ = writeln!(output, "     {limit}: {value}");
            }
        }
        Self::write_members(&mut output, &org.members);
        Self::write_list(&mut output, "Owned domains", &org.owned_domains);
        Self::write_list(&mut output, "Shared domains", &org.shared_domains);
        Self::write_list(&mut output, "Spaces", &org.spaces);

        output
    }

    fn format_space_text(space: &SpaceFacts) -> String {
        let mut output = format!(
            "\nSpace: {}/{} ({})\n",
            space.organization,
            space.name.bold(),
            space.guid
        );

        if let Some(allow_ssh) = space.allow_ssh {
            let _ = writeln!(output, "   SSH allowed: {allow_ssh}");
        }
        Self::write_members(&mut output, &space.members);
        Self::write_list(&mut output, "Running security groups", &space.running_security_groups);
        Self::write_list(&mut output, "Staging security groups", &space.staging_security_groups);

        output
    }

    fn write_members(
        output: &mut String,
        members: &std::collections::BTreeMap<String, Vec<String>>,
    ) {
        for (role, users) in members {
            let _ = writeln!(output, "   {role}: {}", Self::join_or_none(users));
        }
    }

    fn write_list(output: &mut String, title: &str, items: &[String]) {
        let _ = writeln!(output, "   {title}: {}", Self::join_or_none(items));
    }

    fn join_or_none(items: &[String]) -> String {
        if items.is_empty() {
            "-".dimmed().to_string()
        } else {
            items.join(", ")
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len - 3).collect();
            format!("{kept}...")
        }
    }
}
