//! Outcome reporting.
//!
//! Every reconciliation ends in exactly one of two shapes: an [`Outcome`]
//! triple or a [`Failure`]. Both serialize to the same JSON contract
//! regardless of the entity kind.

use serde::Serialize;
use std::fmt::Write;

use crate::error::{ApiError, CfError, ReconcileError};
use crate::foundry::Record;
use crate::planner::{DiffType, EntityAction, ReconcilePlan};

/// Result of one successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    /// Whether any sub-operation changed (or, in a dry run, would change)
    /// remote state.
    pub changed: bool,
    /// Human-readable summary.
    pub msg: String,
    /// Resulting record; null after a deletion.
    pub data: Option<Record>,
}

impl Outcome {
    /// Summarizes a plan and the record it produced.
    #[must_use]
    pub fn from_plan(plan: &ReconcilePlan, data: Option<Record>, dry_run: bool) -> Self {
        let subject = format!("{} {}", plan.kind.label(), plan.name());

        let mut msg = match plan.action {
            EntityAction::Create => format!("{subject} created"),
            EntityAction::Update => {
                let fields: Vec<&str> = plan.diff.updated_fields().collect();
                format!("{subject} updated ({})", fields.join(", "))
            }
            EntityAction::Delete { .. } => format!("{subject} deleted"),
            EntityAction::None if plan.diff.diff_type == DiffType::Immutable => {
                let fields: Vec<&str> = plan.diff.ignored_fields().collect();
                format!(
                    "{subject} exists, not updated: {} cannot be changed",
                    fields.join(", ")
                )
            }
            EntityAction::None if plan.current.is_some() => format!("{subject} exists"),
            EntityAction::None => format!("{subject} does not exist"),
        };

        if !plan.relations.is_empty() {
            let changes: Vec<String> = plan.relations.iter().map(ToString::to_string).collect();
            let _ = write!(msg, "; {}", changes.join(", "));
        }
        if dry_run && plan.changed() {
            msg.push_str(" (dry run)");
        }

        Self {
            changed: plan.changed(),
            msg,
            data,
        }
    }
}

/// Structured failure of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    /// Always true; lets hosts tell failures from outcomes.
    pub failed: bool,
    /// Human-readable cause.
    pub msg: String,
    /// Error category (e.g. `not_found`, `remote_error`).
    pub category: String,
    /// Entity kind, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Natural key, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Attempted operation, if the failure came from one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

impl From<&CfError> for Failure {
    fn from(err: &CfError) -> Self {
        let (kind, name, operation) = match err {
            CfError::Reconcile(e) => (
                e.subject().map(|(kind, _)| kind.to_string()),
                e.subject().map(|(_, name)| name.to_string()),
                e.operation().map(String::from),
            ),
            CfError::Api(ApiError::AuthenticationFailed { .. }) => {
                (None, None, Some(String::from("login")))
            }
            _ => (None, None, None),
        };

        Self {
            failed: true,
            msg: err.to_string(),
            category: err.category().to_string(),
            kind,
            name,
            operation,
        }
    }
}

impl From<ReconcileError> for Failure {
    fn from(err: ReconcileError) -> Self {
        Self::from(&CfError::Reconcile(err))
    }
}

/// Result of one declaration in a manifest run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum EntryResult {
    /// Reconciled.
    Ok(Outcome),
    /// Failed.
    Failed(Failure),
}

/// One declaration in a manifest run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    /// Entity kind label.
    pub kind: String,
    /// Natural key.
    pub name: String,
    /// What happened.
    #[serde(flatten)]
    pub result: EntryResult,
}

impl ReportEntry {
    /// Returns true if the declaration changed remote state.
    #[must_use]
    pub const fn changed(&self) -> bool {
        matches!(&self.result, EntryResult::Ok(outcome) if outcome.changed)
    }

    /// Returns true if the declaration failed.
    #[must_use]
    pub const fn failed(&self) -> bool {
        matches!(self.result, EntryResult::Failed(_))
    }
}

/// Results of a manifest run, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Whether the run was a dry run.
    pub dry_run: bool,
    /// Per-declaration results.
    pub entries: Vec<ReportEntry>,
    /// Declarations not attempted after a failure.
    pub skipped: usize,
}

impl RunReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    /// Records a result.
    pub fn push(&mut self, kind: &str, name: &str, result: EntryResult) {
        self.entries.push(ReportEntry {
            kind: kind.to_string(),
            name: name.to_string(),
            result,
        });
    }

    /// Number of declarations that changed remote state.
    #[must_use]
    pub fn changed_count(&self) -> usize {
        self.entries.iter().filter(|e| e.changed()).count()
    }

    /// Number of failed declarations.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.entries.iter().filter(|e| e.failed()).count()
    }

    /// Returns true if no declaration failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }
}
