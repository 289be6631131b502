//! Reconciliation of declarations against the control plane.
//!
//! This module resolves declarations to desired entities, runs them through
//! the generic engine and reports one outcome (or failure) per declaration.

mod engine;
mod kinds;
mod outcome;
mod resolver;
mod toggler;

pub use engine::{ReconcileOptions, Reconciler};
pub use kinds::DeclarationBuilder;
pub use outcome::{EntryResult, Failure, Outcome, ReportEntry, RunReport};
pub use resolver::Resolver;
pub use toggler::RelationToggler;
