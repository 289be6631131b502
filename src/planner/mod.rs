//! Planning module for reconciliation.
//!
//! This module holds the per-kind attribute tables, computes the difference
//! between declared and observed state, turns it into a plan, and applies
//! that plan through the client facade.

mod desired;
mod diff;
mod executor;
mod plan;
mod schema;

pub use desired::{DesiredEntity, DesiredRelation, Endpoint};
pub use diff::{DiffEngine, DiffType, FieldChange, ResourceDiff};
pub use executor::PlanExecutor;
pub use plan::{EntityAction, ReconcilePlan, RelationChange};
pub use schema::{schema_for, Comparator, FieldSpec, KindSchema};
