//! Reconciliation plan types and construction.
//!
//! A plan is the complete list of remote mutations one declaration needs.
//! It is computed before anything is written so that a dry run reports
//! exactly what a real run would do.

use std::fmt;

use crate::foundry::{Attributes, Lookup, Record, Relation, ResourceKind};

use super::desired::{DesiredEntity, Endpoint};
use super::diff::{DiffType, ResourceDiff};
use super::schema::KindSchema;

/// Mutation of the primary entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityAction {
    /// Create the entity.
    Create,
    /// Update the entity in place.
    Update,
    /// Delete the entity.
    Delete {
        /// Cascade to children.
        recursive: bool,
    },
    /// Leave the entity untouched.
    None,
}

/// A single association add or remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationChange {
    /// Relation kind.
    pub relation: Relation,
    /// Subject of the relation.
    pub subject: Endpoint,
    /// Object of the relation.
    pub object: Endpoint,
    /// Human-readable description of the association.
    pub label: String,
    /// Add when true, remove when false.
    pub add: bool,
}

/// Every mutation one declaration needs.
#[derive(Debug, Clone)]
pub struct ReconcilePlan {
    /// Entity kind.
    pub kind: ResourceKind,
    /// Natural key with resolved scope.
    pub lookup: Lookup,
    /// Mutation of the primary entity.
    pub action: EntityAction,
    /// Field-level diff backing the action.
    pub diff: ResourceDiff,
    /// Record observed before the run.
    pub current: Option<Record>,
    /// Payload of a create or update call.
    pub payload: Attributes,
    /// Association changes, applied after the entity action.
    pub relations: Vec<RelationChange>,
}

impl ReconcilePlan {
    /// Builds the plan from a diff and the planned relation changes.
    #[must_use]
    pub fn from_diff(
        schema: &KindSchema,
        desired: &DesiredEntity,
        diff: ResourceDiff,
        current: Option<Record>,
        relations: Vec<RelationChange>,
    ) -> Self {
        let action = match diff.diff_type {
            DiffType::Create => EntityAction::Create,
            DiffType::Update => EntityAction::Update,
            DiffType::Delete => EntityAction::Delete {
                recursive: desired.recursive,
            },
            DiffType::NoChange | DiffType::Immutable => EntityAction::None,
        };

        let payload = match action {
            EntityAction::Create => desired.attributes.clone(),
            EntityAction::Update => desired
                .attributes
                .iter()
                .filter(|(field, _)| {
                    desired.update_password || !schema.write_only.contains(&field.as_str())
                })
                .filter(|(field, _)| schema.field(field).is_none_or(|spec| spec.updatable))
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect(),
            EntityAction::Delete { .. } | EntityAction::None => Attributes::new(),
        };

        Self {
            kind: desired.kind,
            lookup: desired.lookup.clone(),
            action,
            diff,
            current,
            payload,
            relations,
        }
    }

    /// Natural key.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.lookup.name
    }

    /// Returns true if executing the plan would change remote state.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.action != EntityAction::None || !self.relations.is_empty()
    }

    /// Returns the number of remote mutations in the plan.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        usize::from(self.action != EntityAction::None) + self.relations.len()
    }
}

impl fmt::Display for EntityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete { recursive: true } => "delete (recursive)",
            Self::Delete { recursive: false } => "delete",
            Self::None => "none",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for RelationChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.add { "add" } else { "remove" };
        write!(f, "{verb} {}", self.label)
    }
}
