//! Diff engine for comparing declared vs observed state.
//!
//! This module computes, attribute by attribute, how a declared entity
//! differs from the record currently held by the control plane. It never
//! calls the control plane, so a diff can always be computed before any
//! mutation is decided.

use std::fmt;
use tracing::debug;

use crate::foundry::{Record, Value};

use super::desired::DesiredEntity;
use super::schema::KindSchema;

/// Engine for computing diffs between desired and observed states.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine;

/// Difference for a single entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDiff {
    /// Natural key.
    pub name: String,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Field-level differences.
    pub changes: Vec<FieldChange>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// Entity needs to be created.
    Create,
    /// Entity needs to be updated.
    Update,
    /// Entity needs to be deleted.
    Delete,
    /// Entity already matches (or is already absent).
    NoChange,
    /// Only fields without an update path differ.
    Immutable,
}

/// Detail about a specific difference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    /// Field that differs.
    pub field: String,
    /// Observed value.
    pub current: Value,
    /// Declared value.
    pub desired: Value,
    /// Whether the field can be changed in place.
    pub updatable: bool,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the diff between a declared entity and its observed record.
    #[must_use]
    pub fn compute_diff(
        &self,
        schema: &KindSchema,
        desired: &DesiredEntity,
        current: Option<&Record>,
    ) -> ResourceDiff {
        let name = desired.name().to_string();

        let (diff_type, changes) = match (desired.is_present(), current) {
            (true, None) => {
                debug!("{} {name} needs to be created", schema.kind);
                (DiffType::Create, Self::declared_fields(schema, desired))
            }
            (true, Some(record)) => {
                let changes = Self::compute_field_changes(schema, desired, record);
                let diff_type = if changes.iter().any(|c| c.updatable) {
                    DiffType::Update
                } else if changes.is_empty() {
                    DiffType::NoChange
                } else {
                    DiffType::Immutable
                };
                debug!("{} {name}: {diff_type}", schema.kind);
                (diff_type, changes)
            }
            (false, Some(_)) => {
                debug!("{} {name} needs to be deleted", schema.kind);
                (DiffType::Delete, Vec::new())
            }
            (false, None) => {
                debug!("{} {name} is already absent", schema.kind);
                (DiffType::NoChange, Vec::new())
            }
        };

        ResourceDiff {
            name,
            diff_type,
            changes,
        }
    }

    /// Compares every field of the kind's table.
    fn compute_field_changes(
        schema: &KindSchema,
        desired: &DesiredEntity,
        current: &Record,
    ) -> Vec<FieldChange> {
        let mut changes: Vec<FieldChange> = schema
            .fields
            .iter()
            .filter_map(|spec| {
                let wanted = desired.declared(spec.name);
                let observed = current.attr(spec.name).cloned().unwrap_or_default();
                spec.comparator
                    .differs(wanted, &observed)
                    .then(|| FieldChange {
                        field: spec.name.to_string(),
                        current: observed,
                        desired: wanted.clone(),
                        updatable: spec.updatable,
                    })
            })
            .collect();

        if desired.update_password {
            for field in schema.write_only {
                if !desired.declared(field).is_null() {
                    changes.push(FieldChange {
                        field: (*field).to_string(),
                        current: Value::Null,
                        desired: Value::from("(redacted)"),
                        updatable: true,
                    });
                }
            }
        }

        changes
    }

    /// Fields a create call will carry.
    fn declared_fields(schema: &KindSchema, desired: &DesiredEntity) -> Vec<FieldChange> {
        schema
            .fields
            .iter()
            .filter(|spec| !desired.declared(spec.name).is_null())
            .map(|spec| FieldChange {
                field: spec.name.to_string(),
                current: Value::Null,
                desired: desired.declared(spec.name).clone(),
                updatable: spec.updatable,
            })
            .collect()
    }
}

impl ResourceDiff {
    /// Fields that will be written.
    pub fn updated_fields(&self) -> impl Iterator<Item = &str> {
        self.changes
            .iter()
            .filter(|c| c.updatable)
            .map(|c| c.field.as_str())
    }

    /// Divergent fields that have no update path.
    pub fn ignored_fields(&self) -> impl Iterator<Item = &str> {
        self.changes
            .iter()
            .filter(|c| !c.updatable)
            .map(|c| c.field.as_str())
    }
}

impl fmt::Display for DiffType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoChange => "no change",
            Self::Immutable => "immutable drift",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.field, self.current, self.desired)
    }
}

impl fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.diff_type)?;
        if !self.changes.is_empty() {
            write!(f, " (")?;
            for (i, change) in self.changes.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", change.field)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DesiredState;
    use crate::foundry::{Lookup, ResourceKind};
    use crate::planner::schema_for;

    fn desired_quota(memory: i64) -> DesiredEntity {
        DesiredEntity::new(
            ResourceKind::Quota,
            Lookup::global("small"),
            DesiredState::Present,
        )
        .with("memory_limit", memory)
        .with("total_routes", 10_i64)
    }

    fn observed_quota(memory: i64) -> Record {
        Record::new(ResourceKind::Quota, "q-1", "small")
            .with_attribute("memory_limit", memory)
            .with_attribute("total_routes", 10_i64)
            .with_attribute("trial_db_allowed", false)
    }

    #[test]
    fn test_create_when_absent() {
        let schema = schema_for(ResourceKind::Quota);
        let diff = DiffEngine::new().compute_diff(&schema, &desired_quota(1024), None);

        assert_eq!(diff.diff_type, DiffType::Create);
        assert_eq!(diff.changes.len(), 2);
    }

    #[test]
    fn test_no_change_ignores_undeclared_remote_fields() {
        let schema = schema_for(ResourceKind::Quota);
        let observed = observed_quota(1024);
        let diff = DiffEngine::new().compute_diff(&schema, &desired_quota(1024), Some(&observed));

        assert_eq!(diff.diff_type, DiffType::NoChange);
        assert!(diff.changes.is_empty());
    }

    #[test]
    fn test_update_on_divergent_limit() {
        let schema = schema_for(ResourceKind::Quota);
        let observed = observed_quota(1024);
        let diff = DiffEngine::new().compute_diff(&schema, &desired_quota(2048), Some(&observed));

        assert_eq!(diff.diff_type, DiffType::Update);
        assert_eq!(diff.updated_fields().collect::<Vec<_>>(), vec!["memory_limit"]);
        assert_eq!(diff.to_string(), "small: update (memory_limit)");
    }

    #[test]
    fn test_immutable_divergence() {
        let schema = schema_for(ResourceKind::PrivateDomain);
        let desired = DesiredEntity::new(
            ResourceKind::PrivateDomain,
            Lookup::global("apps.example.com"),
            DesiredState::Present,
        )
        .with("owning_organization_guid", "org-2");
        let observed = Record::new(ResourceKind::PrivateDomain, "d-1", "apps.example.com")
            .with_attribute("owning_organization_guid", "org-1");

        let diff = DiffEngine::new().compute_diff(&schema, &desired, Some(&observed));

        assert_eq!(diff.diff_type, DiffType::Immutable);
        assert_eq!(
            diff.ignored_fields().collect::<Vec<_>>(),
            vec!["owning_organization_guid"]
        );
    }

    #[test]
    fn test_absent_states() {
        let schema = schema_for(ResourceKind::Organization);
        let desired = DesiredEntity::new(
            ResourceKind::Organization,
            Lookup::global("acme"),
            DesiredState::Absent,
        );
        let observed = Record::new(ResourceKind::Organization, "o-1", "acme");
        let engine = DiffEngine::new();

        assert_eq!(
            engine.compute_diff(&schema, &desired, Some(&observed)).diff_type,
            DiffType::Delete
        );
        assert_eq!(
            engine.compute_diff(&schema, &desired, None).diff_type,
            DiffType::NoChange
        );
    }

    #[test]
    fn test_update_password_forces_update() {
        let schema = schema_for(ResourceKind::User);
        let mut desired = DesiredEntity::new(
            ResourceKind::User,
            Lookup::global("ada"),
            DesiredState::Present,
        )
        .with("given_name", "Ada")
        .with("password", "s3cret");
        let observed = Record::new(ResourceKind::User, "u-1", "ada").with_attribute("given_name", "Ada");
        let engine = DiffEngine::new();

        assert_eq!(
            engine.compute_diff(&schema, &desired, Some(&observed)).diff_type,
            DiffType::NoChange
        );

        desired.update_password = true;
        let diff = engine.compute_diff(&schema, &desired, Some(&observed));
        assert_eq!(diff.diff_type, DiffType::Update);
        assert_eq!(diff.changes[0].desired, Value::from("(redacted)"));
    }
}
