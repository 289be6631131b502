//! Per-kind attribute tables.
//!
//! Every entity kind reconciles through the same engine; what differs is the
//! set of declared fields, how each is compared, and which of them the
//! control plane lets us change after creation.

use crate::foundry::{ResourceKind, Value};

/// How a declared field is compared with the observed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// Always compared; an undeclared field must be unset remotely.
    Exact,
    /// Compared only when declared.
    IfDeclared,
    /// Boolean where unset and `false` are the same.
    Flag,
}

impl Comparator {
    /// Returns true if the declared and observed values diverge.
    #[must_use]
    pub fn differs(self, desired: &Value, current: &Value) -> bool {
        match self {
            Self::Exact => desired != current,
            Self::IfDeclared => !desired.is_null() && desired != current,
            Self::Flag => {
                desired.as_bool().unwrap_or(false) != current.as_bool().unwrap_or(false)
            }
        }
    }
}

/// A declared field of an entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Attribute name on the wire.
    pub name: &'static str,
    /// Comparison rule.
    pub comparator: Comparator,
    /// Whether an existing entity can be changed in place.
    pub updatable: bool,
}

const fn field(name: &'static str, comparator: Comparator, updatable: bool) -> FieldSpec {
    FieldSpec {
        name,
        comparator,
        updatable,
    }
}

/// Reconciliation schema of an entity kind.
#[derive(Debug, Clone, Copy)]
pub struct KindSchema {
    /// Entity kind.
    pub kind: ResourceKind,
    /// Compared fields.
    pub fields: &'static [FieldSpec],
    /// Fields sent on writes but never compared.
    pub write_only: &'static [&'static str],
    /// Fields a create call cannot do without.
    pub required_on_create: &'static [&'static str],
    /// Whether the control plane can create this kind.
    pub supports_create: bool,
    /// Whether the control plane can delete this kind.
    pub supports_delete: bool,
    /// Natural keys reserved by the platform.
    pub protected: &'static [&'static str],
}

impl KindSchema {
    /// Returns true if the natural key is reserved by the platform.
    #[must_use]
    pub fn is_protected(&self, name: &str) -> bool {
        self.protected.contains(&name)
    }

    /// Returns true if any field can be changed in place.
    #[must_use]
    pub fn supports_update(&self) -> bool {
        self.fields.iter().any(|f| f.updatable)
    }

    /// Looks up a compared field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

const ORGANIZATION_FIELDS: &[FieldSpec] =
    &[field("quota_definition_guid", Comparator::IfDeclared, true)];

const SPACE_FIELDS: &[FieldSpec] = &[
    field("allow_ssh", Comparator::IfDeclared, true),
    field("space_quota_definition_guid", Comparator::IfDeclared, true),
];

const QUOTA_FIELDS: &[FieldSpec] = &[
    field("non_basic_services_allowed", Comparator::IfDeclared, true),
    field("total_services", Comparator::IfDeclared, true),
    field("total_routes", Comparator::IfDeclared, true),
    field("memory_limit", Comparator::IfDeclared, true),
    field("instance_memory_limit", Comparator::IfDeclared, true),
    field("total_service_keys", Comparator::IfDeclared, true),
    field("total_reserved_route_ports", Comparator::IfDeclared, true),
    field("total_private_domains", Comparator::IfDeclared, true),
    field("app_instance_limit", Comparator::IfDeclared, true),
];

const SPACE_QUOTA_FIELDS: &[FieldSpec] = &[
    field("non_basic_services_allowed", Comparator::IfDeclared, true),
    field("total_services", Comparator::IfDeclared, true),
    field("total_routes", Comparator::IfDeclared, true),
    field("memory_limit", Comparator::IfDeclared, true),
    field("instance_memory_limit", Comparator::IfDeclared, true),
    field("total_service_keys", Comparator::IfDeclared, true),
    field("total_reserved_route_ports", Comparator::IfDeclared, true),
    field("app_instance_limit", Comparator::IfDeclared, true),
];

const SHARED_DOMAIN_FIELDS: &[FieldSpec] =
    &[field("router_group_guid", Comparator::IfDeclared, false)];

const PRIVATE_DOMAIN_FIELDS: &[FieldSpec] =
    &[field("owning_organization_guid", Comparator::IfDeclared, false)];

const RULE_FIELDS: &[FieldSpec] = &[
    field("protocol", Comparator::Exact, true),
    field("destination", Comparator::Exact, true),
    field("ports", Comparator::Exact, true),
    field("type", Comparator::Exact, true),
    field("code", Comparator::Exact, true),
    field("log", Comparator::Flag, true),
];

const USER_FIELDS: &[FieldSpec] = &[
    field("given_name", Comparator::IfDeclared, true),
    field("family_name", Comparator::IfDeclared, true),
    field("email", Comparator::IfDeclared, true),
    field("active", Comparator::IfDeclared, true),
    field("external_id", Comparator::IfDeclared, true),
    field("default_space_guid", Comparator::IfDeclared, true),
    field("origin", Comparator::IfDeclared, false),
];

const FEATURE_FLAG_FIELDS: &[FieldSpec] = &[field("enabled", Comparator::IfDeclared, true)];

const ENV_VAR_FIELDS: &[FieldSpec] = &[field("value", Comparator::IfDeclared, true)];

const fn schema(kind: ResourceKind, fields: &'static [FieldSpec]) -> KindSchema {
    KindSchema {
        kind,
        fields,
        write_only: &[],
        required_on_create: &[],
        supports_create: true,
        supports_delete: true,
        protected: &[],
    }
}

/// Returns the reconciliation schema of a kind.
#[must_use]
pub const fn schema_for(kind: ResourceKind) -> KindSchema {
    match kind {
        ResourceKind::Organization => KindSchema {
            protected: &["pivotal"],
            ..schema(kind, ORGANIZATION_FIELDS)
        },
        ResourceKind::Space => schema(kind, SPACE_FIELDS),
        ResourceKind::Quota => KindSchema {
            protected: &["default"],
            ..schema(kind, QUOTA_FIELDS)
        },
        ResourceKind::SpaceQuota => schema(kind, SPACE_QUOTA_FIELDS),
        ResourceKind::SharedDomain => schema(kind, SHARED_DOMAIN_FIELDS),
        ResourceKind::PrivateDomain => KindSchema {
            required_on_create: &["owning_organization_guid"],
            ..schema(kind, PRIVATE_DOMAIN_FIELDS)
        },
        ResourceKind::SecurityGroup => schema(kind, &[]),
        ResourceKind::SecurityGroupRule => schema(kind, RULE_FIELDS),
        ResourceKind::User => KindSchema {
            write_only: &["password"],
            protected: &["admin"],
            ..schema(kind, USER_FIELDS)
        },
        ResourceKind::FeatureFlag => KindSchema {
            supports_create: false,
            supports_delete: false,
            ..schema(kind, FEATURE_FLAG_FIELDS)
        },
        ResourceKind::EnvironmentVariable => schema(kind, ENV_VAR_FIELDS),
    }
}
