//! Resource records and relation types shared by every facade implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Pseudo-identity of the platform itself, used as the subject of
/// platform-wide relations such as default security groups.
pub const PLATFORM: &str = "platform";

/// Kinds of entity the facade can look up and mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Organization (global natural key).
    Organization,
    /// Space (natural key scoped by organization).
    Space,
    /// Organization quota definition.
    Quota,
    /// Space quota definition (scoped by organization).
    SpaceQuota,
    /// Shared domain.
    SharedDomain,
    /// Private domain, owned by an organization.
    PrivateDomain,
    /// Security group.
    SecurityGroup,
    /// Security group rule (scoped by group, keyed by description).
    SecurityGroupRule,
    /// User.
    User,
    /// Feature flag (platform singleton).
    FeatureFlag,
    /// Entry of an environment variable group (scoped by lifecycle).
    EnvironmentVariable,
}

impl ResourceKind {
    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Space => "space",
            Self::Quota => "quota",
            Self::SpaceQuota => "space quota",
            Self::SharedDomain => "shared domain",
            Self::PrivateDomain => "private domain",
            Self::SecurityGroup => "security group",
            Self::SecurityGroupRule => "security group rule",
            Self::User => "user",
            Self::FeatureFlag => "feature flag",
            Self::EnvironmentVariable => "environment variable",
        }
    }

    /// Returns true if the natural key of this kind is only unique within a scope.
    #[must_use]
    pub const fn is_scoped(self) -> bool {
        matches!(
            self,
            Self::Space | Self::SpaceQuota | Self::SecurityGroupRule | Self::EnvironmentVariable
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A declared or observed attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// Unset.
    #[default]
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Integer limit or code.
    Int(i64),
    /// Free text, reference identity, or enumerated string.
    Text(String),
}

impl Value {
    /// Returns the text content, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean content, if any.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer content, if any.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns true if the value is unset.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Converts a scalar JSON value. Arrays and objects have no scalar form.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n.as_i64().map(Self::Int),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    /// Converts to JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => write!(f, "\"{s}\""),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Attribute set of a record, ordered by field name.
pub type Attributes = BTreeMap<String, Value>;

/// Converts attributes into a JSON object, dropping unset values.
#[must_use]
pub fn attributes_to_json(attributes: &Attributes) -> serde_json::Map<String, serde_json::Value> {
    attributes
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect()
}

/// Natural key of an entity within its scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lookup {
    /// Natural key.
    pub name: String,
    /// Identity (or lifecycle name) of the enclosing scope, for scoped kinds.
    pub scope: Option<String>,
}

impl Lookup {
    /// Lookup of a globally keyed entity.
    #[must_use]
    pub fn global(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: None,
        }
    }

    /// Lookup of an entity keyed within a scope.
    #[must_use]
    pub fn scoped(name: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: Some(scope.into()),
        }
    }
}

/// A remote record as returned by the facade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Kind of entity.
    pub kind: ResourceKind,
    /// Server-assigned identity. Rules and environment variables have no
    /// identity of their own and use their natural key.
    pub guid: String,
    /// Natural key.
    pub name: String,
    /// Identity of the enclosing scope, for scoped kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Observed attributes.
    #[serde(default)]
    pub attributes: Attributes,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record {
    /// Creates a record without timestamps.
    #[must_use]
    pub fn new(kind: ResourceKind, guid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            guid: guid.into(),
            name: name.into(),
            scope: None,
            attributes: Attributes::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Sets the scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Sets an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    /// Returns an observed attribute.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Returns an observed text attribute.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        self.attr(name).and_then(Value::as_str)
    }

    /// The natural key of this record.
    #[must_use]
    pub fn lookup(&self) -> Lookup {
        Lookup {
            name: self.name.clone(),
            scope: self.scope.clone(),
        }
    }
}

/// Outcome of a natural-key lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A record matched.
    Found(Record),
    /// Nothing matched.
    Absent,
}

impl Resolution {
    /// Returns the record if found.
    #[must_use]
    pub const fn record(&self) -> Option<&Record> {
        match self {
            Self::Found(record) => Some(record),
            Self::Absent => None,
        }
    }

    /// Consumes the resolution, returning the record if found.
    #[must_use]
    pub fn into_record(self) -> Option<Record> {
        match self {
            Self::Found(record) => Some(record),
            Self::Absent => None,
        }
    }

    /// Returns true if a record matched.
    #[must_use]
    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

impl From<Option<Record>> for Resolution {
    fn from(value: Option<Record>) -> Self {
        value.map_or(Self::Absent, Self::Found)
    }
}

/// Lifecycle a security group or environment variable group applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    /// Running applications.
    #[default]
    Running,
    /// Staging applications.
    Staging,
}

impl Lifecycle {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Staging => "staging",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role a user may hold in an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrgRole {
    /// Base membership.
    #[default]
    User,
    /// Org manager.
    Manager,
    /// Org auditor.
    Auditor,
    /// Billing manager.
    BillingManager,
}

impl OrgRole {
    /// Collection name used by the control plane.
    #[must_use]
    pub const fn collection(self) -> &'static str {
        match self {
            Self::User => "users",
            Self::Manager => "managers",
            Self::Auditor => "auditors",
            Self::BillingManager => "billing_managers",
        }
    }

    /// All roles, base membership first.
    pub const ALL: [Self; 4] = [Self::User, Self::Manager, Self::Auditor, Self::BillingManager];
}

/// Role a user may hold in a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpaceRole {
    /// Space developer.
    #[default]
    Developer,
    /// Space manager.
    Manager,
    /// Space auditor.
    Auditor,
}

impl SpaceRole {
    /// Collection name used by the control plane.
    #[must_use]
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Developer => "developers",
            Self::Manager => "managers",
            Self::Auditor => "auditors",
        }
    }

    /// All roles.
    pub const ALL: [Self; 3] = [Self::Developer, Self::Manager, Self::Auditor];
}

/// Binary many-to-many associations the facade can toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Relation {
    /// Subject organization, object user.
    OrgRole(OrgRole),
    /// Subject space, object user.
    SpaceRole(SpaceRole),
    /// Subject security group, object space.
    SecurityGroupSpace(Lifecycle),
    /// Subject [`PLATFORM`], object security group.
    DefaultSecurityGroup(Lifecycle),
    /// Subject private domain, object organization.
    SharedDomain,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrgRole(role) => write!(f, "organization {}", role.collection()),
            Self::SpaceRole(role) => write!(f, "space {}", role.collection()),
            Self::SecurityGroupSpace(lifecycle) => write!(f, "{lifecycle} security group space"),
            Self::DefaultSecurityGroup(lifecycle) => write!(f, "default {lifecycle} security group"),
            Self::SharedDomain => f.write_str("private domain sharing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_from_json() {
        assert_eq!(Value::from_json(&serde_json::json!(true)), Some(Value::Bool(true)));
        assert_eq!(Value::from_json(&serde_json::json!(-1)), Some(Value::Int(-1)));
        assert_eq!(
            Value::from_json(&serde_json::json!("tcp")),
            Some(Value::Text(String::from("tcp")))
        );
        assert_eq!(Value::from_json(&serde_json::json!([1, 2])), None);
    }

    #[test]
    fn test_value_untagged_serde() {
        let attrs: Attributes =
            serde_json::from_str(r#"{"allow_ssh": false, "memory_limit": 1024, "name": "dev"}"#)
                .expect("attributes should parse");

        assert_eq!(attrs.get("allow_ssh"), Some(&Value::Bool(false)));
        assert_eq!(attrs.get("memory_limit"), Some(&Value::Int(1024)));
        assert_eq!(attrs.get("name"), Some(&Value::from("dev")));
    }

    #[test]
    fn test_attributes_to_json_drops_null() {
        let mut attrs = Attributes::new();
        attrs.insert(String::from("ports"), Value::Null);
        attrs.insert(String::from("protocol"), Value::from("icmp"));

        let json = attributes_to_json(&attrs);
        assert!(!json.contains_key("ports"));
        assert_eq!(json.get("protocol"), Some(&serde_json::json!("icmp")));
    }

    #[test]
    fn test_resolution_from_option() {
        let record = Record::new(ResourceKind::Quota, "q-1", "default");
        assert!(Resolution::from(Some(record)).is_found());
        assert!(!Resolution::from(None).is_found());
    }
}
