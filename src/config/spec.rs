//! Declaration types for the reconciliation system.
//!
//! This module defines all the structs that map to the `cfconverge.yaml`
//! manifest and to single-invocation parameter objects. A declaration only
//! names other entities; identities are resolved at reconciliation time.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::foundry::{Lifecycle, OrgRole, ResourceKind, SpaceRole};

/// The root structure of a manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ConvergeConfig {
    /// Control plane connection.
    #[serde(default)]
    pub target: TargetConfig,
    /// Declarations, reconciled in file order.
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
}

/// Control plane connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetConfig {
    /// Cloud Controller URL (e.g. `https://api.sys.example.com`).
    #[serde(default)]
    pub api_url: String,
    /// Admin user name.
    #[serde(default = "default_admin_user")]
    pub admin_user: String,
    /// Admin password; usually supplied through `CF_ADMIN_PASSWORD`.
    #[serde(default, skip_serializing)]
    pub admin_password: Option<String>,
    /// Verify TLS certificates.
    #[serde(default = "default_true")]
    pub validate_certs: bool,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            admin_user: default_admin_user(),
            admin_password: None,
            validate_certs: true,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Desired existence of an entity or association.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    /// The entity must exist.
    #[default]
    Present,
    /// The entity must not exist.
    Absent,
}

impl DesiredState {
    /// Returns true for [`DesiredState::Present`].
    #[must_use]
    pub const fn is_present(self) -> bool {
        matches!(self, Self::Present)
    }
}

/// A single declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    /// Organization.
    Organization(OrgSpec),
    /// Space.
    Space(SpaceSpec),
    /// Organization quota, or space quota when scoped by an organization.
    Quota(QuotaSpec),
    /// Shared or private domain.
    Domain(DomainSpec),
    /// Security group.
    SecurityGroup(SecurityGroupSpec),
    /// Security group rule.
    SecurityGroupRule(SecurityGroupRuleSpec),
    /// User.
    User(UserSpec),
    /// Feature flag.
    FeatureFlag(FeatureFlagSpec),
    /// Environment variable group entry.
    EnvVar(EnvVarSpec),
}

impl ResourceSpec {
    /// Entity kind the declaration reconciles.
    #[must_use]
    pub const fn resource_kind(&self) -> ResourceKind {
        match self {
            Self::Organization(_) => ResourceKind::Organization,
            Self::Space(_) => ResourceKind::Space,
            Self::Quota(spec) => {
                if spec.organization.is_some() {
                    ResourceKind::SpaceQuota
                } else {
                    ResourceKind::Quota
                }
            }
            Self::Domain(spec) => match spec.domain_type {
                DomainType::Shared => ResourceKind::SharedDomain,
                DomainType::Private => ResourceKind::PrivateDomain,
            },
            Self::SecurityGroup(_) => ResourceKind::SecurityGroup,
            Self::SecurityGroupRule(_) => ResourceKind::SecurityGroupRule,
            Self::User(_) => ResourceKind::User,
            Self::FeatureFlag(_) => ResourceKind::FeatureFlag,
            Self::EnvVar(_) => ResourceKind::EnvironmentVariable,
        }
    }

    /// Human-readable kind label.
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        self.resource_kind().label()
    }

    /// Natural key.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Organization(spec) => &spec.name,
            Self::Space(spec) => &spec.name,
            Self::Quota(spec) => &spec.name,
            Self::Domain(spec) => &spec.name,
            Self::SecurityGroup(spec) => &spec.name,
            Self::SecurityGroupRule(spec) => &spec.name,
            Self::User(spec) => &spec.name,
            Self::FeatureFlag(spec) => &spec.name,
            Self::EnvVar(spec) => &spec.name,
        }
    }

    /// Desired existence.
    #[must_use]
    pub const fn state(&self) -> DesiredState {
        match self {
            Self::Organization(spec) => spec.state,
            Self::Space(spec) => spec.state,
            Self::Quota(spec) => spec.state,
            Self::Domain(spec) => spec.state,
            Self::SecurityGroup(spec) => spec.state,
            Self::SecurityGroupRule(spec) => spec.state,
            Self::User(spec) => spec.state,
            Self::FeatureFlag(spec) => spec.state,
            Self::EnvVar(spec) => spec.state,
        }
    }

    /// Name of the enclosing scope, for scoped kinds.
    #[must_use]
    pub fn scope_name(&self) -> Option<&str> {
        match self {
            Self::Space(spec) => Some(&spec.organization),
            Self::Quota(spec) => spec.organization.as_deref(),
            Self::SecurityGroupRule(spec) => Some(&spec.security_group),
            Self::EnvVar(spec) => Some(spec.context.as_str()),
            _ => None,
        }
    }

    /// Short description used in error context, e.g. `space 'dev'`.
    #[must_use]
    pub fn declared_by(&self) -> String {
        format!("{} '{}'", self.kind_label(), self.name())
    }
}

/// Role membership of a user in an organization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrgMemberSpec {
    /// User name.
    pub user: String,
    /// Role to hold.
    #[serde(default)]
    pub role: OrgRole,
    /// Whether the role must be held.
    #[serde(default)]
    pub state: DesiredState,
}

/// Role membership of a user in a space.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpaceMemberSpec {
    /// User name.
    pub user: String,
    /// Role to hold.
    #[serde(default)]
    pub role: SpaceRole,
    /// Whether the role must be held.
    #[serde(default)]
    pub state: DesiredState,
}

/// Organization declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct OrgSpec {
    /// Organization name.
    #[serde(alias = "id")]
    #[validate(length(min = 1, message = "name cannot be empty"))]
    pub name: String,
    /// Desired existence.
    #[serde(default)]
    pub state: DesiredState,
    /// Quota name.
    #[serde(default)]
    pub quota: Option<String>,
    /// Role memberships, granted in order.
    #[serde(default)]
    pub members: Vec<OrgMemberSpec>,
    /// Delete spaces and apps along with the organization.
    #[serde(default)]
    pub recursive: bool,
    /// Allow deleting a platform organization.
    #[serde(default)]
    pub force: bool,
}

/// Space declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct SpaceSpec {
    /// Space name.
    #[serde(alias = "id")]
    #[validate(length(min = 1, message = "name cannot be empty"))]
    pub name: String,
    /// Owning organization name.
    #[serde(alias = "org")]
    #[validate(length(min = 1, message = "organization cannot be empty"))]
    pub organization: String,
    /// Desired existence.
    #[serde(default)]
    pub state: DesiredState,
    /// Allow SSH access to applications.
    #[serde(default)]
    pub allow_ssh: Option<bool>,
    /// Space quota name, resolved within the organization.
    #[serde(default)]
    pub quota: Option<String>,
    /// Role memberships, granted in order.
    #[serde(default)]
    pub members: Vec<SpaceMemberSpec>,
    /// Delete apps and services along with the space.
    #[serde(default)]
    pub recursive: bool,
}

/// Quota declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct QuotaSpec {
    /// Quota name.
    #[serde(alias = "id")]
    #[validate(length(min = 1, message = "name cannot be empty"))]
    pub name: String,
    /// Organization owning a space quota.
    #[serde(default, alias = "org")]
    pub organization: Option<String>,
    /// Desired existence.
    #[serde(default)]
    pub state: DesiredState,
    /// Allow paid service plans.
    #[serde(default)]
    pub non_basic_services_allowed: Option<bool>,
    /// Service instance limit.
    #[serde(default)]
    #[validate(range(min = -1, message = "must be -1 (unlimited) or more"))]
    pub total_services: Option<i64>,
    /// Route limit.
    #[serde(default)]
    #[validate(range(min = -1, message = "must be -1 (unlimited) or more"))]
    pub total_routes: Option<i64>,
    /// Memory limit in megabytes.
    #[serde(default)]
    #[validate(range(min = -1, message = "must be -1 (unlimited) or more"))]
    pub memory_limit: Option<i64>,
    /// Per-instance memory limit in megabytes.
    #[serde(default)]
    #[validate(range(min = -1, message = "must be -1 (unlimited) or more"))]
    pub instance_memory_limit: Option<i64>,
    /// Service key limit.
    #[serde(default)]
    #[validate(range(min = -1, message = "must be -1 (unlimited) or more"))]
    pub total_service_keys: Option<i64>,
    /// Reserved route port limit.
    #[serde(default)]
    #[validate(range(min = -1, message = "must be -1 (unlimited) or more"))]
    pub total_reserved_route_ports: Option<i64>,
    /// Private domain limit (organization quotas only).
    #[serde(default)]
    #[validate(range(min = -1, message = "must be -1 (unlimited) or more"))]
    pub total_private_domains: Option<i64>,
    /// Application instance limit.
    #[serde(default)]
    #[validate(range(min = -1, message = "must be -1 (unlimited) or more"))]
    pub app_instance_limit: Option<i64>,
    /// Allow deleting a platform quota.
    #[serde(default)]
    pub force: bool,
}

/// Domain type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DomainType {
    /// Available to every organization.
    Shared,
    /// Owned by one organization.
    #[default]
    Private,
}

/// Sharing of a private domain with an organization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SharedOrgSpec {
    /// Organization name.
    pub organization: String,
    /// Whether the domain must be shared.
    #[serde(default)]
    pub state: DesiredState,
}

/// Domain declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct DomainSpec {
    /// Domain name.
    #[serde(alias = "id")]
    #[validate(length(min = 1, message = "name cannot be empty"))]
    pub name: String,
    /// Shared or private.
    #[serde(rename = "type", default)]
    pub domain_type: DomainType,
    /// Desired existence.
    #[serde(default)]
    pub state: DesiredState,
    /// Owning organization of a private domain.
    #[serde(default)]
    pub owner_organization: Option<String>,
    /// Router group of a shared TCP domain.
    #[serde(default)]
    pub router_group_guid: Option<String>,
    /// Organizations a private domain is shared with.
    #[serde(default)]
    pub shared_organizations: Vec<SharedOrgSpec>,
}

/// Binding of a security group to a space.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityGroupSpaceSpec {
    /// Organization name.
    pub organization: String,
    /// Space name.
    pub space: String,
    /// Lifecycle the binding applies to.
    #[serde(default)]
    pub lifecycle: Lifecycle,
    /// Whether the binding must exist.
    #[serde(default)]
    pub state: DesiredState,
}

/// Security group declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct SecurityGroupSpec {
    /// Security group name.
    #[serde(alias = "id")]
    #[validate(length(min = 1, message = "name cannot be empty"))]
    pub name: String,
    /// Desired existence.
    #[serde(default)]
    pub state: DesiredState,
    /// Space bindings.
    #[serde(default)]
    pub spaces: Vec<SecurityGroupSpaceSpec>,
    /// Platform-wide default for running applications; unset leaves it alone.
    #[serde(default)]
    pub running_default: Option<bool>,
    /// Platform-wide default for staging applications; unset leaves it alone.
    #[serde(default)]
    pub staging_default: Option<bool>,
}

/// Protocol of a security group rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleProtocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
    /// ICMP.
    Icmp,
    /// Any protocol.
    #[default]
    All,
}

impl RuleProtocol {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Icmp => "icmp",
            Self::All => "all",
        }
    }
}

/// Security group rule declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct SecurityGroupRuleSpec {
    /// Rule description, unique within the group.
    #[serde(alias = "description")]
    #[validate(length(min = 1, message = "description cannot be empty"))]
    pub name: String,
    /// Security group name.
    #[serde(alias = "sec_group")]
    #[validate(length(min = 1, message = "security group cannot be empty"))]
    pub security_group: String,
    /// Desired existence.
    #[serde(default)]
    pub state: DesiredState,
    /// Protocol.
    #[serde(default)]
    pub protocol: RuleProtocol,
    /// Destination IP, CIDR or range.
    #[serde(default = "default_destination")]
    pub destination: String,
    /// Port, range or comma separated list.
    #[serde(default)]
    pub ports: Option<String>,
    /// ICMP type.
    #[serde(rename = "type", default)]
    pub icmp_type: Option<i64>,
    /// ICMP code.
    #[serde(default)]
    pub code: Option<i64>,
    /// Log matching traffic.
    #[serde(default)]
    pub log: bool,
}

/// User declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct UserSpec {
    /// User name.
    #[serde(alias = "id")]
    #[validate(length(min = 1, message = "name cannot be empty"))]
    pub name: String,
    /// Desired existence.
    #[serde(default)]
    pub state: DesiredState,
    /// Given name.
    #[serde(default)]
    pub given_name: Option<String>,
    /// Family name.
    #[serde(default)]
    pub family_name: Option<String>,
    /// Primary email address.
    #[serde(default)]
    #[validate(email(message = "email is not a valid address"))]
    pub email: Option<String>,
    /// Initial password.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Whether the account is active.
    #[serde(default = "default_true")]
    pub active: bool,
    /// Identity provider.
    #[serde(default = "default_origin")]
    pub origin: String,
    /// Identifier at the identity provider.
    #[serde(default)]
    pub external_id: Option<String>,
    /// Organization of the default space.
    #[serde(default)]
    pub default_organization: Option<String>,
    /// Default space name.
    #[serde(default)]
    pub default_space: Option<String>,
    /// Write the declared password even if the user exists. The stored
    /// password cannot be read back, so every run with this set reports a
    /// change.
    #[serde(default)]
    pub update_password: bool,
    /// Allow deleting a platform user.
    #[serde(default)]
    pub force: bool,
}

/// Feature flag declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct FeatureFlagSpec {
    /// Flag name.
    #[serde(alias = "id")]
    #[validate(length(min = 1, message = "name cannot be empty"))]
    pub name: String,
    /// Desired existence; flags cannot be absent.
    #[serde(default)]
    pub state: DesiredState,
    /// Whether the flag is enabled.
    #[serde(default)]
    pub value: Option<bool>,
}

/// Environment variable group entry declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct EnvVarSpec {
    /// Variable name.
    #[serde(alias = "id")]
    #[validate(length(min = 1, message = "name cannot be empty"))]
    pub name: String,
    /// Desired existence.
    #[serde(default)]
    pub state: DesiredState,
    /// Variable value.
    #[serde(default)]
    pub value: Option<String>,
    /// Group the entry belongs to.
    #[serde(default)]
    pub context: Lifecycle,
}

/// A single invocation: one declaration plus run options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// The declaration.
    pub resource: ResourceSpec,
    /// Preview without mutating.
    pub dry_run: bool,
}

fn default_admin_user() -> String {
    String::from("admin")
}

const fn default_true() -> bool {
    true
}

const fn default_timeout_secs() -> u64 {
    crate::foundry::DEFAULT_TIMEOUT_SECS
}

fn default_destination() -> String {
    String::from("0.0.0.0/0")
}

fn default_origin() -> String {
    String::from("uaa")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_declarations() {
        let yaml = r"
- kind: organization
  name: acme
  quota: default
- kind: space
  name: dev
  org: acme
  allow_ssh: false
- kind: security_group_rule
  description: https
  sec_group: sg1
  protocol: tcp
  destination: 10.0.0.0/8
  ports: '443'
";
        let resources: Vec<ResourceSpec> = serde_yaml::from_str(yaml).expect("valid manifest");

        assert_eq!(resources.len(), 3);
        assert_eq!(resources[0].resource_kind(), ResourceKind::Organization);
        assert_eq!(resources[1].scope_name(), Some("acme"));
        let ResourceSpec::SecurityGroupRule(rule) = &resources[2] else {
            panic!("expected a rule");
        };
        assert_eq!(rule.name, "https");
        assert_eq!(rule.protocol, RuleProtocol::Tcp);
        assert!(!rule.log);
    }

    #[test]
    fn test_quota_scope_selects_kind() {
        let yaml = r"
kind: quota
name: small
organization: acme
memory_limit: 1024
";
        let spec: ResourceSpec = serde_yaml::from_str(yaml).expect("valid quota");
        assert_eq!(spec.resource_kind(), ResourceKind::SpaceQuota);
        assert_eq!(spec.kind_label(), "space quota");
    }

    #[test]
    fn test_defaults() {
        let yaml = r"
kind: user
name: ada
";
        let ResourceSpec::User(user) = serde_yaml::from_str::<ResourceSpec>(yaml).expect("valid user") else {
            panic!("expected a user");
        };
        assert!(user.active);
        assert_eq!(user.origin, "uaa");
        assert_eq!(user.state, DesiredState::Present);

        let target = TargetConfig::default();
        assert!(target.validate_certs);
        assert_eq!(target.admin_user, "admin");
    }

    #[test]
    fn test_field_constraints() {
        let quota = QuotaSpec {
            name: String::new(),
            organization: None,
            state: DesiredState::Present,
            non_basic_services_allowed: Some(true),
            total_services: Some(-2),
            total_routes: Some(10),
            memory_limit: Some(1024),
            instance_memory_limit: Some(-1),
            total_service_keys: None,
            total_reserved_route_ports: None,
            total_private_domains: None,
            app_instance_limit: None,
            force: false,
        };

        let errors = quota.validate().expect_err("invalid quota");
        let fields = errors.field_errors();
        assert!(fields.contains_key("name"));
        assert!(fields.contains_key("total_services"));
    }
}
