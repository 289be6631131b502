//! Per-kind declaration builders.
//!
//! Turns a declaration into a [`DesiredEntity`]: the scope is resolved
//! first, then (for present declarations only) every referenced name is
//! resolved to its identity and the kind's wire attributes are filled in.

use crate::config::{
    DomainSpec, DomainType, EnvVarSpec, FeatureFlagSpec, OrgSpec, QuotaSpec, ResourceSpec,
    SecurityGroupRuleSpec, SecurityGroupSpec, SpaceSpec, UserSpec,
};
use crate::error::ReconcileError;
use crate::foundry::{
    FoundryApi, Lifecycle, Lookup, OrgRole, PLATFORM, Relation, ResourceKind, SpaceRole,
};
use crate::planner::{DesiredEntity, DesiredRelation, Endpoint};

use super::resolver::Resolver;

/// Builds desired entities from declarations.
#[derive(Debug)]
pub struct DeclarationBuilder<'a, C: FoundryApi + ?Sized> {
    resolver: Resolver<'a, C>,
}

impl<'a, C: FoundryApi + ?Sized> DeclarationBuilder<'a, C> {
    /// Creates a builder resolving references through `api`.
    #[must_use]
    pub const fn new(api: &'a C) -> Self {
        Self {
            resolver: Resolver::new(api),
        }
    }

    /// Builds the desired entity of a declaration.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::NotFound` if the scope, or a reference of a
    /// present declaration, does not exist.
    pub async fn build(&self, spec: &ResourceSpec) -> Result<DesiredEntity, ReconcileError> {
        let by = spec.declared_by();
        match spec {
            ResourceSpec::Organization(s) => self.organization(s, &by).await,
            ResourceSpec::Space(s) => self.space(s, &by).await,
            ResourceSpec::Quota(s) => self.quota(s, &by).await,
            ResourceSpec::Domain(s) => self.domain(s, &by).await,
            ResourceSpec::SecurityGroup(s) => self.security_group(s, &by).await,
            ResourceSpec::SecurityGroupRule(s) => self.rule(s, &by).await,
            ResourceSpec::User(s) => self.user(s, &by).await,
            ResourceSpec::FeatureFlag(s) => Ok(Self::feature_flag(s)),
            ResourceSpec::EnvVar(s) => Ok(Self::env_var(s)),
        }
    }

    async fn organization(&self, spec: &OrgSpec, by: &str) -> Result<DesiredEntity, ReconcileError> {
        let mut desired = DesiredEntity::new(
            ResourceKind::Organization,
            Lookup::global(&spec.name),
            spec.state,
        );
        desired.force = spec.force;
        desired.recursive = spec.recursive;

        if !spec.state.is_present() {
            return Ok(desired);
        }

        if let Some(quota) = &spec.quota {
            let guid = self
                .resolver
                .resolve_reference(ResourceKind::Quota, &Lookup::global(quota), by)
                .await?;
            desired = desired.with("quota_definition_guid", guid);
        }

        for member in &spec.members {
            let present = member.state.is_present();
            if let Some(user) = self.user_reference(&member.user, present, by).await? {
                desired = desired.with_relation(DesiredRelation {
                    relation: Relation::OrgRole(member.role),
                    subject: Endpoint::Primary,
                    object: Endpoint::Guid(user),
                    label: format!("user {} as {}", member.user, org_role_name(member.role)),
                    present,
                });
            }
        }

        Ok(desired)
    }

    async fn space(&self, spec: &SpaceSpec, by: &str) -> Result<DesiredEntity, ReconcileError> {
        let org = self
            .resolver
            .resolve_reference(
                ResourceKind::Organization,
                &Lookup::global(&spec.organization),
                by,
            )
            .await?;

        let mut desired = DesiredEntity::new(
            ResourceKind::Space,
            Lookup::scoped(&spec.name, &org),
            spec.state,
        );
        desired.recursive = spec.recursive;

        if !spec.state.is_present() {
            return Ok(desired);
        }

        desired = desired.with("allow_ssh", spec.allow_ssh);

        if let Some(quota) = &spec.quota {
            let guid = self
                .resolver
                .resolve_reference(ResourceKind::SpaceQuota, &Lookup::scoped(quota, &org), by)
                .await?;
            desired = desired.with("space_quota_definition_guid", guid);
        }

        for member in &spec.members {
            let present = member.state.is_present();
            if let Some(user) = self.user_reference(&member.user, present, by).await? {
                desired = desired.with_relation(DesiredRelation {
                    relation: Relation::SpaceRole(member.role),
                    subject: Endpoint::Primary,
                    object: Endpoint::Guid(user),
                    label: format!("user {} as {}", member.user, space_role_name(member.role)),
                    present,
                });
            }
        }

        Ok(desired)
    }

    async fn quota(&self, spec: &QuotaSpec, by: &str) -> Result<DesiredEntity, ReconcileError> {
        let (kind, lookup) = match &spec.organization {
            Some(org) => {
                let org = self
                    .resolver
                    .resolve_reference(ResourceKind::Organization, &Lookup::global(org), by)
                    .await?;
                (ResourceKind::SpaceQuota, Lookup::scoped(&spec.name, org))
            }
            None => (ResourceKind::Quota, Lookup::global(&spec.name)),
        };

        let mut desired = DesiredEntity::new(kind, lookup, spec.state);
        desired.force = spec.force;

        if !spec.state.is_present() {
            return Ok(desired);
        }

        desired = desired
            .with("non_basic_services_allowed", spec.non_basic_services_allowed)
            .with("total_services", spec.total_services)
            .with("total_routes", spec.total_routes)
            .with("memory_limit", spec.memory_limit)
            .with("instance_memory_limit", spec.instance_memory_limit)
            .with("total_service_keys", spec.total_service_keys.unwrap_or(-1))
            .with(
                "total_reserved_route_ports",
                spec.total_reserved_route_ports.unwrap_or(0),
            )
            .with("app_instance_limit", spec.app_instance_limit.unwrap_or(-1));

        if kind == ResourceKind::Quota {
            desired = desired.with(
                "total_private_domains",
                spec.total_private_domains.unwrap_or(-1),
            );
        }

        Ok(desired)
    }

    async fn domain(&self, spec: &DomainSpec, by: &str) -> Result<DesiredEntity, ReconcileError> {
        let kind = match spec.domain_type {
            DomainType::Shared => ResourceKind::SharedDomain,
            DomainType::Private => ResourceKind::PrivateDomain,
        };
        let mut desired = DesiredEntity::new(kind, Lookup::global(&spec.name), spec.state);

        if !spec.state.is_present() {
            return Ok(desired);
        }

        desired = desired.with("router_group_guid", spec.router_group_guid.clone());

        if let Some(owner) = &spec.owner_organization {
            let guid = self
                .resolver
                .resolve_reference(ResourceKind::Organization, &Lookup::global(owner), by)
                .await?;
            desired = desired.with("owning_organization_guid", guid);
        }

        for shared in &spec.shared_organizations {
            let present = shared.state.is_present();
            let lookup = Lookup::global(&shared.organization);
            let org = if present {
                Some(
                    self.resolver
                        .resolve_reference(ResourceKind::Organization, &lookup, by)
                        .await?,
                )
            } else {
                self.resolver
                    .resolve_optional(ResourceKind::Organization, &lookup)
                    .await?
            };
            if let Some(org) = org {
                desired = desired.with_relation(DesiredRelation {
                    relation: Relation::SharedDomain,
                    subject: Endpoint::Primary,
                    object: Endpoint::Guid(org),
                    label: format!("sharing with organization {}", shared.organization),
                    present,
                });
            }
        }

        Ok(desired)
    }

    async fn security_group(
        &self,
        spec: &SecurityGroupSpec,
        by: &str,
    ) -> Result<DesiredEntity, ReconcileError> {
        let mut desired = DesiredEntity::new(
            ResourceKind::SecurityGroup,
            Lookup::global(&spec.name),
            spec.state,
        );

        if !spec.state.is_present() {
            return Ok(desired);
        }

        for binding in &spec.spaces {
            let present = binding.state.is_present();
            let org_lookup = Lookup::global(&binding.organization);
            let org = if present {
                Some(
                    self.resolver
                        .resolve_reference(ResourceKind::Organization, &org_lookup, by)
                        .await?,
                )
            } else {
                self.resolver
                    .resolve_optional(ResourceKind::Organization, &org_lookup)
                    .await?
            };
            let Some(org) = org else {
                continue;
            };

            let space_lookup = Lookup::scoped(&binding.space, org);
            let space = if present {
                Some(
                    self.resolver
                        .resolve_reference(ResourceKind::Space, &space_lookup, by)
                        .await?,
                )
            } else {
                self.resolver
                    .resolve_optional(ResourceKind::Space, &space_lookup)
                    .await?
            };
            if let Some(space) = space {
                desired = desired.with_relation(DesiredRelation {
                    relation: Relation::SecurityGroupSpace(binding.lifecycle),
                    subject: Endpoint::Primary,
                    object: Endpoint::Guid(space),
                    label: format!(
                        "{} binding to space {}/{}",
                        binding.lifecycle, binding.organization, binding.space
                    ),
                    present,
                });
            }
        }

        let defaults = [
            (Lifecycle::Running, spec.running_default),
            (Lifecycle::Staging, spec.staging_default),
        ];
        for (lifecycle, wanted) in defaults {
            if let Some(present) = wanted {
                desired = desired.with_relation(DesiredRelation {
                    relation: Relation::DefaultSecurityGroup(lifecycle),
                    subject: Endpoint::Guid(String::from(PLATFORM)),
                    object: Endpoint::Primary,
                    label: format!("{lifecycle} default"),
                    present,
                });
            }
        }

        Ok(desired)
    }

    async fn rule(
        &self,
        spec: &SecurityGroupRuleSpec,
        by: &str,
    ) -> Result<DesiredEntity, ReconcileError> {
        let group = self
            .resolver
            .resolve_reference(
                ResourceKind::SecurityGroup,
                &Lookup::global(&spec.security_group),
                by,
            )
            .await?;

        let desired = DesiredEntity::new(
            ResourceKind::SecurityGroupRule,
            Lookup::scoped(&spec.name, group),
            spec.state,
        );

        if !spec.state.is_present() {
            return Ok(desired);
        }

        Ok(desired
            .with("protocol", spec.protocol.as_str())
            .with("destination", spec.destination.as_str())
            .with("ports", spec.ports.clone())
            .with("type", spec.icmp_type)
            .with("code", spec.code)
            .with("log", spec.log.then_some(true)))
    }

    async fn user(&self, spec: &UserSpec, by: &str) -> Result<DesiredEntity, ReconcileError> {
        let mut desired = DesiredEntity::new(ResourceKind::User, Lookup::global(&spec.name), spec.state);
        desired.force = spec.force;
        desired.update_password = spec.update_password;

        if !spec.state.is_present() {
            return Ok(desired);
        }

        desired = desired
            .with("given_name", spec.given_name.clone())
            .with("family_name", spec.family_name.clone())
            .with("email", spec.email.clone())
            .with("active", spec.active)
            .with("origin", spec.origin.as_str())
            .with("external_id", spec.external_id.clone())
            .with("password", spec.password.clone());

        if let (Some(org), Some(space)) = (&spec.default_organization, &spec.default_space) {
            let org = self
                .resolver
                .resolve_reference(ResourceKind::Organization, &Lookup::global(org), by)
                .await?;
            let space = self
                .resolver
                .resolve_reference(ResourceKind::Space, &Lookup::scoped(space, org), by)
                .await?;
            desired = desired.with("default_space_guid", space);
        }

        Ok(desired)
    }

    fn feature_flag(spec: &FeatureFlagSpec) -> DesiredEntity {
        DesiredEntity::new(
            ResourceKind::FeatureFlag,
            Lookup::global(&spec.name),
            spec.state,
        )
        .with("enabled", spec.value)
    }

    fn env_var(spec: &EnvVarSpec) -> DesiredEntity {
        let desired = DesiredEntity::new(
            ResourceKind::EnvironmentVariable,
            Lookup::scoped(&spec.name, spec.context.as_str()),
            spec.state,
        );
        if spec.state.is_present() {
            desired.with("value", spec.value.clone())
        } else {
            desired
        }
    }

    /// Resolves a member's user. A user that must hold the role has to exist;
    /// a missing user trivially lacks it.
    async fn user_reference(
        &self,
        name: &str,
        present: bool,
        by: &str,
    ) -> Result<Option<String>, ReconcileError> {
        let lookup = Lookup::global(name);
        if present {
            self.resolver
                .resolve_reference(ResourceKind::User, &lookup, by)
                .await
                .map(Some)
        } else {
            self.resolver.resolve_optional(ResourceKind::User, &lookup).await
        }
    }
}

const fn org_role_name(role: OrgRole) -> &'static str {
    match role {
        OrgRole::User => "user",
        OrgRole::Manager => "manager",
        OrgRole::Auditor => "auditor",
        OrgRole::BillingManager => "billing manager",
    }
}

const fn space_role_name(role: SpaceRole) -> &'static str {
    match role {
        SpaceRole::Developer => "developer",
        SpaceRole::Manager => "manager",
        SpaceRole::Auditor => "auditor",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundry::{MemoryFoundry, Value};

    fn declaration(yaml: &str) -> ResourceSpec {
        serde_yaml::from_str(yaml).expect("valid declaration")
    }

    #[tokio::test]
    async fn test_space_scope_is_always_required() {
        let foundry = MemoryFoundry::new();
        let spec = declaration("kind: space\nname: stest\norganization: nonexistent\nstate: absent\n");

        let err = DeclarationBuilder::new(&foundry)
            .build(&spec)
            .await
            .expect_err("scope must exist");

        assert!(matches!(err, ReconcileError::NotFound { ref name, .. } if name == "nonexistent"));
    }

    #[tokio::test]
    async fn test_organization_references() {
        let foundry = MemoryFoundry::with_defaults();
        let quota = foundry.get(ResourceKind::Quota, &Lookup::global("default")).expect("seeded quota");
        let ada = foundry.seed(ResourceKind::User, "ada", None, Vec::<(String, Value)>::new());
        let spec = declaration(
            r"
kind: organization
name: acme
quota: default
members:
  - user: ada
  - user: ada
    role: manager
  - user: ghost
    state: absent
",
        );

        let desired = DeclarationBuilder::new(&foundry)
            .build(&spec)
            .await
            .expect("references resolve");

        assert_eq!(desired.declared("quota_definition_guid"), &Value::from(quota.guid));
        assert_eq!(desired.relations.len(), 2);
        assert_eq!(desired.relations[1].relation, Relation::OrgRole(OrgRole::Manager));
        assert_eq!(desired.relations[1].object, Endpoint::Guid(ada.guid));
        assert_eq!(desired.relations[1].label, "user ada as manager");
    }

    #[tokio::test]
    async fn test_absent_declaration_skips_references() {
        let foundry = MemoryFoundry::new();
        let spec = declaration("kind: organization\nname: acme\nquota: missing\nstate: absent\n");

        let desired = DeclarationBuilder::new(&foundry)
            .build(&spec)
            .await
            .expect("references are not needed for removal");

        assert!(desired.attributes.is_empty());
        assert!(!desired.is_present());
    }

    #[tokio::test]
    async fn test_quota_defaults() {
        let foundry = MemoryFoundry::new();
        foundry.seed(ResourceKind::Organization, "acme", None, Vec::<(String, Value)>::new());
        let spec = declaration(
            r"
kind: quota
name: small
organization: acme
non_basic_services_allowed: false
total_services: 5
total_routes: 10
memory_limit: 1024
instance_memory_limit: 256
",
        );

        let desired = DeclarationBuilder::new(&foundry)
            .build(&spec)
            .await
            .expect("organization exists");

        assert_eq!(desired.kind, ResourceKind::SpaceQuota);
        assert_eq!(desired.declared("total_service_keys"), &Value::Int(-1));
        assert_eq!(desired.declared("total_reserved_route_ports"), &Value::Int(0));
        assert!(desired.declared("total_private_domains").is_null());
    }

    #[tokio::test]
    async fn test_rule_attributes() {
        let foundry = MemoryFoundry::new();
        let group = foundry.seed(ResourceKind::SecurityGroup, "sg1", None, Vec::<(String, Value)>::new());
        let spec = declaration(
            r"
kind: security_group_rule
name: ping
security_group: sg1
protocol: icmp
type: 0
code: 0
",
        );

        let desired = DeclarationBuilder::new(&foundry)
            .build(&spec)
            .await
            .expect("group exists");

        assert_eq!(desired.lookup.scope.as_deref(), Some(group.guid.as_str()));
        assert_eq!(desired.declared("protocol"), &Value::from("icmp"));
        assert_eq!(desired.declared("destination"), &Value::from("0.0.0.0/0"));
        assert!(desired.declared("ports").is_null());
        assert!(desired.declared("log").is_null());
    }

    #[tokio::test]
    async fn test_default_security_group_relations() {
        let foundry = MemoryFoundry::new();
        let spec = declaration("kind: security_group\nname: public\nrunning_default: true\n");

        let desired = DeclarationBuilder::new(&foundry)
            .build(&spec)
            .await
            .expect("no references");

        assert_eq!(desired.relations.len(), 1);
        let relation = &desired.relations[0];
        assert_eq!(relation.relation, Relation::DefaultSecurityGroup(Lifecycle::Running));
        assert_eq!(relation.subject, Endpoint::Guid(String::from(PLATFORM)));
        assert_eq!(relation.object, Endpoint::Primary);
    }
}
