//! Read-only inspection of organizations and spaces.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::error::ReconcileError;
use crate::foundry::{
    Attributes, FoundryApi, Lifecycle, Lookup, OrgRole, Record, Relation, ResourceKind, SpaceRole,
};
use crate::reconciler::Resolver;

const REQUIRED_BY: &str = "facts";

/// Quota snapshot of an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaFacts {
    /// Quota name.
    pub name: String,
    /// Limits.
    pub limits: Attributes,
}

/// Facts about an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrgFacts {
    /// Organization name.
    pub name: String,
    /// Identity.
    pub guid: String,
    /// Status (`active` or `suspended`).
    pub status: Option<String>,
    /// Assigned quota.
    pub quota: Option<QuotaFacts>,
    /// User names by role collection.
    pub members: BTreeMap<String, Vec<String>>,
    /// Private domains owned by the organization.
    pub owned_domains: Vec<String>,
    /// Private domains shared with the organization.
    pub shared_domains: Vec<String>,
    /// Space names.
    pub spaces: Vec<String>,
}

/// Facts about a space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpaceFacts {
    /// Space name.
    pub name: String,
    /// Identity.
    pub guid: String,
    /// Owning organization name.
    pub organization: String,
    /// Whether SSH access is allowed.
    pub allow_ssh: Option<bool>,
    /// User names by role collection.
    pub members: BTreeMap<String, Vec<String>>,
    /// Security groups bound for running applications.
    pub running_security_groups: Vec<String>,
    /// Security groups bound for staging applications.
    pub staging_security_groups: Vec<String>,
}

/// Result of a facts query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Facts {
    /// Organization names.
    Organizations(Vec<String>),
    /// One organization.
    Organization(Box<OrgFacts>),
    /// One space.
    Space(Box<SpaceFacts>),
}

/// Collects facts through the client facade.
#[derive(Debug)]
pub struct FactsCollector<'a, C: FoundryApi + ?Sized> {
    api: &'a C,
    resolver: Resolver<'a, C>,
}

impl<'a, C: FoundryApi + ?Sized> FactsCollector<'a, C> {
    /// Creates a collector.
    #[must_use]
    pub const fn new(api: &'a C) -> Self {
        Self {
            api,
            resolver: Resolver::new(api),
        }
    }

    /// Answers a query: every organization, one organization, or one space.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::NotFound` if the organization or space does
    /// not exist, and `ReconcileError::Validation` for a space without an
    /// organization.
    pub async fn collect(
        &self,
        org: Option<&str>,
        space: Option<&str>,
    ) -> Result<Facts, ReconcileError> {
        match (org, space) {
            (None, None) => self.organization_names().await.map(Facts::Organizations),
            (Some(org), None) => self
                .organization(org)
                .await
                .map(|facts| Facts::Organization(Box::new(facts))),
            (Some(org), Some(space)) => self
                .space(org, space)
                .await
                .map(|facts| Facts::Space(Box::new(facts))),
            (None, Some(space)) => Err(ReconcileError::validation(
                "space",
                space,
                "an organization is required",
            )),
        }
    }

    /// Lists organization names.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::Remote` if the listing failed.
    pub async fn organization_names(&self) -> Result<Vec<String>, ReconcileError> {
        let mut names: Vec<String> = self
            .list(ResourceKind::Organization, None)
            .await?
            .into_iter()
            .map(|r| r.name)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Collects facts about an organization.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::NotFound` if the organization does not exist.
    pub async fn organization(&self, name: &str) -> Result<OrgFacts, ReconcileError> {
        let org = self
            .resolver
            .require(ResourceKind::Organization, &Lookup::global(name), REQUIRED_BY)
            .await?;
        debug!("Collecting facts for organization {name}");

        let quota = match org.text("quota_definition_guid") {
            Some(guid) => self
                .list(ResourceKind::Quota, None)
                .await?
                .into_iter()
                .find(|q| q.guid == guid)
                .map(|q| QuotaFacts {
                    name: q.name,
                    limits: q.attributes,
                }),
            None => None,
        };

        let users = self.user_names().await?;
        let mut members = BTreeMap::new();
        for role in OrgRole::ALL {
            let guids = self.related(&org, Relation::OrgRole(role), &org.guid).await?;
            members.insert(role.collection().to_string(), names_of(&users, guids));
        }

        let mut owned_domains = Vec::new();
        let mut shared_domains = Vec::new();
        for domain in self.list(ResourceKind::PrivateDomain, None).await? {
            if domain.text("owning_organization_guid") == Some(org.guid.as_str()) {
                owned_domains.push(domain.name);
            } else if self
                .related(&org, Relation::SharedDomain, &domain.guid)
                .await?
                .contains(&org.guid)
            {
                shared_domains.push(domain.name);
            }
        }

        let mut spaces: Vec<String> = self
            .list(ResourceKind::Space, Some(org.guid.clone()))
            .await?
            .into_iter()
            .map(|s| s.name)
            .collect();
        spaces.sort();

        Ok(OrgFacts {
            status: org.text("status").map(String::from),
            name: org.name,
            guid: org.guid,
            quota,
            members,
            owned_domains,
            shared_domains,
            spaces,
        })
    }

    /// Collects facts about a space.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::NotFound` if the organization or the space
    /// does not exist.
    pub async fn space(&self, org: &str, name: &str) -> Result<SpaceFacts, ReconcileError> {
        let org_guid = self
            .resolver
            .resolve_reference(ResourceKind::Organization, &Lookup::global(org), REQUIRED_BY)
            .await?;
        let space = self
            .resolver
            .require(ResourceKind::Space, &Lookup::scoped(name, org_guid), REQUIRED_BY)
            .await?;
        debug!("Collecting facts for space {org}/{name}");

        let users = self.user_names().await?;
        let mut members = BTreeMap::new();
        for role in SpaceRole::ALL {
            let guids = self.related(&space, Relation::SpaceRole(role), &space.guid).await?;
            members.insert(role.collection().to_string(), names_of(&users, guids));
        }

        let mut running_security_groups = Vec::new();
        let mut staging_security_groups = Vec::new();
        for group in self.list(ResourceKind::SecurityGroup, None).await? {
            for lifecycle in [Lifecycle::Running, Lifecycle::Staging] {
                let bound = self
                    .related(&space, Relation::SecurityGroupSpace(lifecycle), &group.guid)
                    .await?
                    .contains(&space.guid);
                if bound {
                    match lifecycle {
                        Lifecycle::Running => running_security_groups.push(group.name.clone()),
                        Lifecycle::Staging => staging_security_groups.push(group.name.clone()),
                    }
                }
            }
        }

        Ok(SpaceFacts {
            allow_ssh: space.attr("allow_ssh").and_then(|v| v.as_bool()),
            name: space.name,
            guid: space.guid,
            organization: org.to_string(),
            members,
            running_security_groups,
            staging_security_groups,
        })
    }

    async fn list(
        &self,
        kind: ResourceKind,
        scope: Option<String>,
    ) -> Result<Vec<Record>, ReconcileError> {
        self.api
            .list(kind, scope)
            .await
            .map_err(|e| ReconcileError::remote(kind.label(), "*", "list", e))
    }

    async fn related(
        &self,
        about: &Record,
        relation: Relation,
        subject: &str,
    ) -> Result<Vec<String>, ReconcileError> {
        self.api
            .list_relation(relation, subject)
            .await
            .map(|set| set.into_iter().collect())
            .map_err(|e| {
                ReconcileError::remote(about.kind.label(), &about.name, format!("read {relation} of"), e)
            })
    }

    async fn user_names(&self) -> Result<HashMap<String, String>, ReconcileError> {
        Ok(self
            .list(ResourceKind::User, None)
            .await?
            .into_iter()
            .map(|u| (u.guid, u.name))
            .collect())
    }
}

/// Maps identities to user names, keeping unknown identities as-is.
fn names_of(users: &HashMap<String, String>, guids: Vec<String>) -> Vec<String> {
    let mut names: Vec<String> = guids
        .into_iter()
        .map(|guid| users.get(&guid).cloned().unwrap_or(guid))
        .collect();
    names.sort();
    names
}
