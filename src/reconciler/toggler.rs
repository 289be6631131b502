//! Relationship toggling.
//!
//! A relation is a set of object identities per subject. Toggling compares
//! the desired membership of one object with that set and yields at most
//! one add or remove.

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::error::ApiResult;
use crate::foundry::{FoundryApi, Relation};
use crate::planner::{DesiredRelation, Endpoint, RelationChange};

/// Plans and applies relation membership changes.
///
/// Listings are cached for the lifetime of the toggler, which is one
/// invocation; planned changes are folded into the cache so a relation
/// declared twice is only changed once.
#[derive(Debug)]
pub struct RelationToggler<'a, C: FoundryApi + ?Sized> {
    api: &'a C,
    memberships: HashMap<(Relation, String), BTreeSet<String>>,
}

impl<'a, C: FoundryApi + ?Sized> RelationToggler<'a, C> {
    /// Creates a toggler with an empty listing cache.
    #[must_use]
    pub fn new(api: &'a C) -> Self {
        Self {
            api,
            memberships: HashMap::new(),
        }
    }

    /// Returns the current object set of a relation.
    ///
    /// # Errors
    ///
    /// Returns the facade error if the listing failed.
    pub async fn membership(
        &mut self,
        relation: Relation,
        subject: &str,
    ) -> ApiResult<&mut BTreeSet<String>> {
        let key = (relation, subject.to_string());
        if !self.memberships.contains_key(&key) {
            let objects = self.api.list_relation(relation, subject).await?;
            debug!("{relation} of {subject}: {} members", objects.len());
            self.memberships.insert(key.clone(), objects);
        }
        Ok(self.memberships.entry(key).or_default())
    }

    /// Plans the change a desired relation needs, if any.
    ///
    /// `primary` is the identity of the entity being reconciled; when it does
    /// not exist yet every present relation is an add.
    ///
    /// # Errors
    ///
    /// Returns the facade error if the current membership could not be read.
    pub async fn plan(
        &mut self,
        desired: &DesiredRelation,
        primary: Option<&str>,
    ) -> ApiResult<Option<RelationChange>> {
        let change = |add| RelationChange {
            relation: desired.relation,
            subject: desired.subject.clone(),
            object: desired.object.clone(),
            label: desired.label.clone(),
            add,
        };

        let (Some(subject), Some(object)) = (
            desired.subject.resolve(primary),
            desired.object.resolve(primary),
        ) else {
            return Ok(desired.present.then(|| change(true)));
        };

        let members = self.membership(desired.relation, subject).await?;
        let is_member = members.contains(object);
        if is_member == desired.present {
            debug!("{}: already {}", desired.label, if is_member { "present" } else { "absent" });
            return Ok(None);
        }

        if desired.present {
            members.insert(object.to_string());
        } else {
            members.remove(object);
        }
        Ok(Some(change(desired.present)))
    }

    /// Brings one association to the desired membership, returning whether
    /// anything changed.
    ///
    /// # Errors
    ///
    /// Returns the facade error if the listing or the add/remove call failed.
    /// Rejections by the control plane (e.g. a role hierarchy violation) are
    /// passed through unchanged.
    pub async fn toggle(
        &mut self,
        relation: Relation,
        subject: &str,
        object: &str,
        present: bool,
    ) -> ApiResult<bool> {
        let desired = DesiredRelation {
            relation,
            subject: Endpoint::Guid(subject.to_string()),
            object: Endpoint::Guid(object.to_string()),
            label: format!("{relation} {object}"),
            present,
        };

        let Some(change) = self.plan(&desired, None).await? else {
            return Ok(false);
        };

        let result = if change.add {
            self.api.add_relation(relation, subject, object).await
        } else {
            self.api.remove_relation(relation, subject, object).await
        };
        if result.is_err() {
            self.memberships.remove(&(relation, subject.to_string()));
        }
        result.map(|()| true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::foundry::{MemoryFoundry, MockFoundryApi, OrgRole, ResourceKind, SpaceRole, Value};

    fn relation(present: bool) -> DesiredRelation {
        DesiredRelation {
            relation: Relation::OrgRole(OrgRole::Manager),
            subject: Endpoint::Primary,
            object: Endpoint::Guid(String::from("u-1")),
            label: String::from("user ada as manager"),
            present,
        }
    }

    #[tokio::test]
    async fn test_toggle_is_idempotent() {
        let foundry = MemoryFoundry::new();
        let relation = Relation::OrgRole(OrgRole::Auditor);

        let mut toggler = RelationToggler::new(&foundry);
        assert!(toggler.toggle(relation, "o-1", "u-1", true).await.expect("add"));
        assert!(!toggler.toggle(relation, "o-1", "u-1", true).await.expect("no-op"));

        let mut toggler = RelationToggler::new(&foundry);
        assert!(!toggler.toggle(relation, "o-1", "u-1", true).await.expect("no-op"));
        assert!(toggler.toggle(relation, "o-1", "u-1", false).await.expect("remove"));
        assert!(!toggler.toggle(relation, "o-1", "u-1", false).await.expect("no-op"));

        assert!(foundry.related(relation, "o-1").is_empty());
        assert_eq!(foundry.mutation_count(), 2);
    }

    #[tokio::test]
    async fn test_plan_without_primary_identity() {
        let mut api = MockFoundryApi::new();
        api.expect_list_relation().never();

        let mut toggler = RelationToggler::new(&api);
        let add = toggler.plan(&relation(true), None).await.expect("no listing");
        let remove = toggler.plan(&relation(false), None).await.expect("no listing");

        assert_eq!(add.map(|c| c.add), Some(true));
        assert!(remove.is_none());
    }

    #[tokio::test]
    async fn test_plan_reads_listing_once() {
        let mut api = MockFoundryApi::new();
        api.expect_list_relation()
            .times(1)
            .returning(|_, _| Ok(BTreeSet::from([String::from("u-2")])));

        let mut toggler = RelationToggler::new(&api);
        let first = toggler.plan(&relation(true), Some("o-1")).await.expect("planned");
        let second = toggler.plan(&relation(true), Some("o-1")).await.expect("planned");

        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_remote_rejection_is_propagated() {
        let foundry = MemoryFoundry::new();
        let org = foundry.seed(ResourceKind::Organization, "acme", None, Vec::<(String, Value)>::new());
        let space = foundry.seed(ResourceKind::Space, "dev", Some(&org.guid), Vec::<(String, Value)>::new());

        let err = RelationToggler::new(&foundry)
            .toggle(Relation::SpaceRole(SpaceRole::Developer), &space.guid, "u-1", true)
            .await
            .expect_err("user is not an org member");

        assert!(matches!(err, ApiError::RequestFailed { status: 400, .. }));
    }
}
