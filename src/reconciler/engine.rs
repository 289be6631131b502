//! Generic reconciliation engine.
//!
//! One state machine serves every entity kind: resolve, diff against the
//! kind's attribute table, plan relation changes, then execute the plan
//! unless this is a dry run. Planning never mutates, so a dry run walks
//! exactly the same path as a real run up to execution.

use tracing::{debug, info, warn};

use crate::config::{ConfigValidator, ResourceSpec};
use crate::error::{CfError, ReconcileError};
use crate::foundry::{FoundryApi, Resolution};
use crate::planner::{
    schema_for, DesiredEntity, DiffEngine, DiffType, PlanExecutor, ReconcilePlan,
};

use super::kinds::DeclarationBuilder;
use super::outcome::{EntryResult, Failure, Outcome, RunReport};
use super::resolver::Resolver;
use super::toggler::RelationToggler;

/// Options of a reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Compute and report changes without applying them.
    pub dry_run: bool,
}

/// Reconciles declarations against the control plane.
#[derive(Debug)]
pub struct Reconciler<'a, C: FoundryApi + ?Sized> {
    /// Client facade.
    api: &'a C,
    /// Run options.
    options: ReconcileOptions,
    /// Diff engine.
    diff_engine: DiffEngine,
    /// Declaration validator.
    validator: ConfigValidator,
}

impl<'a, C: FoundryApi + ?Sized> Reconciler<'a, C> {
    /// Creates a new reconciler.
    #[must_use]
    pub const fn new(api: &'a C, options: ReconcileOptions) -> Self {
        Self {
            api,
            options,
            diff_engine: DiffEngine::new(),
            validator: ConfigValidator::new(),
        }
    }

    /// Returns true if this reconciler never mutates.
    #[must_use]
    pub const fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    /// Validates, resolves and reconciles one declaration.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::Validation` before any remote call if the
    /// declaration is invalid, and any error of [`Reconciler::reconcile`].
    pub async fn apply(&self, spec: &ResourceSpec) -> Result<Outcome, ReconcileError> {
        let validation = self.validator.validate_resource(spec);
        if !validation.is_valid() {
            return Err(ReconcileError::validation(
                spec.kind_label(),
                spec.name(),
                validation.summary(),
            ));
        }
        for warning in &validation.warnings {
            warn!("{}: {warning}", spec.declared_by());
        }

        let desired = DeclarationBuilder::new(self.api).build(spec).await?;
        let current = Resolver::new(self.api)
            .resolve(desired.kind, &desired.lookup)
            .await?;

        self.reconcile(&desired, current).await
    }

    /// Reconciles a resolved desired entity against its current record.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::ProtectedEntity` when deleting a reserved
    /// entity without `force` (also in a dry run), `ReconcileError::NotFound`
    /// when the kind cannot be created, `ReconcileError::Validation` when a
    /// create lacks a required field, and `ReconcileError::Remote` for the
    /// first facade call that failed.
    pub async fn reconcile(
        &self,
        desired: &DesiredEntity,
        current: Resolution,
    ) -> Result<Outcome, ReconcileError> {
        let plan = self.plan(desired, current).await?;

        if self.options.dry_run {
            info!("{} {}: dry run, {} planned mutations", plan.kind, plan.name(), plan.mutation_count());
            let data = plan.current.clone();
            return Ok(Outcome::from_plan(&plan, data, true));
        }

        let record = PlanExecutor::new(self.api).execute(&plan).await?;
        Ok(Outcome::from_plan(&plan, record, false))
    }

    /// Computes the complete plan for a desired entity without mutating.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::reconcile`].
    pub async fn plan(
        &self,
        desired: &DesiredEntity,
        current: Resolution,
    ) -> Result<ReconcilePlan, ReconcileError> {
        let schema = schema_for(desired.kind);
        let label = desired.kind.label();
        let name = desired.name();
        let current = current.into_record();

        if !desired.is_present() && current.is_some() {
            if schema.is_protected(name) && !desired.force {
                return Err(ReconcileError::ProtectedEntity {
                    kind: label.to_string(),
                    name: name.to_string(),
                });
            }
            if !schema.supports_delete {
                return Err(ReconcileError::validation(
                    label,
                    name,
                    format!("a {label} cannot be deleted"),
                ));
            }
        }

        let diff = self
            .diff_engine
            .compute_diff(&schema, desired, current.as_ref());

        if diff.diff_type == DiffType::Create {
            if !schema.supports_create {
                return Err(ReconcileError::not_found(label, name, "its declaration"));
            }
            if let Some(missing) = schema
                .required_on_create
                .iter()
                .find(|field| desired.declared(field).is_null())
            {
                return Err(ReconcileError::validation(
                    label,
                    name,
                    format!("{missing} is required to create a {label}"),
                ));
            }
        }

        if diff.diff_type == DiffType::Immutable {
            let ignored: Vec<&str> = diff.ignored_fields().collect();
            warn!(
                "{label} {name}: {} cannot be changed after creation, ignoring",
                ignored.join(", ")
            );
        }

        let mut relations = Vec::new();
        if desired.is_present() {
            let primary = current.as_ref().map(|r| r.guid.as_str());
            let mut toggler = RelationToggler::new(self.api);
            for relation in &desired.relations {
                let change = toggler.plan(relation, primary).await.map_err(|e| {
                    ReconcileError::remote(label, name, format!("read {} of", relation.label), e)
                })?;
                relations.extend(change);
            }
        }

        let plan = ReconcilePlan::from_diff(&schema, desired, diff, current, relations);
        debug!("{label} {name}: {}, {} relation changes", plan.action, plan.relations.len());
        Ok(plan)
    }

    /// Reconciles manifest declarations in order.
    ///
    /// Declarations are independent; the first failure stops the run unless
    /// `continue_on_error` is set.
    pub async fn apply_all(&self, specs: &[ResourceSpec], continue_on_error: bool) -> RunReport {
        let mut report = RunReport::new(self.options.dry_run);

        for (i, spec) in specs.iter().enumerate() {
            let result = match self.apply(spec).await {
                Ok(outcome) => {
                    info!("{}", outcome.msg);
                    EntryResult::Ok(outcome)
                }
                Err(err) => {
                    warn!("{} failed: {err}", spec.declared_by());
                    EntryResult::Failed(Failure::from(&CfError::Reconcile(err)))
                }
            };
            let failed = matches!(result, EntryResult::Failed(_));
            report.push(spec.kind_label(), spec.name(), result);

            if failed && !continue_on_error {
                report.skipped = specs.len() - i - 1;
                break;
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DesiredState;
    use crate::error::ApiError;
    use crate::foundry::{Lookup, MockFoundryApi, Record, ResourceKind};

    fn absent_quota(name: &str, force: bool) -> DesiredEntity {
        let mut desired = DesiredEntity::new(
            ResourceKind::Quota,
            Lookup::global(name),
            DesiredState::Absent,
        );
        desired.force = force;
        desired
    }

    #[tokio::test]
    async fn test_protected_delete_refused_in_dry_run() {
        let mut api = MockFoundryApi::new();
        api.expect_delete().never();

        let reconciler = Reconciler::new(&api, ReconcileOptions { dry_run: true });
        let current = Record::new(ResourceKind::Quota, "q-1", "default");
        let err = reconciler
            .reconcile(&absent_quota("default", false), Resolution::Found(current))
            .await
            .expect_err("protected quota");

        assert!(matches!(err, ReconcileError::ProtectedEntity { .. }));
    }

    #[tokio::test]
    async fn test_forced_protected_delete() {
        let mut api = MockFoundryApi::new();
        api.expect_delete()
            .withf(|record, recursive| record.guid == "q-1" && !*recursive)
            .times(1)
            .returning(|_, _| Ok(()));

        let reconciler = Reconciler::new(&api, ReconcileOptions::default());
        let current = Record::new(ResourceKind::Quota, "q-1", "default");
        let outcome = reconciler
            .reconcile(&absent_quota("default", true), Resolution::Found(current))
            .await
            .expect("forced delete");

        assert!(outcome.changed);
        assert!(outcome.data.is_none());
    }

    #[tokio::test]
    async fn test_absent_is_noop() {
        let mut api = MockFoundryApi::new();
        api.expect_delete().never();

        let outcome = Reconciler::new(&api, ReconcileOptions::default())
            .reconcile(&absent_quota("small", false), Resolution::Absent)
            .await
            .expect("no-op");

        assert!(!outcome.changed);
        assert_eq!(outcome.msg, "quota small does not exist");
    }

    #[tokio::test]
    async fn test_unknown_feature_flag_is_not_found() {
        let mut api = MockFoundryApi::new();
        api.expect_create().never();

        let desired = DesiredEntity::new(
            ResourceKind::FeatureFlag,
            Lookup::global("no_such_flag"),
            DesiredState::Present,
        )
        .with("enabled", true);

        let err = Reconciler::new(&api, ReconcileOptions::default())
            .reconcile(&desired, Resolution::Absent)
            .await
            .expect_err("flags cannot be created");
        assert!(matches!(err, ReconcileError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_private_domain_requires_owner_on_create() {
        let mut api = MockFoundryApi::new();
        api.expect_create().never();

        let desired = DesiredEntity::new(
            ResourceKind::PrivateDomain,
            Lookup::global("apps.example.com"),
            DesiredState::Present,
        );

        let err = Reconciler::new(&api, ReconcileOptions::default())
            .reconcile(&desired, Resolution::Absent)
            .await
            .expect_err("owner is required");
        assert!(matches!(err, ReconcileError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_immutable_divergence_reports_unchanged() {
        let mut api = MockFoundryApi::new();
        api.expect_update().never();

        let desired = DesiredEntity::new(
            ResourceKind::SharedDomain,
            Lookup::global("tcp.example.com"),
            DesiredState::Present,
        )
        .with("router_group_guid", "rg-2");
        let current = Record::new(ResourceKind::SharedDomain, "d-1", "tcp.example.com")
            .with_attribute("router_group_guid", "rg-1");

        let outcome = Reconciler::new(&api, ReconcileOptions::default())
            .reconcile(&desired, Resolution::Found(current))
            .await
            .expect("divergence is not an error");

        assert!(!outcome.changed);
        assert_eq!(
            outcome.msg,
            "shared domain tcp.example.com exists, not updated: router_group_guid cannot be changed"
        );
    }

    #[tokio::test]
    async fn test_update_failure_is_reported_with_context() {
        let mut api = MockFoundryApi::new();
        api.expect_update()
            .returning(|_, _| Err(ApiError::request(409, "conflict")));

        let desired = DesiredEntity::new(
            ResourceKind::Organization,
            Lookup::global("acme"),
            DesiredState::Present,
        )
        .with("quota_definition_guid", "q-2");
        let current = Record::new(ResourceKind::Organization, "o-1", "acme")
            .with_attribute("quota_definition_guid", "q-1");

        let err = Reconciler::new(&api, ReconcileOptions::default())
            .reconcile(&desired, Resolution::Found(current))
            .await
            .expect_err("update rejected");

        assert_eq!(
            err.to_string(),
            "cannot update organization 'acme': request failed: 409 - conflict"
        );
    }

    #[tokio::test]
    async fn test_invalid_declaration_makes_no_calls() {
        let api = MockFoundryApi::new();
        let spec: ResourceSpec = serde_yaml::from_str(
            "kind: security_group_rule\nname: ping\nsecurity_group: sg1\nprotocol: icmp\n",
        )
        .expect("valid yaml");

        let err = Reconciler::new(&api, ReconcileOptions::default())
            .apply(&spec)
            .await
            .expect_err("icmp without type and code");

        assert!(matches!(err, ReconcileError::Validation { .. }));
    }
}
