//! Plan executor for applying reconciliation plans.
//!
//! Calls are issued one at a time, in plan order, because relation changes
//! need the identity returned by the entity action. The first failing call
//! aborts the plan.

use tracing::{debug, info};

use crate::error::{ApiError, ReconcileError};
use crate::foundry::{FoundryApi, Record};

use super::plan::{EntityAction, ReconcilePlan, RelationChange};

/// Executor for reconciliation plans.
#[derive(Debug)]
pub struct PlanExecutor<'a, C: FoundryApi + ?Sized> {
    /// Client facade.
    api: &'a C,
}

impl<'a, C: FoundryApi + ?Sized> PlanExecutor<'a, C> {
    /// Creates a new plan executor.
    #[must_use]
    pub const fn new(api: &'a C) -> Self {
        Self { api }
    }

    /// Executes a plan, returning the resulting record (none after a delete).
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::Remote` carrying the kind, natural key and
    /// attempted operation of the first call the control plane rejected.
    pub async fn execute(&self, plan: &ReconcilePlan) -> Result<Option<Record>, ReconcileError> {
        let record = self.execute_entity_action(plan).await?;

        let primary = record.as_ref().map(|r| r.guid.as_str());
        for change in &plan.relations {
            self.execute_relation_change(plan, change, primary).await?;
        }

        Ok(record)
    }

    async fn execute_entity_action(
        &self,
        plan: &ReconcilePlan,
    ) -> Result<Option<Record>, ReconcileError> {
        let kind = plan.kind;
        let name = plan.name();
        let remote = |operation: &str, source: ApiError| {
            ReconcileError::remote(kind.label(), name, operation, source)
        };

        match plan.action {
            EntityAction::Create => {
                info!("Creating {kind} {name}");
                let record = self
                    .api
                    .create(kind, &plan.lookup, &plan.payload)
                    .await
                    .map_err(|e| remote("create", e))?;
                Ok(Some(record))
            }
            EntityAction::Update => {
                let current = Self::current(plan)?;
                info!("Updating {kind} {name}: {}", plan.diff);
                let record = self
                    .api
                    .update(current, &plan.payload)
                    .await
                    .map_err(|e| remote("update", e))?;
                Ok(Some(record))
            }
            EntityAction::Delete { recursive } => {
                let current = Self::current(plan)?;
                info!("Deleting {kind} {name} (recursive: {recursive})");
                self.api
                    .delete(current, recursive)
                    .await
                    .map_err(|e| remote("delete", e))?;
                Ok(None)
            }
            EntityAction::None => {
                debug!("{kind} {name} needs no change");
                Ok(plan.current.clone())
            }
        }
    }

    async fn execute_relation_change(
        &self,
        plan: &ReconcilePlan,
        change: &RelationChange,
        primary: Option<&str>,
    ) -> Result<(), ReconcileError> {
        let operation = if change.add {
            format!("add {} to", change.label)
        } else {
            format!("remove {} from", change.label)
        };
        let remote = |source: ApiError| {
            ReconcileError::remote(plan.kind.label(), plan.name(), operation.as_str(), source)
        };

        let (Some(subject), Some(object)) =
            (change.subject.resolve(primary), change.object.resolve(primary))
        else {
            return Err(remote(ApiError::invalid(
                "relation endpoint has no identity",
            )));
        };

        info!("{} {}: {change}", plan.kind, plan.name());
        let result = if change.add {
            self.api.add_relation(change.relation, subject, object).await
        } else {
            self.api.remove_relation(change.relation, subject, object).await
        };
        result.map_err(remote)
    }

    fn current(plan: &ReconcilePlan) -> Result<&Record, ReconcileError> {
        plan.current.as_ref().ok_or_else(|| {
            ReconcileError::remote(
                plan.kind.label(),
                plan.name(),
                plan.action.to_string(),
                ApiError::invalid("no observed record to act on"),
            )
        })
    }
}
