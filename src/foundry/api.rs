//! Client facade trait definition.
//!
//! This module defines the capability the reconciliation core consumes.
//! Implementations are injected explicitly; the core never discovers them.

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::error::ApiResult;
use super::types::{Attributes, Lookup, Record, Relation, Resolution, ResourceKind};

/// Authenticated access to the remote control plane.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FoundryApi: Send + Sync {
    /// Looks up an entity by exact natural key within its scope.
    async fn find(&self, kind: ResourceKind, lookup: &Lookup) -> ApiResult<Resolution>;

    /// Lists every entity of a kind, optionally restricted to a scope.
    async fn list(&self, kind: ResourceKind, scope: Option<String>) -> ApiResult<Vec<Record>>;

    /// Creates an entity from its full declared attribute set.
    async fn create(
        &self,
        kind: ResourceKind,
        lookup: &Lookup,
        attributes: &Attributes,
    ) -> ApiResult<Record>;

    /// Updates an existing entity with its full declared attribute set.
    async fn update(&self, current: &Record, attributes: &Attributes) -> ApiResult<Record>;

    /// Deletes an existing entity.
    async fn delete(&self, current: &Record, recursive: bool) -> ApiResult<()>;

    /// Lists the object identities related to a subject.
    async fn list_relation(&self, relation: Relation, subject: &str) -> ApiResult<BTreeSet<String>>;

    /// Adds an association.
    async fn add_relation(&self, relation: Relation, subject: &str, object: &str) -> ApiResult<()>;

    /// Removes an association.
    async fn remove_relation(&self, relation: Relation, subject: &str, object: &str)
    -> ApiResult<()>;

    /// Short name of the implementation.
    fn backend_type(&self) -> &'static str;
}
