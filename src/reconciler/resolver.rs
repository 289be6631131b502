//! Natural-key resolution.

use tracing::debug;

use crate::error::ReconcileError;
use crate::foundry::{FoundryApi, Lookup, Record, Resolution, ResourceKind};

/// Resolves natural keys to observed records and identities.
#[derive(Debug)]
pub struct Resolver<'a, C: FoundryApi + ?Sized> {
    api: &'a C,
}

impl<'a, C: FoundryApi + ?Sized> Resolver<'a, C> {
    /// Creates a resolver on top of a client facade.
    #[must_use]
    pub const fn new(api: &'a C) -> Self {
        Self { api }
    }

    /// Looks up the current record of an entity.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::Remote` if the lookup itself failed. Absence
    /// is not an error.
    pub async fn resolve(
        &self,
        kind: ResourceKind,
        lookup: &Lookup,
    ) -> Result<Resolution, ReconcileError> {
        let resolution = self
            .api
            .find(kind, lookup)
            .await
            .map_err(|e| ReconcileError::remote(kind.label(), &lookup.name, "look up", e))?;

        debug!(
            "{kind} {}: {}",
            lookup.name,
            if resolution.is_found() { "found" } else { "absent" }
        );
        Ok(resolution)
    }

    /// Looks up an entity another declaration depends on.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::NotFound` naming `required_by` if the entity
    /// does not exist.
    pub async fn require(
        &self,
        kind: ResourceKind,
        lookup: &Lookup,
        required_by: &str,
    ) -> Result<Record, ReconcileError> {
        self.resolve(kind, lookup)
            .await?
            .into_record()
            .ok_or_else(|| ReconcileError::not_found(kind.label(), &lookup.name, required_by))
    }

    /// Resolves a referenced name to its identity.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::NotFound` if the referenced entity does not exist.
    pub async fn resolve_reference(
        &self,
        kind: ResourceKind,
        lookup: &Lookup,
        required_by: &str,
    ) -> Result<String, ReconcileError> {
        self.require(kind, lookup, required_by)
            .await
            .map(|record| record.guid)
    }

    /// Resolves a referenced name if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::Remote` if the lookup itself failed.
    pub async fn resolve_optional(
        &self,
        kind: ResourceKind,
        lookup: &Lookup,
    ) -> Result<Option<String>, ReconcileError> {
        Ok(self
            .resolve(kind, lookup)
            .await?
            .into_record()
            .map(|record| record.guid))
    }
}
