//! In-memory client facade.
//!
//! Keeps a complete platform model in process so reconciliations can be
//! previewed or tested without a control plane. Every call is journaled.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

use super::api::FoundryApi;
use super::types::{
    Attributes, Lookup, OrgRole, Record, Relation, Resolution, ResourceKind, Value,
};

/// Feature flags present on a fresh platform.
const DEFAULT_FEATURE_FLAGS: &[(&str, bool)] = &[
    ("user_org_creation", false),
    ("private_domain_creation", true),
    ("app_bits_upload", true),
    ("app_scaling", true),
    ("route_creation", true),
    ("service_instance_creation", true),
    ("diego_docker", false),
    ("set_roles_by_username", true),
    ("unset_roles_by_username", true),
];

/// A journaled facade call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Operation name (find, list, create, update, delete, list_relation,
    /// add_relation, remove_relation).
    pub operation: String,
    /// What the call addressed.
    pub target: String,
}

impl Call {
    /// Returns true for calls that change remote state.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        matches!(
            self.operation.as_str(),
            "create" | "update" | "delete" | "add_relation" | "remove_relation"
        )
    }
}

#[derive(Debug, Default)]
struct State {
    records: Vec<Record>,
    relations: BTreeMap<(Relation, String), BTreeSet<String>>,
    calls: Vec<Call>,
    faults: HashMap<String, ApiError>,
}

/// Client facade backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryFoundry {
    state: Mutex<State>,
}

impl MemoryFoundry {
    /// Creates an empty platform.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a platform with the built-in `default` quota and the stock
    /// feature flags.
    #[must_use]
    pub fn with_defaults() -> Self {
        let foundry = Self::new();
        foundry.seed(
            ResourceKind::Quota,
            "default",
            None,
            [
                ("non_basic_services_allowed", Value::Bool(true)),
                ("total_services", Value::Int(100)),
                ("total_routes", Value::Int(1000)),
                ("memory_limit", Value::Int(10240)),
                ("instance_memory_limit", Value::Int(-1)),
                ("total_service_keys", Value::Int(-1)),
                ("total_reserved_route_ports", Value::Int(0)),
                ("total_private_domains", Value::Int(-1)),
                ("app_instance_limit", Value::Int(-1)),
            ],
        );
        for (name, enabled) in DEFAULT_FEATURE_FLAGS {
            let record = Record::new(ResourceKind::FeatureFlag, *name, *name)
                .with_attribute("enabled", *enabled);
            foundry.insert(record);
        }
        foundry
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a record as-is.
    pub fn insert(&self, record: Record) -> Record {
        self.lock().records.push(record.clone());
        record
    }

    /// Inserts a record with a fresh identity and the given attributes.
    pub fn seed<I, K>(
        &self,
        kind: ResourceKind,
        name: &str,
        scope: Option<&str>,
        attributes: I,
    ) -> Record
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut record = Record::new(kind, identity_for(kind, name), name);
        record.scope = scope.map(String::from);
        record.attributes = attributes.into_iter().map(|(k, v)| (k.into(), v)).collect();
        record.created_at = Some(Utc::now());
        record.updated_at = record.created_at;
        self.insert(record)
    }

    /// Replaces the object set of a relation.
    pub fn set_relation<I, S>(&self, relation: Relation, subject: &str, objects: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().relations.insert(
            (relation, subject.to_string()),
            objects.into_iter().map(Into::into).collect(),
        );
    }

    /// Returns the record currently stored for a natural key.
    #[must_use]
    pub fn get(&self, kind: ResourceKind, lookup: &Lookup) -> Option<Record> {
        self.lock()
            .records
            .iter()
            .find(|r| matches_key(r, kind, lookup))
            .cloned()
    }

    /// Returns every stored record of a kind.
    #[must_use]
    pub fn records(&self, kind: ResourceKind) -> Vec<Record> {
        self.lock()
            .records
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    /// Returns the current object set of a relation.
    #[must_use]
    pub fn related(&self, relation: Relation, subject: &str) -> BTreeSet<String> {
        self.lock()
            .relations
            .get(&(relation, subject.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Makes every subsequent call of `operation` fail with `error`.
    pub fn fail_on(&self, operation: &str, error: ApiError) {
        self.lock().faults.insert(operation.to_string(), error);
    }

    /// Returns the call journal.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Returns the number of journaled calls that changed state.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.lock().calls.iter().filter(|c| c.is_mutation()).count()
    }

    /// Clears the call journal.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Journals a call and returns the injected fault for it, if any.
    fn record_call(state: &mut State, operation: &str, target: String) -> ApiResult<()> {
        trace!("memory foundry: {operation} {target}");
        state.calls.push(Call {
            operation: operation.to_string(),
            target,
        });
        state.faults.get(operation).cloned().map_or(Ok(()), Err)
    }
}

fn identity_for(kind: ResourceKind, name: &str) -> String {
    match kind {
        ResourceKind::SecurityGroupRule
        | ResourceKind::EnvironmentVariable
        | ResourceKind::FeatureFlag => name.to_string(),
        _ => Uuid::new_v4().to_string(),
    }
}

fn matches_key(record: &Record, kind: ResourceKind, lookup: &Lookup) -> bool {
    record.kind == kind
        && record.name == lookup.name
        && (!kind.is_scoped() || record.scope == lookup.scope)
}

fn strip_write_only(attributes: &Attributes) -> Attributes {
    attributes
        .iter()
        .filter(|(k, _)| k.as_str() != "password")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn not_found(what: &str) -> ApiError {
    ApiError::request(404, format!("{what} not found"))
}

#[async_trait]
impl FoundryApi for MemoryFoundry {
    async fn find(&self, kind: ResourceKind, lookup: &Lookup) -> ApiResult<Resolution> {
        let mut state = self.lock();
        Self::record_call(&mut state, "find", format!("{kind} {}", lookup.name))?;

        let matches: Vec<&Record> = state
            .records
            .iter()
            .filter(|r| matches_key(r, kind, lookup))
            .collect();

        match matches.as_slice() {
            [] => Ok(Resolution::Absent),
            [record] => Ok(Resolution::Found((*record).clone())),
            many => Err(ApiError::Ambiguous {
                name: lookup.name.clone(),
                count: many.len(),
            }),
        }
    }

    async fn list(&self, kind: ResourceKind, scope: Option<String>) -> ApiResult<Vec<Record>> {
        let mut state = self.lock();
        Self::record_call(&mut state, "list", kind.to_string())?;

        Ok(state
            .records
            .iter()
            .filter(|r| r.kind == kind && (scope.is_none() || r.scope == scope))
            .cloned()
            .collect())
    }

    async fn create(
        &self,
        kind: ResourceKind,
        lookup: &Lookup,
        attributes: &Attributes,
    ) -> ApiResult<Record> {
        let mut state = self.lock();
        Self::record_call(&mut state, "create", format!("{kind} {}", lookup.name))?;

        if kind == ResourceKind::FeatureFlag {
            return Err(ApiError::unsupported("create", kind.label()));
        }
        if state.records.iter().any(|r| matches_key(r, kind, lookup)) {
            return Err(ApiError::request(
                400,
                format!("the {kind} name is taken: {}", lookup.name),
            ));
        }

        let now = Utc::now();
        let record = Record {
            kind,
            guid: identity_for(kind, &lookup.name),
            name: lookup.name.clone(),
            scope: lookup.scope.clone(),
            attributes: strip_write_only(attributes),
            created_at: Some(now),
            updated_at: Some(now),
        };
        state.records.push(record.clone());
        Ok(record)
    }

    async fn update(&self, current: &Record, attributes: &Attributes) -> ApiResult<Record> {
        let mut state = self.lock();
        Self::record_call(&mut state, "update", format!("{} {}", current.kind, current.name))?;

        let record = state
            .records
            .iter_mut()
            .find(|r| r.kind == current.kind && r.guid == current.guid && r.scope == current.scope)
            .ok_or_else(|| not_found(current.kind.label()))?;

        record.attributes.extend(strip_write_only(attributes));
        record.updated_at = Some(Utc::now());
        Ok(record.clone())
    }

    async fn delete(&self, current: &Record, recursive: bool) -> ApiResult<()> {
        let mut state = self.lock();
        Self::record_call(&mut state, "delete", format!("{} {}", current.kind, current.name))?;

        let kind = current.kind;
        if matches!(kind, ResourceKind::FeatureFlag) {
            return Err(ApiError::unsupported("delete", kind.label()));
        }

        let exists = state
            .records
            .iter()
            .any(|r| r.kind == kind && r.guid == current.guid && r.scope == current.scope);
        if !exists {
            return Err(not_found(kind.label()));
        }

        let has_children = state.records.iter().any(|r| {
            r.scope.as_deref() == Some(current.guid.as_str())
                && matches!(
                    (kind, r.kind),
                    (ResourceKind::Organization, ResourceKind::Space | ResourceKind::SpaceQuota)
                        | (ResourceKind::SecurityGroup, ResourceKind::SecurityGroupRule)
                )
        });
        if has_children && kind == ResourceKind::Organization && !recursive {
            return Err(ApiError::request(
                400,
                format!(
                    "CF-AssociationNotEmpty: please delete the spaces of organization {} first",
                    current.name
                ),
            ));
        }

        let guid = current.guid.clone();
        state.records.retain(|r| {
            let is_target = r.kind == kind && r.guid == guid && r.scope == current.scope;
            let is_child = has_children && r.scope.as_deref() == Some(guid.as_str());
            !(is_target || is_child)
        });
        state
            .relations
            .retain(|(_, subject), _| subject.as_str() != guid.as_str());
        for objects in state.relations.values_mut() {
            objects.remove(&guid);
        }
        Ok(())
    }

    async fn list_relation(&self, relation: Relation, subject: &str) -> ApiResult<BTreeSet<String>> {
        let mut state = self.lock();
        Self::record_call(&mut state, "list_relation", format!("{relation} {subject}"))?;

        Ok(state
            .relations
            .get(&(relation, subject.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn add_relation(&self, relation: Relation, subject: &str, object: &str) -> ApiResult<()> {
        let mut state = self.lock();
        Self::record_call(
            &mut state,
            "add_relation",
            format!("{relation} {subject} {object}"),
        )?;

        if let Relation::SpaceRole(_) = relation {
            let org_guid = state
                .records
                .iter()
                .find(|r| r.kind == ResourceKind::Space && r.guid == subject)
                .and_then(|r| r.scope.clone())
                .ok_or_else(|| not_found("space"))?;
            let is_member = state
                .relations
                .get(&(Relation::OrgRole(OrgRole::User), org_guid))
                .is_some_and(|users| users.contains(object));
            if !is_member {
                return Err(ApiError::request(
                    400,
                    "CF-InvalidRelation: user is not a member of the space's organization",
                ));
            }
        }

        state
            .relations
            .entry((relation, subject.to_string()))
            .or_default()
            .insert(object.to_string());
        Ok(())
    }

    async fn remove_relation(
        &self,
        relation: Relation,
        subject: &str,
        object: &str,
    ) -> ApiResult<()> {
        let mut state = self.lock();
        Self::record_call(
            &mut state,
            "remove_relation",
            format!("{relation} {subject} {object}"),
        )?;

        if let Some(objects) = state.relations.get_mut(&(relation, subject.to_string())) {
            objects.remove(object);
        }
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
