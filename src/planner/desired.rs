//! Desired entity description handed to the engine.
//!
//! A declaration is turned into a [`DesiredEntity`] once every referenced
//! name has been resolved to an identity.

use crate::config::DesiredState;
use crate::foundry::{Attributes, Lookup, Relation, ResourceKind, Value};

/// One side of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// The entity being reconciled. Its identity may only exist after create.
    Primary,
    /// Another, already resolved, entity.
    Guid(String),
}

impl Endpoint {
    /// Returns the identity, resolving [`Endpoint::Primary`] to `primary`.
    #[must_use]
    pub fn resolve<'a>(&'a self, primary: Option<&'a str>) -> Option<&'a str> {
        match self {
            Self::Primary => primary,
            Self::Guid(guid) => Some(guid),
        }
    }
}

/// A relation whose membership the declaration pins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredRelation {
    /// Relation kind.
    pub relation: Relation,
    /// Subject of the relation.
    pub subject: Endpoint,
    /// Object of the relation.
    pub object: Endpoint,
    /// Human-readable description of the association.
    pub label: String,
    /// Whether the association must exist.
    pub present: bool,
}

/// Fully resolved desired state of a single entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredEntity {
    /// Entity kind.
    pub kind: ResourceKind,
    /// Natural key with resolved scope.
    pub lookup: Lookup,
    /// Desired existence.
    pub state: DesiredState,
    /// Declared attributes; undeclared optional fields are absent.
    pub attributes: Attributes,
    /// Relations to toggle, in declaration order.
    pub relations: Vec<DesiredRelation>,
    /// Bypass the protected entity guard on delete.
    pub force: bool,
    /// Cascade deletion to children.
    pub recursive: bool,
    /// Write the declared password even though the entity exists.
    pub update_password: bool,
}

impl DesiredEntity {
    /// Creates a desired entity with no attributes or relations.
    #[must_use]
    pub fn new(kind: ResourceKind, lookup: Lookup, state: DesiredState) -> Self {
        Self {
            kind,
            lookup,
            state,
            attributes: Attributes::new(),
            relations: Vec::new(),
            force: false,
            recursive: false,
            update_password: false,
        }
    }

    /// Natural key.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.lookup.name
    }

    /// Declares an attribute. Unset values are not declared.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if !value.is_null() {
            self.attributes.insert(name.to_string(), value);
        }
        self
    }

    /// Pins a relation.
    #[must_use]
    pub fn with_relation(mut self, relation: DesiredRelation) -> Self {
        self.relations.push(relation);
        self
    }

    /// Returns true if the entity must exist.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.state == DesiredState::Present
    }

    /// Returns a declared attribute, or null.
    #[must_use]
    pub fn declared(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.attributes.get(name).unwrap_or(&NULL)
    }
}
