//! Remote control plane access.
//!
//! The reconciliation core only depends on the [`FoundryApi`] trait. Two
//! implementations are provided: [`CfClient`] talks to a live Cloud
//! Controller, [`MemoryFoundry`] keeps the platform model in process.

mod api;
mod client;
mod memory;
pub mod types;

pub use api::FoundryApi;
#[cfg(test)]
pub use api::MockFoundryApi;
pub use client::{CfClient, ClientOptions, DEFAULT_TIMEOUT_SECS};
pub use memory::{Call, MemoryFoundry};
pub use types::{
    Attributes, Lifecycle, Lookup, OrgRole, Record, Relation, Resolution, ResourceKind,
    SpaceRole, Value, PLATFORM,
};
