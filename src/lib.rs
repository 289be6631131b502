// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # cf_converge
//!
//! A declarative, idempotent reconciliation layer for Cloud Foundry
//! platform administration.
//!
//! ## Overview
//!
//! Each declaration names an entity (organization, space, quota, domain,
//! security group, security group rule, user, feature flag or environment
//! variable group entry) and its desired state. Reconciling it:
//!
//! - Resolves the entity and every entity it references by name
//! - Compares the observed attributes with the declared ones
//! - Creates, updates or deletes only what differs
//! - Reports whether anything changed, with the entity's final form
//!
//! Reconciling the same declaration twice never changes anything the second
//! time, and a dry run reports exactly what a real run would do.
//!
//! ## Modules
//!
//! - [`config`]: Manifest and parameter parsing and validation
//! - [`foundry`]: Client facade, Cloud Foundry HTTP client and in-memory control plane
//! - [`planner`]: Per-kind schemas, diff computation and plan execution
//! - [`reconciler`]: Name resolution, relation toggling and the reconciliation engine
//! - [`facts`]: Read-only inspection of organizations and spaces
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! target:
//!   api_url: https://api.sys.example.com
//!
//! resources:
//!   - kind: quota
//!     name: small
//!     non_basic_services_allowed: false
//!     memory_limit: 1024
//!     instance_memory_limit: -1
//!     total_routes: 10
//!     total_services: 10
//!     app_instance_limit: 20
//!   - kind: organization
//!     name: acme
//!     quota: small
//!     members:
//!       - user: ada
//!         role: manager
//!   - kind: space
//!     name: dev
//!     organization: acme
//!     allow_ssh: false
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod facts;
pub mod foundry;
pub mod planner;
pub mod reconciler;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, ConvergeConfig, Invocation, ResourceSpec};
pub use error::{CfError, Result};
pub use facts::{Facts, FactsCollector};
pub use foundry::{CfClient, FoundryApi, MemoryFoundry};
pub use planner::{DiffEngine, PlanExecutor, ReconcilePlan};
pub use reconciler::{Outcome, ReconcileOptions, Reconciler, RunReport};
