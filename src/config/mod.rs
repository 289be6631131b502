//! Configuration module for the reconciliation system.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `cfconverge.yaml` manifests
//! - Parsing single-invocation parameter objects
//! - Validation of declarations before any remote call

mod parser;
mod spec;
mod validator;

pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, ENV_ADMIN_PASSWORD, ENV_ADMIN_USER, ENV_API_URL,
    find_config_file, user_config_file,
};
pub use spec::{
    ConvergeConfig, DesiredState, DomainSpec, DomainType, EnvVarSpec, FeatureFlagSpec,
    Invocation, OrgMemberSpec, OrgSpec, QuotaSpec, ResourceSpec, RuleProtocol,
    SecurityGroupRuleSpec, SecurityGroupSpaceSpec, SecurityGroupSpec, SharedOrgSpec,
    SpaceMemberSpec, SpaceSpec, TargetConfig, UserSpec,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
