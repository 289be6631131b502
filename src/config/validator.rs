//! Declaration validation.
//!
//! This module checks manifests and single declarations before any remote
//! call is made: per-field constraints come from the `validator` derives on
//! the declaration types, combination rules are checked here.

use std::collections::HashSet;
use std::net::IpAddr;
use tracing::debug;
use validator::Validate;

use crate::error::{CfError, ConfigError, Result};

use super::spec::{
    ConvergeConfig, DesiredState, DomainSpec, DomainType, EnvVarSpec, FeatureFlagSpec, QuotaSpec,
    ResourceSpec, RuleProtocol, SecurityGroupRuleSpec, TargetConfig, UserSpec,
};

/// Validator for manifests and declarations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    fn absorb(&mut self, prefix: &str, other: Self) {
        self.errors
            .extend(other.errors.into_iter().map(|e| ValidationError {
                field: format!("{prefix}.{}", e.field),
                message: e.message,
            }));
        self.warnings
            .extend(other.warnings.into_iter().map(|w| format!("{prefix}: {w}")));
    }

    /// Returns true if there are no errors.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    /// Joins every error into one message.
    #[must_use]
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a manifest.
    ///
    /// # Errors
    ///
    /// Returns the first error found, or a duplicate declaration error.
    pub fn validate(&self, config: &ConvergeConfig) -> Result<ValidationResult> {
        let result = self.check(config)?;

        if result.errors.is_empty() {
            debug!("Manifest validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(CfError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Collects every violation of a manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if two declarations share the same identity.
    pub fn check(&self, config: &ConvergeConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_target(&config.target, &mut result);

        let mut seen = HashSet::new();
        for (i, spec) in config.resources.iter().enumerate() {
            let key = (spec.resource_kind(), spec.scope_name(), spec.name());
            if !seen.insert(key) {
                return Err(CfError::Config(ConfigError::DuplicateName {
                    resource_type: spec.kind_label().to_string(),
                    name: spec.name().to_string(),
                }));
            }
            result.absorb(&format!("resources[{i}]"), self.validate_resource(spec));
        }

        Ok(result)
    }

    /// Validates a single declaration, collecting every violation.
    #[must_use]
    pub fn validate_resource(&self, spec: &ResourceSpec) -> ValidationResult {
        let mut result = ValidationResult::default();

        let constraints = match spec {
            ResourceSpec::Organization(s) => s.validate(),
            ResourceSpec::Space(s) => s.validate(),
            ResourceSpec::Quota(s) => s.validate(),
            ResourceSpec::Domain(s) => s.validate(),
            ResourceSpec::SecurityGroup(s) => s.validate(),
            ResourceSpec::SecurityGroupRule(s) => s.validate(),
            ResourceSpec::User(s) => s.validate(),
            ResourceSpec::FeatureFlag(s) => s.validate(),
            ResourceSpec::EnvVar(s) => s.validate(),
        };
        if let Err(errors) = constraints {
            for (field, field_errors) in errors.field_errors() {
                for error in field_errors {
                    let message = error
                        .message
                        .as_ref()
                        .map_or_else(|| error.code.to_string(), ToString::to_string);
                    result.error(field.to_string(), message);
                }
            }
        }

        match spec {
            ResourceSpec::Organization(s) => {
                Self::check_flags(s.state, s.force, s.recursive, &mut result);
                for (i, member) in s.members.iter().enumerate() {
                    if member.user.is_empty() {
                        result.error(format!("members[{i}].user"), "user cannot be empty");
                    }
                }
            }
            ResourceSpec::Space(s) => {
                Self::check_flags(s.state, false, s.recursive, &mut result);
                for (i, member) in s.members.iter().enumerate() {
                    if member.user.is_empty() {
                        result.error(format!("members[{i}].user"), "user cannot be empty");
                    }
                }
            }
            ResourceSpec::Quota(s) => Self::validate_quota(s, &mut result),
            ResourceSpec::Domain(s) => Self::validate_domain(s, &mut result),
            ResourceSpec::SecurityGroup(s) => {
                for (i, binding) in s.spaces.iter().enumerate() {
                    if binding.organization.is_empty() || binding.space.is_empty() {
                        result.error(
                            format!("spaces[{i}]"),
                            "organization and space are required together",
                        );
                    }
                }
            }
            ResourceSpec::SecurityGroupRule(s) => Self::validate_rule(s, &mut result),
            ResourceSpec::User(s) => Self::validate_user(s, &mut result),
            ResourceSpec::FeatureFlag(s) => Self::validate_feature_flag(s, &mut result),
            ResourceSpec::EnvVar(s) => Self::validate_env_var(s, &mut result),
        }

        result
    }

    /// Validates connection settings.
    fn validate_target(target: &TargetConfig, result: &mut ValidationResult) {
        if target.api_url.is_empty() {
            result.error("target.api_url", "api_url is required (or set CF_API_URL)");
        } else if !target.api_url.starts_with("https://") && !target.api_url.starts_with("http://")
        {
            result.error(
                "target.api_url",
                format!("api_url '{}' must be an http(s) URL", target.api_url),
            );
        }

        if target.admin_user.is_empty() {
            result.error("target.admin_user", "admin_user cannot be empty");
        }

        if target.timeout_secs == 0 {
            result.error("target.timeout_secs", "timeout_secs must be positive");
        }

        if !target.validate_certs {
            result
                .warnings
                .push(String::from("TLS certificate validation is disabled"));
        }
    }

    fn check_flags(state: DesiredState, force: bool, recursive: bool, result: &mut ValidationResult) {
        if state.is_present() && force {
            result
                .warnings
                .push(String::from("force only applies when state is absent"));
        }
        if state.is_present() && recursive {
            result
                .warnings
                .push(String::from("recursive only applies when state is absent"));
        }
    }

    fn validate_quota(quota: &QuotaSpec, result: &mut ValidationResult) {
        Self::check_flags(quota.state, quota.force, false, result);
        if !quota.state.is_present() {
            return;
        }

        let required = [
            ("non_basic_services_allowed", quota.non_basic_services_allowed.is_some()),
            ("total_services", quota.total_services.is_some()),
            ("total_routes", quota.total_routes.is_some()),
            ("memory_limit", quota.memory_limit.is_some()),
            ("instance_memory_limit", quota.instance_memory_limit.is_some()),
        ];
        for (field, declared) in required {
            if !declared {
                result.error(field, format!("{field} is required when state is present"));
            }
        }

        if quota.organization.is_some() && quota.total_private_domains.is_some() {
            result.error(
                "total_private_domains",
                "space quotas have no private domain limit",
            );
        }
    }

    fn validate_domain(domain: &DomainSpec, result: &mut ValidationResult) {
        if domain.owner_organization.is_some() && domain.router_group_guid.is_some() {
            result.error(
                "owner_organization",
                "owner_organization and router_group_guid are mutually exclusive",
            );
        }

        match domain.domain_type {
            DomainType::Shared => {
                if domain.owner_organization.is_some() {
                    result.error(
                        "owner_organization",
                        "owner_organization only applies to private domains",
                    );
                }
                if !domain.shared_organizations.is_empty() {
                    result.error(
                        "shared_organizations",
                        "shared_organizations only applies to private domains",
                    );
                }
            }
            DomainType::Private => {
                if domain.router_group_guid.is_some() {
                    result.error(
                        "router_group_guid",
                        "router_group_guid only applies to shared domains",
                    );
                }
            }
        }
    }

    fn validate_rule(rule: &SecurityGroupRuleSpec, result: &mut ValidationResult) {
        if !rule.state.is_present() {
            return;
        }

        let has_type = rule.icmp_type.is_some();
        let has_code = rule.code.is_some();

        if has_type != has_code {
            result.error("type", "type and code are required together");
        }
        if has_type && rule.ports.is_some() {
            result.error("ports", "type and ports are mutually exclusive");
        }

        match rule.protocol {
            RuleProtocol::Icmp => {
                if !has_type || !has_code {
                    result.error("protocol", "icmp requires type and code");
                }
            }
            RuleProtocol::Tcp | RuleProtocol::Udp => {
                if rule.ports.is_none() {
                    result.error(
                        "ports",
                        format!("{} requires ports", rule.protocol.as_str()),
                    );
                }
                if has_type || has_code {
                    result.error("type", "type and code only apply to icmp");
                }
            }
            RuleProtocol::All => {
                if rule.ports.is_some() {
                    result.error("ports", "ports only apply to tcp and udp");
                }
                if has_type || has_code {
                    result.error("type", "type and code only apply to icmp");
                }
            }
        }

        if let Some(ports) = rule.ports.as_deref().filter(|p| !is_valid_ports(p)) {
            result.error(
                "ports",
                format!("ports '{ports}' must be N, N-M or a comma separated list within 1-65535"),
            );
        }

        if !is_valid_destination(&rule.destination) {
            result.error(
                "destination",
                format!(
                    "destination '{}' must be an IP address, a CIDR block or an IP range",
                    rule.destination
                ),
            );
        }
    }

    fn validate_user(user: &UserSpec, result: &mut ValidationResult) {
        Self::check_flags(user.state, user.force, false, result);
        if !user.state.is_present() {
            return;
        }

        if user.given_name.is_none() {
            result.error("given_name", "given_name is required when state is present");
        }
        if user.family_name.is_none() {
            result.error("family_name", "family_name is required when state is present");
        }
        if user.default_organization.is_some() != user.default_space.is_some() {
            result.error(
                "default_space",
                "default_organization and default_space are required together",
            );
        }
        if user.update_password && user.password.is_none() {
            result.error("password", "update_password requires password");
        }
    }

    fn validate_feature_flag(flag: &FeatureFlagSpec, result: &mut ValidationResult) {
        if !flag.state.is_present() {
            result.error("state", "feature flags cannot be absent, set value: false instead");
        }
        if flag.value.is_none() {
            result.error("value", "value is required");
        }
    }

    fn validate_env_var(var: &EnvVarSpec, result: &mut ValidationResult) {
        if var.state.is_present() && var.value.is_none() {
            result.error("value", "value is required when state is present");
        }
    }
}

/// Checks `N`, `N-M` and comma separated lists of ports within 1-65535.
fn is_valid_ports(ports: &str) -> bool {
    let port = |s: &str| s.trim().parse::<u16>().is_ok_and(|p| p >= 1);

    if let Some((low, high)) = ports.split_once('-') {
        return port(low)
            && port(high)
            && low.trim().parse::<u16>().ok() <= high.trim().parse::<u16>().ok();
    }

    !ports.is_empty() && ports.split(',').all(port)
}

/// Checks an IP address, a CIDR block or an `a-b` IP range.
fn is_valid_destination(destination: &str) -> bool {
    if let Some((address, prefix)) = destination.split_once('/') {
        let Ok(address) = address.parse::<IpAddr>() else {
            return false;
        };
        let max = if address.is_ipv4() { 32 } else { 128 };
        return prefix.parse::<u8>().is_ok_and(|p| p <= max);
    }

    if let Some((start, end)) = destination.split_once('-') {
        return match (start.parse::<IpAddr>(), end.parse::<IpAddr>()) {
            (Ok(start), Ok(end)) => start.is_ipv4() == end.is_ipv4() && start <= end,
            _ => false,
        };
    }

    destination.parse::<IpAddr>().is_ok()
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(yaml: &str) -> ResourceSpec {
        serde_yaml::from_str(yaml).expect("valid rule declaration")
    }

    #[test]
    fn test_valid_ports() {
        assert!(is_valid_ports("443"));
        assert!(is_valid_ports("8080-8090"));
        assert!(is_valid_ports("80,443,8443"));
        assert!(!is_valid_ports(""));
        assert!(!is_valid_ports("0"));
        assert!(!is_valid_ports("70000"));
        assert!(!is_valid_ports("90-80"));
        assert!(!is_valid_ports("http"));
    }

    #[test]
    fn test_valid_destination() {
        assert!(is_valid_destination("0.0.0.0/0"));
        assert!(is_valid_destination("10.0.0.1"));
        assert!(is_valid_destination("10.0.0.1-10.0.0.20"));
        assert!(is_valid_destination("fd00::/8"));
        assert!(!is_valid_destination("10.0.0.0/33"));
        assert!(!is_valid_destination("10.0.0.20-10.0.0.1"));
        assert!(!is_valid_destination("example.com"));
    }

    #[test]
    fn test_icmp_requires_type_and_code() {
        let spec = rule(
            r"
kind: security_group_rule
name: ping
security_group: sg1
protocol: icmp
",
        );

        let result = ConfigValidator::new().validate_resource(&spec);
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message == "icmp requires type and code"));
    }

    #[test]
    fn test_type_and_ports_are_exclusive() {
        let spec = rule(
            r"
kind: security_group_rule
name: odd
security_group: sg1
protocol: icmp
type: 0
code: 0
ports: '443'
",
        );

        let result = ConfigValidator::new().validate_resource(&spec);
        assert!(result.errors.iter().any(|e| e.field == "ports"));
    }

    #[test]
    fn test_tcp_rule_is_valid() {
        let spec = rule(
            r"
kind: security_group_rule
name: https
security_group: sg1
protocol: tcp
destination: 10.0.0.0/8
ports: '443'
",
        );

        assert!(ConfigValidator::new().validate_resource(&spec).is_valid());
    }

    #[test]
    fn test_absent_rule_skips_combination_rules() {
        let spec = rule(
            r"
kind: security_group_rule
name: ping
security_group: sg1
protocol: icmp
state: absent
",
        );

        assert!(ConfigValidator::new().validate_resource(&spec).is_valid());
    }

    #[test]
    fn test_present_quota_requires_limits() {
        let spec: ResourceSpec =
            serde_yaml::from_str("kind: quota\nname: small\nmemory_limit: 1024\n")
                .expect("valid quota declaration");

        let result = ConfigValidator::new().validate_resource(&spec);
        assert_eq!(result.error_count(), 4);
    }

    #[test]
    fn test_feature_flag_requires_explicit_value() {
        let spec: ResourceSpec = serde_yaml::from_str("kind: feature_flag\nname: diego_docker\n")
            .expect("valid flag declaration");

        let result = ConfigValidator::new().validate_resource(&spec);
        assert_eq!(result.errors[0].field, "value");
    }

    #[test]
    fn test_duplicate_declarations_rejected() {
        let yaml = r"
target:
  api_url: https://api.example.com
resources:
  - kind: organization
    name: acme
  - kind: organization
    name: acme
";
        let config: ConvergeConfig = serde_yaml::from_str(yaml).expect("valid manifest");
        let err = ConfigValidator::new()
            .validate(&config)
            .expect_err("duplicate declaration");

        assert!(matches!(
            err,
            CfError::Config(ConfigError::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_same_space_name_in_two_orgs_is_not_a_duplicate() {
        let yaml = r"
target:
  api_url: https://api.example.com
resources:
  - kind: space
    name: dev
    organization: a
  - kind: space
    name: dev
    organization: b
";
        let config: ConvergeConfig = serde_yaml::from_str(yaml).expect("valid manifest");
        assert!(ConfigValidator::new().validate(&config).is_ok());
    }

    #[test]
    fn test_field_paths_are_prefixed() {
        let yaml = r"
target:
  api_url: https://api.example.com
resources:
  - kind: user
    name: ada
";
        let config: ConvergeConfig = serde_yaml::from_str(yaml).expect("valid manifest");
        let err = ConfigValidator::new()
            .validate(&config)
            .expect_err("missing names");

        let CfError::Config(ConfigError::ValidationError { field, .. }) = err else {
            panic!("expected a validation error");
        };
        assert_eq!(field.as_deref(), Some("resources[0].given_name"));
    }

    #[test]
    fn test_check_collects_every_error() {
        let yaml = r"
target:
  api_url: ftp://api.example.com
resources:
  - kind: user
    name: ada
";
        let config: ConvergeConfig = serde_yaml::from_str(yaml).expect("valid manifest");
        let result = ConfigValidator::new().check(&config).expect("no duplicates");

        assert!(result.error_count() > 1);
        assert!(result.errors.iter().any(|e| e.field == "target.api_url"));
    }
}
