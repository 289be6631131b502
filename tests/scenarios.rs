//! End-to-end reconciliation scenarios against the in-memory control plane.

use cf_converge::config::{ConvergeConfig, ResourceSpec};
use cf_converge::error::{ApiError, ReconcileError};
use cf_converge::foundry::{Lookup, OrgRole, Relation, ResourceKind, SpaceRole, Value};
use cf_converge::{MemoryFoundry, ReconcileOptions, Reconciler};

fn declaration(yaml: &str) -> ResourceSpec {
    serde_yaml::from_str(yaml).expect("valid declaration")
}

fn manifest(yaml: &str) -> ConvergeConfig {
    serde_yaml::from_str(yaml).expect("valid manifest")
}

const fn live() -> ReconcileOptions {
    ReconcileOptions { dry_run: false }
}

const fn dry_run() -> ReconcileOptions {
    ReconcileOptions { dry_run: true }
}

fn seed_user(foundry: &MemoryFoundry, name: &str) -> String {
    foundry
        .seed(
            ResourceKind::User,
            name,
            None,
            [
                ("given_name", Value::from(name)),
                ("family_name", Value::from("Lovelace")),
            ],
        )
        .guid
}

const RULE_HTTPS: &str = r"
kind: security_group_rule
name: https
security_group: sg1
protocol: tcp
destination: 10.0.0.0/8
ports: '443'
";

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_create_org_with_quota_reference() {
    let foundry = MemoryFoundry::with_defaults();
    let quota = foundry
        .get(ResourceKind::Quota, &Lookup::global("default"))
        .expect("seeded quota");
    let spec = declaration("kind: organization\nname: acme\nquota: default\n");

    let outcome = Reconciler::new(&foundry, live())
        .apply(&spec)
        .await
        .expect("organization should be created");

    assert!(outcome.changed);
    assert_eq!(outcome.msg, "organization acme created");
    let org = outcome.data.expect("created record");
    assert_eq!(org.text("quota_definition_guid"), Some(quota.guid.as_str()));
    assert!(foundry.get(ResourceKind::Organization, &Lookup::global("acme")).is_some());
}

#[tokio::test]
async fn test_rule_second_run_is_noop() {
    let foundry = MemoryFoundry::new();
    foundry.seed(ResourceKind::SecurityGroup, "sg1", None, Vec::<(String, Value)>::new());
    let spec = declaration(RULE_HTTPS);
    let reconciler = Reconciler::new(&foundry, live());

    let first = reconciler.apply(&spec).await.expect("rule should be created");
    foundry.clear_calls();
    let second = reconciler.apply(&spec).await.expect("rule already exists");

    assert!(first.changed);
    assert!(!second.changed);
    assert_eq!(second.msg, "security group rule https exists");
    assert_eq!(foundry.mutation_count(), 0);
}

#[tokio::test]
async fn test_missing_scope_fails_without_create() {
    let foundry = MemoryFoundry::new();
    let spec = declaration("kind: space\nname: stest\norganization: nonexistent\n");

    let err = Reconciler::new(&foundry, live())
        .apply(&spec)
        .await
        .expect_err("organization does not exist");

    let ReconcileError::NotFound { kind, name, .. } = err else {
        panic!("expected a not found error, got {err:?}");
    };
    assert_eq!(kind, "organization");
    assert_eq!(name, "nonexistent");
    assert_eq!(foundry.mutation_count(), 0);
}

#[tokio::test]
async fn test_icmp_rule_without_type_fails_before_remote_calls() {
    let foundry = MemoryFoundry::new();
    let spec = declaration(
        "kind: security_group_rule\nname: ping\nsecurity_group: sg1\nprotocol: icmp\n",
    );

    let err = Reconciler::new(&foundry, live())
        .apply(&spec)
        .await
        .expect_err("icmp needs type and code");

    assert!(matches!(err, ReconcileError::Validation { .. }));
    assert!(foundry.calls().is_empty());
}

// ============================================================================
// Idempotence and dry run
// ============================================================================

#[tokio::test]
async fn test_every_kind_converges() {
    let foundry = MemoryFoundry::with_defaults();
    seed_user(&foundry, "ada");
    let config = manifest(
        r"
resources:
  - kind: quota
    name: small
    non_basic_services_allowed: false
    total_services: 10
    total_routes: 10
    memory_limit: 2048
    instance_memory_limit: -1
  - kind: organization
    name: acme
    quota: small
    members:
      - user: ada
      - user: ada
        role: manager
  - kind: space
    name: dev
    organization: acme
    allow_ssh: false
    members:
      - user: ada
        role: developer
  - kind: domain
    name: apps.acme.example.com
    owner_organization: acme
  - kind: domain
    name: tcp.example.com
    type: shared
  - kind: security_group
    name: sg1
    spaces:
      - organization: acme
        space: dev
  - kind: security_group_rule
    name: https
    security_group: sg1
    protocol: tcp
    destination: 10.0.0.0/8
    ports: '443'
  - kind: user
    name: grace
    given_name: Grace
    family_name: Hopper
    email: grace@example.com
    default_organization: acme
    default_space: dev
  - kind: feature_flag
    name: diego_docker
    value: true
  - kind: env_var
    name: HTTP_PROXY
    value: http://proxy.example.com:3128
    context: staging
",
    );
    let reconciler = Reconciler::new(&foundry, live());

    let first = reconciler.apply_all(&config.resources, false).await;
    assert!(first.is_success(), "first run failed: {first:?}");
    assert_eq!(first.changed_count(), config.resources.len());

    foundry.clear_calls();
    let second = reconciler.apply_all(&config.resources, false).await;
    assert!(second.is_success());
    assert_eq!(second.changed_count(), 0, "second run changed: {second:?}");
    assert_eq!(foundry.mutation_count(), 0);
}

#[tokio::test]
async fn test_dry_run_matches_real_run() {
    let foundry = MemoryFoundry::with_defaults();
    let ada = seed_user(&foundry, "ada");
    let spec = declaration(
        r"
kind: organization
name: acme
members:
  - user: ada
    role: auditor
",
    );

    let preview = Reconciler::new(&foundry, dry_run())
        .apply(&spec)
        .await
        .expect("dry run should succeed");
    assert!(preview.changed);
    assert!(preview.msg.ends_with("(dry run)"));
    assert!(preview.data.is_none());
    assert_eq!(foundry.mutation_count(), 0);

    let applied = Reconciler::new(&foundry, live())
        .apply(&spec)
        .await
        .expect("real run should succeed");
    assert_eq!(applied.changed, preview.changed);
    let org = applied.data.expect("created record");
    assert!(foundry.related(Relation::OrgRole(OrgRole::Auditor), &org.guid).contains(&ada));

    foundry.clear_calls();
    let again = Reconciler::new(&foundry, dry_run())
        .apply(&spec)
        .await
        .expect("dry run should succeed");
    assert!(!again.changed);
    assert_eq!(foundry.mutation_count(), 0);
}

#[tokio::test]
async fn test_update_reports_changed_fields() {
    let foundry = MemoryFoundry::with_defaults();
    let org = foundry.seed(ResourceKind::Organization, "acme", None, Vec::<(String, Value)>::new());
    foundry.seed(
        ResourceKind::Space,
        "dev",
        Some(&org.guid),
        [("allow_ssh", Value::Bool(true))],
    );
    let spec = declaration("kind: space\nname: dev\norganization: acme\nallow_ssh: false\n");

    let outcome = Reconciler::new(&foundry, live())
        .apply(&spec)
        .await
        .expect("space should be updated");

    assert!(outcome.changed);
    assert_eq!(outcome.msg, "space dev updated (allow_ssh)");
    let space = foundry
        .get(ResourceKind::Space, &Lookup::scoped("dev", org.guid))
        .expect("space exists");
    assert_eq!(space.attr("allow_ssh"), Some(&Value::Bool(false)));
}

// ============================================================================
// Absence and protection
// ============================================================================

#[tokio::test]
async fn test_absent_entity_is_noop() {
    let foundry = MemoryFoundry::new();
    let spec = declaration("kind: organization\nname: ghost\nstate: absent\n");

    let outcome = Reconciler::new(&foundry, live())
        .apply(&spec)
        .await
        .expect("nothing to delete");

    assert!(!outcome.changed);
    assert_eq!(outcome.msg, "organization ghost does not exist");
    assert_eq!(foundry.mutation_count(), 0);
}

#[tokio::test]
async fn test_protected_quota_needs_force() {
    let foundry = MemoryFoundry::with_defaults();
    let reconciler = Reconciler::new(&foundry, live());

    let err = reconciler
        .apply(&declaration("kind: quota\nname: default\nstate: absent\n"))
        .await
        .expect_err("default quota is protected");
    assert!(matches!(err, ReconcileError::ProtectedEntity { .. }));
    assert_eq!(foundry.mutation_count(), 0);

    let outcome = reconciler
        .apply(&declaration("kind: quota\nname: default\nstate: absent\nforce: true\n"))
        .await
        .expect("forced delete");
    assert!(outcome.changed);
    assert!(outcome.data.is_none());
    assert!(foundry.get(ResourceKind::Quota, &Lookup::global("default")).is_none());
}

#[tokio::test]
async fn test_recursive_org_delete() {
    let foundry = MemoryFoundry::new();
    let org = foundry.seed(ResourceKind::Organization, "acme", None, Vec::<(String, Value)>::new());
    foundry.seed(ResourceKind::Space, "dev", Some(&org.guid), Vec::<(String, Value)>::new());
    let reconciler = Reconciler::new(&foundry, live());

    let err = reconciler
        .apply(&declaration("kind: organization\nname: acme\nstate: absent\n"))
        .await
        .expect_err("organization still has spaces");
    assert_eq!(err.operation(), Some("delete"));

    let outcome = reconciler
        .apply(&declaration(
            "kind: organization\nname: acme\nstate: absent\nrecursive: true\n",
        ))
        .await
        .expect("recursive delete");
    assert!(outcome.changed);
    assert!(foundry.records(ResourceKind::Space).is_empty());
}

// ============================================================================
// Relations
// ============================================================================

#[tokio::test]
async fn test_member_removal_is_idempotent() {
    let foundry = MemoryFoundry::new();
    let ada = seed_user(&foundry, "ada");
    let org = foundry.seed(ResourceKind::Organization, "acme", None, Vec::<(String, Value)>::new());
    let space = foundry.seed(ResourceKind::Space, "dev", Some(&org.guid), Vec::<(String, Value)>::new());
    foundry.set_relation(Relation::OrgRole(OrgRole::User), &org.guid, [ada.clone()]);
    foundry.set_relation(Relation::SpaceRole(SpaceRole::Manager), &space.guid, [ada.clone()]);

    let spec = declaration(
        r"
kind: space
name: dev
organization: acme
members:
  - user: ada
    role: manager
    state: absent
  - user: ghost
    role: manager
    state: absent
",
    );
    let reconciler = Reconciler::new(&foundry, live());

    let first = reconciler.apply(&spec).await.expect("role should be revoked");
    let second = reconciler.apply(&spec).await.expect("role already revoked");

    assert!(first.changed);
    assert!(!second.changed);
    assert!(foundry.related(Relation::SpaceRole(SpaceRole::Manager), &space.guid).is_empty());
}

#[tokio::test]
async fn test_space_role_requires_org_membership() {
    let foundry = MemoryFoundry::new();
    seed_user(&foundry, "ada");
    let org = foundry.seed(ResourceKind::Organization, "acme", None, Vec::<(String, Value)>::new());
    foundry.seed(ResourceKind::Space, "dev", Some(&org.guid), Vec::<(String, Value)>::new());
    let spec = declaration(
        "kind: space\nname: dev\norganization: acme\nmembers:\n  - user: ada\n",
    );

    let err = Reconciler::new(&foundry, live())
        .apply(&spec)
        .await
        .expect_err("ada is not an organization member");

    assert!(matches!(err, ReconcileError::Remote { .. }));
    assert!(err.to_string().contains("ada"));
}

#[tokio::test]
async fn test_relation_failure_aborts_invocation() {
    let foundry = MemoryFoundry::new();
    seed_user(&foundry, "ada");
    foundry.fail_on("add_relation", ApiError::request(403, "CF-NotAuthorized"));
    let spec = declaration("kind: organization\nname: acme\nmembers:\n  - user: ada\n");

    let result = Reconciler::new(&foundry, live()).apply(&spec).await;

    let Err(ReconcileError::Remote {
        kind,
        name,
        operation,
        source,
    }) = result
    else {
        panic!("expected a remote failure, got {result:?}");
    };
    assert_eq!(kind, "organization");
    assert_eq!(name, "acme");
    assert!(operation.starts_with("add user ada"), "operation: {operation}");
    assert_eq!(source, ApiError::request(403, "CF-NotAuthorized"));
}

// ============================================================================
// Manifest runs
// ============================================================================

const PARTLY_BROKEN: &str = r"
resources:
  - kind: organization
    name: first
  - kind: space
    name: dev
    organization: missing
  - kind: organization
    name: third
";

#[tokio::test]
async fn test_run_stops_at_first_failure() {
    let foundry = MemoryFoundry::new();
    let config = manifest(PARTLY_BROKEN);

    let report = Reconciler::new(&foundry, live())
        .apply_all(&config.resources, false)
        .await;

    assert_eq!(report.entries.len(), 2);
    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.skipped, 1);
    assert!(foundry.get(ResourceKind::Organization, &Lookup::global("third")).is_none());
}

#[tokio::test]
async fn test_run_continues_on_error() {
    let foundry = MemoryFoundry::new();
    let config = manifest(PARTLY_BROKEN);

    let report = Reconciler::new(&foundry, live())
        .apply_all(&config.resources, true)
        .await;

    assert_eq!(report.entries.len(), 3);
    assert_eq!(report.changed_count(), 2);
    assert_eq!(report.skipped, 0);
    assert!(!report.is_success());

    let json = serde_json::to_value(&report).expect("report serializes");
    assert_eq!(json["entries"][1]["failed"], true);
    assert_eq!(json["entries"][1]["category"], "not_found");
}
