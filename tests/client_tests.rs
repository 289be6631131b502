//! HTTP client tests against a mocked Cloud Controller and UAA.

use cf_converge::config::ResourceSpec;
use cf_converge::error::ApiError;
use cf_converge::foundry::{
    CfClient, ClientOptions, FoundryApi, Lookup, OrgRole, Relation, ResourceKind, Value,
};
use cf_converge::{ReconcileOptions, Reconciler};
use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> CfClient {
    CfClient::with_token(&server.uri(), &server.uri(), "token-1", ClientOptions::default())
        .expect("client should build")
}

fn v2_page(resources: serde_json::Value) -> serde_json::Value {
    json!({ "total_results": resources.as_array().map_or(0, Vec::len), "next_url": null, "resources": resources })
}

fn org_resource(guid: &str, name: &str) -> serde_json::Value {
    json!({
        "metadata": { "guid": guid, "url": format!("/v2/organizations/{guid}") },
        "entity": { "name": name, "status": "active", "quota_definition_guid": "quota-1" }
    })
}

async fn mount_token_endpoint(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v2/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "",
            "api_version": "2.150.0",
            "token_endpoint": server.uri(),
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "token-1",
            "refresh_token": "refresh-1",
            "token_type": "bearer",
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_with_password_grant() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;
    Mock::given(method("GET"))
        .and(path("/v2/organizations"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(v2_page(json!([]))))
        .expect(1)
        .mount(&server)
        .await;

    let client = CfClient::login(&server.uri(), "admin", "secret", ClientOptions::default())
        .await
        .expect("login should succeed");
    let orgs = client
        .list(ResourceKind::Organization, None)
        .await
        .expect("list should succeed");

    assert!(orgs.is_empty());
}

#[tokio::test]
async fn test_login_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_endpoint": server.uri(),
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "unauthorized",
            "error_description": "Bad credentials",
        })))
        .mount(&server)
        .await;

    let err = CfClient::login(&server.uri(), "admin", "wrong", ClientOptions::default())
        .await
        .expect_err("credentials are rejected");

    assert_eq!(
        err,
        ApiError::AuthenticationFailed {
            message: String::from("Bad credentials")
        }
    );
}

#[tokio::test]
async fn test_expired_token_is_refreshed_once() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "token-2",
            "refresh_token": "refresh-2",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/organizations"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_token",
            "error_description": "Token has expired",
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/organizations"))
        .and(header("authorization", "Bearer token-2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(v2_page(json!([org_resource("org-1", "acme")]))),
        )
        .mount(&server)
        .await;

    let client = CfClient::login(&server.uri(), "admin", "secret", ClientOptions::default())
        .await
        .expect("login should succeed");
    let resolution = client
        .find(ResourceKind::Organization, &Lookup::global("acme"))
        .await
        .expect("request is replayed with the new token");

    assert_eq!(resolution.record().map(|r| r.guid.as_str()), Some("org-1"));
}

#[tokio::test]
async fn test_find_filters_by_exact_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/organizations"))
        .and(query_param("q", "name:acme"))
        .respond_with(ResponseTemplate::new(200).set_body_json(v2_page(json!([
            org_resource("org-1", "acme"),
            org_resource("org-2", "acme-labs"),
        ]))))
        .mount(&server)
        .await;

    let resolution = client(&server)
        .find(ResourceKind::Organization, &Lookup::global("acme"))
        .await
        .expect("lookup should succeed");

    let record = resolution.into_record().expect("acme exists");
    assert_eq!(record.guid, "org-1");
    assert_eq!(record.text("quota_definition_guid"), Some("quota-1"));
}

#[tokio::test]
async fn test_unknown_feature_flag_is_absent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/config/feature_flags/no_such_flag"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": 330000,
            "description": "The feature flag could not be found: no_such_flag",
            "error_code": "CF-FeatureFlagNotFound",
        })))
        .mount(&server)
        .await;

    let resolution = client(&server)
        .find(ResourceKind::FeatureFlag, &Lookup::global("no_such_flag"))
        .await
        .expect("404 means absent");

    assert!(!resolution.is_found());
}

#[tokio::test]
async fn test_forbidden_maps_to_request_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/organizations"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "code": 10003,
            "description": "You are not authorized to perform the requested action",
            "error_code": "CF-NotAuthorized",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .create(ResourceKind::Organization, &Lookup::global("acme"), &Default::default())
        .await
        .expect_err("forbidden");

    assert_eq!(
        err,
        ApiError::request(
            403,
            "CF-NotAuthorized: You are not authorized to perform the requested action"
        )
    );
}

#[tokio::test]
async fn test_add_org_role() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v2/organizations/org-1/managers/user-1"))
        .respond_with(ResponseTemplate::new(201).set_body_json(org_resource("org-1", "acme")))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .add_relation(Relation::OrgRole(OrgRole::Manager), "org-1", "user-1")
        .await
        .expect("role should be granted");
}

#[tokio::test]
async fn test_reconcile_creates_org_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/quota_definitions"))
        .and(query_param("q", "name:default"))
        .respond_with(ResponseTemplate::new(200).set_body_json(v2_page(json!([{
            "metadata": { "guid": "quota-1" },
            "entity": { "name": "default", "memory_limit": 10240 }
        }]))))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/organizations"))
        .and(query_param("q", "name:acme"))
        .respond_with(ResponseTemplate::new(200).set_body_json(v2_page(json!([]))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/organizations"))
        .and(body_partial_json(json!({
            "name": "acme",
            "quota_definition_guid": "quota-1",
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(org_resource("org-1", "acme")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let spec: ResourceSpec = serde_yaml::from_str("kind: organization\nname: acme\nquota: default\n")
        .expect("valid declaration");

    let outcome = Reconciler::new(&client, ReconcileOptions::default())
        .apply(&spec)
        .await
        .expect("organization should be created");

    assert!(outcome.changed);
    let record = outcome.data.expect("created record");
    assert_eq!(record.guid, "org-1");
    assert_eq!(record.attr("status"), Some(&Value::from("active")));
}

#[tokio::test]
async fn test_user_update_keeps_undeclared_uaa_fields() {
    let server = MockServer::start().await;
    let ada = |given: &str| {
        json!({
            "id": "user-1",
            "userName": "ada",
            "name": { "givenName": given, "familyName": "L" },
            "emails": [{ "value": "ada@example.com", "primary": true }],
            "origin": "ldap",
            "externalId": "cn=ada,ou=people",
            "active": true,
        })
    };
    Mock::given(method("GET"))
        .and(path("/Users"))
        .and(query_param("filter", "userName eq \"ada\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resources": [ada("Augusta")],
            "totalResults": 1,
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/users/user-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "metadata": { "guid": "user-1" },
            "entity": { "default_space_guid": null }
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/Users/user-1"))
        .and(body_partial_json(json!({
            "userName": "ada",
            "name": { "givenName": "Ada", "familyName": "L" },
            "origin": "ldap",
            "emails": [{ "value": "ada@example.com", "primary": true }],
            "externalId": "cn=ada,ou=people",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(ada("Ada")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let spec: ResourceSpec = serde_yaml::from_str(
        "kind: user\nname: ada\ngiven_name: Ada\nfamily_name: L\norigin: ldap\n",
    )
    .expect("valid declaration");

    let outcome = Reconciler::new(&client, ReconcileOptions::default())
        .apply(&spec)
        .await
        .expect("user should be updated");

    assert!(outcome.changed);
    assert_eq!(outcome.msg, "user ada updated (given_name)");
    let record = outcome.data.expect("updated record");
    assert_eq!(record.attr("origin"), Some(&Value::from("ldap")));
    assert_eq!(record.attr("email"), Some(&Value::from("ada@example.com")));
}
