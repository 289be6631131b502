//! Cloud Foundry v2 API client implementation.
//!
//! This module provides the HTTP client for the Cloud Controller and its
//! identity server (UAA). It authenticates with a password grant, refreshes
//! the session once when a token is rejected, retries idempotent reads on
//! transport faults and never replays a mutation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Method, Response};
use serde::Deserialize;
use serde_json::{json, Map, Value as Json};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, trace};

use crate::error::{ApiError, ApiResult};

use super::api::FoundryApi;
use super::types::{
    attributes_to_json, Attributes, Lifecycle, Lookup, Record, Relation, Resolution,
    ResourceKind, Value,
};

/// OAuth client used by the platform's own command line tooling.
const CLIENT_ID: &str = "cf";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of attempts for an idempotent read.
const MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// Transport options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Verify TLS certificates.
    pub validate_certs: bool,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            validate_certs: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone)]
struct Tokens {
    access: String,
    refresh: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// A single HTTP exchange.
#[derive(Debug, Clone)]
struct ApiRequest {
    method: Method,
    url: String,
    query: Vec<(&'static str, String)>,
    body: Option<Json>,
    if_match: bool,
}

impl ApiRequest {
    fn new(method: Method, url: String) -> Self {
        Self {
            method,
            url,
            query: Vec::new(),
            body: None,
            if_match: false,
        }
    }

    fn get(url: String) -> Self {
        Self::new(Method::GET, url)
    }

    fn delete(url: String) -> Self {
        Self::new(Method::DELETE, url)
    }

    fn post(url: String, body: Json) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    fn put(url: String, body: Json) -> Self {
        Self::new(Method::PUT, url).with_body(body)
    }

    fn with_body(mut self, body: Json) -> Self {
        self.body = Some(body);
        self
    }

    fn query(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.query.push((key, value.into()));
        self
    }

    fn if_match(mut self) -> Self {
        self.if_match = true;
        self
    }

    fn is_idempotent_read(&self) -> bool {
        self.method == Method::GET
    }
}

/// Authenticated Cloud Foundry API client.
pub struct CfClient {
    http: Client,
    api_url: String,
    uaa_url: String,
    tokens: RwLock<Tokens>,
}

impl fmt::Debug for CfClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CfClient")
            .field("api_url", &self.api_url)
            .field("uaa_url", &self.uaa_url)
            .finish_non_exhaustive()
    }
}

impl CfClient {
    /// Logs in with a password grant.
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationFailed` if the credentials are rejected, or a
    /// transport error if the control plane cannot be reached.
    pub async fn login(
        api_url: &str,
        username: &str,
        password: &str,
        options: ClientOptions,
    ) -> ApiResult<Self> {
        let http = build_http(options)?;
        let api_url = api_url.trim_end_matches('/').to_string();

        let response = http
            .get(format!("{api_url}/v2/info"))
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ApiError::network(format!("Failed to reach {api_url}: {e}")))?;
        let info = decode(response).await?;
        let uaa_url = info
            .get("token_endpoint")
            .and_then(Json::as_str)
            .ok_or_else(|| ApiError::invalid("/v2/info has no token_endpoint"))?
            .trim_end_matches('/')
            .to_string();

        let tokens = token_grant(
            &http,
            &uaa_url,
            &[
                ("grant_type", "password"),
                ("username", username),
                ("password", password),
            ],
        )
        .await?;

        info!("Authenticated against {api_url} as {username}");

        Ok(Self {
            http,
            api_url,
            uaa_url,
            tokens: RwLock::new(tokens),
        })
    }

    /// Creates a client from an already issued access token.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_token(
        api_url: &str,
        uaa_url: &str,
        access_token: &str,
        options: ClientOptions,
    ) -> ApiResult<Self> {
        Ok(Self {
            http: build_http(options)?,
            api_url: api_url.trim_end_matches('/').to_string(),
            uaa_url: uaa_url.trim_end_matches('/').to_string(),
            tokens: RwLock::new(Tokens {
                access: access_token.to_string(),
                refresh: None,
            }),
        })
    }

    /// Control plane base URL.
    #[must_use]
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn api(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{path}", self.api_url)
        }
    }

    fn uaa(&self, path: &str) -> String {
        format!("{}{path}", self.uaa_url)
    }

    /// Executes a request, retrying idempotent reads on transient faults.
    async fn execute(&self, request: &ApiRequest) -> ApiResult<Json> {
        let attempts = if request.is_idempotent_read() { MAX_RETRIES } else { 1 };
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                debug!("Retry attempt {attempt} of {MAX_RETRIES} for {}", request.url);
                tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt)))
                    .await;
            }

            match self.execute_authenticated(request).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ApiError::network("Max retries exceeded")))
    }

    /// Executes a request, refreshing the session once if the token is rejected.
    async fn execute_authenticated(&self, request: &ApiRequest) -> ApiResult<Json> {
        match self.execute_once(request).await {
            Err(ApiError::AuthenticationFailed { .. }) => {
                debug!("Access token rejected, refreshing session");
                self.refresh().await?;
                self.execute_once(request).await
            }
            other => other,
        }
    }

    /// Executes a single HTTP exchange.
    async fn execute_once(&self, request: &ApiRequest) -> ApiResult<Json> {
        trace!("{} {}", request.method, request.url);

        let token = self.tokens.read().await.access.clone();
        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json");

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if request.if_match {
            builder = builder.header(header::IF_MATCH, "*");
        }

        let response = builder.send().await.map_err(|e| {
            ApiError::network(format!("{} {} failed: {e}", request.method, request.url))
        })?;

        decode(response).await
    }

    async fn refresh(&self) -> ApiResult<()> {
        let refresh = self.tokens.read().await.refresh.clone().ok_or_else(|| {
            ApiError::AuthenticationFailed {
                message: String::from("session expired and no refresh token is available"),
            }
        })?;

        let tokens = token_grant(
            &self.http,
            &self.uaa_url,
            &[("grant_type", "refresh_token"), ("refresh_token", refresh.as_str())],
        )
        .await?;

        *self.tokens.write().await = tokens;
        Ok(())
    }

    /// Reads every page of a v2 listing.
    async fn get_resources(&self, request: ApiRequest) -> ApiResult<Vec<Json>> {
        let mut resources = Vec::new();
        let mut request = request;

        loop {
            let page = self.execute(&request).await?;
            if let Some(items) = page.get("resources").and_then(Json::as_array) {
                resources.extend(items.iter().cloned());
            }
            match page.get("next_url").and_then(Json::as_str) {
                Some(next) => request = ApiRequest::get(self.api(next)),
                None => break,
            }
        }

        Ok(resources)
    }

    async fn list_v2(
        &self,
        kind: ResourceKind,
        request: ApiRequest,
        scope: Option<&str>,
    ) -> ApiResult<Vec<Record>> {
        self.get_resources(request)
            .await?
            .iter()
            .map(|resource| v2_record(kind, resource, scope))
            .collect()
    }

    async fn find_v2(
        &self,
        kind: ResourceKind,
        path: &str,
        lookup: &Lookup,
        filter_by_name: bool,
    ) -> ApiResult<Resolution> {
        let mut request = ApiRequest::get(self.api(path));
        if filter_by_name {
            request = request.query("q", format!("name:{}", lookup.name));
        }
        let records = self.list_v2(kind, request, lookup.scope.as_deref()).await?;
        exactly_one(&lookup.name, records)
    }

    async fn security_group_rules(&self, group_guid: &str) -> ApiResult<Vec<Json>> {
        let group = self
            .execute(&ApiRequest::get(
                self.api(&format!("/v2/security_groups/{group_guid}")),
            ))
            .await?;
        Ok(group
            .pointer("/entity/rules")
            .and_then(Json::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn write_security_group_rules(&self, group_guid: &str, rules: Vec<Json>) -> ApiResult<()> {
        self.execute(&ApiRequest::put(
            self.api(&format!("/v2/security_groups/{group_guid}")),
            json!({ "rules": rules }),
        ))
        .await?;
        Ok(())
    }

    async fn env_group(&self, lifecycle: &str) -> ApiResult<Map<String, Json>> {
        let group = self
            .execute(&ApiRequest::get(self.api(&format!(
                "/v2/config/environment_variable_groups/{lifecycle}"
            ))))
            .await?;
        Ok(group.as_object().cloned().unwrap_or_default())
    }

    async fn write_env_group(&self, lifecycle: &str, entries: Map<String, Json>) -> ApiResult<()> {
        self.execute(&ApiRequest::put(
            self.api(&format!(
                "/v2/config/environment_variable_groups/{lifecycle}"
            )),
            Json::Object(entries),
        ))
        .await?;
        Ok(())
    }

    /// Reads the control plane half of a user record.
    async fn default_space_guid(&self, user_guid: &str) -> ApiResult<Option<String>> {
        match self
            .execute(&ApiRequest::get(self.api(&format!("/v2/users/{user_guid}"))))
            .await
        {
            Ok(user) => Ok(user
                .pointer("/entity/default_space_guid")
                .and_then(Json::as_str)
                .map(String::from)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn find_user(&self, lookup: &Lookup) -> ApiResult<Resolution> {
        let result = self
            .execute(
                &ApiRequest::get(self.uaa("/Users"))
                    .query("filter", format!("userName eq \"{}\"", lookup.name)),
            )
            .await?;

        let users = result
            .get("resources")
            .and_then(Json::as_array)
            .cloned()
            .unwrap_or_default()
            .iter()
            .map(uaa_record)
            .collect::<ApiResult<Vec<_>>>()?;

        match exactly_one(&lookup.name, users)? {
            Resolution::Found(mut record) => {
                let default_space = self.default_space_guid(&record.guid).await?;
                record
                    .attributes
                    .insert(String::from("default_space_guid"), Value::from(default_space));
                Ok(Resolution::Found(record))
            }
            Resolution::Absent => Ok(Resolution::Absent),
        }
    }

    async fn create_user(&self, lookup: &Lookup, attributes: &Attributes) -> ApiResult<Record> {
        let mut body = uaa_user_body(&lookup.name, attributes);
        if let Some(password) = text(attributes, "password") {
            body["password"] = json!(password);
        }

        let created = self
            .execute(&ApiRequest::post(self.uaa("/Users"), body))
            .await?;
        let mut record = uaa_record(&created)?;

        let default_space = text(attributes, "default_space_guid");
        self.execute(&ApiRequest::post(
            self.api("/v2/users"),
            json!({ "guid": record.guid, "default_space_guid": default_space }),
        ))
        .await?;

        record
            .attributes
            .insert(String::from("default_space_guid"), Value::from(default_space));
        Ok(record)
    }

    async fn update_user(&self, current: &Record, attributes: &Attributes) -> ApiResult<Record> {
        let guid = &current.guid;
        // SCIM PUT replaces the whole user, so undeclared fields keep their current values.
        let mut merged = current.attributes.clone();
        merged.extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        let updated = self
            .execute(
                &ApiRequest::put(
                    self.uaa(&format!("/Users/{guid}")),
                    uaa_user_body(&current.name, &merged),
                )
                .if_match(),
            )
            .await?;
        let mut record = uaa_record(&updated)?;

        let default_space = text(attributes, "default_space_guid");
        if default_space.is_some() {
            self.execute(&ApiRequest::put(
                self.api(&format!("/v2/users/{guid}")),
                json!({ "default_space_guid": default_space }),
            ))
            .await?;
        }

        if let Some(password) = text(attributes, "password") {
            self.execute(&ApiRequest::put(
                self.uaa(&format!("/Users/{guid}/password")),
                json!({ "password": password }),
            ))
            .await?;
        }

        let default_space = match default_space {
            Some(space) => Some(space.to_string()),
            None => current.text("default_space_guid").map(String::from),
        };
        record
            .attributes
            .insert(String::from("default_space_guid"), Value::from(default_space));
        Ok(record)
    }

    async fn delete_user(&self, current: &Record) -> ApiResult<()> {
        let guid = &current.guid;
        match self
            .execute(
                &ApiRequest::delete(self.api(&format!("/v2/users/{guid}")))
                    .query("async", "false"),
            )
            .await
        {
            Err(e) if !e.is_not_found() => return Err(e),
            _ => {}
        }
        self.execute(&ApiRequest::delete(self.uaa(&format!("/Users/{guid}"))))
            .await?;
        Ok(())
    }
}

fn build_http(options: ClientOptions) -> ApiResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(options.timeout_secs))
        .danger_accept_invalid_certs(!options.validate_certs)
        .build()
        .map_err(|e| ApiError::network(format!("Failed to create HTTP client: {e}")))
}

async fn token_grant(http: &Client, uaa_url: &str, form: &[(&str, &str)]) -> ApiResult<Tokens> {
    let response = http
        .post(format!("{uaa_url}/oauth/token"))
        .basic_auth(CLIENT_ID, Some(""))
        .header(header::ACCEPT, "application/json")
        .form(form)
        .send()
        .await
        .map_err(|e| ApiError::network(format!("Failed to reach {uaa_url}: {e}")))?;

    let body = decode(response).await.map_err(|e| match e {
        ApiError::RequestFailed {
            status: 400 | 401,
            message,
        } => ApiError::AuthenticationFailed { message },
        other => other,
    })?;

    let token: TokenResponse = serde_json::from_value(body)
        .map_err(|e| ApiError::invalid(format!("Failed to parse token response: {e}")))?;

    Ok(Tokens {
        access: token.access_token,
        refresh: token.refresh_token,
    })
}

/// Maps a response to its JSON body or a typed error.
async fn decode(response: Response) -> ApiResult<Json> {
    let status = response.status();

    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        let retry_after = if retry_after == 0 { 60 } else { retry_after };

        return Err(ApiError::RateLimited {
            retry_after_secs: retry_after,
        });
    }

    let text = response
        .text()
        .await
        .map_err(|e| ApiError::network(format!("Failed to read response: {e}")))?;

    if status.as_u16() == 401 {
        return Err(ApiError::AuthenticationFailed {
            message: error_message(&text),
        });
    }

    if !status.is_success() {
        return Err(ApiError::request(status.as_u16(), error_message(&text)));
    }

    if text.trim().is_empty() {
        return Ok(Json::Null);
    }

    serde_json::from_str(&text)
        .map_err(|e| ApiError::invalid(format!("Failed to parse response: {e}")))
}

/// Extracts the human readable part of a control plane or UAA error body.
fn error_message(body: &str) -> String {
    let Ok(json) = serde_json::from_str::<Json>(body) else {
        return body.trim().to_string();
    };

    let field = |key: &str| json.get(key).and_then(Json::as_str).map(String::from);
    match (field("error_code"), field("description")) {
        (Some(code), Some(description)) => format!("{code}: {description}"),
        (None, Some(description)) => description,
        _ => field("error_description")
            .or_else(|| field("message"))
            .unwrap_or_else(|| body.trim().to_string()),
    }
}

fn timestamp(value: Option<&Json>) -> Option<DateTime<Utc>> {
    value
        .and_then(Json::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn text<'a>(attributes: &'a Attributes, key: &str) -> Option<&'a str> {
    attributes.get(key).and_then(Value::as_str)
}

fn require_scope(kind: ResourceKind, lookup: &Lookup) -> ApiResult<&str> {
    lookup
        .scope
        .as_deref()
        .ok_or_else(|| ApiError::invalid(format!("{kind} lookup without a scope")))
}

/// Keeps the records whose natural key matches exactly.
fn exactly_one(name: &str, records: Vec<Record>) -> ApiResult<Resolution> {
    let mut matches: Vec<Record> = records.into_iter().filter(|r| r.name == name).collect();
    match matches.len() {
        0 => Ok(Resolution::Absent),
        1 => Ok(Resolution::from(matches.pop())),
        count => Err(ApiError::Ambiguous {
            name: name.to_string(),
            count,
        }),
    }
}

/// Converts a v2 `{metadata, entity}` resource into a record.
fn v2_record(kind: ResourceKind, resource: &Json, scope: Option<&str>) -> ApiResult<Record> {
    let guid = resource
        .pointer("/metadata/guid")
        .and_then(Json::as_str)
        .ok_or_else(|| ApiError::invalid(format!("{kind} resource without metadata.guid")))?;
    let entity = resource
        .get("entity")
        .and_then(Json::as_object)
        .ok_or_else(|| ApiError::invalid(format!("{kind} resource without entity")))?;

    let name_field = if kind == ResourceKind::User { "username" } else { "name" };
    let name = entity.get(name_field).and_then(Json::as_str).unwrap_or_default();

    let mut record = Record::new(kind, guid, name);
    record.attributes = entity
        .iter()
        .filter(|(key, _)| key.as_str() != name_field && !key.ends_with("_url"))
        .filter_map(|(key, value)| Value::from_json(value).map(|v| (key.clone(), v)))
        .collect();
    record.scope = match kind {
        ResourceKind::Space | ResourceKind::SpaceQuota => scope
            .map(String::from)
            .or_else(|| record.text("organization_guid").map(String::from)),
        _ => scope.map(String::from),
    };
    record.created_at = timestamp(resource.pointer("/metadata/created_at"));
    record.updated_at = timestamp(resource.pointer("/metadata/updated_at"));
    Ok(record)
}

/// Converts an embedded security group rule into a record.
fn rule_record(group_guid: &str, rule: &Json) -> Option<Record> {
    let rule = rule.as_object()?;
    let description = rule.get("description").and_then(Json::as_str)?;

    let mut record = Record::new(ResourceKind::SecurityGroupRule, description, description)
        .with_scope(group_guid);
    record.attributes = rule
        .iter()
        .filter(|(key, _)| key.as_str() != "description")
        .filter_map(|(key, value)| Value::from_json(value).map(|v| (key.clone(), v)))
        .collect();
    Some(record)
}

fn rule_json(name: &str, attributes: &Attributes) -> Json {
    let mut rule = attributes_to_json(attributes);
    rule.insert(String::from("description"), json!(name));
    Json::Object(rule)
}

fn is_rule(rule: &Json, name: &str) -> bool {
    rule.get("description").and_then(Json::as_str) == Some(name)
}

fn env_record(lifecycle: &str, name: &str, value: &Json) -> Record {
    let value = value
        .as_str()
        .map_or_else(|| value.to_string(), String::from);
    Record::new(ResourceKind::EnvironmentVariable, name, name)
        .with_scope(lifecycle)
        .with_attribute("value", value)
}

fn feature_flag_record(flag: &Json) -> ApiResult<Record> {
    let name = flag
        .get("name")
        .and_then(Json::as_str)
        .ok_or_else(|| ApiError::invalid("feature flag without name"))?;
    let mut record = Record::new(ResourceKind::FeatureFlag, name, name);
    record.attributes = flag
        .as_object()
        .into_iter()
        .flatten()
        .filter(|(key, _)| key.as_str() != "name" && key.as_str() != "url")
        .filter_map(|(key, value)| Value::from_json(value).map(|v| (key.clone(), v)))
        .collect();
    Ok(record)
}

/// Converts a UAA SCIM user into a record.
fn uaa_record(user: &Json) -> ApiResult<Record> {
    let id = user
        .get("id")
        .and_then(Json::as_str)
        .ok_or_else(|| ApiError::invalid("UAA user without id"))?;
    let user_name = user
        .get("userName")
        .and_then(Json::as_str)
        .ok_or_else(|| ApiError::invalid("UAA user without userName"))?;
    let string = |pointer: &str| Value::from(user.pointer(pointer).and_then(Json::as_str));

    Ok(Record::new(ResourceKind::User, id, user_name)
        .with_attribute("given_name", string("/name/givenName"))
        .with_attribute("family_name", string("/name/familyName"))
        .with_attribute("email", string("/emails/0/value"))
        .with_attribute("origin", string("/origin"))
        .with_attribute("external_id", string("/externalId"))
        .with_attribute("active", user.get("active").and_then(Json::as_bool)))
}

fn uaa_user_body(name: &str, attributes: &Attributes) -> Json {
    let mut body = json!({
        "userName": name,
        "name": {
            "givenName": text(attributes, "given_name"),
            "familyName": text(attributes, "family_name"),
        },
        "active": attributes.get("active").and_then(Value::as_bool).unwrap_or(true),
        "origin": text(attributes, "origin").unwrap_or("uaa"),
    });
    if let Some(email) = text(attributes, "email") {
        body["emails"] = json!([{ "value": email, "primary": true }]);
    }
    if let Some(external_id) = text(attributes, "external_id") {
        body["externalId"] = json!(external_id);
    }
    body
}

/// Collection path of a v2 kind.
const fn collection_path(kind: ResourceKind) -> Option<&'static str> {
    match kind {
        ResourceKind::Organization => Some("/v2/organizations"),
        ResourceKind::Space => Some("/v2/spaces"),
        ResourceKind::Quota => Some("/v2/quota_definitions"),
        ResourceKind::SpaceQuota => Some("/v2/space_quota_definitions"),
        ResourceKind::SharedDomain => Some("/v2/shared_domains"),
        ResourceKind::PrivateDomain => Some("/v2/private_domains"),
        ResourceKind::SecurityGroup => Some("/v2/security_groups"),
        ResourceKind::SecurityGroupRule
        | ResourceKind::User
        | ResourceKind::FeatureFlag
        | ResourceKind::EnvironmentVariable => None,
    }
}

fn relation_path(relation: Relation, subject: &str) -> String {
    match relation {
        Relation::OrgRole(role) => format!("/v2/organizations/{subject}/{}", role.collection()),
        Relation::SpaceRole(role) => format!("/v2/spaces/{subject}/{}", role.collection()),
        Relation::SecurityGroupSpace(Lifecycle::Running) => {
            format!("/v2/security_groups/{subject}/spaces")
        }
        Relation::SecurityGroupSpace(Lifecycle::Staging) => {
            format!("/v2/security_groups/{subject}/staging_spaces")
        }
        Relation::DefaultSecurityGroup(lifecycle) => format!("/v2/config/{lifecycle}_security_groups"),
        Relation::SharedDomain => format!("/v2/private_domains/{subject}/shared_organizations"),
    }
}

fn relation_member_path(relation: Relation, subject: &str, object: &str) -> String {
    match relation {
        Relation::SharedDomain => format!("/v2/organizations/{object}/private_domains/{subject}"),
        _ => format!("{}/{object}", relation_path(relation, subject)),
    }
}

#[async_trait]
impl FoundryApi for CfClient {
    async fn find(&self, kind: ResourceKind, lookup: &Lookup) -> ApiResult<Resolution> {
        debug!("Looking up {kind} '{}'", lookup.name);

        match kind {
            ResourceKind::Space => {
                let org = require_scope(kind, lookup)?;
                self.find_v2(kind, &format!("/v2/organizations/{org}/spaces"), lookup, true)
                    .await
            }
            ResourceKind::SpaceQuota => {
                let org = require_scope(kind, lookup)?;
                self.find_v2(
                    kind,
                    &format!("/v2/organizations/{org}/space_quota_definitions"),
                    lookup,
                    false,
                )
                .await
            }
            ResourceKind::SecurityGroupRule => {
                let group = require_scope(kind, lookup)?;
                let rules = self.security_group_rules(group).await?;
                let records = rules.iter().filter_map(|r| rule_record(group, r)).collect();
                exactly_one(&lookup.name, records)
            }
            ResourceKind::User => self.find_user(lookup).await,
            ResourceKind::FeatureFlag => {
                match self
                    .execute(&ApiRequest::get(
                        self.api(&format!("/v2/config/feature_flags/{}", lookup.name)),
                    ))
                    .await
                {
                    Ok(flag) => feature_flag_record(&flag).map(Resolution::Found),
                    Err(e) if e.is_not_found() => Ok(Resolution::Absent),
                    Err(e) => Err(e),
                }
            }
            ResourceKind::EnvironmentVariable => {
                let lifecycle = require_scope(kind, lookup)?;
                let entries = self.env_group(lifecycle).await?;
                Ok(Resolution::from(
                    entries
                        .get(&lookup.name)
                        .map(|value| env_record(lifecycle, &lookup.name, value)),
                ))
            }
            ResourceKind::Organization
            | ResourceKind::Quota
            | ResourceKind::SharedDomain
            | ResourceKind::PrivateDomain
            | ResourceKind::SecurityGroup => {
                let path = collection_path(kind)
                    .ok_or_else(|| ApiError::unsupported("find", kind.label()))?;
                self.find_v2(kind, path, lookup, true).await
            }
        }
    }

    async fn list(&self, kind: ResourceKind, scope: Option<String>) -> ApiResult<Vec<Record>> {
        debug!("Listing {kind}");

        match (kind, scope.as_deref()) {
            (ResourceKind::Space, Some(org)) => {
                self.list_v2(
                    kind,
                    ApiRequest::get(self.api(&format!("/v2/organizations/{org}/spaces"))),
                    Some(org),
                )
                .await
            }
            (ResourceKind::SpaceQuota, Some(org)) => {
                self.list_v2(
                    kind,
                    ApiRequest::get(
                        self.api(&format!("/v2/organizations/{org}/space_quota_definitions")),
                    ),
                    Some(org),
                )
                .await
            }
            (ResourceKind::SecurityGroupRule, Some(group)) => Ok(self
                .security_group_rules(group)
                .await?
                .iter()
                .filter_map(|r| rule_record(group, r))
                .collect()),
            (ResourceKind::EnvironmentVariable, Some(lifecycle)) => Ok(self
                .env_group(lifecycle)
                .await?
                .iter()
                .map(|(name, value)| env_record(lifecycle, name, value))
                .collect()),
            (ResourceKind::User, _) => {
                self.list_v2(kind, ApiRequest::get(self.api("/v2/users")), None)
                    .await
            }
            (ResourceKind::FeatureFlag, _) => self
                .execute(&ApiRequest::get(self.api("/v2/config/feature_flags")))
                .await?
                .as_array()
                .into_iter()
                .flatten()
                .map(feature_flag_record)
                .collect(),
            (ResourceKind::SecurityGroupRule | ResourceKind::EnvironmentVariable, None) => {
                Err(ApiError::unsupported("unscoped list", kind.label()))
            }
            _ => {
                let path = collection_path(kind)
                    .ok_or_else(|| ApiError::unsupported("list", kind.label()))?;
                self.list_v2(kind, ApiRequest::get(self.api(path)), None).await
            }
        }
    }

    async fn create(
        &self,
        kind: ResourceKind,
        lookup: &Lookup,
        attributes: &Attributes,
    ) -> ApiResult<Record> {
        match kind {
            ResourceKind::SecurityGroupRule => {
                let group = require_scope(kind, lookup)?;
                let mut rules = self.security_group_rules(group).await?;
                rules.push(rule_json(&lookup.name, attributes));
                self.write_security_group_rules(group, rules).await?;

                let mut record = Record::new(kind, &lookup.name, &lookup.name).with_scope(group);
                record.attributes = attributes.clone();
                Ok(record)
            }
            ResourceKind::EnvironmentVariable => {
                let lifecycle = require_scope(kind, lookup)?;
                let value = attributes.get("value").map(Value::to_json).unwrap_or_default();
                let mut entries = self.env_group(lifecycle).await?;
                entries.insert(lookup.name.clone(), value.clone());
                self.write_env_group(lifecycle, entries).await?;
                Ok(env_record(lifecycle, &lookup.name, &value))
            }
            ResourceKind::User => self.create_user(lookup, attributes).await,
            ResourceKind::FeatureFlag => Err(ApiError::unsupported("create", kind.label())),
            _ => {
                let path = collection_path(kind)
                    .ok_or_else(|| ApiError::unsupported("create", kind.label()))?;

                let mut body = attributes_to_json(attributes);
                body.insert(String::from("name"), json!(lookup.name));
                if matches!(kind, ResourceKind::Space | ResourceKind::SpaceQuota) {
                    body.insert(
                        String::from("organization_guid"),
                        json!(require_scope(kind, lookup)?),
                    );
                }
                if kind == ResourceKind::SecurityGroup {
                    body.entry("rules").or_insert_with(|| json!([]));
                }

                let created = self
                    .execute(&ApiRequest::post(self.api(path), Json::Object(body)))
                    .await?;
                v2_record(kind, &created, lookup.scope.as_deref())
            }
        }
    }

    async fn update(&self, current: &Record, attributes: &Attributes) -> ApiResult<Record> {
        let kind = current.kind;
        match kind {
            ResourceKind::Organization
            | ResourceKind::Space
            | ResourceKind::Quota
            | ResourceKind::SpaceQuota => {
                let path = collection_path(kind)
                    .ok_or_else(|| ApiError::unsupported("update", kind.label()))?;
                let updated = self
                    .execute(&ApiRequest::put(
                        self.api(&format!("{path}/{}", current.guid)),
                        Json::Object(attributes_to_json(attributes)),
                    ))
                    .await?;
                v2_record(kind, &updated, current.scope.as_deref())
            }
            ResourceKind::SecurityGroupRule => {
                let group = current
                    .scope
                    .as_deref()
                    .ok_or_else(|| ApiError::invalid("security group rule without group"))?;
                let rules = self
                    .security_group_rules(group)
                    .await?
                    .into_iter()
                    .map(|rule| {
                        if is_rule(&rule, &current.name) {
                            rule_json(&current.name, attributes)
                        } else {
                            rule
                        }
                    })
                    .collect();
                self.write_security_group_rules(group, rules).await?;

                let mut record = current.clone();
                record.attributes = attributes.clone();
                Ok(record)
            }
            ResourceKind::User => self.update_user(current, attributes).await,
            ResourceKind::FeatureFlag => {
                let updated = self
                    .execute(&ApiRequest::put(
                        self.api(&format!("/v2/config/feature_flags/{}", current.name)),
                        Json::Object(attributes_to_json(attributes)),
                    ))
                    .await?;
                feature_flag_record(&updated)
            }
            ResourceKind::EnvironmentVariable => {
                let lifecycle = current
                    .scope
                    .as_deref()
                    .ok_or_else(|| ApiError::invalid("environment variable without group"))?;
                let value = attributes.get("value").map(Value::to_json).unwrap_or_default();
                let mut entries = self.env_group(lifecycle).await?;
                entries.insert(current.name.clone(), value.clone());
                self.write_env_group(lifecycle, entries).await?;
                Ok(env_record(lifecycle, &current.name, &value))
            }
            ResourceKind::SharedDomain | ResourceKind::PrivateDomain | ResourceKind::SecurityGroup => {
                Err(ApiError::unsupported("update", kind.label()))
            }
        }
    }

    async fn delete(&self, current: &Record, recursive: bool) -> ApiResult<()> {
        let kind = current.kind;
        match kind {
            ResourceKind::SecurityGroupRule => {
                let group = current
                    .scope
                    .as_deref()
                    .ok_or_else(|| ApiError::invalid("security group rule without group"))?;
                let rules = self
                    .security_group_rules(group)
                    .await?
                    .into_iter()
                    .filter(|rule| !is_rule(rule, &current.name))
                    .collect();
                self.write_security_group_rules(group, rules).await
            }
            ResourceKind::EnvironmentVariable => {
                let lifecycle = current
                    .scope
                    .as_deref()
                    .ok_or_else(|| ApiError::invalid("environment variable without group"))?;
                let mut entries = self.env_group(lifecycle).await?;
                entries.remove(&current.name);
                self.write_env_group(lifecycle, entries).await
            }
            ResourceKind::User => self.delete_user(current).await,
            ResourceKind::FeatureFlag => Err(ApiError::unsupported("delete", kind.label())),
            _ => {
                let path = collection_path(kind)
                    .ok_or_else(|| ApiError::unsupported("delete", kind.label()))?;
                let mut request =
                    ApiRequest::delete(self.api(&format!("{path}/{}", current.guid)))
                        .query("async", "false");
                if matches!(kind, ResourceKind::Organization | ResourceKind::Space) {
                    request = request.query("recursive", recursive.to_string());
                }
                self.execute(&request).await?;
                Ok(())
            }
        }
    }

    async fn list_relation(&self, relation: Relation, subject: &str) -> ApiResult<BTreeSet<String>> {
        debug!("Listing {relation} of {subject}");

        let resources = self
            .get_resources(ApiRequest::get(self.api(&relation_path(relation, subject))))
            .await?;
        Ok(resources
            .iter()
            .filter_map(|r| r.pointer("/metadata/guid").and_then(Json::as_str))
            .map(String::from)
            .collect())
    }

    async fn add_relation(&self, relation: Relation, subject: &str, object: &str) -> ApiResult<()> {
        self.execute(&ApiRequest::put(
            self.api(&relation_member_path(relation, subject, object)),
            json!({}),
        ))
        .await?;
        Ok(())
    }

    async fn remove_relation(
        &self,
        relation: Relation,
        subject: &str,
        object: &str,
    ) -> ApiResult<()> {
        self.execute(&ApiRequest::delete(
            self.api(&relation_member_path(relation, subject, object)),
        ))
        .await?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "cf_v2"
    }
}
