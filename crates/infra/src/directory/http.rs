//! `reqwest` client for an Admin-SDK style directory REST API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use dirbatch_core::{EmailAddress, OuPath};

use super::{DirectoryClient, DirectoryError, DirectoryUser, ou_contains};

const PAGE_SIZE: u32 = 500;

/// Upstream reasons that mean "slow down" even on a 403.
const RATE_LIMIT_REASONS: &[&str] = &[
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "quotaExceeded",
];

/// Connection settings.
#[derive(Debug, Clone)]
pub struct HttpDirectoryConfig {
    /// e.g. `https://admin.googleapis.com`
    pub base_url: String,
    pub bearer_token: Option<String>,
    pub customer: String,
    pub timeout: Duration,
}

impl HttpDirectoryConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            bearer_token: None,
            customer: "my_customer".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_customer(mut self, customer: impl Into<String>) -> Self {
        self.customer = customer.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Directory client speaking HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpDirectoryClient {
    http: reqwest::Client,
    config: HttpDirectoryConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserPage {
    #[serde(default)]
    users: Vec<UserRecord>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRecord {
    primary_email: String,
    #[serde(default)]
    org_unit_path: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberPage {
    #[serde(default)]
    members: Vec<MemberRecord>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MemberRecord {
    email: Option<String>,
}

impl HttpDirectoryClient {
    pub fn new(config: HttpDirectoryConfig) -> Result<Self, DirectoryError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DirectoryError::Systemic(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/admin/directory/v1/{}",
            self.config.base_url.trim_end_matches('/'),
            path
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match &self.config.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send and classify; success bodies are returned raw.
    async fn send(&self, builder: RequestBuilder) -> Result<(StatusCode, String), DirectoryError> {
        self.send_allowing(builder, &[]).await
    }

    /// Like `send`, but `allowed` statuses count as success.
    async fn send_allowing(
        &self,
        builder: RequestBuilder,
        allowed: &[StatusCode],
    ) -> Result<(StatusCode, String), DirectoryError> {
        let response = builder.send().await.map_err(classify_transport)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(classify_transport)?;
        if status.is_success() || allowed.contains(&status) {
            return Ok((status, body));
        }
        Err(classify_response(status, &headers, &body))
    }

    async fn list_users(&self, query: &[(&str, String)]) -> Result<Vec<UserRecord>, DirectoryError> {
        let mut users = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params: Vec<(&str, String)> = query.to_vec();
            params.push(("maxResults", PAGE_SIZE.to_string()));
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }
            let (_, body) = self
                .send(self.request(Method::GET, "users").query(&params))
                .await?;
            let page: UserPage = parse(&body)?;
            users.extend(page.users);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(users)
    }
}

fn parse<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, DirectoryError> {
    serde_json::from_str(body)
        .map_err(|e| DirectoryError::Transient(format!("malformed upstream response: {e}")))
}

fn to_users(records: Vec<UserRecord>) -> Vec<DirectoryUser> {
    records
        .into_iter()
        .filter_map(|r| {
            let primary_email = EmailAddress::parse(&r.primary_email).ok()?;
            let ou_path = r
                .org_unit_path
                .and_then(|p| OuPath::parse(p).ok())
                .unwrap_or_else(OuPath::root);
            Some(DirectoryUser {
                primary_email,
                ou_path,
                aliases: r.aliases,
            })
        })
        .collect()
}

/// Classify a non-success HTTP response.
pub fn classify_response(status: StatusCode, headers: &HeaderMap, body: &str) -> DirectoryError {
    let (message, reasons) = error_details(body);
    let message = if message.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {message}")
    };
    let retry_after = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after(v, Utc::now()));

    let rate_limited = reasons
        .iter()
        .any(|r| RATE_LIMIT_REASONS.contains(&r.as_str()));

    match status {
        StatusCode::TOO_MANY_REQUESTS => DirectoryError::Quota {
            retry_after,
            message,
        },
        StatusCode::FORBIDDEN if rate_limited => DirectoryError::Quota {
            retry_after,
            message,
        },
        StatusCode::UNAUTHORIZED => DirectoryError::Systemic(message),
        StatusCode::NOT_FOUND => DirectoryError::NotFound(message),
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT
        | StatusCode::REQUEST_TIMEOUT => DirectoryError::Transient(message),
        s if s.is_server_error() => DirectoryError::Transient(message),
        _ => DirectoryError::Permanent(message),
    }
}

/// `Retry-After` as delta-seconds or an HTTP-date. A date in the past means
/// no wait.
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Classify a failure to get a response at all.
fn classify_transport(err: reqwest::Error) -> DirectoryError {
    if err.is_builder() {
        DirectoryError::Systemic(format!("invalid request: {err}"))
    } else {
        DirectoryError::Transient(err.to_string())
    }
}

/// Pull `error.message` and `error.errors[].reason` out of an error body.
fn error_details(body: &str) -> (String, Vec<String>) {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return (body.trim().chars().take(200).collect(), Vec::new());
    };
    let error = &value["error"];
    let message = error["message"].as_str().unwrap_or_default().to_string();
    let reasons = error["errors"]
        .as_array()
        .map(|errs| {
            errs.iter()
                .filter_map(|e| e["reason"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    (message, reasons)
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn patch_user(&self, user: &EmailAddress, patch: Value) -> Result<(), DirectoryError> {
        debug!(user = %user, "patching user");
        self.send(
            self.request(Method::PATCH, &format!("users/{user}"))
                .json(&patch),
        )
        .await?;
        Ok(())
    }

    async fn add_group_member(
        &self,
        group: &EmailAddress,
        member: &EmailAddress,
    ) -> Result<(), DirectoryError> {
        let request = self
            .request(Method::POST, &format!("groups/{group}/members"))
            .json(&json!({ "email": member, "role": "MEMBER" }));
        let (status, _) = self.send_allowing(request, &[StatusCode::CONFLICT]).await?;
        if status == StatusCode::CONFLICT {
            debug!(group = %group, member = %member, "already a member");
        }
        Ok(())
    }

    async fn remove_group_member(
        &self,
        group: &EmailAddress,
        member: &EmailAddress,
    ) -> Result<(), DirectoryError> {
        let request = self.request(Method::DELETE, &format!("groups/{group}/members/{member}"));
        let (status, _) = self.send_allowing(request, &[StatusCode::NOT_FOUND]).await?;
        if status == StatusCode::NOT_FOUND {
            debug!(group = %group, member = %member, "not a member");
        }
        Ok(())
    }

    async fn list_user_aliases(&self, user: &EmailAddress) -> Result<Vec<String>, DirectoryError> {
        let request = self
            .request(Method::GET, &format!("users/{user}"))
            .query(&[("fields", "primaryEmail,aliases")]);
        let (_, body) = self.send(request).await?;
        let record: UserRecord = parse(&body)?;
        Ok(record.aliases)
    }

    async fn list_ou_users(&self, ou: &OuPath) -> Result<Vec<DirectoryUser>, DirectoryError> {
        let records = self
            .list_users(&[
                ("customer", self.config.customer.clone()),
                ("projection", "basic".to_string()),
                ("query", format!("orgUnitPath='{ou}'")),
            ])
            .await?;
        Ok(to_users(records)
            .into_iter()
            .filter(|u| ou_contains(ou, &u.ou_path))
            .collect())
    }

    async fn list_domain_users(
        &self,
        domain: Option<&str>,
    ) -> Result<Vec<DirectoryUser>, DirectoryError> {
        let scope = match domain {
            Some(d) => ("domain", d.to_string()),
            None => ("customer", self.config.customer.clone()),
        };
        let records = self.list_users(&[scope]).await?;
        Ok(to_users(records))
    }

    async fn list_group_members(
        &self,
        group: &EmailAddress,
    ) -> Result<Vec<EmailAddress>, DirectoryError> {
        let mut members = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![("maxResults", PAGE_SIZE.to_string())];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }
            let request = self
                .request(Method::GET, &format!("groups/{group}/members"))
                .query(&params);
            let body = match self.send(request).await {
                Ok((_, body)) => body,
                Err(DirectoryError::NotFound(_)) => return Ok(Vec::new()),
                Err(e) => return Err(e),
            };
            let page: MemberPage = parse(&body)?;
            members.extend(
                page.members
                    .into_iter()
                    .filter_map(|m| m.email)
                    .filter_map(|e| EmailAddress::parse(e).ok()),
            );
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn classify(status: u16, body: &str) -> DirectoryError {
        classify_response(StatusCode::from_u16(status).unwrap(), &HeaderMap::new(), body)
    }

    #[test]
    fn too_many_requests_is_quota_with_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        let err = classify_response(StatusCode::TOO_MANY_REQUESTS, &headers, "");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn retry_after_accepts_http_dates() {
        let now = DateTime::parse_from_rfc3339("2015-10-21T07:28:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:30 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after(" 12 ", now), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after("soon", now), None);

        let mut headers = HeaderMap::new();
        let later = (Utc::now() + chrono::Duration::seconds(120)).to_rfc2822();
        headers.insert(RETRY_AFTER, HeaderValue::from_str(&later).unwrap());
        let err = classify_response(StatusCode::TOO_MANY_REQUESTS, &headers, "");
        let wait = err.retry_after().unwrap();
        assert!(wait > Duration::from_secs(100) && wait <= Duration::from_secs(120));
    }

    #[test]
    fn forbidden_depends_on_reason() {
        let rate = r#"{"error":{"code":403,"message":"slow down","errors":[{"reason":"userRateLimitExceeded"}]}}"#;
        assert!(matches!(classify(403, rate), DirectoryError::Quota { .. }));

        let denied = r#"{"error":{"code":403,"message":"Not Authorized","errors":[{"reason":"forbidden"}]}}"#;
        assert!(matches!(classify(403, denied), DirectoryError::Permanent(m) if m.contains("Not Authorized")));
    }

    #[test]
    fn status_classes() {
        assert!(matches!(classify(401, ""), DirectoryError::Systemic(_)));
        assert!(matches!(classify(404, ""), DirectoryError::NotFound(_)));
        assert!(matches!(classify(400, "bad"), DirectoryError::Permanent(_)));
        for s in [500, 502, 503, 504] {
            assert!(matches!(classify(s, ""), DirectoryError::Transient(_)));
        }
    }

    #[test]
    fn urls_are_rooted_at_directory_api() {
        let client =
            HttpDirectoryClient::new(HttpDirectoryConfig::new("http://localhost:9000/")).unwrap();
        assert_eq!(
            client.url("users"),
            "http://localhost:9000/admin/directory/v1/users"
        );
    }
}
