//! # Sheet Store
//!
//! Remote store adapter for the authoritative, spreadsheet-backed member
//! store. The backend is a Google-Apps-Script-style web endpoint with a
//! single URL and an `action` parameter:
//!
//! - reads:  `GET  <endpoint>?action=<name>&...` (plus a cache-busting
//!   timestamp parameter, the script caches aggressively otherwise)
//! - writes: `POST <endpoint>?action=<name>` with a JSON body
//!
//! Every response body is JSON; a top-level `{"error": ...}` object means
//! the script executed and failed. Transport failures, timeouts and
//! unrecognized bodies map onto [`SheetStoreError`]; callers treat all of
//! them as "remote unavailable" and fall back to their local snapshot.
//!
//! Raw rows are passed through the [`normalize`] boundary so only
//! strictly-typed [`Member`] values leave this crate. All calls are
//! idempotent-unsafe: there is no dedup key, retrying a write may append
//! a duplicate row.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use matrix_domain::{AvatarConfig, Member, Utility, UtilityStatus};

mod error;
pub mod normalize;

pub use error::{SheetStoreError, SheetStoreResult};

/// Default hard timeout for every remote call. The backing script is slow
/// (tens of seconds when the sheet is cold) but a hung call must not pin
/// the caller longer than this.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Partial member update accepted by the remote `updateUser` action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberFieldPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_config: Option<AvatarConfig>,
}

impl MemberFieldPatch {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.phone.is_none() && self.avatar_config.is_none()
    }
}

/// Contract of the authoritative remote store.
///
/// Object-safe so the reconciliation engine can be handed scripted doubles
/// in tests.
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Full member list, normalized. An empty vec is a valid answer and
    /// means the store has not been seeded yet.
    async fn fetch_all(&self) -> SheetStoreResult<Vec<Member>>;

    /// Append a new member row.
    async fn register(&self, member: &Member) -> SheetStoreResult<()>;

    /// Append a utility row owned by `member_id`.
    async fn add_utility(&self, member_id: &str, utility: &Utility) -> SheetStoreResult<()>;

    /// Patch profile fields of an existing member row.
    async fn update_member_fields(
        &self,
        member_id: &str,
        fields: &MemberFieldPatch,
    ) -> SheetStoreResult<()>;

    /// Set the status cell of a utility row.
    async fn update_utility_status(
        &self,
        member_id: &str,
        utility_id: &str,
        status: UtilityStatus,
    ) -> SheetStoreResult<()>;

    /// Lazily fetch one utility's attachment payload. Bulk reads omit the
    /// payload column for speed; `Ok(None)` means the row has none.
    async fn fetch_attachment(&self, utility_id: &str) -> SheetStoreResult<Option<String>>;
}

/// Stand-in remote for deployments with no endpoint configured: every
/// call fails with [`SheetStoreError::NotConfigured`], which keeps the
/// service in permanent local-only (degraded) operation.
pub struct UnconfiguredRemote;

#[async_trait::async_trait]
impl RemoteStore for UnconfiguredRemote {
    async fn fetch_all(&self) -> SheetStoreResult<Vec<Member>> {
        Err(SheetStoreError::NotConfigured)
    }

    async fn register(&self, _member: &Member) -> SheetStoreResult<()> {
        Err(SheetStoreError::NotConfigured)
    }

    async fn add_utility(&self, _member_id: &str, _utility: &Utility) -> SheetStoreResult<()> {
        Err(SheetStoreError::NotConfigured)
    }

    async fn update_member_fields(
        &self,
        _member_id: &str,
        _fields: &MemberFieldPatch,
    ) -> SheetStoreResult<()> {
        Err(SheetStoreError::NotConfigured)
    }

    async fn update_utility_status(
        &self,
        _member_id: &str,
        _utility_id: &str,
        _status: UtilityStatus,
    ) -> SheetStoreResult<()> {
        Err(SheetStoreError::NotConfigured)
    }

    async fn fetch_attachment(&self, _utility_id: &str) -> SheetStoreResult<Option<String>> {
        Err(SheetStoreError::NotConfigured)
    }
}

/// Adapter configuration.
#[derive(Debug, Clone)]
pub struct SheetStoreConfig {
    /// Web-app endpoint URL. Empty disables remote persistence.
    pub endpoint_url: String,
    /// Hard per-request timeout.
    pub timeout: Duration,
}

impl SheetStoreConfig {
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// reqwest-backed [`RemoteStore`] implementation.
#[derive(Clone, Debug)]
pub struct SheetStoreClient {
    http: reqwest::Client,
    endpoint_url: String,
}

impl SheetStoreClient {
    pub fn new(config: SheetStoreConfig) -> SheetStoreResult<Self> {
        if config.endpoint_url.trim().is_empty() {
            return Err(SheetStoreError::NotConfigured);
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            // The script endpoint answers writes with redirects.
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| SheetStoreError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            endpoint_url: config.endpoint_url,
        })
    }

    async fn get(&self, action: &str, params: &[(&str, &str)]) -> SheetStoreResult<Value> {
        // Cache-busting timestamp; the script host caches GET responses.
        let bust = Utc::now().timestamp_millis().to_string();
        let mut query: Vec<(&str, &str)> = vec![("action", action), ("_", bust.as_str())];
        query.extend_from_slice(params);

        debug!(action, "Sheet store GET");
        let response = self.http.get(&self.endpoint_url).query(&query).send().await?;
        let body = response.text().await?;
        Self::parse_body(&body)
    }

    async fn post(&self, action: &str, payload: &Value) -> SheetStoreResult<Value> {
        debug!(action, "Sheet store POST");
        let response = self
            .http
            .post(&self.endpoint_url)
            .query(&[("action", action)])
            // The script only reads raw post data; a JSON content type
            // would trigger a CORS preflight it cannot answer.
            .header(reqwest::header::CONTENT_TYPE, "text/plain;charset=utf-8")
            .body(payload.to_string())
            .send()
            .await?;
        let body = response.text().await?;
        Self::parse_body(&body)
    }

    fn parse_body(body: &str) -> SheetStoreResult<Value> {
        let value: Value = serde_json::from_str(body).map_err(|_| {
            SheetStoreError::Malformed(format!(
                "non-JSON response: {}",
                &body.chars().take(100).collect::<String>()
            ))
        })?;

        if let Some(error) = value.get("error").and_then(Value::as_str) {
            return Err(SheetStoreError::Script(error.to_string()));
        }
        Ok(value)
    }

    fn expect_success(value: Value) -> SheetStoreResult<()> {
        match value.get("success").and_then(Value::as_bool) {
            Some(true) => Ok(()),
            _ => Err(SheetStoreError::Malformed(format!(
                "write not acknowledged: {value}"
            ))),
        }
    }
}

#[async_trait::async_trait]
impl RemoteStore for SheetStoreClient {
    async fn fetch_all(&self) -> SheetStoreResult<Vec<Member>> {
        let value = self.get("getUsers", &[]).await?;
        let rows = value
            .as_array()
            .ok_or_else(|| SheetStoreError::Malformed("member list is not an array".to_string()))?;

        let members = normalize::normalize_members(rows);
        debug!(fetched = rows.len(), usable = members.len(), "Sheet store fetch complete");
        Ok(members)
    }

    async fn register(&self, member: &Member) -> SheetStoreResult<()> {
        let payload = serde_json::to_value(member)
            .map_err(|e| SheetStoreError::Malformed(e.to_string()))?;
        Self::expect_success(self.post("register", &payload).await?)
    }

    async fn add_utility(&self, member_id: &str, utility: &Utility) -> SheetStoreResult<()> {
        let mut payload = serde_json::to_value(utility)
            .map_err(|e| SheetStoreError::Malformed(e.to_string()))?;
        payload["userId"] = Value::String(member_id.to_string());
        Self::expect_success(self.post("addUtility", &payload).await?)
    }

    async fn update_member_fields(
        &self,
        member_id: &str,
        fields: &MemberFieldPatch,
    ) -> SheetStoreResult<()> {
        let mut payload = serde_json::to_value(fields)
            .map_err(|e| SheetStoreError::Malformed(e.to_string()))?;
        payload["id"] = Value::String(member_id.to_string());
        Self::expect_success(self.post("updateUser", &payload).await?)
    }

    async fn update_utility_status(
        &self,
        member_id: &str,
        utility_id: &str,
        status: UtilityStatus,
    ) -> SheetStoreResult<()> {
        let payload = serde_json::json!({
            "userId": member_id,
            "utilityId": utility_id,
            "status": status.as_str(),
        });
        Self::expect_success(self.post("updateUtilityStatus", &payload).await?)
    }

    async fn fetch_attachment(&self, utility_id: &str) -> SheetStoreResult<Option<String>> {
        let value = match self.get("getUtilityImage", &[("utilityId", utility_id)]).await {
            Ok(value) => value,
            // The script reports a missing row as its own error; that is a
            // NotFound answer, not an outage.
            Err(SheetStoreError::Script(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        if value.get("success").and_then(Value::as_bool) != Some(true) {
            return Ok(None);
        }
        Ok(value
            .get("attachmentData")
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}
