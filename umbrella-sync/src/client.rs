#![doc = "Destination list API client: implements the core `ListApi` trait over reqwest, with OAuth client-credentials authentication."]
//
//! # Umbrella client (CLI <-> Core)
//!
//! [`UmbrellaClient`] is the networked implementation of [`ListApi`]. It owns everything the
//! engine deliberately does not know about:
//!
//! - the REST paths under `/policies/{version}/`
//! - bearer tokens fetched from `/auth/{version}/token` with the API key and secret, cached
//!   until shortly before they expire
//! - a single retry with a fresh token when a request comes back `401`
//! - the `{status, meta, data}` response envelope, unwrapped before anything reaches the engine
//!
//! Every request uses a 30 second timeout. Non-2xx responses surface as
//! [`ApiError::Status`] with the raw body, so the engine can look for high-volume rejections.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use umbrella_sync_core::contract::{
    DestinationList, ListApi, NewDestination, NewDestinationList, Page, PageMeta, Resource,
};
use umbrella_sync_core::ApiError;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Tokens are refreshed this long before the server says they expire.
const TOKEN_EXPIRY_GRACE: Duration = Duration::from_secs(60);

/// Used when the token response carries no `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Where and as whom to connect.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiSettings {
    /// Bare host name, or a full `scheme://host[:port]` base URL.
    pub hostname: String,
    /// Path version segment, e.g. `v2`.
    pub version: String,
    pub key: String,
    pub secret: String,
}

impl ApiSettings {
    pub fn base_url(&self) -> String {
        let host = self.hostname.trim().trim_end_matches('/');
        if host.contains("://") {
            host.to_string()
        } else {
            format!("https://{host}")
        }
    }
}

impl std::fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSettings")
            .field("hostname", &self.hostname)
            .field("version", &self.version)
            .field("key", &"<redacted>")
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

#[derive(Debug, Deserialize)]
struct EnvelopeStatus {
    code: i64,
    #[serde(default)]
    text: String,
}

pub struct UmbrellaClient {
    http: reqwest::Client,
    base_url: String,
    settings: ApiSettings,
    token: RwLock<Option<CachedToken>>,
}

impl UmbrellaClient {
    pub fn new(settings: &ApiSettings) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("umbrella-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                error!(error = ?e, "Failed to build HTTP client");
                ApiError::Transport(e.to_string())
            })?;

        let base_url = settings.base_url();
        info!(
            base_url = %base_url,
            version = %settings.version,
            key_set = !settings.key.is_empty(),
            "Initialized Umbrella client"
        );
        Ok(Self {
            http,
            base_url,
            settings: settings.clone(),
            token: RwLock::new(None),
        })
    }

    fn policies_url(&self, path: &str) -> String {
        format!(
            "{}/policies/{}/{}",
            self.base_url, self.settings.version, path
        )
    }

    fn token_url(&self) -> String {
        format!("{}/auth/{}/token", self.base_url, self.settings.version)
    }

    async fn access_token(&self) -> Result<String, ApiError> {
        if let Some(cached) = self.token.read().await.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.access_token.clone());
            }
        }

        let mut slot = self.token.write().await;
        // Another request may have refreshed while we waited for the lock.
        if let Some(cached) = slot.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.access_token.clone());
            }
        }

        debug!(url = %self.token_url(), "Requesting access token");
        let response = self
            .http
            .post(self.token_url())
            .basic_auth(&self.settings.key, Some(&self.settings.secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| {
                error!(error = ?e, "Token request failed");
                ApiError::Transport(e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        if !status.is_success() {
            error!(status = status.as_u16(), "Token request rejected");
            return Err(ApiError::Transport(format!(
                "authentication failed with HTTP {}: {body}",
                status.as_u16()
            )));
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| ApiError::Decode(format!("token: {e}")))?;
        let lifetime = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);
        let refresh_at = Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_GRACE);
        info!(expires_in_secs = lifetime.as_secs(), "Obtained access token");

        let access_token = token.access_token.clone();
        *slot = Some(CachedToken {
            access_token: token.access_token,
            refresh_at,
        });
        Ok(access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.write().await = None;
    }

    async fn send_once<F>(&self, build: &F) -> Result<Response, ApiError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder + Sync,
    {
        let token = self.access_token().await?;
        build(&self.http)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))
    }

    /// Send a request, retrying once with a new token on 401, and return the body of a 2xx.
    async fn execute<F>(&self, method: &Method, url: &str, build: F) -> Result<String, ApiError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder + Sync,
    {
        debug!(%method, url, "Sending request");
        let mut response = self.send_once(&build).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(%method, url, "Request unauthorized; refreshing token and retrying once");
            self.invalidate_token().await;
            response = self.send_once(&build).await?;
        }

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        if !status.is_success() {
            warn!(%method, url, status = status.as_u16(), "Request returned non-OK status");
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

/// Split a response body into its payload and pagination meta.
///
/// Enveloped bodies (`{"status": ..., "meta": ..., "data": ...}`) must carry a 2xx status code;
/// anything else is taken as the payload itself.
pub fn unwrap_envelope(body: &str) -> Result<(Value, PageMeta), ApiError> {
    let value: Value = serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))?;

    let mut object = match value {
        Value::Object(object) => object,
        other => return Ok((other, PageMeta::default())),
    };
    let Some(status) = object.remove("status") else {
        return Ok((Value::Object(object), PageMeta::default()));
    };

    let status: EnvelopeStatus =
        serde_json::from_value(status).map_err(|e| ApiError::Decode(format!("status: {e}")))?;
    if !(200..300).contains(&status.code) {
        return Err(ApiError::Remote {
            code: status.code,
            text: status.text,
            body: body.to_string(),
        });
    }

    let meta = match object.remove("meta") {
        Some(meta) if !meta.is_null() => {
            serde_json::from_value(meta).map_err(|e| ApiError::Decode(format!("meta: {e}")))?
        }
        _ => PageMeta::default(),
    };
    let data = object.remove("data").unwrap_or(Value::Null);
    Ok((data, meta))
}

fn decode<T: DeserializeOwned>(data: Value, what: &str) -> Result<T, ApiError> {
    serde_json::from_value(data).map_err(|e| ApiError::Decode(format!("{what}: {e}")))
}

#[async_trait]
impl ListApi for UmbrellaClient {
    async fn list_page(
        &self,
        resource: Resource,
        page: u32,
        limit: u32,
    ) -> Result<Page, ApiError> {
        let url = self.policies_url(&resource.path());
        let body = self
            .execute(&Method::GET, &url, |http| {
                http.get(&url).query(&[("page", page), ("limit", limit)])
            })
            .await?;
        let (data, meta) = unwrap_envelope(&body)?;
        debug!(resource = %resource, page, limit, total = meta.total, "Fetched page");
        Ok(Page { data, meta })
    }

    async fn create_list(&self, req: NewDestinationList) -> Result<DestinationList, ApiError> {
        let url = self.policies_url(&Resource::DestinationLists.path());
        info!(list_name = %req.name, access = %req.access, "Creating destination list");
        let body = self
            .execute(&Method::POST, &url, |http| http.post(&url).json(&req))
            .await?;
        let (data, _) = unwrap_envelope(&body)?;
        decode(data, "created destination list")
    }

    async fn add_destinations(
        &self,
        list_id: i64,
        destinations: Vec<NewDestination>,
    ) -> Result<DestinationList, ApiError> {
        let url = self.policies_url(&Resource::Destinations { list_id }.path());
        debug!(list_id, count = destinations.len(), "Posting destinations");
        let body = self
            .execute(&Method::POST, &url, |http| http.post(&url).json(&destinations))
            .await?;
        let (data, _) = unwrap_envelope(&body)?;
        decode(data, "destination list after add")
    }

    async fn remove_destinations(
        &self,
        list_id: i64,
        ids: Vec<i64>,
    ) -> Result<DestinationList, ApiError> {
        let url = format!(
            "{}/remove",
            self.policies_url(&Resource::Destinations { list_id }.path())
        );
        debug!(list_id, count = ids.len(), "Deleting destinations");
        let body = self
            .execute(&Method::DELETE, &url, |http| http.delete(&url).json(&ids))
            .await?;
        let (data, _) = unwrap_envelope(&body)?;
        decode(data, "destination list after remove")
    }
}
