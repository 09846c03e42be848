//! FMC REST client
//!
//! Token-based session against the manager's platform API. Every request
//! carries the access token; a 401 triggers one token refresh (or a fresh
//! login once refreshes are exhausted) and a retry. A 429 waits out the rate
//! limit and retries.

use crate::core::backend::{FetchOutcome, ObjectDirectory, PolicyManager};
use crate::core::error::{Error, Result};
use crate::core::rule::{
    AccessRule, DeviceRecord, HitCountRecord, NetworkObject, NetworkObjectRef, ObjectKind,
};
use crate::core::stats::Deployment;
use crate::fmc::wire::{
    Page, WireAccessRule, WireDeployableDevice, WireDevice, WireHitCount, WireNetworkObject,
    deployment_request, deployment_task_id, disable_body,
};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const AUTH_PATH: &str = "/api/fmc_platform/v1/auth";
const ACCESS_TOKEN_HEADER: &str = "X-auth-access-token";
const REFRESH_TOKEN_HEADER: &str = "X-auth-refresh-token";
const DOMAIN_HEADER: &str = "DOMAIN_UUID";

/// The manager allows three refreshes per session before a new login is needed
const MAX_REFRESHES: u32 = 3;

/// Connection settings for [`FmcClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host name, or a full `https://host[:port]` base URL
    pub host: String,
    pub username: String,
    pub password: String,
    /// Accept self-signed certificates
    pub insecure: bool,
    pub timeout: Duration,
    /// Items requested per page on collection endpoints
    pub page_limit: usize,
    /// Wait after a 429 before retrying
    pub rate_limit_delay: Duration,
    /// 429 retries per request before giving up
    pub rate_limit_retries: u32,
}

impl ClientConfig {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
            insecure: false,
            timeout: Duration::from_secs(10),
            page_limit: 500,
            rate_limit_delay: Duration::from_secs(10),
            rate_limit_retries: 5,
        }
    }

    /// Base URL with scheme and without trailing slash
    pub fn base_url(&self) -> String {
        let host = self.host.trim().trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{host}")
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    access_token: String,
    refresh_token: String,
    domain_uuid: String,
    refreshes: u32,
}

impl Session {
    fn from_headers(headers: &HeaderMap, refreshes: u32) -> Result<Self> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| Error::Auth(format!("response is missing the {name} header")))
        };

        Ok(Self {
            access_token: header(ACCESS_TOKEN_HEADER)?,
            refresh_token: header(REFRESH_TOKEN_HEADER)?,
            domain_uuid: header(DOMAIN_HEADER)?,
            refreshes,
        })
    }
}

/// REST client for one FMC
pub struct FmcClient {
    base_url: String,
    http: Client,
    config: ClientConfig,
    session: RwLock<Option<Session>>,
}

impl FmcClient {
    /// Builds the HTTP client. No request is sent until [`FmcClient::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the TLS backend cannot be initialised.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            base_url: config.base_url(),
            http,
            config,
            session: RwLock::new(None),
        })
    }

    /// Logs in and stores the session tokens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if the credentials are rejected.
    pub async fn connect(&self) -> Result<()> {
        let url = format!("{}{AUTH_PATH}/generatetoken", self.base_url);
        debug!("POST {url}");

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!("{status}: {}", text.trim())));
        }

        let session = Session::from_headers(response.headers(), 0)?;
        info!("Connected to {} (domain {})", self.base_url, session.domain_uuid);
        *self.session.write().await = Some(session);
        Ok(())
    }

    /// Revokes the session. Failures are logged, never returned.
    pub async fn disconnect(&self) {
        let Some(session) = self.session.write().await.take() else {
            return;
        };

        let url = format!("{}{AUTH_PATH}/revokeaccess", self.base_url);
        let result = self
            .http
            .post(&url)
            .header(ACCESS_TOKEN_HEADER, &session.access_token)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                info!("Disconnected from {}", self.base_url);
            }
            Ok(response) => warn!("Token revocation returned {}", response.status()),
            Err(e) => warn!("Token revocation failed: {e}"),
        }
    }

    async fn current_session(&self) -> Result<Session> {
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Auth("not connected".to_string()))
    }

    /// Refreshes the access token, logging in again once refreshes run out.
    async fn reauthenticate(&self, expired: &Session) -> Result<()> {
        if expired.refreshes >= MAX_REFRESHES {
            info!("Refresh limit reached, logging in again");
            return self.connect().await;
        }

        let url = format!("{}{AUTH_PATH}/refreshtoken", self.base_url);
        debug!("POST {url}");
        let response = self
            .http
            .post(&url)
            .header(ACCESS_TOKEN_HEADER, &expired.access_token)
            .header(REFRESH_TOKEN_HEADER, &expired.refresh_token)
            .send()
            .await?;

        if !response.status().is_success() {
            warn!("Token refresh returned {}, logging in again", response.status());
            return self.connect().await;
        }

        let session = Session::from_headers(response.headers(), expired.refreshes + 1)?;
        debug!("Access token refreshed ({}/{MAX_REFRESHES})", session.refreshes);
        *self.session.write().await = Some(session);
        Ok(())
    }

    fn config_url(&self, session: &Session, path: &str) -> String {
        format!(
            "{}/api/fmc_config/v1/domain/{}{path}",
            self.base_url, session.domain_uuid
        )
    }

    /// Sends a request to a domain-scoped config endpoint.
    ///
    /// Returns `None` for an empty response body.
    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Option<Value>> {
        let mut reauthenticated = false;
        let mut rate_limited = 0;

        loop {
            let session = self.current_session().await?;
            let url = self.config_url(&session, path);
            debug!("{method} {url}");

            let mut builder: RequestBuilder = self
                .http
                .request(method.clone(), &url)
                .header(ACCESS_TOKEN_HEADER, &session.access_token)
                .query(query);
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED && !reauthenticated {
                reauthenticated = true;
                self.reauthenticate(&session).await?;
                continue;
            }

            if status == StatusCode::TOO_MANY_REQUESTS
                && rate_limited < self.config.rate_limit_retries
            {
                rate_limited += 1;
                warn!(
                    "Rate limited by the manager, waiting {}s ({rate_limited}/{})",
                    self.config.rate_limit_delay.as_secs(),
                    self.config.rate_limit_retries
                );
                tokio::time::sleep(self.config.rate_limit_delay).await;
                continue;
            }

            let text = response.text().await?;
            return match status {
                s if s.is_success() => {
                    if text.trim().is_empty() {
                        Ok(None)
                    } else {
                        Ok(Some(serde_json::from_str(&text)?))
                    }
                }
                StatusCode::UNAUTHORIZED => Err(Error::Auth(format!("{status}: {}", text.trim()))),
                StatusCode::NOT_FOUND => Err(Error::NotFound(path.to_string())),
                _ => Err(Error::Api {
                    status: status.as_u16(),
                    message: text.trim().to_string(),
                }),
            };
        }
    }

    /// GETs a single entity, treating an empty body as an error
    async fn get_value(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.request(Method::GET, path, query, None)
            .await?
            .ok_or_else(|| Error::Internal(format!("empty response from {path}")))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        Ok(serde_json::from_value(self.get_value(path, query).await?)?)
    }

    /// GETs every page of a collection endpoint
    async fn get_all<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let limit = self.config.page_limit.max(1);
        let mut items = Vec::new();
        let mut offset = 0;

        loop {
            let mut paged = query.to_vec();
            paged.push(("offset", offset.to_string()));
            paged.push(("limit", limit.to_string()));

            let page: Page<T> = match self.request(Method::GET, path, &paged, None).await? {
                Some(value) => serde_json::from_value(value)?,
                None => break,
            };

            let received = page.items.len();
            items.extend(page.items);
            offset += received;

            if received < limit || offset >= page.paging.count {
                break;
            }
        }

        debug!("Fetched {} items from {path}", items.len());
        Ok(items)
    }

    fn object_path(kind: &ObjectKind) -> Option<&'static str> {
        match kind {
            ObjectKind::Host => Some("hosts"),
            ObjectKind::Network => Some("networks"),
            ObjectKind::Range => Some("ranges"),
            ObjectKind::NetworkGroup => Some("networkgroups"),
            ObjectKind::Other(_) => None,
        }
    }

    fn rule_path(access_policy_id: &str, rule_id: &str) -> String {
        format!("/policy/accesspolicies/{access_policy_id}/accessrules/{rule_id}")
    }
}

impl ObjectDirectory for FmcClient {
    async fn network_object(&self, reference: &NetworkObjectRef) -> Result<NetworkObject> {
        let Some(collection) = Self::object_path(&reference.kind) else {
            return Err(Error::Internal(format!(
                "unsupported network object type '{}'",
                reference.kind
            )));
        };

        let body: WireNetworkObject = self
            .get_json(&format!("/object/{collection}/{}", reference.id), &[])
            .await?;
        body.into_network_object(&reference.kind)
    }
}

impl PolicyManager for FmcClient {
    async fn device_by_name(&self, name: &str) -> Result<DeviceRecord> {
        let devices: Vec<WireDevice> = self
            .get_all(
                "/devices/devicerecords",
                &[("expanded", "true".to_string())],
            )
            .await?;

        devices
            .into_iter()
            .find(|d| d.name == name)
            .map(Into::into)
            .ok_or_else(|| Error::NotFound(format!("device '{name}'")))
    }

    async fn hit_counts(
        &self,
        access_policy_id: &str,
        device_id: &str,
    ) -> Result<Vec<HitCountRecord>> {
        let records: Vec<WireHitCount> = self
            .get_all(
                &format!("/policy/accesspolicies/{access_policy_id}/operational/hitcounts"),
                &[
                    ("filter", format!("\"deviceId:{device_id}\"")),
                    ("expanded", "true".to_string()),
                ],
            )
            .await?;

        Ok(records.into_iter().map(Into::into).collect())
    }

    async fn fetch_rule(&self, access_policy_id: &str, rule_id: &str) -> FetchOutcome<AccessRule> {
        let result = self
            .get_json::<WireAccessRule>(&Self::rule_path(access_policy_id, rule_id), &[])
            .await
            .map(AccessRule::from);
        FetchOutcome::from(result)
    }

    async fn disable_rule(
        &self,
        access_policy_id: &str,
        rule: &AccessRule,
        comment: &str,
    ) -> FetchOutcome<()> {
        let path = Self::rule_path(access_policy_id, &rule.id);

        // Update bodies must be built from the full current rule
        let result = async {
            let raw = self.get_value(&path, &[]).await?;
            let body = disable_body(raw, comment)?;
            self.request(Method::PUT, &path, &[], Some(&body)).await?;
            Ok::<(), Error>(())
        }
        .await;

        FetchOutcome::from(result)
    }

    async fn deploy(&self, device_id: &str) -> Result<Deployment> {
        let pending: Vec<WireDeployableDevice> = self
            .get_all(
                "/deployment/deployabledevices",
                &[("expanded", "true".to_string())],
            )
            .await?;

        let Some(target) = pending.into_iter().find(|d| d.device.id == device_id) else {
            info!("Device {device_id} has no pending changes to deploy");
            return Ok(Deployment::NotPending);
        };

        let body = deployment_request(&target.version, device_id);
        let response = self
            .request(
                Method::POST,
                "/deployment/deploymentrequests",
                &[],
                Some(&body),
            )
            .await?;

        Ok(Deployment::Requested {
            task_id: response.as_ref().and_then(deployment_task_id),
        })
    }
}
