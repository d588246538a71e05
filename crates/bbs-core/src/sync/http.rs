//! HTTP remote
//!
//! JSON over HTTPS client for the sync server. Blocking: a sync round runs
//! to completion on the calling thread, bounded by per-request timeouts.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::change::{OutgoingChange, RemoteChange};
use super::remote::{Accepted, RemoteError, RemoteLog, TokenGrant};

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
    device_id: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
    device_id: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    user_id: String,
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct PushRequest<'a> {
    device_id: &'a str,
    changes: Vec<WireChange<'a>>,
}

#[derive(Serialize)]
struct WireChange<'a> {
    change_id: &'a str,
    entity: &'a str,
    entity_id: &'a str,
    op: &'a str,
    payload: String,
}

#[derive(Deserialize)]
struct PushResponse {
    #[serde(default)]
    accepted: Vec<WireAccepted>,
}

#[derive(Deserialize)]
struct WireAccepted {
    change_id: String,
    seq: i64,
}

#[derive(Deserialize)]
struct PullResponse {
    #[serde(default)]
    changes: Vec<PulledChange>,
}

#[derive(Deserialize)]
struct PulledChange {
    seq: i64,
    entity: String,
    entity_id: String,
    op: String,
    #[serde(default)]
    payload: Option<String>,
}

impl From<TokenResponse> for TokenGrant {
    fn from(r: TokenResponse) -> Self {
        TokenGrant {
            user_id: r.user_id,
            access_token: r.access_token,
            refresh_token: r.refresh_token,
            expires_at: r.expires_at,
        }
    }
}

/// Sync server reached over HTTP
pub struct HttpRemote {
    base_url: String,
    client: Client,
}

impl HttpRemote {
    /// Create a client with the default timeout
    pub fn new(base_url: &str) -> Result<Self, RemoteError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("bbs/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Connect(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = request.send().map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(classify_status(status, body))
    }
}

impl RemoteLog for HttpRemote {
    fn login(
        &self,
        email: &str,
        password: &str,
        device_id: &str,
    ) -> Result<TokenGrant, RemoteError> {
        debug!("Logging in to {}", self.base_url);
        let request = self.client.post(self.url("/v1/auth/login")).json(&LoginRequest {
            email,
            password,
            device_id,
        });
        let body: TokenResponse = decode(self.send(request)?)?;
        Ok(body.into())
    }

    fn refresh(&self, refresh_token: &str, device_id: &str) -> Result<TokenGrant, RemoteError> {
        debug!("Refreshing access token");
        let request = self
            .client
            .post(self.url("/v1/auth/refresh"))
            .json(&RefreshRequest {
                refresh_token,
                device_id,
            });
        let body: TokenResponse = decode(self.send(request)?)?;
        Ok(body.into())
    }

    fn push(
        &self,
        access_token: &str,
        device_id: &str,
        changes: &[OutgoingChange],
    ) -> Result<Vec<Accepted>, RemoteError> {
        let body = PushRequest {
            device_id,
            changes: changes
                .iter()
                .map(|c| WireChange {
                    change_id: &c.change_id,
                    entity: c.entity.as_str(),
                    entity_id: &c.entity_id,
                    op: c.op.as_str(),
                    payload: BASE64.encode(&c.payload),
                })
                .collect(),
        };

        debug!("Pushing {} changes", changes.len());
        let request = self
            .client
            .post(self.url("/v1/sync/push"))
            .bearer_auth(access_token)
            .json(&body);
        let response: PushResponse = decode(self.send(request)?)?;

        Ok(response
            .accepted
            .into_iter()
            .map(|a| Accepted {
                change_id: a.change_id,
                sequence: a.seq,
            })
            .collect())
    }

    fn pull(
        &self,
        access_token: &str,
        since: i64,
        limit: usize,
    ) -> Result<Vec<RemoteChange>, RemoteError> {
        debug!("Pulling changes since {}", since);
        let request = self
            .client
            .get(self.url("/v1/sync/pull"))
            .bearer_auth(access_token)
            .query(&[("since", since.to_string()), ("limit", limit.to_string())]);
        let response: PullResponse = decode(self.send(request)?)?;

        Ok(response
            .changes
            .into_iter()
            .map(|c| {
                RemoteChange::from_wire(c.seq, c.entity, c.entity_id, c.op, c.payload.as_deref())
            })
            .collect())
    }
}

fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    response
        .json()
        .map_err(|e| RemoteError::Protocol(e.to_string()))
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Connect(err.to_string())
    }
}

/// Map a non-success status to a remote error
///
/// 401 and 403 responses that mention the device are device rejections.
fn classify_status(status: StatusCode, body: String) -> RemoteError {
    let mentions_device = body.to_lowercase().contains("device");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN if mentions_device => {
            RemoteError::DeviceRejected(body)
        }
        StatusCode::UNAUTHORIZED => RemoteError::Unauthorized,
        _ => RemoteError::Server {
            status: status.as_u16(),
            body,
        },
    }
}
