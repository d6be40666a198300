//! Pairing and pending-request client for the relay backend.
//!
//! Every authenticated call carries a device session JWT. The client
//! registers as an observer device when it has no session, and refreshes
//! the session once it is within a day of expiring. A failed refresh falls
//! back to a fresh registration.

use crate::cipher::{KeySlot, SymmetricKey};
use crate::error::RelayError;
use crate::normalizer::RelayRequest;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::RwLock;
use tracing::{info, warn};

const LINK_TOKEN_PREFIX: &str = "token-";

pub const DEVICE_TYPE: &str = "observer";
pub const DEFAULT_DEVICE_NAME: &str = "txverify";

// ── Device session ──────────────────────────────────────────────────────

/// Answer to `/register_device` and `/refresh_session`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceSession {
    pub device_id: String,
    pub device_type: String,
    pub jwt: String,
}

#[derive(Debug, Deserialize)]
struct SessionEnvelope {
    data: DeviceSession,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<i64>,
}

/// `exp` claim of a JWT. The signature is not checked; only the relay can
/// do that.
pub fn jwt_expiry(jwt: &str) -> Option<DateTime<Utc>> {
    let mut parts = jwt.split('.');
    let (_header, claims, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    let raw = URL_SAFE_NO_PAD.decode(claims.trim_end_matches('=')).ok()?;
    let exp = serde_json::from_slice::<Claims>(&raw).ok()?.exp?;
    DateTime::from_timestamp(exp, 0)
}

/// True for tokens without a readable expiry and for tokens expiring within
/// a day of `now`.
pub fn needs_refresh(jwt: &str, now: DateTime<Utc>) -> bool {
    match jwt_expiry(jwt) {
        Some(exp) => exp - now < Duration::days(1),
        None => true,
    }
}

// ── Pairing ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPairing {
    #[serde(default)]
    app: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    decryption_key: Option<RawJwk>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawJwk {
    #[serde(default)]
    k: Option<String>,
}

/// Contents of the pairing QR code, validated.
#[derive(Debug, Clone)]
pub struct PairingPayload {
    pub app: String,
    /// Link token with the `token-` prefix removed.
    pub link_token: String,
    pub name: Option<String>,
    pub key: Option<SymmetricKey>,
}

impl PairingPayload {
    /// Key material is checked here so a bad QR code fails before the link
    /// is approved.
    pub fn parse(qr: &str) -> Result<Self, RelayError> {
        let raw: RawPairing =
            serde_json::from_str(qr).map_err(|e| RelayError::InvalidQr(e.to_string()))?;

        let app = raw
            .app
            .filter(|a| !a.is_empty())
            .ok_or_else(|| RelayError::InvalidQr("missing app".into()))?;
        let token = raw
            .token
            .ok_or_else(|| RelayError::InvalidQr("missing token".into()))?;
        let link_token = token.strip_prefix(LINK_TOKEN_PREFIX).unwrap_or(&token).to_string();
        if link_token.is_empty() {
            return Err(RelayError::InvalidQr("empty link token".into()));
        }

        let key = match raw.decryption_key {
            Some(jwk) => {
                let k = jwk.k.ok_or_else(|| {
                    RelayError::InvalidQr("decryption key without key material".into())
                })?;
                Some(SymmetricKey::from_base64(&k)?)
            }
            None => None,
        };

        Ok(Self {
            app,
            link_token,
            name: raw.name,
            key,
        })
    }

    /// Safe to log.
    pub fn token_prefix(&self) -> &str {
        let end = self
            .link_token
            .char_indices()
            .nth(10)
            .map(|(i, _)| i)
            .unwrap_or(self.link_token.len());
        &self.link_token[..end]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairOutcome {
    pub app: String,
    pub name: Option<String>,
    pub key_installed: bool,
}

#[derive(Debug, Deserialize)]
struct RequestsEnvelope {
    data: RequestsData,
}

#[derive(Debug, Deserialize)]
struct RequestsData {
    #[serde(default)]
    requests: Vec<RelayRequest>,
}

// ── Client ──────────────────────────────────────────────────────────────

pub struct RelayClient {
    http: reqwest::Client,
    base_url: String,
    device_name: String,
    session: RwLock<Option<String>>,
}

impl RelayClient {
    /// `session` is a previously issued JWT, if any. Without one the first
    /// authenticated call registers a new device.
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        session: Option<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            session: RwLock::new(session.filter(|jwt| !jwt.is_empty())),
        }
    }

    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Current session JWT, without refreshing it.
    pub fn session(&self) -> Option<String> {
        self.session.read().ok().and_then(|s| s.clone())
    }

    fn store_session(&self, jwt: &str) {
        if let Ok(mut session) = self.session.write() {
            *session = Some(jwt.to_string());
        }
    }

    pub async fn register_device(&self) -> Result<DeviceSession, RelayError> {
        let resp = self
            .http
            .post(format!("{}/register_device", self.base_url))
            .json(&json!({ "device_name": self.device_name, "device_type": DEVICE_TYPE }))
            .send()
            .await?;
        let envelope: SessionEnvelope = ensure_success(resp).await?.json().await?;
        info!(device_id = %envelope.data.device_id, "Device registered with relay");
        Ok(envelope.data)
    }

    pub async fn refresh_session(&self, jwt: &str) -> Result<DeviceSession, RelayError> {
        let resp = self
            .http
            .post(format!("{}/refresh_session", self.base_url))
            .bearer_auth(jwt)
            .send()
            .await?;
        let envelope: SessionEnvelope = ensure_success(resp).await?.json().await?;
        info!(device_id = %envelope.data.device_id, "Relay session refreshed");
        Ok(envelope.data)
    }

    /// A JWT good for at least another day. Refreshes or registers as
    /// needed and remembers the result.
    pub async fn bearer(&self) -> Result<String, RelayError> {
        let current = self.session();
        if let Some(jwt) = current.as_deref() {
            if !needs_refresh(jwt, Utc::now()) {
                return Ok(jwt.to_string());
            }
        }

        let refreshed = match current.as_deref() {
            Some(jwt) => match self.refresh_session(jwt).await {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!(error = %e, "Session refresh failed, registering again");
                    None
                }
            },
            None => None,
        };
        let session = match refreshed {
            Some(session) => session,
            None => self.register_device().await?,
        };
        self.store_session(&session.jwt);
        Ok(session.jwt)
    }

    /// Any non-2xx answer is a pairing failure.
    pub async fn approve_link(&self, link_token: &str) -> Result<(), RelayError> {
        let jwt = self.bearer().await?;
        let resp = self
            .http
            .post(format!("{}/approve_link", self.base_url))
            .bearer_auth(jwt)
            .json(&json!({ "token": link_token }))
            .send()
            .await?;
        ensure_success(resp).await?;
        Ok(())
    }

    pub async fn fetch_requests(
        &self,
        min_timestamp: Option<&str>,
        exclude: &[String],
    ) -> Result<Vec<RelayRequest>, RelayError> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(ts) = min_timestamp {
            query.push(("min_timestamp", ts));
        }
        query.extend(exclude.iter().map(|id| ("exclude", id.as_str())));

        let jwt = self.bearer().await?;
        let resp = self
            .http
            .get(format!("{}/requests", self.base_url))
            .bearer_auth(jwt)
            .query(&query)
            .send()
            .await?;
        let envelope: RequestsEnvelope = ensure_success(resp).await?.json().await?;
        info!(count = envelope.data.requests.len(), "Fetched pending requests");
        Ok(envelope.data.requests)
    }

    /// Parses the QR code, approves the link, then installs the key. The
    /// previous key is replaced.
    pub async fn pair(&self, qr: &str, slot: &KeySlot) -> Result<PairOutcome, RelayError> {
        let payload = PairingPayload::parse(qr)?;
        info!(app = %payload.app, token = %payload.token_prefix(), "Approving device link");
        self.approve_link(&payload.link_token).await?;

        let key_installed = match payload.key {
            Some(key) => {
                slot.install(key);
                true
            }
            None => false,
        };
        info!(app = %payload.app, key_installed, "Device paired");
        Ok(PairOutcome {
            app: payload.app,
            name: payload.name,
            key_installed,
        })
    }
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, RelayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(RelayError::Http {
        status: status.as_u16(),
        body,
    })
}
