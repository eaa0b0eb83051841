// session lifecycle against the upstream auth endpoint
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use mockall::automock;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::server::{
    error::{AppResult, Error},
    utils::signature_utils::{SignatureUtil, SignedRequest, unix_now},
};

/// route key the upstream uses for "give me a session"
pub const AUTH_ROUTE_KEY: &str = "1-1-2";
const AUTH_ENVELOPE_VERSION: &str = "V1";

/// how long before `expires_at` the health endpoint starts calling a session expiring
const EXPIRING_THRESHOLD_SECONDS: i64 = 60;

pub const USER_ID_HEADER: &str = "userid";
pub const USER_TOKEN_HEADER: &str = "usertoken";

/// Credentials from one successful refresh. Built whole or not at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub client_id: String,
    pub password: String,
    pub server_host: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// `Userid` / `Usertoken`, attached to every origin request
    pub fn upstream_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in [
            (USER_ID_HEADER, &self.client_id),
            (USER_TOKEN_HEADER, &self.token),
        ] {
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.insert(HeaderName::from_static(name), value);
                }
                Err(_) => warn!("session {} isn't a valid header value, skipping", name),
            }
        }
        headers
    }

    /// validates an auth response, nothing partial ever becomes a session
    pub fn from_auth_data(data: AuthData, expires_at: DateTime<Utc>) -> AppResult<Self> {
        let server_host = data
            .server
            .and_then(|server| server.hosts.into_iter().next())
            .map(|host| host.url)
            .ok_or_else(|| Error::AuthUnavailable("no server hosts available".to_string()))?;

        let client = data
            .client
            .ok_or_else(|| Error::InvalidCredentials("response has no client".to_string()))?;

        if client.token.is_empty() || server_host.is_empty() {
            return Err(Error::InvalidCredentials(
                "empty token or server host".to_string(),
            ));
        }

        Ok(Self {
            token: client.token,
            client_id: client.client_id,
            password: client.password,
            server_host,
            expires_at,
        })
    }
}

/// request body for the auth endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthEnvelope {
    pub method: String,
    pub system: AuthSystem,
    pub params: AuthParams,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthSystem {
    pub from: String,
    pub sign: String,
    pub time: u64,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub device_id: String,
    pub hardware: String,
    pub sn: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthResponse {
    pub data: Option<AuthData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthData {
    pub client: Option<AuthClientInfo>,
    pub server: Option<AuthServerInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthClientInfo {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthServerInfo {
    #[serde(default)]
    pub hosts: Vec<AuthHost>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthHost {
    pub url: String,
}

/// who we claim to be in the auth envelope
#[derive(Debug, Clone, Default)]
pub struct ClientIdentity {
    pub app_id: String,
    pub device_id: String,
    pub hardware: String,
    pub version: String,
}

pub type DynAuthClient = Arc<dyn AuthClientTrait + Send + Sync>;

#[automock]
#[async_trait]
pub trait AuthClientTrait {
    /// one timeout-bounded post, no retries
    async fn authenticate(&self, envelope: AuthEnvelope) -> AppResult<AuthData>;
}

pub struct HttpAuthClient {
    http: reqwest::Client,
    auth_url: String,
}

impl HttpAuthClient {
    pub fn new(auth_url: String, user_agent: &str, timeout: Duration) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| {
                Error::InternalServerErrorWithContext(format!("failed to build auth client: {}", e))
            })?;

        Ok(Self { http, auth_url })
    }
}

#[async_trait]
impl AuthClientTrait for HttpAuthClient {
    async fn authenticate(&self, envelope: AuthEnvelope) -> AppResult<AuthData> {
        debug!("posting auth envelope to {}", self.auth_url);

        let response = self
            .http
            .post(&self.auth_url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| {
                error!("auth request failed: {}", e);
                Error::AuthUnavailable(format!("auth request failed: {}", e))
            })?;

        if !response.status().is_success() {
            error!("auth endpoint returned {}", response.status());
            return Err(Error::AuthUnavailable(format!(
                "auth endpoint returned {}",
                response.status()
            )));
        }

        let parsed: AuthResponse = response.json().await.map_err(|e| {
            error!("failed to parse auth response: {}", e);
            Error::AuthUnavailable(format!("failed to parse auth response: {}", e))
        })?;

        parsed
            .data
            .ok_or_else(|| Error::AuthUnavailable("auth response has no data".to_string()))
    }
}

type SharedRefresh = Shared<BoxFuture<'static, AppResult<Arc<Session>>>>;

enum SessionState {
    Unset,
    Valid(Arc<Session>),
    Refreshing {
        generation: u64,
        refresh: SharedRefresh,
    },
    Failed(Error),
}

/// what `/health` reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Unset,
    Valid,
    Expiring,
    Refreshing,
    Failed,
}

/// Owns the one live session of this proxy. Concurrent callers that find it stale share a
/// single refresh instead of each hitting the auth endpoint.
pub struct CredentialManager {
    auth: DynAuthClient,
    signer: Arc<SignatureUtil>,
    identity: ClientIdentity,
    session_window: chrono::Duration,
    state: Mutex<SessionState>,
    generation: AtomicU64,
}

impl CredentialManager {
    pub fn new(
        auth: DynAuthClient,
        signer: Arc<SignatureUtil>,
        identity: ClientIdentity,
        session_window: Duration,
    ) -> Self {
        Self {
            auth,
            signer,
            identity,
            session_window: chrono::Duration::from_std(session_window)
                .unwrap_or_else(|_| chrono::Duration::seconds(850)),
            state: Mutex::new(SessionState::Unset),
            generation: AtomicU64::new(0),
        }
    }

    /// current session if it's still inside its window, otherwise waits on a refresh
    pub async fn get_valid_session(&self) -> AppResult<Arc<Session>> {
        self.acquire(false).await
    }

    /// refreshes even if the current session is fine, joins one that's already running
    pub async fn refresh(&self) -> AppResult<Arc<Session>> {
        self.acquire(true).await
    }

    /// Drops `session` if it's still the current one, e.g. after the origin answered 401/403.
    pub fn invalidate(&self, session: &Session) {
        let mut state = self.state.lock();
        if let SessionState::Valid(current) = &*state {
            if current.token == session.token {
                info!("invalidating session for client {}", session.client_id);
                *state = SessionState::Unset;
            }
        }
    }

    pub fn phase(&self) -> (SessionPhase, Option<DateTime<Utc>>) {
        let now = Utc::now();
        match &*self.state.lock() {
            SessionState::Unset => (SessionPhase::Unset, None),
            SessionState::Refreshing { .. } => (SessionPhase::Refreshing, None),
            SessionState::Failed(_) => (SessionPhase::Failed, None),
            SessionState::Valid(session) if session.is_expired(now) => {
                (SessionPhase::Unset, Some(session.expires_at))
            }
            SessionState::Valid(session)
                if session.expires_at - now
                    <= chrono::Duration::seconds(EXPIRING_THRESHOLD_SECONDS) =>
            {
                (SessionPhase::Expiring, Some(session.expires_at))
            }
            SessionState::Valid(session) => (SessionPhase::Valid, Some(session.expires_at)),
        }
    }

    /// why the last refresh failed, cleared once a refresh goes through
    pub fn last_error(&self) -> Option<String> {
        match &*self.state.lock() {
            SessionState::Failed(e) => Some(e.to_string()),
            _ => None,
        }
    }

    async fn acquire(&self, force: bool) -> AppResult<Arc<Session>> {
        let (generation, refresh) = 'plan: {
            let mut state = self.state.lock();

            let previous = match &*state {
                SessionState::Valid(session) if !force && !session.is_expired(Utc::now()) => {
                    return Ok(session.clone());
                }
                SessionState::Refreshing {
                    generation,
                    refresh,
                } => {
                    debug!("joining in-flight session refresh");
                    break 'plan (*generation, refresh.clone());
                }
                SessionState::Valid(session) => Some(session.clone()),
                SessionState::Unset | SessionState::Failed(_) => None,
            };

            let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
            let refresh = self.start_refresh(previous.as_deref());
            *state = SessionState::Refreshing {
                generation,
                refresh: refresh.clone(),
            };

            (generation, refresh)
        };

        let result = refresh.await;

        // whoever gets here first settles the state, later waiters see a newer generation
        // or an already settled one and leave it alone
        let mut state = self.state.lock();
        if matches!(&*state, SessionState::Refreshing { generation: current, .. } if *current == generation)
        {
            *state = match &result {
                Ok(session) => SessionState::Valid(session.clone()),
                Err(e) => SessionState::Failed(e.clone()),
            };
        }

        result
    }

    fn start_refresh(&self, previous: Option<&Session>) -> SharedRefresh {
        info!("refreshing upstream session");

        let envelope = self.build_envelope(previous);
        let auth = self.auth.clone();
        let window = self.session_window;

        async move {
            let data = auth.authenticate(envelope).await?;
            let session = Session::from_auth_data(data, Utc::now() + window).map_err(|e| {
                error!("auth response rejected: {}", e);
                e
            })?;

            info!(
                "session refreshed for client {}, expires at {}",
                session.client_id, session.expires_at
            );
            Ok(Arc::new(session))
        }
        .boxed()
        .shared()
    }

    fn build_envelope(&self, previous: Option<&Session>) -> AuthEnvelope {
        let params = AuthParams {
            client_id: previous.map(|s| s.client_id.clone()),
            password: previous.map(|s| s.password.clone()),
            token: previous.map(|s| s.token.clone()),
            device_id: self.identity.device_id.clone(),
            hardware: self.identity.hardware.clone(),
            sn: self.identity.device_id.clone(),
            version: self.identity.version.clone(),
        };

        let SignedRequest {
            time_bucket,
            signature,
            payload,
        } = self
            .signer
            .sign_payload(AUTH_ROUTE_KEY, &self.identity.device_id, unix_now(), params);

        AuthEnvelope {
            method: AUTH_ROUTE_KEY.to_string(),
            system: AuthSystem {
                from: self.identity.app_id.clone(),
                sign: signature,
                time: time_bucket,
                version: AUTH_ENVELOPE_VERSION.to_string(),
            },
            params: payload,
        }
    }
}
