use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use tokio::sync::{broadcast, oneshot, Mutex};

use crate::models::user::{LoginResponse, UserProfile};

const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Session lifecycle notifications. Consumers subscribe instead of listening
/// on a global event bus.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    TokenRefreshed { user: UserProfile },
    LoggedOut,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("session expired, sign in again")]
    SessionExpired,
    #[error("token refresh timed out")]
    RefreshTimedOut,
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Cloneable failure kind fanned out to every waiter of a refresh flight.
#[derive(Debug, Clone)]
enum RefreshFailure {
    Unauthorized,
    TimedOut,
    Transport(String),
}

impl From<RefreshFailure> for ClientError {
    fn from(f: RefreshFailure) -> Self {
        match f {
            RefreshFailure::Unauthorized => ClientError::SessionExpired,
            RefreshFailure::TimedOut => ClientError::RefreshTimedOut,
            RefreshFailure::Transport(msg) => ClientError::RefreshFailed(msg),
        }
    }
}

#[derive(Debug, Clone)]
enum RefreshOutcome {
    Token { access: String, user: UserProfile },
    Failed(RefreshFailure),
}

enum FlightRole {
    Leader,
    Follower(oneshot::Receiver<RefreshOutcome>),
}

/// At most one refresh call may be in flight; later arrivals queue behind it.
enum RefreshState {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    },
}

/// The access token and the refresh flight share one lock, mirroring the
/// single coordination point the whole client process must agree on.
struct AgentState {
    access_token: Option<String>,
    refresh: RefreshState,
}

struct AgentInner {
    http: reqwest::Client,
    base_url: String,
    state: Mutex<AgentState>,
    events: broadcast::Sender<SessionEvent>,
    refresh_timeout: Duration,
}

/// Client-side session handle. Owns the in-memory access token (never
/// persisted), intercepts 401 responses, refreshes through the cookie-carried
/// refresh token with at most one flight in progress, and replays waiting
/// requests in the order they queued.
///
/// Construct one agent per client process and pass it to everything that
/// issues requests.
#[derive(Clone)]
pub struct SessionAgent {
    inner: Arc<AgentInner>,
}

impl SessionAgent {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self::with_client(http, base_url))
    }

    /// The client must keep a cookie store: the refresh token only travels
    /// in an HTTP-only cookie.
    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(AgentInner {
                http,
                base_url: base_url.into(),
                state: Mutex::new(AgentState {
                    access_token: None,
                    refresh: RefreshState::Idle,
                }),
                events,
                refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Build a request against the API base URL on the agent's HTTP client.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.inner
            .http
            .request(method, format!("{}{}", self.inner.base_url, path))
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    pub async fn access_token(&self) -> Option<String> {
        self.inner.state.lock().await.access_token.clone()
    }

    pub async fn set_access_token(&self, token: Option<String>) {
        self.inner.state.lock().await.access_token = token;
    }

    /// Send a request with the current access token attached. On 401 the
    /// agent refreshes (joining any flight already in progress) and replays
    /// the request once with the new token. A failed refresh rejects every
    /// waiting caller with the same error and emits [`SessionEvent::LoggedOut`].
    pub async fn execute(&self, req: RequestBuilder) -> Result<Response, ClientError> {
        // Clone before attaching the bearer so the replay re-attaches the
        // fresh token exactly once.
        let retry = req.try_clone();

        let response = self.send_with_token(req).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let access = match self.join_refresh().await {
            Ok(outcome) => outcome,
            Err(failure) => return Err(failure.into()),
        };

        // Streaming bodies cannot be replayed; hand back the 401 and let the
        // caller retry now that the session is repaired.
        let Some(retry) = retry else {
            return Ok(response);
        };

        Ok(retry.bearer_auth(access).send().await?)
    }

    async fn send_with_token(&self, req: RequestBuilder) -> Result<Response, ClientError> {
        let token = self.access_token().await;
        let req = match token {
            Some(t) => req.bearer_auth(t),
            None => req,
        };
        Ok(req.send().await?)
    }

    /// Sign in, store the access token in memory, and let the cookie store
    /// capture the refresh cookie from the response.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, ClientError> {
        let response = self
            .post("/auth/login")
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ClientError::InvalidCredentials);
        }
        let body: LoginResponse = response.error_for_status()?.json().await?;

        self.set_access_token(Some(body.access_token)).await;
        Ok(body.user)
    }

    /// Restore a session from the refresh cookie alone, e.g. after an
    /// application restart.
    pub async fn resume(&self) -> Result<UserProfile, ClientError> {
        match self.join_refresh_full().await {
            Ok(RefreshOutcome::Token { user, .. }) => Ok(user),
            Ok(RefreshOutcome::Failed(f)) | Err(f) => Err(f.into()),
        }
    }

    /// Clear client state and revoke the session server-side (best-effort).
    /// An in-flight refresh is allowed to settle first so a late success
    /// cannot resurrect the cleared session.
    pub async fn logout(&self) {
        let pending = {
            let mut state = self.inner.state.lock().await;
            match &mut state.refresh {
                RefreshState::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                RefreshState::Idle => None,
            }
        };
        if let Some(rx) = pending {
            let _ = rx.await;
        }

        self.set_access_token(None).await;

        if let Err(e) = self.post("/auth/logout").send().await {
            tracing::warn!("server-side logout failed: {e}");
        }

        let _ = self.inner.events.send(SessionEvent::LoggedOut);
    }

    async fn join_refresh(&self) -> Result<String, RefreshFailure> {
        match self.join_refresh_full().await? {
            RefreshOutcome::Token { access, .. } => Ok(access),
            RefreshOutcome::Failed(f) => Err(f),
        }
    }

    /// Either lead a new refresh flight or queue behind the one in progress.
    /// Waiters are resolved in FIFO order, so replays start in the order the
    /// original requests failed; completion order is not guaranteed.
    async fn join_refresh_full(&self) -> Result<RefreshOutcome, RefreshFailure> {
        let role = {
            let mut state = self.inner.state.lock().await;
            match &mut state.refresh {
                RefreshState::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    FlightRole::Follower(rx)
                }
                RefreshState::Idle => {
                    state.refresh = RefreshState::Refreshing {
                        waiters: Vec::new(),
                    };
                    FlightRole::Leader
                }
            }
        };

        match role {
            FlightRole::Follower(rx) => rx
                .await
                .map_err(|_| RefreshFailure::Transport("refresh flight aborted".into())),
            FlightRole::Leader => {
                let outcome = self.perform_refresh().await;

                let waiters = {
                    let mut state = self.inner.state.lock().await;
                    state.access_token = match &outcome {
                        RefreshOutcome::Token { access, .. } => Some(access.clone()),
                        RefreshOutcome::Failed(_) => None,
                    };
                    match std::mem::replace(&mut state.refresh, RefreshState::Idle) {
                        RefreshState::Refreshing { waiters } => waiters,
                        RefreshState::Idle => Vec::new(),
                    }
                };
                for waiter in waiters {
                    let _ = waiter.send(outcome.clone());
                }

                match &outcome {
                    RefreshOutcome::Token { user, .. } => {
                        let _ = self.inner.events.send(SessionEvent::TokenRefreshed {
                            user: user.clone(),
                        });
                    }
                    RefreshOutcome::Failed(_) => {
                        let _ = self.inner.events.send(SessionEvent::LoggedOut);
                    }
                }

                Ok(outcome)
            }
        }
    }

    /// One cookie-credentialed call to the refresh endpoint, bounded by the
    /// refresh timeout. Timeout counts as failure and takes the logout path.
    async fn perform_refresh(&self) -> RefreshOutcome {
        let attempt = async {
            let response = self.post("/auth/refresh").send().await;
            match response {
                Err(e) => RefreshOutcome::Failed(RefreshFailure::Transport(e.to_string())),
                Ok(r) if r.status().is_success() => match r.json::<LoginResponse>().await {
                    Ok(body) => RefreshOutcome::Token {
                        access: body.access_token,
                        user: body.user,
                    },
                    Err(e) => RefreshOutcome::Failed(RefreshFailure::Transport(e.to_string())),
                },
                Ok(_) => RefreshOutcome::Failed(RefreshFailure::Unauthorized),
            }
        };

        match tokio::time::timeout(self.inner.refresh_timeout, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => RefreshOutcome::Failed(RefreshFailure::TimedOut),
        }
    }
}
