use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub base_url: Url,
    pub logout_path: String,
    pub expiry_buffer: Duration,
}

impl SessionConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            logout_path: "/auth/logout".to_string(),
            expiry_buffer: DEFAULT_EXPIRY_BUFFER,
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    tokens: Option<TokenPair>,
    user: Option<SessionUser>,
    // bumped whenever the session is replaced or torn down
    epoch: u64,
}

type RefreshFuture = Shared<BoxFuture<'static, Result<TokenPair, SessionError>>>;

/// Owns the token pair. Every mutation is written through to the
/// [`TokenStore`]; at most one refresh call is in flight at any time.
///
/// A refresh that completes after the session it started from was replaced
/// or cleared is discarded.
pub struct SessionManager {
    config: SessionConfig,
    http: reqwest::Client,
    auth_api: Arc<dyn AuthApi>,
    store: Arc<dyn TokenStore>,
    state: Arc<RwLock<SessionState>>,
    in_flight: Arc<Mutex<Option<RefreshFuture>>>,
    // serializes store writes with the state change they belong to
    persist: Arc<tokio::sync::Mutex<()>>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        http: reqwest::Client,
        auth_api: Arc<dyn AuthApi>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            config,
            http,
            auth_api,
            store,
            state: Arc::new(RwLock::new(SessionState::default())),
            in_flight: Arc::new(Mutex::new(None)),
            persist: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Loads a persisted session. Returns whether tokens were found.
    pub async fn restore(&self) -> Result<bool, SessionError> {
        let _persist = self.persist.lock().await;
        let stored = self.store.load().await?;
        let found = stored.tokens.is_some();
        {
            let mut state = write_state(&self.state);
            state.tokens = stored.tokens;
            state.user = stored.user;
            state.epoch += 1;
        }
        tracing::debug!(found, "session restored from store");
        Ok(found)
    }

    pub async fn sign_in(&self, tokens: TokenPair, user: SessionUser) -> Result<(), SessionError> {
        let _persist = self.persist.lock().await;
        self.store.save_tokens(&tokens).await?;
        self.store.save_user(&user).await?;
        tracing::info!(user_id = %user.id, "session established");
        let mut state = write_state(&self.state);
        state.tokens = Some(tokens);
        state.user = Some(user);
        state.epoch += 1;
        Ok(())
    }

    pub fn is_authenticated(&self) -> bool {
        read_state(&self.state).tokens.is_some()
    }

    pub fn current_user(&self) -> Option<SessionUser> {
        read_state(&self.state).user.clone()
    }

    pub fn current_tokens(&self) -> Option<TokenPair> {
        read_state(&self.state).tokens.clone()
    }

    pub fn is_expired(&self, token: Option<&str>) -> bool {
        is_expired(token, self.config.expiry_buffer)
    }

    pub async fn get_valid_token(&self) -> Result<AccessToken, SessionError> {
        if let Some(tokens) = self.current_tokens() {
            if !self.is_expired(Some(&tokens.access_token.0)) {
                return Ok(tokens.access_token);
            }
        }
        tracing::debug!("access token missing or stale, refreshing");
        let tokens = self.refresh().await?;
        Ok(tokens.access_token)
    }

    /// Mints a new pair. Callers arriving while a refresh is outstanding share
    /// its result instead of issuing another call.
    pub async fn refresh(&self) -> Result<TokenPair, SessionError> {
        let pending = {
            let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(pending) => {
                    tracing::debug!("joining in-flight refresh");
                    pending.clone()
                }
                None => {
                    let pending = self.start_refresh();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    fn start_refresh(&self) -> RefreshFuture {
        let (refresh_token, epoch) = {
            let state = read_state(&self.state);
            let refresh_token = state.tokens.as_ref().map(|t| t.refresh_token.clone());
            (refresh_token, state.epoch)
        };
        let refresh = Refresh {
            epoch,
            auth_api: self.auth_api.clone(),
            store: self.store.clone(),
            state: self.state.clone(),
            persist: self.persist.clone(),
        };
        let in_flight = self.in_flight.clone();

        async move {
            let result = refresh.run(refresh_token).await;
            in_flight.lock().unwrap_or_else(|e| e.into_inner()).take();
            result
        }
        .boxed()
        .shared()
    }

    /// Issues an authenticated call. A 401 is retried once after a refresh
    /// when `retry_on_401` is set; a second 401 ends the session.
    pub async fn request(
        &self,
        request: ApiRequest,
        retry_on_401: bool,
    ) -> Result<Response, SessionError> {
        let token = self.get_valid_token().await?;
        let response = self.send(&request, &token).await?;

        if response.status() != StatusCode::UNAUTHORIZED || !retry_on_401 {
            return Ok(response);
        }

        tracing::debug!(path = %request.path, "unauthorized, refreshing and retrying once");
        let token = self.token_after_rejection(&token).await?;
        let retried = self.send(&request, &token).await?;

        if retried.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(path = %request.path, "unauthorized after refresh, ending session");
            self.clear_session().await;
            return Err(SessionError::SessionExpired(
                "request rejected after token refresh".to_string(),
            ));
        }
        Ok(retried)
    }

    /// Like [`request`](Self::request) with retry, decoding a JSON body.
    /// Non-2xx responses surface the server's message.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<T, SessionError> {
        let response = self.request(request, true).await?;
        if !response.status().is_success() {
            return Err(SessionError::from_response(response).await);
        }
        response
            .json::<T>()
            .await
            .map_err(|e| SessionError::InvalidResponse(e.to_string()))
    }

    /// Best-effort server logout, then local teardown regardless of outcome.
    pub async fn logout(&self) {
        if let Some(tokens) = self.current_tokens() {
            let request = ApiRequest::post(self.config.logout_path.clone())
                .json(json!({ "refreshToken": tokens.refresh_token }));
            match self.request(request, false).await {
                Ok(response) if !response.status().is_success() => {
                    tracing::debug!(status = %response.status(), "server logout rejected");
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "server logout failed"),
            }
        }
        self.clear_session().await;
        tracing::info!("logged out");
    }

    async fn clear_session(&self) {
        let _persist = self.persist.lock().await;
        clear_session(self.store.as_ref(), &self.state).await;
    }

    // A concurrent caller may already have rotated the token that got
    // rejected; reuse theirs rather than spending another refresh.
    async fn token_after_rejection(&self, rejected: &AccessToken) -> Result<AccessToken, SessionError> {
        if let Some(tokens) = self.current_tokens() {
            if &tokens.access_token != rejected && !self.is_expired(Some(&tokens.access_token.0)) {
                return Ok(tokens.access_token);
            }
        }
        Ok(self.refresh().await?.access_token)
    }

    async fn send(&self, request: &ApiRequest, token: &AccessToken) -> Result<Response, SessionError> {
        let url = self.url_for(&request.path)?;
        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .bearer_auth(&token.0);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder
            .send()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    // Credentials only ever go to the API's own origin.
    fn url_for(&self, path: &str) -> Result<Url, SessionError> {
        match Url::parse(path) {
            Ok(absolute) if matches!(absolute.scheme(), "http" | "https") => {
                if absolute.origin() == self.config.base_url.origin() {
                    Ok(absolute)
                } else {
                    Err(SessionError::Transport(format!(
                        "refusing to send credentials to {}",
                        absolute.origin().ascii_serialization()
                    )))
                }
            }
            _ => join_path(&self.config.base_url, path),
        }
    }
}

#[async_trait::async_trait]
impl TokenProvider for SessionManager {
    async fn current_access_token(&self) -> Option<AccessToken> {
        let tokens = self.current_tokens()?;
        if self.is_expired(Some(&tokens.access_token.0)) {
            None
        } else {
            Some(tokens.access_token)
        }
    }
}

/// Appends `path` to the base URL's path, keeping any prefix such as `/api`.
pub fn join_path(base: &Url, path: &str) -> Result<Url, SessionError> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| SessionError::Transport(format!("bad url {joined}: {e}")))
}

/// One refresh attempt, bound to the session epoch it started from.
struct Refresh {
    epoch: u64,
    auth_api: Arc<dyn AuthApi>,
    store: Arc<dyn TokenStore>,
    state: Arc<RwLock<SessionState>>,
    persist: Arc<tokio::sync::Mutex<()>>,
}

impl Refresh {
    async fn run(self, refresh_token: Option<RefreshToken>) -> Result<TokenPair, SessionError> {
        let outcome = match refresh_token {
            Some(refresh_token) => self.auth_api.refresh(&refresh_token).await,
            None => Err(SessionError::SessionExpired("no refresh token".to_string())),
        };

        let _persist = self.persist.lock().await;
        match outcome {
            Ok(tokens) => {
                let applied = {
                    let mut state = write_state(&self.state);
                    if state.epoch == self.epoch {
                        state.tokens = Some(tokens.clone());
                        true
                    } else {
                        false
                    }
                };
                if !applied {
                    tracing::info!("session changed during refresh, discarding rotated tokens");
                    return self.superseded();
                }
                if let Err(e) = self.store.save_tokens(&tokens).await {
                    tracing::error!(error = %e, "failed to persist refreshed tokens");
                }
                tracing::info!("access token refreshed");
                Ok(tokens)
            }
            Err(e) => {
                let current = read_state(&self.state).epoch == self.epoch;
                if !current {
                    tracing::debug!(error = %e, "refresh failed for a session that already changed");
                    return self.superseded();
                }
                tracing::warn!(error = %e, "token refresh failed, clearing session");
                clear_session(self.store.as_ref(), &self.state).await;
                Err(match e {
                    SessionError::SessionExpired(reason) => SessionError::SessionExpired(reason),
                    other => SessionError::SessionExpired(other.to_string()),
                })
            }
        }
    }

    // Whatever replaced the session wins; a cleared session stays cleared.
    fn superseded(&self) -> Result<TokenPair, SessionError> {
        read_state(&self.state)
            .tokens
            .clone()
            .ok_or_else(|| SessionError::SessionExpired("session ended during refresh".to_string()))
    }
}

// Callers hold the persist lock.
async fn clear_session(store: &dyn TokenStore, state: &RwLock<SessionState>) {
    {
        let mut state = write_state(state);
        state.tokens = None;
        state.user = None;
        state.epoch += 1;
    }
    if let Err(e) = store.clear().await {
        tracing::error!(error = %e, "failed to clear stored session");
    }
}

fn read_state(state: &RwLock<SessionState>) -> std::sync::RwLockReadGuard<'_, SessionState> {
    state.read().unwrap_or_else(|e| e.into_inner())
}

fn write_state(state: &RwLock<SessionState>) -> std::sync::RwLockWriteGuard<'_, SessionState> {
    state.write().unwrap_or_else(|e| e.into_inner())
}
