//! Explicit session context: token pair, current user, and the auth calls
//! that populate and clear it.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use shared::{
    domain::UserProfile,
    protocol::{
        AuthResponse, LoginRequest, LogoutRequest, RefreshRequest, RefreshResponse,
        RegisterRequest, TokenPair,
    },
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::Settings,
    remote::{build_http_client, check_status, normalize_base_url, read_json, RemoteError},
};

pub type SharedSession = Arc<RwLock<Session>>;

#[derive(Debug, Clone, Default)]
pub struct Session {
    tokens: Option<TokenPair>,
    user: Option<UserProfile>,
}

#[derive(Debug, Deserialize)]
struct AccessClaims {
    exp: Option<i64>,
}

impl Session {
    pub fn shared() -> SharedSession {
        Arc::new(RwLock::new(Self::default()))
    }

    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: Some(tokens),
            user: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.is_some()
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(|tokens| tokens.access.as_str())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(|tokens| tokens.refresh.as_str())
    }

    pub fn establish(&mut self, tokens: TokenPair, user: Option<UserProfile>) {
        self.tokens = Some(tokens);
        self.user = user;
    }

    pub fn set_user(&mut self, user: UserProfile) {
        self.user = Some(user);
    }

    fn rotate(&mut self, refreshed: RefreshResponse) {
        if let Some(tokens) = self.tokens.as_mut() {
            tokens.access = refreshed.access;
            if let Some(refresh) = refreshed.refresh {
                tokens.refresh = refresh;
            }
        }
    }

    pub fn clear(&mut self) {
        self.tokens = None;
        self.user = None;
    }

    /// Reads the `exp` claim of the access token. The signature is not
    /// checked; the server stays the authority, this only avoids a request
    /// that is bound to be rejected. Tokens without a readable `exp` never
    /// count as expired.
    pub fn access_token_expired(&self, now: DateTime<Utc>) -> bool {
        self.access_token()
            .and_then(token_expiry)
            .is_some_and(|exp| exp <= now.timestamp())
    }
}

fn token_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice::<AccessClaims>(&decoded).ok()?.exp
}

pub struct AuthClient {
    http: Client,
    base_url: Url,
    session: SharedSession,
    // Serializes refreshes so a rotated refresh token is only spent once.
    refresh_gate: Mutex<()>,
}

impl AuthClient {
    pub fn new(settings: &Settings, session: SharedSession) -> Result<Self, RemoteError> {
        Ok(Self::with_client(
            build_http_client(settings)?,
            normalize_base_url(&settings.api_url)?,
            session,
        ))
    }

    pub(crate) fn with_client(http: Client, base_url: Url, session: SharedSession) -> Self {
        Self {
            http,
            base_url,
            session,
            refresh_gate: Mutex::new(()),
        }
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        Ok(self.base_url.join(path)?)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<UserProfile, RemoteError> {
        let response = self
            .http
            .post(self.endpoint("auth/login/")?)
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        let body: AuthResponse = read_json(response).await?;
        info!(user_id = body.user.id.0, "session: logged in");
        self.session
            .write()
            .await
            .establish(body.tokens, Some(body.user.clone()));
        Ok(body.user)
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<UserProfile, RemoteError> {
        let response = self
            .http
            .post(self.endpoint("auth/register/")?)
            .json(request)
            .send()
            .await?;
        let body: AuthResponse = read_json(response).await?;
        info!(user_id = body.user.id.0, "session: registered");
        self.session
            .write()
            .await
            .establish(body.tokens, Some(body.user.clone()));
        Ok(body.user)
    }

    /// Exchanges the refresh token for a new access token. A rejected
    /// refresh ends the session.
    pub async fn refresh(&self) -> Result<(), RemoteError> {
        let _gate = self.refresh_gate.lock().await;
        self.exchange_refresh_token().await
    }

    /// Refreshes unless another caller already replaced `stale_access` while
    /// this one waited for the gate.
    pub(crate) async fn refresh_replacing(
        &self,
        stale_access: Option<&str>,
    ) -> Result<(), RemoteError> {
        let _gate = self.refresh_gate.lock().await;
        {
            let session = self.session.read().await;
            match session.access_token() {
                None => return Err(RemoteError::NotAuthenticated),
                Some(current) if Some(current) != stale_access => {
                    debug!("session: access token already refreshed by a concurrent request");
                    return Ok(());
                }
                Some(_) => {}
            }
        }
        self.exchange_refresh_token().await
    }

    async fn exchange_refresh_token(&self) -> Result<(), RemoteError> {
        let refresh = self
            .session
            .read()
            .await
            .refresh_token()
            .map(str::to_owned)
            .ok_or(RemoteError::NotAuthenticated)?;

        let result = async {
            let response = self
                .http
                .post(self.endpoint("auth/token/refresh/")?)
                .json(&RefreshRequest { refresh })
                .send()
                .await?;
            read_json::<RefreshResponse>(response).await
        }
        .await;

        let mut session = self.session.write().await;
        match result {
            Ok(refreshed) => {
                session.rotate(refreshed);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "session: token refresh failed, clearing session");
                session.clear();
                Err(err)
            }
        }
    }

    pub async fn profile(&self) -> Result<UserProfile, RemoteError> {
        let token = self
            .session
            .read()
            .await
            .access_token()
            .map(str::to_owned)
            .ok_or(RemoteError::NotAuthenticated)?;
        let response = self
            .http
            .get(self.endpoint("auth/user/")?)
            .bearer_auth(token)
            .send()
            .await?;
        let user: UserProfile = read_json(response).await?;
        self.session.write().await.set_user(user.clone());
        Ok(user)
    }

    /// Validates stored tokens by fetching the profile; stale tokens are
    /// dropped.
    pub async fn restore(&self, tokens: TokenPair) -> Result<UserProfile, RemoteError> {
        self.session.write().await.establish(tokens, None);
        match self.profile().await {
            Ok(user) => Ok(user),
            Err(err) => {
                warn!(error = %err, "session: stored credentials rejected");
                self.session.write().await.clear();
                Err(err)
            }
        }
    }

    /// Best-effort server-side logout. The local session is cleared either way.
    pub async fn logout(&self) {
        let refresh = self.session.read().await.refresh_token().map(str::to_owned);
        if let Some(refresh_token) = refresh {
            let result = async {
                let response = self
                    .http
                    .post(self.endpoint("auth/logout/")?)
                    .json(&LogoutRequest { refresh_token })
                    .send()
                    .await?;
                check_status(response).await.map(|_| ())
            }
            .await;
            if let Err(err) = result {
                warn!(error = %err, "session: logout request failed");
            }
        }
        self.session.write().await.clear();
        info!("session: logged out");
    }
}
