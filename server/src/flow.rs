//! The three request-facing steps of the PKCE login: begin, callback and refresh.
//!
//! Nothing here knows about HTTP. Handlers in [`crate::routes`] translate
//! cookies and query strings into these calls and [`FlowError`] back into
//! responses.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::{
    api::{ContentPoster, PostContentError},
    oauth::{
        utils::constant_time_eq, AuthorizationRequest, EntropySource, EntropyUnavailable,
        OsEntropy, PkcePair, SessionId, SessionRecord, SessionStore, SessionStoreError,
        TokenEndpoint, TokenEndpointError, TokenPair,
    },
    state::OAuthConfig,
};

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error(transparent)]
    EntropyUnavailable(#[from] EntropyUnavailable),

    #[error("no live session for this callback")]
    SessionExpired,

    #[error("state parameter does not match the session")]
    StateMismatch,

    #[error("callback carried no authorization code")]
    MissingAuthorizationCode,

    #[error("provider denied authorization: {error}")]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    #[error("authorization code exchange failed: {0}")]
    TokenExchangeFailed(#[source] TokenEndpointError),

    #[error("refresh token was not accepted: {0}")]
    RefreshTokenInvalid(#[source] TokenEndpointError),

    #[error("session holds no usable tokens")]
    NotAuthenticated,

    #[error("posting content failed: {0}")]
    PostContentFailed(#[source] PostContentError),

    #[error(transparent)]
    SessionStore(#[from] SessionStoreError),

    #[error("could not encode the authorization URL: {0}")]
    AuthorizationUrl(#[from] serde_urlencoded::ser::Error),
}

/// Query parameters the provider appends to the redirect URL
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BeginOutcome {
    /// Session the pending authorization was written to; set this in the cookie
    pub session_id: SessionId,
    pub authorize_url: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub authenticated: bool,
    /// The provider's advertised access token lifetime has passed
    pub token_expired: bool,
}

pub struct FlowOrchestrator {
    config: Arc<OAuthConfig>,
    sessions: Arc<dyn SessionStore>,
    tokens: Arc<dyn TokenEndpoint>,
    poster: Arc<dyn ContentPoster>,
    entropy: Arc<dyn EntropySource>,
}

impl FlowOrchestrator {
    pub fn new(
        config: Arc<OAuthConfig>,
        sessions: Arc<dyn SessionStore>,
        tokens: Arc<dyn TokenEndpoint>,
        poster: Arc<dyn ContentPoster>,
    ) -> Self {
        Self {
            config,
            sessions,
            tokens,
            poster,
            entropy: Arc::new(OsEntropy),
        }
    }

    pub fn with_entropy(mut self, entropy: Arc<dyn EntropySource>) -> Self {
        self.entropy = entropy;
        self
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    async fn load(&self, id: Option<SessionId>) -> Result<Option<SessionRecord>, FlowError> {
        match id {
            Some(id) => Ok(self.sessions.load(&id).await?),
            None => Ok(None),
        }
    }

    /// Start a login: new state/verifier pair, saved to the session, plus the
    /// provider URL to redirect to.
    ///
    /// Randomness and URL building happen before the store is touched, so a
    /// failure leaves no partial session behind.
    #[tracing::instrument(skip(self), err)]
    pub async fn begin(&self, existing: Option<SessionId>) -> Result<BeginOutcome, FlowError> {
        let pair = PkcePair::generate(self.entropy.as_ref())?;

        let authorize_url = AuthorizationRequest {
            authorize_url: &self.config.authorize_url,
            client_id: &self.config.credentials.client_id,
            redirect_url: &self.config.redirect_url,
            scopes: &self.config.scopes,
            state: &pair.state,
            challenge: &pair.challenge(),
        }
        .build_url()?;

        let (session_id, mut record) = match existing {
            Some(id) => match self.sessions.load(&id).await? {
                Some(record) => (id, record),
                None => (SessionId::new(), SessionRecord::default()),
            },
            None => (SessionId::new(), SessionRecord::default()),
        };

        let login_expiry = self.config.login_expiry(Utc::now());
        record.begin_authorization(pair, login_expiry);

        // The record outlives the pair when it already holds tokens
        record.expires_at = Some(match record.expires_at {
            Some(current) if record.is_authenticated() => current.max(login_expiry),
            _ => login_expiry,
        });

        self.sessions.save(&session_id, &record).await?;

        info!(%session_id, "Started PKCE authorization");

        Ok(BeginOutcome {
            session_id,
            authorize_url,
        })
    }

    /// Validate the provider redirect and trade the code for tokens.
    ///
    /// Checks run in order: live session, pending pair not expired, matching
    /// state, provider error, non-empty code. The stored record is only modified after a successful
    /// exchange, and that save also clears the state/verifier so the same
    /// callback URL cannot be redeemed twice.
    #[tracing::instrument(skip(self, params), err)]
    pub async fn callback(
        &self,
        session_id: Option<SessionId>,
        params: CallbackParams,
    ) -> Result<SessionId, FlowError> {
        let Some(session_id) = session_id else {
            return Err(FlowError::SessionExpired);
        };
        let Some(mut record) = self.sessions.load(&session_id).await? else {
            return Err(FlowError::SessionExpired);
        };

        // A session with nothing pending (never begun, or already consumed)
        // cannot match any presented state.
        let Some(stored_state) = record.state.as_deref() else {
            warn!(%session_id, "Callback for a session with no pending authorization");
            return Err(FlowError::StateMismatch);
        };

        // The record may live on for its tokens, the pending pair does not
        if record.is_pending_expired(Utc::now()) {
            warn!(%session_id, "Callback for an expired authorization attempt");
            return Err(FlowError::SessionExpired);
        }

        let presented_state = params.state.as_deref().unwrap_or_default();
        if !constant_time_eq(presented_state, stored_state) {
            warn!(%session_id, "Callback state did not match the session");
            return Err(FlowError::StateMismatch);
        }

        if let Some(error) = params.error {
            warn!(
                %session_id,
                error = %error,
                error_description = params.error_description.as_deref(),
                "Provider returned an authorization error"
            );
            record.consume_authorization();
            self.sessions.save(&session_id, &record).await?;
            return Err(FlowError::AuthorizationDenied {
                error,
                description: params.error_description,
            });
        }

        let code = match params.code {
            Some(code) if !code.is_empty() => code,
            _ => return Err(FlowError::MissingAuthorizationCode),
        };

        let Some(verifier) = record.verifier.clone() else {
            return Err(FlowError::SessionExpired);
        };

        let tokens = self
            .tokens
            .exchange(&code, &verifier, &self.config.redirect_url)
            .await
            .map_err(|err| {
                error!(
                    %session_id,
                    error = %err,
                    provider_error = err.provider_error().map(|e| e.error.as_str()),
                    provider_error_description = err
                        .provider_error()
                        .and_then(|e| e.error_description.as_deref()),
                    "Token exchange failed"
                );
                FlowError::TokenExchangeFailed(err)
            })?;

        record.tokens = Some(tokens);
        record.consume_authorization();
        record.expires_at = Some(self.config.session_expiry(Utc::now()));
        self.sessions.save(&session_id, &record).await?;

        info!(%session_id, "Stored tokens from authorization code exchange");

        Ok(session_id)
    }

    /// Swap the stored refresh token for a fresh access token.
    ///
    /// Providers either rotate the refresh token or keep the old one valid;
    /// a response without one keeps the token we already had.
    #[tracing::instrument(skip(self), err)]
    pub async fn refresh(&self, session_id: Option<SessionId>) -> Result<(), FlowError> {
        let Some(session_id) = session_id else {
            return Err(FlowError::NotAuthenticated);
        };
        let Some(mut record) = self.sessions.load(&session_id).await? else {
            return Err(FlowError::NotAuthenticated);
        };
        let Some(current_refresh) = record.refresh_token().map(str::to_string) else {
            return Err(FlowError::NotAuthenticated);
        };

        let fresh = self.tokens.refresh(&current_refresh).await.map_err(|err| {
            error!(
                %session_id,
                error = %err,
                provider_error = err.provider_error().map(|e| e.error.as_str()),
                "Token refresh failed"
            );
            FlowError::RefreshTokenInvalid(err)
        })?;

        let rotated = fresh.refresh_token.is_some();
        record.tokens = Some(TokenPair {
            refresh_token: fresh.refresh_token.or(Some(current_refresh)),
            ..fresh
        });
        record.expires_at = Some(self.config.session_expiry(Utc::now()));
        self.sessions.save(&session_id, &record).await?;

        info!(%session_id, rotated, "Refreshed access token");

        Ok(())
    }

    /// Post content on behalf of the session's user.
    ///
    /// The session's access token is the only credential used; without one
    /// the call fails before any request is built.
    #[tracing::instrument(skip(self, text), err)]
    pub async fn post_content(
        &self,
        session_id: Option<SessionId>,
        text: &str,
    ) -> Result<serde_json::Value, FlowError> {
        let record = self.load(session_id).await?;
        let Some(access_token) = record.as_ref().and_then(SessionRecord::access_token) else {
            return Err(FlowError::NotAuthenticated);
        };

        self.poster
            .post_content(access_token, text)
            .await
            .map_err(FlowError::PostContentFailed)
    }

    pub async fn is_authenticated(&self, session_id: Option<SessionId>) -> Result<bool, FlowError> {
        Ok(self.status(session_id).await?.authenticated)
    }

    /// Sign-in state for rendering, including whether a refresh is due
    pub async fn status(&self, session_id: Option<SessionId>) -> Result<SessionStatus, FlowError> {
        let now = Utc::now();
        Ok(self
            .load(session_id)
            .await?
            .map(|record| SessionStatus {
                authenticated: record.is_authenticated(),
                token_expired: record.is_access_token_expired(now),
            })
            .unwrap_or_default())
    }

    pub async fn logout(&self, session_id: Option<SessionId>) -> Result<(), FlowError> {
        if let Some(session_id) = session_id {
            self.sessions.delete(&session_id).await?;
            info!(%session_id, "Session logged out");
        }
        Ok(())
    }
}
