//! A stand-in for the social-media provider: the authorize redirect, the
//! token endpoint with PKCE verification, and the create-tweet API.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_CLIENT_ID: &str = "fixture-client-id";
pub const DEFAULT_CLIENT_SECRET: &str = "fixture-client-secret";

/// Lifetime advertised in `expires_in`; the fixture never actually expires tokens
pub const ACCESS_TOKEN_LIFETIME_SECS: u64 = 7200;

/// What the token endpoint does with the refresh token on a refresh grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshMode {
    /// Issue a new refresh token and revoke the old one
    #[default]
    Rotate,
    /// Keep the presented refresh token valid and omit it from the response
    Reuse,
}

#[derive(Debug, Clone)]
struct IssuedCode {
    challenge: String,
    redirect_uri: String,
    scope: String,
}

#[derive(Debug, Default)]
struct ProviderData {
    codes: HashMap<String, IssuedCode>,
    access_tokens: HashSet<String>,
    refresh_tokens: HashMap<String, String>,
    tweets: Vec<PostedTweet>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostedTweet {
    pub id: String,
    pub text: String,
    pub access_token: String,
}

#[derive(Clone)]
pub struct ProviderState {
    client_id: String,
    client_secret: String,
    refresh_mode: RefreshMode,
    data: Arc<Mutex<ProviderData>>,
}

impl ProviderState {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_mode: RefreshMode,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_mode,
            data: Arc::default(),
        }
    }

    /// Every tweet accepted so far, oldest first
    pub fn posted_tweets(&self) -> Vec<PostedTweet> {
        self.lock().tweets.clone()
    }

    /// Authorization codes issued but not yet redeemed
    pub fn outstanding_codes(&self) -> usize {
        self.lock().codes.len()
    }

    pub fn is_refresh_token_valid(&self, token: &str) -> bool {
        self.lock().refresh_tokens.contains_key(token)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProviderData> {
        // A panicking handler only poisons test state, keep serving
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ProviderState {
    fn default() -> Self {
        Self::new(DEFAULT_CLIENT_ID, DEFAULT_CLIENT_SECRET, RefreshMode::default())
    }
}

pub fn router(state: ProviderState) -> Router {
    Router::new()
        .route("/i/oauth2/authorize", get(authorize))
        .route("/2/oauth2/token", post(token))
        .route("/2/tweets", post(create_tweet))
        .with_state(state)
}

fn oauth_error(status: StatusCode, error: &str, description: &str) -> Response {
    (
        status,
        Json(json!({
            "error": error,
            "error_description": description,
        })),
    )
        .into_response()
}

fn s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[derive(Debug, Deserialize)]
struct AuthorizeQuery {
    response_type: Option<String>,
    client_id: Option<String>,
    redirect_uri: Option<String>,
    scope: Option<String>,
    state: Option<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
}

#[derive(Serialize)]
struct AuthorizeRedirectParams<'a> {
    code: &'a str,
    state: &'a str,
}

/// Auto-approves the request and redirects straight back with a code
async fn authorize(
    State(provider): State<ProviderState>,
    Query(params): Query<AuthorizeQuery>,
) -> Response {
    info!("Provider: handling authorize request");

    if params.response_type.as_deref() != Some("code") {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "unsupported_response_type",
            "response_type must be code",
        );
    }
    if params.client_id.as_deref() != Some(provider.client_id.as_str()) {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_client", "Unknown client_id");
    }
    if params.code_challenge_method.as_deref() != Some("S256") {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "code_challenge_method must be S256",
        );
    }

    let (Some(redirect_uri), Some(state), Some(challenge)) = (
        params.redirect_uri.filter(|v| !v.is_empty()),
        params.state.filter(|v| !v.is_empty()),
        params.code_challenge.filter(|v| !v.is_empty()),
    ) else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "redirect_uri, state and code_challenge are required",
        );
    };

    let code = format!("fixture_auth_code_{}", Uuid::new_v4());
    provider.lock().codes.insert(
        code.clone(),
        IssuedCode {
            challenge,
            redirect_uri: redirect_uri.clone(),
            scope: params.scope.unwrap_or_default(),
        },
    );

    let query = match serde_urlencoded::to_string(AuthorizeRedirectParams {
        code: &code,
        state: &state,
    }) {
        Ok(query) => query,
        Err(e) => {
            return oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", &e.to_string())
        }
    };
    let separator = if redirect_uri.contains('?') { '&' } else { '?' };
    let location = format!("{redirect_uri}{separator}{query}");

    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// Client id and secret from an `Authorization: Basic` header
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

#[derive(Debug, Deserialize)]
struct TokenForm {
    grant_type: String,
    code: Option<String>,
    code_verifier: Option<String>,
    redirect_uri: Option<String>,
    refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token_type: &'static str,
    expires_in: u64,
    access_token: String,
    scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

async fn token(
    State(provider): State<ProviderState>,
    headers: HeaderMap,
    Form(form): Form<TokenForm>,
) -> Response {
    info!("Provider: handling {} token request", form.grant_type);

    match basic_credentials(&headers) {
        Some((id, secret)) if id == provider.client_id && secret == provider.client_secret => {}
        _ => {
            return oauth_error(
                StatusCode::UNAUTHORIZED,
                "invalid_client",
                "Client authentication failed",
            )
        }
    }

    match form.grant_type.as_str() {
        "authorization_code" => exchange_code(&provider, form),
        "refresh_token" => refresh(&provider, form),
        _ => oauth_error(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            "grant_type must be authorization_code or refresh_token",
        ),
    }
}

fn exchange_code(provider: &ProviderState, form: TokenForm) -> Response {
    let mut data = provider.lock();

    // Codes are single use, even when the exchange below fails
    let Some(issued) = form.code.as_deref().and_then(|code| data.codes.remove(code)) else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_grant",
            "Value passed for the authorization code was invalid.",
        );
    };

    if form.redirect_uri.as_deref() != Some(issued.redirect_uri.as_str()) {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", "redirect_uri mismatch");
    }

    let verified = form
        .code_verifier
        .as_deref()
        .is_some_and(|verifier| s256(verifier) == issued.challenge);
    if !verified {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_grant",
            "code_verifier does not match code_challenge",
        );
    }

    let access_token = format!("fixture_access_{}", Uuid::new_v4());
    data.access_tokens.insert(access_token.clone());

    let refresh_token = issued
        .scope
        .split_whitespace()
        .any(|s| s == "offline.access")
        .then(|| format!("fixture_refresh_{}", Uuid::new_v4()));
    if let Some(refresh_token) = &refresh_token {
        data.refresh_tokens
            .insert(refresh_token.clone(), issued.scope.clone());
    }

    Json(TokenResponse {
        token_type: "bearer",
        expires_in: ACCESS_TOKEN_LIFETIME_SECS,
        access_token,
        scope: issued.scope,
        refresh_token,
    })
    .into_response()
}

fn refresh(provider: &ProviderState, form: TokenForm) -> Response {
    let mut data = provider.lock();

    let presented = form.refresh_token.unwrap_or_default();
    let Some(scope) = data.refresh_tokens.get(&presented).cloned() else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_grant",
            "Value passed for the token was invalid.",
        );
    };

    let refresh_token = match provider.refresh_mode {
        RefreshMode::Rotate => {
            data.refresh_tokens.remove(&presented);
            let next = format!("fixture_refresh_{}", Uuid::new_v4());
            data.refresh_tokens.insert(next.clone(), scope.clone());
            Some(next)
        }
        RefreshMode::Reuse => None,
    };

    let access_token = format!("fixture_access_{}", Uuid::new_v4());
    data.access_tokens.insert(access_token.clone());

    Json(TokenResponse {
        token_type: "bearer",
        expires_in: ACCESS_TOKEN_LIFETIME_SECS,
        access_token,
        scope,
        refresh_token,
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
struct CreateTweet {
    text: String,
}

async fn create_tweet(
    State(provider): State<ProviderState>,
    headers: HeaderMap,
    Json(body): Json<CreateTweet>,
) -> Response {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let mut data = provider.lock();

    let Some(token) = token.filter(|t| data.access_tokens.contains(t)) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "title": "Unauthorized",
                "type": "about:blank",
                "status": 401,
                "detail": "Unauthorized"
            })),
        )
            .into_response();
    };

    if body.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": "text must not be empty" })),
        )
            .into_response();
    }

    let id = (data.tweets.len() as u64 + 1_445_880_548_472_328_192).to_string();
    info!("Provider: accepted tweet {id}");

    data.tweets.push(PostedTweet {
        id: id.clone(),
        text: body.text.clone(),
        access_token: token,
    });

    (
        StatusCode::CREATED,
        Json(json!({
            "data": {
                "id": id,
                "text": body.text,
            }
        })),
    )
        .into_response()
}
