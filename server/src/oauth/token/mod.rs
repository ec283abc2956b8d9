//! Token endpoint client for the authorization-code and refresh-token grants.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Raw token endpoint success body
#[derive(Debug, Deserialize, Clone)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

/// RFC 6749 section 5.2 error body
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ProviderErrorBody {
    pub error: String,
    pub error_description: Option<String>,
}

/// The credentials issued by a successful exchange or refresh
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPair {
    /// Short-lived bearer credential sent with every API call
    pub access_token: String,
    /// Long-lived credential, only ever sent to the token endpoint
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenPair {
    pub fn from_token_response(response: TokenResponse, now: DateTime<Utc>) -> Self {
        let expires_at = response.expires_in.map(|secs| {
            let secs = secs.min(u64::from(u32::MAX)) as i64;
            now + chrono::Duration::seconds(secs)
        });

        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.filter(|t| !t.is_empty()),
            token_type: response.token_type,
            scope: response.scope,
            expires_at,
        }
    }

    /// Whether the access token has passed its advertised expiry.
    /// Tokens without an expiry are assumed live.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[redacted]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[redacted]"),
            )
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// OAuth client credentials registered with the provider
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenEndpointError {
    /// Connection failure or timeout. Never retried here: a replayed
    /// authorization code would be rejected anyway.
    #[error("token endpoint request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error(
        "token endpoint rejected the request with status {status}: {}",
        .body.as_ref().map(|b| b.error.as_str()).unwrap_or("no error code")
    )]
    Rejected {
        status: u16,
        body: Option<ProviderErrorBody>,
    },

    #[error("token endpoint returned an unparsable body: {0}")]
    Malformed(String),
}

impl TokenEndpointError {
    /// Provider error code and description, for logs only
    pub fn provider_error(&self) -> Option<&ProviderErrorBody> {
        match self {
            TokenEndpointError::Rejected { body, .. } => body.as_ref(),
            _ => None,
        }
    }
}

/// Access to the provider's token endpoint
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Trade an authorization code plus the PKCE verifier for tokens
    async fn exchange(
        &self,
        code: &str,
        verifier: &str,
        redirect_url: &str,
    ) -> Result<TokenPair, TokenEndpointError>;

    /// Trade a refresh token for a new access token
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, TokenEndpointError>;
}

#[derive(Serialize)]
struct AuthorizationCodeGrant<'a> {
    grant_type: &'static str,
    code: &'a str,
    redirect_uri: &'a str,
    code_verifier: &'a str,
    client_id: &'a str,
}

#[derive(Serialize)]
struct RefreshTokenGrant<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
    client_id: &'a str,
}

/// Talks to a real token endpoint over HTTPS with HTTP Basic client authentication
#[derive(Debug, Clone)]
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
    token_url: String,
    credentials: ClientCredentials,
}

impl HttpTokenEndpoint {
    pub fn new(
        token_url: impl Into<String>,
        credentials: ClientCredentials,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::ClientBuilder::new()
            .timeout(timeout)
            .use_rustls_tls()
            .build()?;

        Ok(Self {
            client,
            token_url: token_url.into(),
            credentials,
        })
    }

    async fn post_form(&self, grant: &str, body: String) -> Result<TokenPair, TokenEndpointError> {
        debug!(token_url = %self.token_url, grant, "Sending token request");

        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Accept", "application/json")
            .body(body)
            .send()
            .await
            .map_err(TokenEndpointError::Transport)?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(TokenEndpointError::Transport)?;

        if !status.is_success() {
            let body = serde_json::from_str::<ProviderErrorBody>(&text).ok();
            error!(
                status = status.as_u16(),
                error = body.as_ref().map(|b| b.error.as_str()),
                error_description = body.as_ref().and_then(|b| b.error_description.as_deref()),
                grant,
                "Token request failed"
            );
            return Err(TokenEndpointError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&text)
            .map_err(|e| TokenEndpointError::Malformed(e.to_string()))?;

        if parsed.access_token.is_empty() {
            return Err(TokenEndpointError::Malformed(
                "access_token is empty".to_string(),
            ));
        }

        Ok(TokenPair::from_token_response(parsed, Utc::now()))
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange(
        &self,
        code: &str,
        verifier: &str,
        redirect_url: &str,
    ) -> Result<TokenPair, TokenEndpointError> {
        let body = serde_urlencoded::to_string(AuthorizationCodeGrant {
            grant_type: "authorization_code",
            code,
            redirect_uri: redirect_url,
            code_verifier: verifier,
            client_id: &self.credentials.client_id,
        })
        .map_err(|e| TokenEndpointError::Malformed(e.to_string()))?;

        self.post_form("authorization_code", body).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, TokenEndpointError> {
        let body = serde_urlencoded::to_string(RefreshTokenGrant {
            grant_type: "refresh_token",
            refresh_token,
            client_id: &self.credentials.client_id,
        })
        .map_err(|e| TokenEndpointError::Malformed(e.to_string()))?;

        self.post_form("refresh_token", body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::post,
        Router,
    };
    use std::collections::HashMap;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/token", addr)
    }

    fn endpoint(url: String, timeout: Duration) -> HttpTokenEndpoint {
        HttpTokenEndpoint::new(
            url,
            ClientCredentials {
                client_id: "client-id".to_string(),
                client_secret: "client-secret".to_string(),
            },
            timeout,
        )
        .unwrap()
    }

    /// Echoes the form it received back inside the token so tests can inspect it
    async fn echo_token(headers: HeaderMap, body: String) -> impl IntoResponse {
        let form: HashMap<String, String> = serde_urlencoded::from_str(&body).unwrap();
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        axum::Json(serde_json::json!({
            "access_token": serde_json::to_string(&form).unwrap(),
            "token_type": "bearer",
            "expires_in": 7200,
            "refresh_token": auth,
            "scope": "tweet.read offline.access",
        }))
    }

    #[tokio::test]
    async fn exchange_sends_pkce_grant_with_basic_auth() {
        let url = serve(Router::new().route("/token", post(echo_token))).await;
        let pair = endpoint(url, Duration::from_secs(5))
            .exchange("the-code", "the-verifier", "http://localhost/cb")
            .await
            .unwrap();

        let form: HashMap<String, String> = serde_json::from_str(&pair.access_token).unwrap();
        assert_eq!(form["grant_type"], "authorization_code");
        assert_eq!(form["code"], "the-code");
        assert_eq!(form["code_verifier"], "the-verifier");
        assert_eq!(form["redirect_uri"], "http://localhost/cb");
        assert_eq!(form["client_id"], "client-id");

        // base64("client-id:client-secret")
        assert_eq!(
            pair.refresh_token.as_deref(),
            Some("Basic Y2xpZW50LWlkOmNsaWVudC1zZWNyZXQ=")
        );
        assert!(pair.expires_at.is_some());
        assert_eq!(pair.scope.as_deref(), Some("tweet.read offline.access"));
    }

    #[tokio::test]
    async fn refresh_sends_refresh_grant() {
        let url = serve(Router::new().route("/token", post(echo_token))).await;
        let pair = endpoint(url, Duration::from_secs(5))
            .refresh("old-refresh")
            .await
            .unwrap();

        let form: HashMap<String, String> = serde_json::from_str(&pair.access_token).unwrap();
        assert_eq!(form["grant_type"], "refresh_token");
        assert_eq!(form["refresh_token"], "old-refresh");
        assert!(!form.contains_key("code_verifier"));
    }

    #[tokio::test]
    async fn provider_rejection_keeps_error_detail() {
        let url = serve(Router::new().route(
            "/token",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    axum::Json(serde_json::json!({
                        "error": "invalid_grant",
                        "error_description": "code verifier mismatch",
                    })),
                )
            }),
        ))
        .await;

        let err = endpoint(url, Duration::from_secs(5))
            .exchange("c", "v", "r")
            .await
            .unwrap_err();

        match &err {
            TokenEndpointError::Rejected { status, .. } => assert_eq!(*status, 400),
            other => panic!("unexpected error: {other:?}"),
        }
        let detail = err.provider_error().unwrap();
        assert_eq!(detail.error, "invalid_grant");
        assert_eq!(
            detail.error_description.as_deref(),
            Some("code verifier mismatch")
        );
    }

    #[tokio::test]
    async fn non_json_error_body_is_still_a_rejection() {
        let url = serve(Router::new().route(
            "/token",
            post(|| async { (StatusCode::BAD_GATEWAY, "<html>upstream down</html>") }),
        ))
        .await;

        let err = endpoint(url, Duration::from_secs(5))
            .refresh("r")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TokenEndpointError::Rejected {
                status: 502,
                body: None
            }
        ));
    }

    #[tokio::test]
    async fn unparsable_success_body_is_malformed() {
        let url = serve(Router::new().route("/token", post(|| async { "not json" }))).await;

        let err = endpoint(url, Duration::from_secs(5))
            .exchange("c", "v", "r")
            .await
            .unwrap_err();

        assert!(matches!(err, TokenEndpointError::Malformed(_)));
    }

    #[tokio::test]
    async fn empty_access_token_is_malformed() {
        let url = serve(Router::new().route(
            "/token",
            post(|| async { axum::Json(serde_json::json!({ "access_token": "" })) }),
        ))
        .await;

        let err = endpoint(url, Duration::from_secs(5))
            .exchange("c", "v", "r")
            .await
            .unwrap_err();

        assert!(matches!(err, TokenEndpointError::Malformed(_)));
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let url = serve(Router::new().route(
            "/token",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "too late"
            }),
        ))
        .await;

        let err = endpoint(url, Duration::from_millis(200))
            .exchange("c", "v", "r")
            .await
            .unwrap_err();

        match err {
            TokenEndpointError::Transport(e) => assert!(e.is_timeout()),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn token_pair_from_response_computes_expiry() {
        let now = Utc::now();
        let pair = TokenPair::from_token_response(
            TokenResponse {
                access_token: "a".to_string(),
                token_type: Some("bearer".to_string()),
                expires_in: Some(60),
                refresh_token: Some(String::new()),
                scope: None,
            },
            now,
        );

        assert_eq!(pair.expires_at, Some(now + chrono::Duration::seconds(60)));
        assert_eq!(pair.refresh_token, None);
        assert!(!pair.is_expired(now));
        assert!(pair.is_expired(now + chrono::Duration::seconds(61)));
    }

    #[test]
    fn debug_output_hides_tokens() {
        let pair = TokenPair {
            access_token: "secret-access".to_string(),
            refresh_token: Some("secret-refresh".to_string()),
            token_type: None,
            scope: None,
            expires_at: None,
        };
        let debug = format!("{:?}", pair);
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
    }
}
