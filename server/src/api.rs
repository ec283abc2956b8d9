use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info};

/// Attaches an access token to outbound API requests as `Authorization: Bearer <token>`.
///
/// Callers reject missing or empty tokens before getting here; an empty token
/// still produces an (empty) bearer header.
#[derive(Clone, Copy)]
pub struct BearerAuthorizer<'a> {
    token: &'a str,
}

impl<'a> BearerAuthorizer<'a> {
    pub fn new(token: &'a str) -> Self {
        Self { token }
    }

    pub fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.bearer_auth(self.token)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PostContentError {
    #[error("refusing to post empty content")]
    EmptyText,

    #[error("content API request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("content API rejected the request with status {status}")]
    Rejected { status: u16, body: String },

    #[error("content API returned an unparsable body: {0}")]
    Malformed(String),
}

impl PostContentError {
    /// HTTP status the provider answered with, when it answered at all
    pub fn provider_status(&self) -> Option<u16> {
        match self {
            PostContentError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// The downstream social-media API, reduced to the one call this server makes
#[async_trait]
pub trait ContentPoster: Send + Sync {
    async fn post_content(
        &self,
        access_token: &str,
        text: &str,
    ) -> Result<serde_json::Value, PostContentError>;
}

#[derive(Serialize)]
struct CreateTweetRequest<'a> {
    text: &'a str,
}

/// Twitter API v2 client for `POST /2/tweets`
#[derive(Debug, Clone)]
pub struct TwitterClient {
    client: reqwest::Client,
    api_base_url: String,
}

impl TwitterClient {
    pub fn new(api_base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::ClientBuilder::new()
            .timeout(timeout)
            .use_rustls_tls()
            .build()?;

        Ok(Self {
            client,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn tweets_url(&self) -> String {
        format!("{}/2/tweets", self.api_base_url)
    }
}

#[async_trait]
impl ContentPoster for TwitterClient {
    async fn post_content(
        &self,
        access_token: &str,
        text: &str,
    ) -> Result<serde_json::Value, PostContentError> {
        if text.trim().is_empty() {
            return Err(PostContentError::EmptyText);
        }

        info!("Calling content API to create a tweet");

        let request = self
            .client
            .post(self.tweets_url())
            .json(&CreateTweetRequest { text });

        let response = BearerAuthorizer::new(access_token)
            .authorize(request)
            .send()
            .await
            .map_err(PostContentError::Transport)?;

        let status = response.status();
        let body = response.text().await.map_err(PostContentError::Transport)?;

        if !status.is_success() {
            error!(status = status.as_u16(), body = %body, "Content API rejected tweet");
            return Err(PostContentError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| PostContentError::Malformed(e.to_string()))
    }
}
