use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use color_eyre::eyre::{eyre, WrapErr};
use tower_cookies::Key;
use tracing::{info, warn};

use crate::{
    api::TwitterClient,
    flow::FlowOrchestrator,
    oauth::{ClientCredentials, HttpTokenEndpoint, MemorySessionStore},
};

pub const DEFAULT_AUTHORIZE_URL: &str = "https://twitter.com/i/oauth2/authorize";
pub const DEFAULT_TOKEN_URL: &str = "https://api.twitter.com/2/oauth2/token";
pub const DEFAULT_REDIRECT_URL: &str = "http://localhost:18199/oauth2/callback";
pub const DEFAULT_API_BASE_URL: &str = "https://api.twitter.com";
pub const DEFAULT_SCOPES: &str = "tweet.read tweet.write users.read offline.access";

/// How long a generated state/verifier pair stays redeemable
pub const DEFAULT_LOGIN_TTL_SECS: u64 = 5 * 60;
/// How long an authenticated session lives, also used as the cookie max-age
pub const DEFAULT_SESSION_TTL_SECS: u64 = 10 * 60 * 60;
pub const DEFAULT_TOKEN_REQUEST_TIMEOUT_SECS: u64 = 15;
/// Upper bound for every configured duration
pub const MAX_DURATION_SECS: u64 = 366 * 24 * 60 * 60;

/// Provider application settings, fixed at startup
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub credentials: ClientCredentials,
    pub authorize_url: String,
    pub token_url: String,
    /// Must match the redirect URL registered with the provider exactly
    pub redirect_url: String,
    pub scopes: Vec<String>,
    pub api_base_url: String,
    pub login_ttl: Duration,
    pub session_ttl: Duration,
    pub request_timeout: Duration,
}

impl OAuthConfig {
    pub fn from_env() -> color_eyre::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from any variable source, e.g. a map in tests
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> color_eyre::Result<Self> {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| eyre!("{} environment variable not set", name))
        };
        let or_default =
            |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());
        let secs = |name: &str, default: u64| -> color_eyre::Result<Duration> {
            let value = match lookup(name) {
                Some(raw) => raw
                    .parse::<u64>()
                    .wrap_err_with(|| format!("{} must be a whole number of seconds", name))?,
                None => default,
            };
            check_duration(name, Duration::from_secs(value))?;
            Ok(Duration::from_secs(value))
        };

        let config = Self {
            credentials: ClientCredentials {
                client_id: required("CLIENT_ID")?,
                client_secret: required("CLIENT_SECRET")?,
            },
            authorize_url: or_default("OAUTH_AUTHORIZE_URL", DEFAULT_AUTHORIZE_URL),
            token_url: or_default("OAUTH_TOKEN_URL", DEFAULT_TOKEN_URL),
            redirect_url: or_default("OAUTH_REDIRECT_URL", DEFAULT_REDIRECT_URL),
            scopes: or_default("OAUTH_SCOPES", DEFAULT_SCOPES)
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            api_base_url: or_default("API_BASE_URL", DEFAULT_API_BASE_URL),
            login_ttl: secs("LOGIN_TTL_SECS", DEFAULT_LOGIN_TTL_SECS)?,
            session_ttl: secs("SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?,
            request_timeout: secs(
                "TOKEN_REQUEST_TIMEOUT_SECS",
                DEFAULT_TOKEN_REQUEST_TIMEOUT_SECS,
            )?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Check that every endpoint parses as a URL and that scopes were given
    pub fn validate(&self) -> color_eyre::Result<()> {
        for (name, value) in [
            ("OAUTH_AUTHORIZE_URL", &self.authorize_url),
            ("OAUTH_TOKEN_URL", &self.token_url),
            ("OAUTH_REDIRECT_URL", &self.redirect_url),
            ("API_BASE_URL", &self.api_base_url),
        ] {
            url::Url::parse(value).wrap_err_with(|| format!("{} is not a valid URL", name))?;
        }

        check_duration("LOGIN_TTL_SECS", self.login_ttl)?;
        check_duration("SESSION_TTL_SECS", self.session_ttl)?;
        check_duration("TOKEN_REQUEST_TIMEOUT_SECS", self.request_timeout)?;

        if self.scopes.is_empty() {
            return Err(eyre!("OAUTH_SCOPES must name at least one scope"));
        }

        if !self.scopes.iter().any(|s| s == "offline.access") {
            warn!("OAUTH_SCOPES does not include offline.access, the provider will not issue refresh tokens");
        }

        Ok(())
    }

    /// When a state/verifier pair generated at `now` stops being redeemable
    pub fn login_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        saturating_add(now, self.login_ttl)
    }

    /// When a session authenticated or refreshed at `now` expires
    pub fn session_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        saturating_add(now, self.session_ttl)
    }
}

fn check_duration(name: &str, value: Duration) -> color_eyre::Result<()> {
    if value.is_zero() {
        return Err(eyre!("{} must be greater than zero", name));
    }
    if value.as_secs() > MAX_DURATION_SECS {
        return Err(eyre!(
            "{} must be at most {} seconds",
            name,
            MAX_DURATION_SECS
        ));
    }
    Ok(())
}

fn saturating_add(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<OAuthConfig>,
    pub flow: Arc<FlowOrchestrator>,
    pub sessions: MemorySessionStore,
    pub cookie_key: Key,
}

impl AppState {
    pub fn from_env() -> color_eyre::Result<Self> {
        let config = OAuthConfig::from_env()?;
        let cookie_key = cookie_key_from_env_or_generate()?;

        info!(
            authorize_url = %config.authorize_url,
            token_url = %config.token_url,
            redirect_url = %config.redirect_url,
            "Loaded OAuth configuration"
        );

        Self::new(config, cookie_key)
    }

    /// Wire the production collaborators around an already loaded config
    pub fn new(config: OAuthConfig, cookie_key: Key) -> color_eyre::Result<Self> {
        let config = Arc::new(config);
        let sessions = MemorySessionStore::new();

        let token_endpoint = HttpTokenEndpoint::new(
            config.token_url.clone(),
            config.credentials.clone(),
            config.request_timeout,
        )
        .wrap_err("Failed to build token endpoint client")?;

        let poster = TwitterClient::new(config.api_base_url.clone(), config.request_timeout)
            .wrap_err("Failed to build content API client")?;

        let flow = FlowOrchestrator::new(
            config.clone(),
            Arc::new(sessions.clone()),
            Arc::new(token_endpoint),
            Arc::new(poster),
        );

        Ok(Self {
            config,
            flow: Arc::new(flow),
            sessions,
            cookie_key,
        })
    }
}

/// Read the private-cookie key from `COOKIE_KEY` (base64), or generate one.
///
/// A generated key lives only as long as the process, so every session is
/// lost on restart.
pub fn cookie_key_from_env_or_generate() -> color_eyre::Result<Key> {
    match std::env::var("COOKIE_KEY") {
        Ok(encoded) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .wrap_err("COOKIE_KEY is not valid base64")?;
            Key::try_from(bytes.as_slice())
                .map_err(|e| eyre!("COOKIE_KEY must decode to at least 64 bytes: {}", e))
        }
        Err(_) => {
            warn!("COOKIE_KEY not set, generating an ephemeral key");
            Ok(Key::generate())
        }
    }
}
