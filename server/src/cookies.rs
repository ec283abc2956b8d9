use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse as _, Response},
};
use tower_cookies::{cookie::SameSite, Key};
use tracing::error;

pub use tower_cookies::Cookie;

use crate::{oauth::SessionId, state::AppState};

/// Cookie holding the opaque session id, never the tokens themselves
pub const SESSION_COOKIE_NAME: &str = "session";

pub struct CookieJar {
    cookies: tower_cookies::Cookies,
    key: Key,
    max_age: time::Duration,
}

#[async_trait::async_trait]
impl FromRequestParts<AppState> for CookieJar {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let cookies = match tower_cookies::Cookies::from_request_parts(parts, state).await {
            Ok(cookies) => cookies,
            Err(_) => {
                error!("Failed to extract cookies from request");
                return Err(StatusCode::INTERNAL_SERVER_ERROR.into_response());
            }
        };

        let max_age = time::Duration::try_from(state.config.session_ttl)
            .unwrap_or(time::Duration::hours(10));

        Ok(CookieJar {
            cookies,
            key: state.cookie_key.clone(),
            max_age,
        })
    }
}

impl CookieJar {
    /// Add a new private cookie
    pub fn add(&self, cookie: Cookie<'static>) {
        let private = self.cookies.private(&self.key);
        private.add(cookie);
    }

    /// Get a private cookie by name
    pub fn get(&self, name: &str) -> Option<Cookie<'static>> {
        let private = self.cookies.private(&self.key);
        private.get(name)
    }

    /// Removes the `cookie` from the jar.
    pub fn remove(&self, cookie: Cookie<'static>) {
        let private = self.cookies.private(&self.key);
        private.remove(cookie);
    }

    /// The session id from the cookie, if present and untampered
    pub fn session_id(&self) -> Option<SessionId> {
        self.get(SESSION_COOKIE_NAME)?.value().parse().ok()
    }

    pub fn set_session_id(&self, id: SessionId) {
        self.add(session_cookie(id, self.max_age));
    }

    pub fn clear_session(&self) {
        self.remove(
            Cookie::build((SESSION_COOKIE_NAME, ""))
                .path("/")
                .build(),
        );
    }
}

/// The session cookie: HTTP-only, secure, site-wide.
///
/// `SameSite=Lax` so the browser still sends it on the top-level redirect
/// back from the provider.
pub fn session_cookie(id: SessionId, max_age: time::Duration) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, id.to_string()))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .max_age(max_age)
        .build()
}
