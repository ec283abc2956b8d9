use serde::Serialize;

use super::{pkce::CHALLENGE_METHOD, utils::append_query};

#[derive(Serialize)]
struct AuthUrlParams<'a> {
    response_type: &'static str,
    client_id: &'a str,
    redirect_uri: &'a str,
    scope: &'a str,
    state: &'a str,
    code_challenge: &'a str,
    code_challenge_method: &'static str,
    /// Offline access hint so the provider issues a refresh token
    access_type: &'static str,
}

/// Everything the provider needs to render its consent screen
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationRequest<'a> {
    pub authorize_url: &'a str,
    pub client_id: &'a str,
    pub redirect_url: &'a str,
    pub scopes: &'a [String],
    pub state: &'a str,
    pub challenge: &'a str,
}

impl AuthorizationRequest<'_> {
    /// Build the provider authorization URL. No network I/O happens here.
    pub fn build_url(&self) -> Result<String, serde_urlencoded::ser::Error> {
        let scope = self.scopes.join(" ");
        let params = AuthUrlParams {
            response_type: "code",
            client_id: self.client_id,
            redirect_uri: self.redirect_url,
            scope: &scope,
            state: self.state,
            code_challenge: self.challenge,
            code_challenge_method: CHALLENGE_METHOD,
            access_type: "offline",
        };

        let query = serde_urlencoded::to_string(&params)?;
        Ok(append_query(self.authorize_url, &query))
    }
}
