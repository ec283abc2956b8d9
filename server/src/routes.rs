use axum::{
    extract::{Form, Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json,
};
use serde::Deserialize;
use tower_cookies::CookieManagerLayer;
use tracing::info;

use crate::{
    components::{
        layout::{Card, Page},
        tweet::TweetForm,
    },
    cookies::CookieJar,
    errors::ServerResult,
    flow::CallbackParams,
    state::AppState,
};

/// Build the application router with all routes
pub fn routes(app_state: AppState) -> axum::Router {
    axum::Router::new()
        // PKCE login flow
        .route("/", get(begin))
        .route("/oauth2/callback", get(callback))
        .route("/refresh", get(refresh))
        .route("/logout", get(logout))
        // Authenticated pages
        .route("/tweet", get(tweet_view))
        .route("/createtweet", post(create_tweet))
        .layer(CookieManagerLayer::new())
        // Add trace layer for debugging
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Start the PKCE flow and send the browser to the provider
async fn begin(State(state): State<AppState>, cookies: CookieJar) -> ServerResult<Response> {
    let outcome = state.flow.begin(cookies.session_id()).await?;

    // The cookie is only written once the session record exists
    cookies.set_session_id(outcome.session_id);

    Ok(Redirect::to(&outcome.authorize_url).into_response())
}

/// Provider redirect target: check state, exchange the code, store the tokens
async fn callback(
    State(state): State<AppState>,
    cookies: CookieJar,
    Query(params): Query<CallbackParams>,
) -> ServerResult<Response> {
    let session_id = state.flow.callback(cookies.session_id(), params).await?;
    cookies.set_session_id(session_id);

    info!(%session_id, "Login complete");
    Ok(Redirect::to("/tweet").into_response())
}

async fn refresh(State(state): State<AppState>, cookies: CookieJar) -> ServerResult<Response> {
    state.flow.refresh(cookies.session_id()).await?;
    Ok(Redirect::to("/tweet").into_response())
}

async fn logout(State(state): State<AppState>, cookies: CookieJar) -> ServerResult<Response> {
    state.flow.logout(cookies.session_id()).await?;
    cookies.clear_session();
    Ok(Redirect::to("/tweet").into_response())
}

async fn tweet_view(State(state): State<AppState>, cookies: CookieJar) -> ServerResult<Page> {
    let status = state.flow.status(cookies.session_id()).await?;

    Ok(Page {
        title: "Tweet".to_string(),
        content: Box::new(Card::new(TweetForm {
            authenticated: status.authenticated,
            token_expired: status.token_expired,
        })),
    })
}

#[derive(Debug, Deserialize)]
pub struct CreateTweetForm {
    pub text: String,
}

async fn create_tweet(
    State(state): State<AppState>,
    cookies: CookieJar,
    Form(form): Form<CreateTweetForm>,
) -> ServerResult<Response> {
    let response = state
        .flow
        .post_content(cookies.session_id(), &form.text)
        .await?;

    Ok(Json(response).into_response())
}
