use std::time::Duration;

use fixtures::{
    provider::{self, ProviderState, RefreshMode, DEFAULT_CLIENT_ID, DEFAULT_CLIENT_SECRET},
    spawn_server,
};
use reqwest::{header, StatusCode};
use tweet_pkce::{oauth::ClientCredentials, routes::routes, AppState, OAuthConfig};

struct TestApp {
    base: String,
    provider: ProviderState,
    client: reqwest::Client,
}

fn config(provider_base: &str, app_base: &str) -> OAuthConfig {
    OAuthConfig {
        credentials: ClientCredentials {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            client_secret: DEFAULT_CLIENT_SECRET.to_string(),
        },
        authorize_url: format!("{provider_base}/i/oauth2/authorize"),
        token_url: format!("{provider_base}/2/oauth2/token"),
        redirect_url: format!("{app_base}/oauth2/callback"),
        scopes: ["tweet.read", "tweet.write", "users.read", "offline.access"]
            .into_iter()
            .map(str::to_string)
            .collect(),
        api_base_url: provider_base.to_string(),
        login_ttl: Duration::from_secs(300),
        session_ttl: Duration::from_secs(36_000),
        request_timeout: Duration::from_secs(5),
    }
}

async fn start(mode: RefreshMode) -> TestApp {
    let provider = ProviderState::new(DEFAULT_CLIENT_ID, DEFAULT_CLIENT_SECRET, mode);
    let provider_base = spawn_server(provider::router(provider.clone()))
        .await
        .unwrap();

    // The redirect URL has to name the app's own port, so bind before building state
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let state = AppState::new(
        config(&provider_base, &base),
        tower_cookies::Key::generate(),
    )
    .unwrap();
    tokio::spawn(async move {
        axum::serve(listener, routes(state)).await.unwrap();
    });

    TestApp {
        base,
        provider,
        client: reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap(),
    }
}

fn location(response: &reqwest::Response) -> String {
    response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string()
}

/// The `name=value` pair of the session cookie, ready for a `Cookie` header
fn session_cookie(response: &reqwest::Response) -> String {
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.starts_with("session="));
    set_cookie.split(';').next().unwrap().to_string()
}

impl TestApp {
    async fn get(&self, path: &str, cookie: Option<&str>) -> reqwest::Response {
        let url = if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base, path)
        };
        let mut request = self.client.get(url);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        request.send().await.unwrap()
    }

    async fn post_tweet(&self, text: &str, cookie: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/createtweet", self.base))
            .header(header::COOKIE, cookie)
            .form(&[("text", text)])
            .send()
            .await
            .unwrap()
    }

    /// Begin a login and follow the provider's redirect, returning the
    /// session cookie and the callback URL the browser would visit
    async fn authorize(&self) -> (String, String) {
        let begin = self.get("/", None).await;
        assert_eq!(begin.status(), StatusCode::SEE_OTHER);
        let cookie = session_cookie(&begin);

        let provider = self.get(&location(&begin), None).await;
        assert_eq!(provider.status(), StatusCode::FOUND);

        (cookie, location(&provider))
    }

    async fn login(&self) -> String {
        let (cookie, callback) = self.authorize().await;
        let response = self.get(&callback, Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/tweet");
        cookie
    }
}

#[tokio::test]
async fn begin_sets_session_cookie_and_redirects_to_provider() {
    let app = start(RefreshMode::Rotate).await;

    let response = app.get("/", None).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).contains("/i/oauth2/authorize?response_type=code"));
    assert!(location(&response).contains("code_challenge_method=S256"));

    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("Secure"));
    assert!(set_cookie.contains("SameSite=Lax"));
    assert!(set_cookie.contains("Path=/"));
    assert!(set_cookie.contains("Max-Age=36000"));
}

#[tokio::test]
async fn full_flow_posts_refreshes_and_logs_out() {
    let app = start(RefreshMode::Rotate).await;
    let cookie = app.login().await;

    let page = app.get("/tweet", Some(&cookie)).await;
    assert_eq!(page.status(), StatusCode::OK);
    assert!(page.text().await.unwrap().contains("/createtweet"));

    let posted = app.post_tweet("hello from the test", &cookie).await;
    assert_eq!(posted.status(), StatusCode::OK);
    let json: serde_json::Value = posted.json().await.unwrap();
    assert_eq!(json["data"]["text"], "hello from the test");

    let refreshed = app.get("/refresh", Some(&cookie)).await;
    assert_eq!(refreshed.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&refreshed), "/tweet");

    // Same session, new access token
    let posted = app.post_tweet("after refresh", &cookie).await;
    assert_eq!(posted.status(), StatusCode::OK);
    let tweets = app.provider.posted_tweets();
    assert_eq!(tweets.len(), 2);
    assert_ne!(tweets[0].access_token, tweets[1].access_token);

    let logout = app.get("/logout", Some(&cookie)).await;
    assert_eq!(logout.status(), StatusCode::SEE_OTHER);

    let after_logout = app.post_tweet("should not post", &cookie).await;
    assert_eq!(after_logout.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&after_logout), "/");
    assert_eq!(app.provider.posted_tweets().len(), 2);
}

#[tokio::test]
async fn refresh_works_when_provider_reuses_refresh_token() {
    let app = start(RefreshMode::Reuse).await;
    let cookie = app.login().await;

    for _ in 0..2 {
        let refreshed = app.get("/refresh", Some(&cookie)).await;
        assert_eq!(refreshed.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&refreshed), "/tweet");
    }

    let posted = app.post_tweet("still signed in", &cookie).await;
    assert_eq!(posted.status(), StatusCode::OK);
}

#[tokio::test]
async fn callback_without_cookie_is_forbidden() {
    let app = start(RefreshMode::Rotate).await;
    let (_, callback) = app.authorize().await;

    let response = app.get(&callback, None).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.provider.outstanding_codes(), 1);
}

#[tokio::test]
async fn callback_with_tampered_state_is_forbidden() {
    let app = start(RefreshMode::Rotate).await;
    let (cookie, callback) = app.authorize().await;

    let mut url = url::Url::parse(&callback).unwrap();
    let code = url
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    url.query_pairs_mut()
        .clear()
        .append_pair("code", &code)
        .append_pair("state", "attacker-state");

    let response = app.get(url.as_str(), Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.provider.outstanding_codes(), 1);
}

#[tokio::test]
async fn replayed_callback_is_forbidden() {
    let app = start(RefreshMode::Rotate).await;
    let (cookie, callback) = app.authorize().await;

    let first = app.get(&callback, Some(&cookie)).await;
    assert_eq!(first.status(), StatusCode::SEE_OTHER);

    let replay = app.get(&callback, Some(&cookie)).await;
    assert_eq!(replay.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn signed_out_pages_point_back_to_login() {
    let app = start(RefreshMode::Rotate).await;

    let page = app.get("/tweet", None).await;
    assert_eq!(page.status(), StatusCode::OK);
    assert!(page.text().await.unwrap().contains("Sign in"));

    let refresh = app.get("/refresh", None).await;
    assert_eq!(refresh.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&refresh), "/");
}
