use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};

use crate::{api::PostContentError, flow::FlowError};

#[derive(Debug)]
pub struct ServerError<R: IntoResponse>(pub(crate) color_eyre::Report, pub(crate) R);

pub type ServerResult<S, F = Response> = Result<S, ServerError<F>>;

/// `DEVELOPMENT_MODE=1` opts in to error reports in 500 pages. Off by default.
fn development_mode() -> bool {
    std::env::var("DEVELOPMENT_MODE")
        .map(|v| v == "1")
        .unwrap_or(false)
}

impl<R: IntoResponse> IntoResponse for ServerError<R> {
    fn into_response(self) -> axum::response::Response {
        self.render(development_mode())
    }
}

impl<R: IntoResponse> ServerError<R> {
    /// Outside development mode only the wrapped response is returned; the
    /// report goes to the log.
    fn render(self, is_dev_mode: bool) -> Response {
        tracing::error!(error = ?self.0, "Request Error");

        if is_dev_mode {
            // Check if the response would be a 500 error
            let temp_response = self.1.into_response();
            if temp_response.status() == StatusCode::INTERNAL_SERVER_ERROR {
                // Simple HTML escaping - replace dangerous characters
                let error_text = format!("{:?}", self.0)
                    .replace('&', "&amp;")
                    .replace('<', "&lt;")
                    .replace('>', "&gt;")
                    .replace('"', "&quot;")
                    .replace('\'', "&#39;");

                let error_html = format!(
                    r#"<!DOCTYPE html>
<html>
<head>
    <title>Development Error - 500</title>
    <style>
        body {{ font-family: monospace; margin: 20px; background: #1a1a1a; color: #fff; }}
        .error-container {{ background: #2d2d2d; padding: 20px; border-radius: 8px; }}
        .error-title {{ color: #ff6b6b; font-size: 24px; margin-bottom: 20px; }}
        .error-details {{ background: #000; padding: 15px; border-radius: 4px; overflow-x: auto; }}
        pre {{ margin: 0; white-space: pre-wrap; word-wrap: break-word; }}
    </style>
</head>
<body>
    <div class="error-container">
        <div class="error-title">Development Mode - Internal Server Error</div>
        <div class="error-details">
            <pre>{}</pre>
        </div>
    </div>
</body>
</html>"#,
                    error_text
                );

                return (StatusCode::INTERNAL_SERVER_ERROR, Html(error_html)).into_response();
            }
            return temp_response;
        }

        self.1.into_response()
    }
}

/// Only a bare status or redirect reaches the browser; the report with any
/// provider detail goes to the log.
impl From<FlowError> for ServerError<Response> {
    fn from(err: FlowError) -> Self {
        let response = match &err {
            FlowError::EntropyUnavailable(_)
            | FlowError::SessionStore(_)
            | FlowError::AuthorizationUrl(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            FlowError::SessionExpired
            | FlowError::StateMismatch
            | FlowError::MissingAuthorizationCode
            | FlowError::AuthorizationDenied { .. } => StatusCode::FORBIDDEN.into_response(),
            FlowError::TokenExchangeFailed(_) => StatusCode::BAD_GATEWAY.into_response(),
            FlowError::RefreshTokenInvalid(_) | FlowError::NotAuthenticated => {
                Redirect::to("/").into_response()
            }
            FlowError::PostContentFailed(inner) => post_failure_status(inner).into_response(),
        };

        ServerError(err.into(), response)
    }
}

fn post_failure_status(err: &PostContentError) -> StatusCode {
    match err {
        PostContentError::EmptyText => StatusCode::BAD_REQUEST,
        _ => err
            .provider_status()
            .and_then(|status| StatusCode::from_u16(status).ok())
            .filter(|status| status.is_client_error() || status.is_server_error())
            .unwrap_or(StatusCode::BAD_GATEWAY),
    }
}
