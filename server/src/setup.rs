use std::net::SocketAddr;

use color_eyre::eyre::WrapErr;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter};
use tracing_tree::HierarchicalLayer;

pub const DEFAULT_PORT: u16 = 18199;

/// Install sentry when `SENTRY_DSN` is set. Keep the guard alive for the
/// lifetime of the process.
pub fn setup_sentry() -> Option<sentry::ClientInitGuard> {
    let dsn = std::env::var("SENTRY_DSN").ok()?;

    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

pub fn setup_tracing(crate_name: &str) -> color_eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("info,{}=debug,tower_http=debug", crate_name)))
        .wrap_err("Failed to build tracing filter")?;

    let tree = HierarchicalLayer::new(2)
        .with_targets(true)
        .with_bracketed_fields(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(tree)
        .try_init()
        .wrap_err("Failed to install tracing subscriber")?;

    Ok(())
}

/// Serve the router on `PORT` (default 18199) until the process exits
pub async fn run_server(app: axum::Router) -> color_eyre::Result<()> {
    let port = match std::env::var("PORT") {
        Ok(port) => port.parse::<u16>().wrap_err("PORT must be a valid port number")?,
        Err(_) => DEFAULT_PORT,
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await.wrap_err("Server error")?;

    Ok(())
}
