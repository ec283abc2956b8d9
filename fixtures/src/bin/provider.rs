use clap::Parser;
use fixtures::{
    provider::{self, ProviderState, RefreshMode, DEFAULT_CLIENT_ID, DEFAULT_CLIENT_SECRET},
    run_server, FixtureArgs,
};

/// Mock OAuth2 provider and tweet API fixture server
#[derive(Parser, Debug)]
#[clap(name = "provider-fixture")]
struct Cli {
    #[clap(flatten)]
    common: FixtureArgs,

    /// Client id the token endpoint accepts
    #[arg(long, env = "CLIENT_ID", default_value = DEFAULT_CLIENT_ID)]
    client_id: String,

    /// Client secret the token endpoint accepts
    #[arg(long, env = "CLIENT_SECRET", default_value = DEFAULT_CLIENT_SECRET)]
    client_secret: String,

    /// Issue a new refresh token on every refresh grant
    #[arg(long)]
    rotate_refresh_tokens: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let mode = if args.rotate_refresh_tokens {
        RefreshMode::Rotate
    } else {
        RefreshMode::Reuse
    };
    let state = ProviderState::new(args.client_id, args.client_secret, mode);

    run_server(args.common, provider::router(state)).await
}
