pub mod api;
pub mod components;
pub mod cookies;
pub mod cron;
pub mod errors;
pub mod flow;
pub mod oauth;
pub mod routes;
pub mod setup;
pub mod state;

pub use state::{AppState, OAuthConfig};
