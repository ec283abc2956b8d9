//! OAuth module for the PKCE authorization code flow
//! This includes state/verifier generation, the authorization URL, token
//! endpoint calls and the session records that tie them together

pub mod authorize;
pub mod pkce;
pub mod session;
pub mod token;
pub mod utils;

pub use authorize::AuthorizationRequest;
pub use pkce::{code_challenge, random_hex, EntropySource, EntropyUnavailable, OsEntropy, PkcePair};
pub use session::{MemorySessionStore, SessionId, SessionRecord, SessionStore, SessionStoreError};
pub use token::{
    ClientCredentials, HttpTokenEndpoint, ProviderErrorBody, TokenEndpoint, TokenEndpointError,
    TokenPair,
};
