//! PKCE (RFC 7636) helpers: secure random tokens and S256 code challenges.
//!
//! Only the `S256` method is supported. A `plain` challenge would hand the
//! verifier to anyone who sees the authorization redirect.

use rand::{rngs::OsRng, RngCore as _};
use sha2::{Digest, Sha256};

use super::utils::base64_url_encode;

/// Bytes of entropy behind the CSRF `state` value (48 hex characters)
pub const STATE_BYTES: usize = 24;

/// Bytes of entropy behind the code verifier (64 hex characters, inside the 43..=128 bound)
pub const VERIFIER_BYTES: usize = 32;

/// The only challenge method sent to the provider
pub const CHALLENGE_METHOD: &str = "S256";

/// The entropy source could not supply the requested bytes
#[derive(Debug, thiserror::Error)]
#[error("could not generate {requested} random bytes: {source}")]
pub struct EntropyUnavailable {
    pub requested: usize,
    #[source]
    pub source: rand::Error,
}

/// A cryptographically secure source of random bytes
pub trait EntropySource: Send + Sync {
    fn fill(&self, dest: &mut [u8]) -> Result<(), rand::Error>;
}

/// Reads straight from the operating system's CSPRNG
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<(), rand::Error> {
        OsRng.try_fill_bytes(dest)
    }
}

/// Generate `byte_count` random bytes and return them hex encoded.
///
/// Failures of the entropy source are returned as-is, there is no fallback
/// to a weaker generator.
pub fn random_hex(
    entropy: &dyn EntropySource,
    byte_count: usize,
) -> Result<String, EntropyUnavailable> {
    let mut buf = vec![0u8; byte_count];
    entropy
        .fill(&mut buf)
        .map_err(|source| EntropyUnavailable {
            requested: byte_count,
            source,
        })?;

    Ok(hex::encode(buf))
}

/// Derive the S256 code challenge: `BASE64URL-NOPAD(SHA256(verifier))`
pub fn code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    base64_url_encode(&hasher.finalize())
}

/// A freshly generated state/verifier pair for one authorization attempt.
///
/// The challenge is not stored; it is recomputed from the verifier when the
/// authorization URL is built.
#[derive(Clone, PartialEq, Eq)]
pub struct PkcePair {
    pub state: String,
    pub verifier: String,
}

impl PkcePair {
    pub fn generate(entropy: &dyn EntropySource) -> Result<Self, EntropyUnavailable> {
        let state = random_hex(entropy, STATE_BYTES)?;
        let verifier = random_hex(entropy, VERIFIER_BYTES)?;

        Ok(Self { state, verifier })
    }

    pub fn challenge(&self) -> String {
        code_challenge(&self.verifier)
    }
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("state", &"[redacted]")
            .field("verifier", &"[redacted]")
            .finish()
    }
}
