use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::oauth::{pkce::PkcePair, token::TokenPair};

/// Opaque identifier carried in the session cookie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Everything the server remembers about one browser session
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    /// CSRF token of the in-flight authorization, cleared once consumed
    pub state: Option<String>,
    /// PKCE verifier of the in-flight authorization, cleared with `state`
    pub verifier: Option<String>,
    /// When the in-flight state/verifier stop being redeemable, independent
    /// of how long the record itself lives
    pub pending_expires_at: Option<DateTime<Utc>>,
    pub tokens: Option<TokenPair>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// Replace any unconsumed authorization attempt with a new one
    pub fn begin_authorization(&mut self, pair: PkcePair, expires_at: DateTime<Utc>) {
        self.state = Some(pair.state);
        self.verifier = Some(pair.verifier);
        self.pending_expires_at = Some(expires_at);
    }

    /// Drop the state/verifier so the same callback can never be exchanged twice
    pub fn consume_authorization(&mut self) {
        self.state = None;
        self.verifier = None;
        self.pending_expires_at = None;
    }

    /// A pending pair with no recorded expiry is treated as expired
    pub fn is_pending_expired(&self, now: DateTime<Utc>) -> bool {
        self.pending_expires_at.map_or(true, |at| at <= now)
    }

    /// The stored access token, if it is usable as a bearer credential
    pub fn access_token(&self) -> Option<&str> {
        self.tokens
            .as_ref()
            .map(|t| t.access_token.as_str())
            .filter(|t| !t.is_empty())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.tokens
            .as_ref()
            .and_then(|t| t.refresh_token.as_deref())
            .filter(|t| !t.is_empty())
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    /// Whether the stored access token is past the expiry the provider advertised
    pub fn is_access_token_expired(&self, now: DateTime<Utc>) -> bool {
        self.tokens.as_ref().is_some_and(|t| t.is_expired(now))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("state", &self.state.as_ref().map(|_| "[redacted]"))
            .field("verifier", &self.verifier.as_ref().map(|_| "[redacted]"))
            .field("pending_expires_at", &self.pending_expires_at)
            .field("tokens", &self.tokens)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("session store failure: {0}")]
pub struct SessionStoreError(pub String);

/// Keyed persistence for session records.
///
/// Implementations must give read-after-write consistency per session id.
/// Concurrent writes to the same id may resolve last-write-wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a live record. Expired records are reported as missing.
    async fn load(&self, id: &SessionId) -> Result<Option<SessionRecord>, SessionStoreError>;

    async fn save(&self, id: &SessionId, record: &SessionRecord) -> Result<(), SessionStoreError>;

    async fn delete(&self, id: &SessionId) -> Result<(), SessionStoreError>;
}

/// Process-local session store
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    records: Arc<RwLock<HashMap<SessionId, SessionRecord>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every record whose expiry has passed, returning how many were dropped
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        before - records.len()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &SessionId) -> Result<Option<SessionRecord>, SessionStoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(id)
            .filter(|record| !record.is_expired(Utc::now()))
            .cloned())
    }

    async fn save(&self, id: &SessionId, record: &SessionRecord) -> Result<(), SessionStoreError> {
        self.records.write().await.insert(*id, record.clone());
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), SessionStoreError> {
        self.records.write().await.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_expiring_at(expires_at: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            state: Some("state".to_string()),
            verifier: Some("verifier".to_string()),
            pending_expires_at: Some(expires_at),
            tokens: None,
            expires_at: Some(expires_at),
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = MemorySessionStore::new();
        let id = SessionId::new();
        let record = record_expiring_at(Utc::now() + chrono::Duration::minutes(5));

        store.save(&id, &record).await.unwrap();

        assert_eq!(store.load(&id).await.unwrap(), Some(record));
        assert_eq!(store.load(&SessionId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_records_are_invisible_and_purged() {
        let store = MemorySessionStore::new();
        let live = SessionId::new();
        let dead = SessionId::new();

        store
            .save(&live, &record_expiring_at(Utc::now() + chrono::Duration::minutes(5)))
            .await
            .unwrap();
        store
            .save(&dead, &record_expiring_at(Utc::now() - chrono::Duration::seconds(1)))
            .await
            .unwrap();

        assert!(store.load(&dead).await.unwrap().is_none());
        assert_eq!(store.len().await, 2);

        assert_eq!(store.purge_expired(Utc::now()).await, 1);
        assert_eq!(store.len().await, 1);
        assert!(store.load(&live).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let store = MemorySessionStore::new();
        let id = SessionId::new();
        store.save(&id, &SessionRecord::default()).await.unwrap();

        store.delete(&id).await.unwrap();

        assert!(store.is_empty().await);
    }

    #[test]
    fn consuming_authorization_clears_state_and_verifier() {
        let now = Utc::now();
        let mut record = SessionRecord::default();
        record.begin_authorization(
            PkcePair {
                state: "s".to_string(),
                verifier: "v".to_string(),
            },
            now + chrono::Duration::minutes(5),
        );
        assert_eq!(record.state.as_deref(), Some("s"));
        assert!(!record.is_pending_expired(now));
        assert!(record.is_pending_expired(now + chrono::Duration::minutes(5)));

        record.consume_authorization();

        assert!(record.state.is_none());
        assert!(record.verifier.is_none());
        assert!(record.pending_expires_at.is_none());
    }

    #[test]
    fn access_token_expiry_follows_the_token_pair() {
        let now = Utc::now();
        let mut record = SessionRecord::default();
        assert!(!record.is_access_token_expired(now));

        record.tokens = Some(TokenPair {
            access_token: "access".to_string(),
            refresh_token: None,
            token_type: None,
            scope: None,
            expires_at: Some(now - chrono::Duration::seconds(1)),
        });
        assert!(record.is_access_token_expired(now));

        record.tokens.as_mut().unwrap().expires_at = None;
        assert!(!record.is_access_token_expired(now));
    }

    #[test]
    fn empty_access_token_is_not_authenticated() {
        let record = SessionRecord {
            tokens: Some(TokenPair {
                access_token: String::new(),
                refresh_token: Some(String::new()),
                token_type: None,
                scope: None,
                expires_at: None,
            }),
            ..Default::default()
        };

        assert!(!record.is_authenticated());
        assert!(record.refresh_token().is_none());
    }

    #[test]
    fn session_id_parses_from_its_display_form() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }
}
