//! Collaborator contracts the sign-in flow calls into.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use storage::KeyValueStore;

pub const SESSION_NAMESPACE: &str = "session";
pub const SESSION_ID_KEY: &str = "user_session_id";

/// Progress of one remote sign-in attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    Loading,
    Success,
    /// Rejected or failed; `None` when the backend gave no usable message.
    Error(Option<String>),
}

pub trait Authenticator: Send + Sync {
    /// Streams at most one `Loading` followed by exactly one terminal outcome.
    fn authenticate(&self, email: &str, password: &str) -> BoxStream<'static, AuthEvent>;
}

#[async_trait]
pub trait NoteSynchronizer: Send + Sync {
    /// Pulls remote notes and refills the local cache.
    async fn synchronize(&self) -> Result<()>;
}

#[async_trait]
pub trait SessionIdentityProvider: Send + Sync {
    /// The persisted session token, or an empty string when signed out.
    async fn session_identity(&self) -> Result<String>;
}

/// Session identity read from a keyed store, as written by a successful sign-in.
pub struct StoredSessionIdentity {
    store: Arc<dyn KeyValueStore>,
}

impl StoredSessionIdentity {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SessionIdentityProvider for StoredSessionIdentity {
    async fn session_identity(&self) -> Result<String> {
        Ok(self.store.load_or_empty(SESSION_ID_KEY).await?)
    }
}

pub struct MissingAuthenticator;

impl Authenticator for MissingAuthenticator {
    fn authenticate(&self, _email: &str, _password: &str) -> BoxStream<'static, AuthEvent> {
        stream::iter([AuthEvent::Error(Some(
            "sign-in backend is unavailable".to_string(),
        ))])
        .boxed()
    }
}

pub struct MissingNoteSynchronizer;

#[async_trait]
impl NoteSynchronizer for MissingNoteSynchronizer {
    async fn synchronize(&self) -> Result<()> {
        Err(anyhow!("note synchronization backend is unavailable"))
    }
}

/// Always reports a signed-out user.
pub struct SignedOut;

#[async_trait]
impl SessionIdentityProvider for SignedOut {
    async fn session_identity(&self) -> Result<String> {
        Ok(String::new())
    }
}
