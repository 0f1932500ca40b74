//! HTTP client for the notes backend: sign-in and note synchronization.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, Response};
use shared::{
    domain::Note,
    error::ApiError,
    protocol::{RemoteNote, SignInRequest, SignInResponse},
};
use storage::{CacheError, KeyValueStore, NoteCache, StateStoreError};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::capabilities::{
    AuthEvent, Authenticator, NoteSynchronizer, SessionIdentityProvider, SESSION_ID_KEY,
};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid server url '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("request to notes backend failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("notes backend rejected the request with status {status}")]
    Rejected { status: u16, message: Option<String> },
    #[error("no signed-in session")]
    NotSignedIn,
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    State(#[from] StateStoreError),
}

impl BackendError {
    /// Server-provided text worth showing to the user, if any.
    pub fn user_message(&self) -> Option<String> {
        match self {
            BackendError::Rejected { message, .. } => message.clone(),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct HttpNotesBackend {
    inner: Arc<HttpNotesBackendInner>,
}

struct HttpNotesBackendInner {
    http: Client,
    base_url: Url,
    session: Arc<dyn KeyValueStore>,
    cache: NoteCache,
}

impl HttpNotesBackend {
    pub fn new(
        server_url: &str,
        session: Arc<dyn KeyValueStore>,
        cache: NoteCache,
    ) -> Result<Self, BackendError> {
        let mut normalized = server_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base_url = Url::parse(&normalized).map_err(|source| BackendError::InvalidUrl {
            url: server_url.to_string(),
            source,
        })?;
        Ok(Self {
            inner: Arc::new(HttpNotesBackendInner {
                http: Client::new(),
                base_url,
                session,
                cache,
            }),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.inner
            .base_url
            .join(path)
            .map_err(|source| BackendError::InvalidUrl {
                url: format!("{}{path}", self.inner.base_url),
                source,
            })
    }

    /// Signs in and persists the returned session id.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<String, BackendError> {
        let response = self
            .inner
            .http
            .post(self.endpoint("sign-in")?)
            .json(&SignInRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        let body: SignInResponse = response.json().await?;
        self.inner
            .session
            .save(SESSION_ID_KEY, &body.session_id)
            .await?;
        info!("signed in");
        Ok(body.session_id)
    }

    /// Replaces the local cache with the backend's notes; returns how many were stored.
    pub async fn pull_notes(&self) -> Result<usize, BackendError> {
        let session_id = self.inner.session.load_or_empty(SESSION_ID_KEY).await?;
        if session_id.is_empty() {
            return Err(BackendError::NotSignedIn);
        }
        let response = self
            .inner
            .http
            .get(self.endpoint("notes")?)
            .bearer_auth(&session_id)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(rejection(response).await);
        }
        let remote: Vec<RemoteNote> = response.json().await?;
        let notes: Vec<Note> = remote.into_iter().map(Note::from).collect();
        self.inner.cache.replace_all(&notes).await?;
        info!(count = notes.len(), "synchronized notes");
        Ok(notes.len())
    }

    /// Forgets the session and the notes cached for it.
    pub async fn sign_out(&self) -> Result<(), BackendError> {
        self.inner.session.remove(SESSION_ID_KEY).await?;
        self.inner.cache.clear().await?;
        info!("signed out");
        Ok(())
    }
}

async fn rejection(response: Response) -> BackendError {
    let status = response.status().as_u16();
    let message = response
        .json::<ApiError>()
        .await
        .ok()
        .and_then(|error| error.user_message().map(str::to_owned));
    BackendError::Rejected { status, message }
}

impl Authenticator for HttpNotesBackend {
    fn authenticate(&self, email: &str, password: &str) -> BoxStream<'static, AuthEvent> {
        let backend = self.clone();
        let email = email.to_string();
        let password = password.to_string();
        let attempt = async move {
            match backend.sign_in(&email, &password).await {
                Ok(_) => AuthEvent::Success,
                Err(err) => {
                    warn!(error = %err, "sign-in attempt failed");
                    AuthEvent::Error(err.user_message())
                }
            }
        };
        stream::once(async { AuthEvent::Loading })
            .chain(stream::once(attempt))
            .boxed()
    }
}

#[async_trait]
impl NoteSynchronizer for HttpNotesBackend {
    async fn synchronize(&self) -> Result<()> {
        self.pull_notes().await?;
        Ok(())
    }
}

#[async_trait]
impl SessionIdentityProvider for HttpNotesBackend {
    async fn session_identity(&self) -> Result<String> {
        Ok(self.inner.session.load_or_empty(SESSION_ID_KEY).await?)
    }
}

#[cfg(test)]
#[path = "tests/remote_tests.rs"]
mod tests;
