use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("state storage unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

/// Small string key/value persistence used for restorable screen state and the session.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>, StateStoreError>;
    async fn save(&self, key: &str, value: &str) -> Result<(), StateStoreError>;
    async fn remove(&self, key: &str) -> Result<(), StateStoreError>;

    /// Missing keys read as the empty string.
    async fn load_or_empty(&self, key: &str) -> Result<String, StateStoreError> {
        Ok(self.load(key).await?.unwrap_or_default())
    }
}

/// Rows of the `state` table that share one namespace.
#[derive(Clone)]
pub struct ScopedStateStore {
    pool: Pool<Sqlite>,
    namespace: String,
}

impl ScopedStateStore {
    pub(crate) fn new(pool: Pool<Sqlite>, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl KeyValueStore for ScopedStateStore {
    async fn load(&self, key: &str) -> Result<Option<String>, StateStoreError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM state WHERE namespace = ? AND key = ?")
                .bind(&self.namespace)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), StateStoreError> {
        sqlx::query(
            "INSERT INTO state (namespace, key, value) VALUES (?, ?, ?)
             ON CONFLICT(namespace, key) DO UPDATE SET
                value = excluded.value,
                updated_at = CURRENT_TIMESTAMP",
        )
        .bind(&self.namespace)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StateStoreError> {
        sqlx::query("DELETE FROM state WHERE namespace = ? AND key = ?")
            .bind(&self.namespace)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Process-local store for tests and sessions that should not outlive the process.
#[derive(Default)]
pub struct MemoryStateStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: Mutex::new(
                values
                    .into_iter()
                    .map(|(key, value)| (key.into(), value.into()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStateStore {
    async fn load(&self, key: &str) -> Result<Option<String>, StateStoreError> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), StateStoreError> {
        self.values
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StateStoreError> {
        self.values.lock().await.remove(key);
        Ok(())
    }
}
