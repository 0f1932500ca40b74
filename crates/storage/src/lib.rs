use anyhow::{Context, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::info;

mod note_cache;
mod state_store;

pub use note_cache::{CacheError, NoteCache};
pub use state_store::{KeyValueStore, MemoryStateStore, ScopedStateStore, StateStoreError};

const FILE_POOL_CONNECTIONS: u32 = 5;

/// Owner of the sqlite pool backing the note cache and persisted client state.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
    notes: NoteCache,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database url '{database_url}'"))?
            .create_if_missing(true);
        let mut pool_options = SqlitePoolOptions::new().max_connections(FILE_POOL_CONNECTIONS);
        if is_in_memory(database_url) {
            // An in-memory database lives only as long as its single connection.
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open sqlite database '{database_url}'"))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run storage migrations")?;
        info!(database_url, "storage ready");

        let notes = NoteCache::new(pool.clone());
        Ok(Self { pool, notes })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Handle to the reactive note cache; all handles share one revision counter.
    pub fn note_cache(&self) -> NoteCache {
        self.notes.clone()
    }

    /// Key/value rows isolated under `namespace`.
    pub fn state_store(&self, namespace: impl Into<String>) -> ScopedStateStore {
        ScopedStateStore::new(self.pool.clone(), namespace)
    }
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_in_memory(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
