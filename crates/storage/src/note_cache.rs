//! Reactive note cache over the `notes` table.
//!
//! Writes are serialized behind one async lock and bump a revision counter only after
//! their transaction commits. Every `observe` stream re-reads after a revision bump or a
//! query change, so an emission is never older than the last completed write it saw.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use shared::domain::{Note, NoteColor, NoteId, QueryParameters, SortOrder};
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite, Transaction};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

const SELECT_ASCENDING: &str = "SELECT id, title, content, timestamp, color FROM notes
     WHERE (? = '' OR instr(title, ?) > 0)
     ORDER BY timestamp ASC, seq ASC";

const SELECT_DESCENDING: &str = "SELECT id, title, content, timestamp, color FROM notes
     WHERE (? = '' OR instr(title, ?) > 0)
     ORDER BY timestamp DESC, seq ASC";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("note {0} already exists")]
    DuplicateId(NoteId),
    #[error("note {0} not found")]
    NotFound(NoteId),
    #[error("note has no identifier yet")]
    Unassigned,
    #[error("note storage unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

impl CacheError {
    /// Duplicate identifiers and storage failures both count as storage faults.
    pub fn is_storage_fault(&self) -> bool {
        matches!(self, CacheError::DuplicateId(_) | CacheError::Unavailable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_) | CacheError::Unassigned)
    }
}

#[derive(Clone)]
pub struct NoteCache {
    inner: Arc<NoteCacheInner>,
}

struct NoteCacheInner {
    pool: Pool<Sqlite>,
    write_lock: Mutex<()>,
    revision: watch::Sender<u64>,
}

impl NoteCache {
    pub(crate) fn new(pool: Pool<Sqlite>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(NoteCacheInner {
                pool,
                write_lock: Mutex::new(()),
                revision,
            }),
        }
    }

    /// Inserts `note`, assigning the next free identifier when it has none.
    pub async fn insert(&self, note: &Note) -> Result<NoteId, CacheError> {
        let _guard = self.inner.write_lock.lock().await;
        let mut tx = self.inner.pool.begin().await?;
        let id = insert_row(&mut tx, note).await?;
        tx.commit().await?;
        self.bump_revision();
        debug!(note_id = id.0, "inserted note");
        Ok(id)
    }

    pub async fn update(&self, note: &Note) -> Result<(), CacheError> {
        let id = note.id.ok_or(CacheError::Unassigned)?;
        let _guard = self.inner.write_lock.lock().await;
        let result = sqlx::query(
            "UPDATE notes SET title = ?, content = ?, timestamp = ?, color = ? WHERE id = ?",
        )
        .bind(&note.title)
        .bind(&note.content)
        .bind(note.timestamp)
        .bind(note.color.as_str())
        .bind(id.0)
        .execute(&self.inner.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CacheError::NotFound(id));
        }
        self.bump_revision();
        debug!(note_id = id.0, "updated note");
        Ok(())
    }

    /// Removes the row with `note`'s identifier. Absent rows and unsaved notes are a no-op.
    pub async fn delete(&self, note: &Note) -> Result<(), CacheError> {
        let Some(id) = note.id else {
            return Ok(());
        };
        let _guard = self.inner.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM notes WHERE id = ?")
            .bind(id.0)
            .execute(&self.inner.pool)
            .await?;
        if result.rows_affected() > 0 {
            self.bump_revision();
            debug!(note_id = id.0, "deleted note");
        }
        Ok(())
    }

    /// Swaps the whole cache contents for `notes` in a single transaction.
    pub async fn replace_all(&self, notes: &[Note]) -> Result<(), CacheError> {
        let _guard = self.inner.write_lock.lock().await;
        let mut tx = self.inner.pool.begin().await?;
        sqlx::query("DELETE FROM notes").execute(&mut *tx).await?;
        for note in notes {
            insert_row(&mut tx, note).await?;
        }
        tx.commit().await?;
        self.bump_revision();
        debug!(count = notes.len(), "replaced cached notes");
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        self.replace_all(&[]).await
    }

    pub async fn get(&self, id: NoteId) -> Result<Option<Note>, CacheError> {
        let row = sqlx::query("SELECT id, title, content, timestamp, color FROM notes WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.inner.pool)
            .await?;
        row.map(|row| note_from_row(&row)).transpose()
    }

    /// One-shot read of the notes matching `query`.
    pub async fn snapshot(&self, query: &QueryParameters) -> Result<Vec<Note>, CacheError> {
        let sql = match query.sort_order {
            SortOrder::Ascending => SELECT_ASCENDING,
            SortOrder::Descending => SELECT_DESCENDING,
        };
        let rows = sqlx::query(sql)
            .bind(&query.search_text)
            .bind(&query.search_text)
            .fetch_all(&self.inner.pool)
            .await?;
        rows.iter().map(note_from_row).collect()
    }

    /// Emits the matching notes now and again after every row change or query change.
    ///
    /// The stream keeps following row changes with the last query if the query sender
    /// is dropped; it ends only when the consumer drops it.
    pub fn observe(
        &self,
        query: watch::Receiver<QueryParameters>,
    ) -> BoxStream<'static, Result<Vec<Note>, CacheError>> {
        let observer = Observer {
            cache: self.clone(),
            revision: self.inner.revision.subscribe(),
            query,
            query_open: true,
            primed: false,
        };

        stream::unfold(observer, |mut observer| async move {
            if observer.primed {
                observer.next_change().await;
            }
            observer.primed = true;
            observer.revision.borrow_and_update();
            let params = observer.query.borrow_and_update().clone();
            let result = observer.cache.snapshot(&params).await;
            if let Err(err) = &result {
                warn!(error = %err, "note cache read failed");
            }
            Some((result, observer))
        })
        .boxed()
    }

    pub fn observe_fixed(
        &self,
        query: QueryParameters,
    ) -> BoxStream<'static, Result<Vec<Note>, CacheError>> {
        let (_query_tx, query_rx) = watch::channel(query);
        self.observe(query_rx)
    }

    fn bump_revision(&self) {
        self.inner.revision.send_modify(|revision| *revision += 1);
    }
}

struct Observer {
    cache: NoteCache,
    revision: watch::Receiver<u64>,
    query: watch::Receiver<QueryParameters>,
    query_open: bool,
    primed: bool,
}

impl Observer {
    async fn next_change(&mut self) {
        loop {
            tokio::select! {
                changed = self.revision.changed() => {
                    if changed.is_err() {
                        // The cache owns the sender and we hold the cache, so this cannot close.
                        std::future::pending::<()>().await;
                    }
                    return;
                }
                changed = self.query.changed(), if self.query_open => {
                    if changed.is_ok() {
                        return;
                    }
                    self.query_open = false;
                }
            }
        }
    }
}

async fn insert_row(tx: &mut Transaction<'_, Sqlite>, note: &Note) -> Result<NoteId, CacheError> {
    let id = match note.id {
        Some(id) => {
            let taken: Option<i64> = sqlx::query_scalar("SELECT seq FROM notes WHERE id = ?")
                .bind(id.0)
                .fetch_optional(&mut **tx)
                .await?;
            if taken.is_some() {
                return Err(CacheError::DuplicateId(id));
            }
            id
        }
        None => {
            let next: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) + 1 FROM notes")
                .fetch_one(&mut **tx)
                .await?;
            NoteId(next)
        }
    };

    sqlx::query(
        "INSERT INTO notes (id, title, content, timestamp, color) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.0)
    .bind(&note.title)
    .bind(&note.content)
    .bind(note.timestamp)
    .bind(note.color.as_str())
    .execute(&mut **tx)
    .await?;

    Ok(id)
}

fn note_from_row(row: &SqliteRow) -> Result<Note, CacheError> {
    let id: i64 = row.try_get("id")?;
    let raw_color: String = row.try_get("color")?;
    let color = raw_color.parse::<NoteColor>().unwrap_or_else(|err| {
        warn!(note_id = id, error = %err, "falling back to default note color");
        NoteColor::default()
    });
    Ok(Note {
        id: Some(NoteId(id)),
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        timestamp: row.try_get("timestamp")?,
        color,
    })
}
