//! SQLite-backed chunked object storage.
//!
//! Layout mirrors the classic chunked-object scheme: a `files` metadata row
//! per object plus ordered `chunks` rows carrying the payload. The sink
//! buffers incoming bytes and flushes a chunk row whenever a full chunk is
//! available; `finalize` flushes the remainder and inserts the metadata row,
//! and only then does the object become addressable.

use crate::models::chunk::ChunkRow;
use crate::models::file::{FileRow, StoredObject};
use crate::storage::{
    DEFAULT_CHUNK_SIZE, ObjectStream, StorageDriver, StorageSink, StorageWriteError, WriteSpec,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::StreamExt;
use md5::Context;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Driver for the SQLite chunked backend. Stateless apart from the chunk
/// size; the pool handle is supplied per call.
#[derive(Clone, Debug)]
pub struct SqliteDriver {
    chunk_size: usize,
}

impl SqliteDriver {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self { chunk_size }
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageDriver for SqliteDriver {
    type Handle = Arc<SqlitePool>;

    async fn open_write(
        &self,
        handle: &Self::Handle,
        spec: WriteSpec,
    ) -> Result<Box<dyn StorageSink>, StorageWriteError> {
        // The id here only keys chunk rows; it is not observable as a stored
        // object until finalize inserts the metadata row.
        Ok(Box::new(SqliteSink {
            db: handle.clone(),
            id: Uuid::new_v4(),
            spec,
            buf: BytesMut::new(),
            next_chunk: 0,
            length: 0,
            digest: Context::new(),
            chunk_size: self.chunk_size,
        }))
    }

    async fn open_read(
        &self,
        handle: &Self::Handle,
        id: Uuid,
    ) -> Result<ObjectStream, StorageWriteError> {
        // Existence check up front so a bad id fails before streaming starts.
        self.describe(handle, id).await?;

        let stream = futures::stream::try_unfold(
            (handle.clone(), id, 0i64),
            |(db, id, n)| async move {
                let row: Option<ChunkRow> = sqlx::query_as(
                    "SELECT files_id, n, data FROM chunks WHERE files_id = ? AND n = ?",
                )
                .bind(id)
                .bind(n)
                .fetch_optional(&*db)
                .await
                .map_err(StorageWriteError::Sqlx)?;

                Ok(row.map(|chunk| (Bytes::from(chunk.data), (db, id, n + 1))))
            },
        );
        Ok(stream.boxed())
    }

    async fn describe(
        &self,
        handle: &Self::Handle,
        id: Uuid,
    ) -> Result<StoredObject, StorageWriteError> {
        let row: Option<FileRow> = sqlx::query_as(
            "SELECT id, filename, content_type, length, chunk_size, upload_date, md5, metadata
             FROM files WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&**handle)
        .await?;

        row.map(FileRow::into_object)
            .ok_or(StorageWriteError::NotFound(id))
    }
}

struct SqliteSink {
    db: Arc<SqlitePool>,
    id: Uuid,
    spec: WriteSpec,
    buf: BytesMut,
    next_chunk: i64,
    length: i64,
    digest: Context,
    chunk_size: usize,
}

impl SqliteSink {
    async fn flush_chunk(&mut self, data: Bytes) -> Result<(), StorageWriteError> {
        sqlx::query("INSERT INTO chunks (files_id, n, data) VALUES (?, ?, ?)")
            .bind(self.id)
            .bind(self.next_chunk)
            .bind(data.as_ref())
            .execute(&*self.db)
            .await?;
        self.next_chunk += 1;
        Ok(())
    }

    async fn discard_chunks(db: &SqlitePool, id: Uuid) {
        if let Err(err) = sqlx::query("DELETE FROM chunks WHERE files_id = ?")
            .bind(id)
            .execute(db)
            .await
        {
            debug!("failed to discard chunks for {}: {}", id, err);
        }
    }
}

#[async_trait]
impl StorageSink for SqliteSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), StorageWriteError> {
        self.length += chunk.len() as i64;
        self.digest.consume(&chunk);
        self.buf.extend_from_slice(&chunk);
        while self.buf.len() >= self.chunk_size {
            let data = self.buf.split_to(self.chunk_size).freeze();
            if let Err(err) = self.flush_chunk(data).await {
                Self::discard_chunks(&self.db, self.id).await;
                return Err(err);
            }
        }
        Ok(())
    }

    async fn finalize(mut self: Box<Self>) -> Result<StoredObject, StorageWriteError> {
        if !self.buf.is_empty() {
            let data = self.buf.split().freeze();
            if let Err(err) = self.flush_chunk(data).await {
                Self::discard_chunks(&self.db, self.id).await;
                return Err(err);
            }
        }

        let upload_date = Utc::now();
        let md5 = format!("{:x}", self.digest.compute());
        let metadata_text = self.spec.metadata.as_ref().map(|value| value.to_string());

        let inserted = sqlx::query(
            "INSERT INTO files (id, filename, content_type, length, chunk_size, upload_date, md5, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(self.id)
        .bind(&self.spec.filename)
        .bind(&self.spec.content_type)
        .bind(self.length)
        .bind(self.chunk_size as i64)
        .bind(upload_date)
        .bind(&md5)
        .bind(&metadata_text)
        .execute(&*self.db)
        .await;

        if let Err(err) = inserted {
            Self::discard_chunks(&self.db, self.id).await;
            return Err(StorageWriteError::Sqlx(err));
        }

        debug!(
            "finalized object {} ({} bytes, {} chunks)",
            self.id, self.length, self.next_chunk
        );

        Ok(StoredObject {
            id: self.id,
            filename: self.spec.filename,
            content_type: self.spec.content_type,
            length: self.length,
            chunk_size: self.chunk_size as i64,
            upload_date,
            md5,
            metadata: self.spec.metadata,
        })
    }

    async fn abort(self: Box<Self>) {
        Self::discard_chunks(&self.db, self.id).await;
    }
}

/// Apply schema statements from a migration file's contents.
///
/// Statements are split on `;` and executed one by one, skipping blanks.
pub async fn apply_schema(db: &SqlitePool, sql: &str) -> Result<(), sqlx::Error> {
    let statements = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    for stmt in statements {
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}
