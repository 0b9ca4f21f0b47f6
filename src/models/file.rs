//! Stored-file descriptors and their database row form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Descriptor of a finalized stored object.
///
/// Produced only by a sink's `finalize` — the storage id is never observable
/// before the full byte stream for the part has been written and committed.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StoredObject {
    /// Storage identifier assigned at finalize time.
    pub id: Uuid,

    /// Filename recorded for the object (after the filename function ran).
    pub filename: String,

    /// Content type (MIME type) declared in the part headers.
    pub content_type: Option<String>,

    /// Total size in bytes, known only after full consumption.
    pub length: i64,

    /// Chunk size the backend split the payload into.
    pub chunk_size: i64,

    /// Timestamp at which the object was finalized.
    pub upload_date: DateTime<Utc>,

    /// Streaming MD5 of the payload.
    pub md5: String,

    /// Caller-attached metadata, set before any bytes were written.
    pub metadata: Option<serde_json::Value>,
}

/// A stored object correlated back to the form field it arrived under.
#[derive(Serialize, Clone, Debug)]
pub struct StoredFile {
    /// Name of the multipart field that carried this file.
    pub field_name: String,

    #[serde(flatten)]
    pub object: StoredObject,
}

/// Row form of the `files` metadata table.
///
/// Metadata is kept as JSON text in SQLite and decoded on the way out.
#[derive(Clone, FromRow, Debug)]
pub struct FileRow {
    pub id: Uuid,
    pub filename: String,
    pub content_type: Option<String>,
    pub length: i64,
    pub chunk_size: i64,
    pub upload_date: DateTime<Utc>,
    pub md5: String,
    pub metadata: Option<String>,
}

impl FileRow {
    pub fn into_object(self) -> StoredObject {
        StoredObject {
            id: self.id,
            filename: self.filename,
            content_type: self.content_type,
            length: self.length,
            chunk_size: self.chunk_size,
            upload_date: self.upload_date,
            md5: self.md5,
            metadata: self.metadata.and_then(|raw| serde_json::from_str(&raw).ok()),
        }
    }
}
