//! Chunked-storage capability surface.
//!
//! The ingest pipeline talks to storage exclusively through [`StorageDriver`]
//! and [`StorageSink`], so the backend is an injected capability rather than a
//! baked-in dependency: the SQLite driver is the durable implementation, the
//! memory driver backs tests. A driver is stateless configuration shared
//! across sessions; the live handle (`Handle`) is passed per call. Sinks are
//! exclusive to one file part and are never reused.

pub mod memory;
pub mod sqlite;

use crate::models::file::StoredObject;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::io;
use thiserror::Error;
use uuid::Uuid;

pub use memory::{MemoryDriver, MemoryStore};
pub use sqlite::SqliteDriver;

/// Default chunk size for stored payloads, 255 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;

/// Errors from the storage backend.
#[derive(Debug, Error)]
pub enum StorageWriteError {
    #[error("stored object `{0}` not found")]
    NotFound(Uuid),
    #[error("finalize interrupted: {0}")]
    Interrupted(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// What a sink is opened with. Filled in before any bytes flow, so metadata
/// attached here is guaranteed to be present on the finalized record.
#[derive(Clone, Debug, Default)]
pub struct WriteSpec {
    pub filename: String,
    pub content_type: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Byte stream handed back when reading a stored object.
pub type ObjectStream = BoxStream<'static, Result<Bytes, StorageWriteError>>;

/// Capability for opening write sinks and read streams against a backend.
///
/// The driver itself carries no live connection; `Handle` is the shared,
/// read-only configuration (a pool, a store) supplied per call.
#[async_trait]
pub trait StorageDriver: Send + Sync + 'static {
    type Handle: Clone + Send + Sync + 'static;

    /// Open an append-only write sink for one new object.
    async fn open_write(
        &self,
        handle: &Self::Handle,
        spec: WriteSpec,
    ) -> Result<Box<dyn StorageSink>, StorageWriteError>;

    /// Stream a stored object's payload back in chunk order.
    async fn open_read(
        &self,
        handle: &Self::Handle,
        id: Uuid,
    ) -> Result<ObjectStream, StorageWriteError>;

    /// Fetch a stored object's descriptor without its payload.
    async fn describe(
        &self,
        handle: &Self::Handle,
        id: Uuid,
    ) -> Result<StoredObject, StorageWriteError>;
}

/// An open write sink bound to exactly one file part.
///
/// Writes are delivered in arrival order. `finalize` and `abort` consume the
/// sink, so neither can be called twice and a finalized sink cannot be
/// aborted. Only `finalize` yields a descriptor; an aborted part leaves no
/// addressable object behind.
#[async_trait]
pub trait StorageSink: Send {
    /// Append one chunk. The caller awaits completion before sending more,
    /// which is what propagates backpressure to the parser.
    async fn write(&mut self, chunk: Bytes) -> Result<(), StorageWriteError>;

    /// Commit the object and produce its descriptor. The storage id becomes
    /// observable only here.
    async fn finalize(self: Box<Self>) -> Result<StoredObject, StorageWriteError>;

    /// Best-effort cleanup of anything already written. Never yields a
    /// descriptor.
    async fn abort(self: Box<Self>);
}
