//! formstore — a streaming bridge from HTTP multipart form uploads into
//! chunked SQLite-backed storage.
//!
//! File parts are piped chunk-by-chunk into storage sinks without full
//! buffering while ordinary field values are collected alongside; the result
//! of one parse is the complete `{fields, files}` mapping or the first error,
//! never a partial mix.

pub mod config;
pub mod errors;
pub mod form;
pub mod handlers;
pub mod models;
pub mod parser;
pub mod routes;
pub mod session;
pub mod storage;

pub use errors::UploadError;
pub use form::{UploadForm, UploadFormOptions};
pub use models::file::{StoredFile, StoredObject};
pub use parser::{MultipartEvent, MultipartParser, ParserConfig, boundary_from_content_type};
pub use session::{FileIngestSession, FilenameFn, ParseOutcome, PendingFile};
pub use storage::{
    MemoryDriver, MemoryStore, SqliteDriver, StorageDriver, StorageSink, StorageWriteError,
    WriteSpec,
};
