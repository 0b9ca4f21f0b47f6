//! Public entry point for parsing multipart uploads into storage.
//!
//! An [`UploadForm`] binds the two mandatory capabilities (a live storage
//! handle and a storage driver) at construction, failing fast if either is
//! missing. Parser limits are the only configuration passed through to the
//! parsing layer; the capabilities and the filename function never reach it.

use crate::errors::UploadError;
use crate::parser::{ParserConfig, boundary_from_content_type};
use crate::session::{FileBeginHook, FileIngestSession, FilenameFn, ParseOutcome, PendingFile};
use crate::storage::StorageDriver;
use bytes::Bytes;
use futures::Stream;
use std::io;
use std::sync::Arc;

/// Construction options for [`UploadForm`].
///
/// `db` and `driver` are mandatory; everything else has defaults. The
/// `parser` options are handed to the multipart parser untouched.
pub struct UploadFormOptions<D: StorageDriver> {
    /// Live storage handle, shared read-only across concurrent parses.
    pub db: Option<D::Handle>,
    /// Storage driver capability.
    pub driver: Option<Arc<D>>,
    /// Filename mapping applied to each uploaded file. Defaults to identity.
    pub filename: Option<FilenameFn>,
    /// Limits passed through to the multipart parser.
    pub parser: ParserConfig,
}

impl<D: StorageDriver> Default for UploadFormOptions<D> {
    fn default() -> Self {
        Self {
            db: None,
            driver: None,
            filename: None,
            parser: ParserConfig::default(),
        }
    }
}

/// Parses multipart requests, streaming file parts into the storage backend.
///
/// Each call to [`parse`](Self::parse) runs an independent session; the form
/// itself only holds configuration and may serve many requests.
pub struct UploadForm<D: StorageDriver> {
    db: D::Handle,
    driver: Arc<D>,
    /// Filename mapping for uploads. Reassignable after construction; the
    /// next parse picks up the new function.
    pub filename: FilenameFn,
    parser: ParserConfig,
    on_file_begin: Option<FileBeginHook>,
}

impl<D: StorageDriver> UploadForm<D> {
    /// Build a form, validating mandatory capabilities up front.
    pub fn new(options: UploadFormOptions<D>) -> Result<Self, UploadError> {
        let db = options
            .db
            .ok_or(UploadError::Configuration("missing storage handle `db`"))?;
        let driver = options
            .driver
            .ok_or(UploadError::Configuration("missing storage `driver`"))?;
        Ok(Self {
            db,
            driver,
            filename: options
                .filename
                .unwrap_or_else(|| Arc::new(|name: &str| name.to_string())),
            parser: options.parser,
            on_file_begin: None,
        })
    }

    /// Install a hook fired when each file part begins, before any byte of it
    /// is written. The hook may attach metadata (for instance the originating
    /// field name) that will be present on the finalized record.
    pub fn on_file_begin<F>(&mut self, hook: F)
    where
        F: Fn(&str, &mut PendingFile) + Send + Sync + 'static,
    {
        self.on_file_begin = Some(Arc::new(hook));
    }

    /// Parse one request body. `content_type` is the request's Content-Type
    /// header value; `body` yields the raw bytes in arrival order.
    ///
    /// Resolves exactly once: the full `{fields, files}` result, or the first
    /// error with no partial result.
    pub async fn parse<S>(&self, content_type: &str, body: S) -> Result<ParseOutcome, UploadError>
    where
        S: Stream<Item = Result<Bytes, io::Error>>,
    {
        let boundary = boundary_from_content_type(content_type).ok_or_else(|| {
            UploadError::Malformed(format!(
                "content type `{}` is not multipart/form-data with a boundary",
                content_type
            ))
        })?;
        let session = FileIngestSession::new(
            self.db.clone(),
            self.driver.clone(),
            self.filename.clone(),
            self.on_file_begin.clone(),
            self.parser.clone(),
        );
        session.run(&boundary, body).await
    }
}
