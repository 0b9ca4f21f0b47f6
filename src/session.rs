//! Per-request ingest session.
//!
//! One session owns the whole pipeline for one multipart body: it drives the
//! parser, binds each file part to exactly one storage sink, buffers field
//! values, and aggregates the result. Finalizes run as spawned tasks so slow
//! backends overlap with later parts; the session completes only once the
//! parser has signaled a clean end *and* every outstanding finalize has
//! joined. `run` consumes the session, so it resolves exactly once: the full
//! result or the first error, never a partial mix.
//!
//! Repeated names accumulate: a field name seen twice yields two values, a
//! file field seen twice yields two descriptors. File descriptors come back
//! in submission order.

use crate::errors::UploadError;
use crate::models::file::{StoredFile, StoredObject};
use crate::parser::{MultipartEvent, MultipartParser, ParserConfig};
use crate::storage::{StorageDriver, StorageSink, StorageWriteError, WriteSpec};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Maps an uploaded filename to the name the object is stored under.
pub type FilenameFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Hook fired when a file part begins, before its sink is opened and before
/// any byte is written. Receives the field name and the mutable in-progress
/// file, so metadata attached here is guaranteed to reach the finalized
/// record.
pub type FileBeginHook = Arc<dyn Fn(&str, &mut PendingFile) + Send + Sync>;

/// A file part that has begun but not yet received bytes. What the
/// file-begin hook gets to mutate.
#[derive(Clone, Debug)]
pub struct PendingFile {
    /// Name the object will be stored under (filename function already
    /// applied).
    pub filename: String,
    /// Content type declared in the part headers.
    pub content_type: Option<String>,
    /// Caller-attachable metadata, carried onto the stored record.
    pub metadata: Option<serde_json::Value>,
}

/// Aggregate result of one parsed request.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct ParseOutcome {
    /// Field name to values, accumulating repeats in arrival order.
    pub fields: BTreeMap<String, Vec<String>>,
    /// Stored files in submission order.
    pub files: Vec<StoredFile>,
}

impl ParseOutcome {
    /// First value submitted under `name`, if any.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Stored files that arrived under `name`, in submission order.
    pub fn files_for(&self, name: &str) -> Vec<&StoredFile> {
        self.files
            .iter()
            .filter(|file| file.field_name == name)
            .collect()
    }
}

type FinalizeHandle = JoinHandle<Result<StoredObject, StorageWriteError>>;

pub struct FileIngestSession<D: StorageDriver> {
    handle: D::Handle,
    driver: Arc<D>,
    filename: FilenameFn,
    on_file_begin: Option<FileBeginHook>,
    parser_config: ParserConfig,
}

impl<D: StorageDriver> FileIngestSession<D> {
    pub(crate) fn new(
        handle: D::Handle,
        driver: Arc<D>,
        filename: FilenameFn,
        on_file_begin: Option<FileBeginHook>,
        parser_config: ParserConfig,
    ) -> Self {
        Self {
            handle,
            driver,
            filename,
            on_file_begin,
            parser_config,
        }
    }

    /// Drive the pipeline to completion. Consumes the session.
    pub async fn run<S>(self, boundary: &str, body: S) -> Result<ParseOutcome, UploadError>
    where
        S: Stream<Item = Result<Bytes, io::Error>>,
    {
        let mut parser = MultipartParser::new(boundary, self.parser_config.clone())?;
        let mut fields: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut current: Option<(String, Box<dyn StorageSink>)> = None;
        let mut finalizing: Vec<(String, FinalizeHandle)> = Vec::new();

        pin_mut!(body);
        while let Some(next) = body.next().await {
            let chunk = match next {
                Ok(chunk) => chunk,
                Err(err) => {
                    abandon(current.take(), &mut finalizing).await;
                    return Err(UploadError::Transport(err));
                }
            };
            let events = match parser.feed(&chunk) {
                Ok(events) => events,
                Err(err) => {
                    abandon(current.take(), &mut finalizing).await;
                    return Err(err);
                }
            };
            for event in events {
                if let Err(err) = self
                    .dispatch(event, &mut fields, &mut current, &mut finalizing)
                    .await
                {
                    abandon(current.take(), &mut finalizing).await;
                    return Err(err);
                }
            }
        }

        if let Err(err) = parser.finish() {
            abandon(current.take(), &mut finalizing).await;
            return Err(err);
        }

        // Parser is done; the session completes once every outstanding
        // finalize has joined. Results come back in submission order.
        let mut files = Vec::with_capacity(finalizing.len());
        let mut outstanding = finalizing.into_iter();
        while let Some((field_name, handle)) = outstanding.next() {
            let joined = match handle.await {
                Ok(result) => result,
                Err(err) => Err(StorageWriteError::Interrupted(err.to_string())),
            };
            match joined {
                Ok(object) => files.push(StoredFile { field_name, object }),
                Err(err) => {
                    for (_, rest) in outstanding {
                        rest.abort();
                    }
                    return Err(UploadError::Storage(err));
                }
            }
        }

        Ok(ParseOutcome { fields, files })
    }

    async fn dispatch(
        &self,
        event: MultipartEvent,
        fields: &mut BTreeMap<String, Vec<String>>,
        current: &mut Option<(String, Box<dyn StorageSink>)>,
        finalizing: &mut Vec<(String, FinalizeHandle)>,
    ) -> Result<(), UploadError> {
        match event {
            MultipartEvent::Field { name, value } => {
                fields.entry(name).or_default().push(value);
            }
            MultipartEvent::FileBegin {
                name,
                filename,
                content_type,
            } => {
                let mut pending = PendingFile {
                    filename: (self.filename)(&filename),
                    content_type,
                    metadata: None,
                };
                // Hook runs before the sink is opened, so anything it sets is
                // part of the write spec from the first byte on.
                if let Some(hook) = &self.on_file_begin {
                    hook(&name, &mut pending);
                }
                let spec = WriteSpec {
                    filename: pending.filename,
                    content_type: pending.content_type,
                    metadata: pending.metadata,
                };
                debug!("opening sink for file field `{}`", name);
                let sink = self.driver.open_write(&self.handle, spec).await?;
                *current = Some((name, sink));
            }
            MultipartEvent::FileData(chunk) => {
                // Awaiting the write here is what pauses byte consumption
                // while the backend is busy.
                if let Some((_, sink)) = current.as_mut() {
                    sink.write(chunk).await?;
                }
            }
            MultipartEvent::FileEnd => {
                if let Some((name, sink)) = current.take() {
                    finalizing.push((name, tokio::spawn(async move { sink.finalize().await })));
                }
            }
            MultipartEvent::End => {}
        }
        Ok(())
    }
}

/// First-failure cleanup: abort the in-flight sink and any finalize tasks.
/// No descriptor is produced for a part whose stream did not complete.
async fn abandon(
    current: Option<(String, Box<dyn StorageSink>)>,
    finalizing: &mut Vec<(String, FinalizeHandle)>,
) {
    if let Some((name, sink)) = current {
        debug!("aborting sink for file field `{}`", name);
        sink.abort().await;
    }
    for (_, handle) in finalizing.drain(..) {
        handle.abort();
    }
}
