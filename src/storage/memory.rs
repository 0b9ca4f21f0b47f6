//! In-memory storage backend.
//!
//! Keeps finalized objects in a shared map. Nothing is visible in the store
//! until a sink finalizes, which makes it a faithful stand-in for the durable
//! backend in tests: aborted or failed parts leave no trace.

use crate::models::file::StoredObject;
use crate::storage::{
    DEFAULT_CHUNK_SIZE, ObjectStream, StorageDriver, StorageSink, StorageWriteError, WriteSpec,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::StreamExt;
use md5::Context;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// A finalized object together with its payload.
#[derive(Clone, Debug)]
pub struct StoredBlob {
    pub object: StoredObject,
    pub data: Vec<u8>,
}

/// Shared handle to the in-memory store. Cloning shares the same map.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<Uuid, StoredBlob>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<StoredBlob> {
        self.inner.lock().expect("memory store poisoned").get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("memory store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, blob: StoredBlob) {
        self.inner
            .lock()
            .expect("memory store poisoned")
            .insert(blob.object.id, blob);
    }
}

/// Driver over [`MemoryStore`].
#[derive(Clone, Debug, Default)]
pub struct MemoryDriver;

#[async_trait]
impl StorageDriver for MemoryDriver {
    type Handle = MemoryStore;

    async fn open_write(
        &self,
        handle: &Self::Handle,
        spec: WriteSpec,
    ) -> Result<Box<dyn StorageSink>, StorageWriteError> {
        Ok(Box::new(MemorySink {
            store: handle.clone(),
            id: Uuid::new_v4(),
            spec,
            data: BytesMut::new(),
            digest: Context::new(),
        }))
    }

    async fn open_read(
        &self,
        handle: &Self::Handle,
        id: Uuid,
    ) -> Result<ObjectStream, StorageWriteError> {
        let blob = handle.get(id).ok_or(StorageWriteError::NotFound(id))?;
        Ok(futures::stream::once(async move { Ok(Bytes::from(blob.data)) }).boxed())
    }

    async fn describe(
        &self,
        handle: &Self::Handle,
        id: Uuid,
    ) -> Result<StoredObject, StorageWriteError> {
        handle
            .get(id)
            .map(|blob| blob.object)
            .ok_or(StorageWriteError::NotFound(id))
    }
}

struct MemorySink {
    store: MemoryStore,
    id: Uuid,
    spec: WriteSpec,
    data: BytesMut,
    digest: Context,
}

#[async_trait]
impl StorageSink for MemorySink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), StorageWriteError> {
        self.digest.consume(&chunk);
        self.data.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finalize(self: Box<Self>) -> Result<StoredObject, StorageWriteError> {
        let data = self.data.to_vec();
        let object = StoredObject {
            id: self.id,
            filename: self.spec.filename,
            content_type: self.spec.content_type,
            length: data.len() as i64,
            chunk_size: DEFAULT_CHUNK_SIZE as i64,
            upload_date: Utc::now(),
            md5: format!("{:x}", self.digest.compute()),
            metadata: self.spec.metadata,
        };
        self.store.insert(StoredBlob {
            object: object.clone(),
            data,
        });
        Ok(object)
    }

    async fn abort(self: Box<Self>) {
        // Nothing persisted before finalize; dropping the buffer is enough.
    }
}
