//! In-memory backends for exercising the coordinator and reconciler without
//! SQLite or disk.

use crate::{
    models::{
        bucket::Bucket,
        catalog::{CatalogRecord, IndexedRecord},
        object::StoredObject,
    },
    services::{
        Probe,
        blob_store::{BlobBody, BlobResult, BlobStore, BlobStoreError, DEFAULT_CONTENT_TYPE},
        catalog_index::{CatalogFilter, CatalogIndex, CatalogResult},
        upload_coordinator::Clock,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, TryStreamExt, stream};
use std::{
    collections::BTreeMap,
    io,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use uuid::Uuid;

pub fn bytes_body(bytes: &'static [u8]) -> BlobBody<'static> {
    stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(bytes))]).boxed()
}

pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_secs(&self) -> i64 {
        self.0
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<(String, String), (StoredObject, Vec<u8>)>>,
    fail_puts: AtomicBool,
    put_calls: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn contents(&self, bucket: &str, name: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), name.to_string()))
            .map(|(_, bytes)| bytes.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn ensure_bucket(&self, bucket: &str) -> BlobResult<Bucket> {
        Ok(Bucket {
            id: Uuid::nil(),
            name: bucket.to_string(),
            created_at: Utc::now(),
        })
    }

    async fn list_names(&self, bucket: &str) -> BlobResult<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn put(
        &self,
        bucket: &str,
        name: &str,
        content_type: Option<&str>,
        body: BlobBody<'_>,
    ) -> BlobResult<StoredObject> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(BlobStoreError::Io(io::Error::other("storage offline")));
        }

        let chunks: Vec<Bytes> = body
            .try_collect()
            .await
            .map_err(BlobStoreError::BodyInterrupted)?;
        let bytes = chunks.concat();
        let object = StoredObject {
            id: Uuid::new_v4(),
            bucket_id: Uuid::nil(),
            name: name.to_string(),
            content_type: content_type.unwrap_or(DEFAULT_CONTENT_TYPE).to_string(),
            size_bytes: bytes.len() as i64,
            etag: format!("{:x}", md5::compute(&bytes)),
            last_modified: Utc::now(),
        };
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), name.to_string()),
            (object.clone(), bytes),
        );
        Ok(object)
    }

    fn resolve(&self, bucket: &str, name: &str) -> String {
        format!("memory://{}/{}", bucket, name)
    }

    async fn fetch(
        &self,
        bucket: &str,
        name: &str,
    ) -> BlobResult<(StoredObject, BlobBody<'static>)> {
        let objects = self.objects.lock().unwrap();
        let (object, bytes) = objects
            .get(&(bucket.to_string(), name.to_string()))
            .ok_or_else(|| BlobStoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                name: name.to_string(),
            })?;
        let body = stream::iter(vec![Ok::<_, io::Error>(Bytes::from(bytes.clone()))]).boxed();
        Ok((object.clone(), body))
    }

    async fn health_check(&self) -> Vec<Probe> {
        vec![Probe::ok("memory_blobs")]
    }
}

#[derive(Default)]
pub struct MemoryCatalog {
    records: Mutex<Vec<IndexedRecord>>,
    failures_remaining: AtomicUsize,
    insert_calls: AtomicUsize,
}

impl MemoryCatalog {
    /// Fail the next `count` inserts; `usize::MAX` fails all of them.
    pub fn fail_next_inserts(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    fn matches(record: &CatalogRecord, filter: &CatalogFilter) -> bool {
        match filter {
            CatalogFilter::Name(v) => &record.name == v,
            CatalogFilter::Url(v) => &record.url == v,
            CatalogFilter::Uploader(v) => &record.uploader == v,
            CatalogFilter::Timestamp(t) => record.timestamp == *t,
        }
    }
}

#[async_trait]
impl CatalogIndex for MemoryCatalog {
    async fn insert(&self, record: &CatalogRecord) -> CatalogResult<Uuid> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != usize::MAX {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            }
            return Err(sqlx::Error::PoolTimedOut.into());
        }

        let id = Uuid::new_v4();
        self.records.lock().unwrap().push(IndexedRecord {
            id,
            record: record.clone(),
        });
        Ok(id)
    }

    async fn query(&self, filters: &[CatalogFilter]) -> CatalogResult<Vec<IndexedRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| filters.iter().all(|f| Self::matches(&r.record, f)))
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Vec<Probe> {
        vec![Probe::ok("memory_catalog")]
    }
}
