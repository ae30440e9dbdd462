//! In-memory store implementations.
//!
//! Used by the pipeline and job-controller tests and by local runs
//! without AWS credentials. Both stores count writes and can be
//! switched into a failing mode to exercise error paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use sorter_core::{CropRecord, FrameRecord, Job, JobStatus};

use crate::blob::BlobStore;
use crate::error::StoreError;
use crate::metadata::MetadataStore;

/// Blob store backed by a map.
#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    puts: AtomicUsize,
    fail_uploads: AtomicBool,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent upload fail.
    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Number of successful uploads so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Keys of every stored object, unordered.
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn object(&self, url: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(url).cloned()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put_jpeg(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<String, StoreError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StoreError::Blob("injected upload failure".into()));
        }
        let url = format!("s3://{bucket}/{key}");
        self.objects
            .lock()
            .unwrap()
            .insert(url.clone(), bytes.to_vec());
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(url)
    }
}

/// One recorded job status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
}

/// Metadata store backed by vectors.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    frames: Mutex<Vec<FrameRecord>>,
    crops: Mutex<Vec<CropRecord>>,
    pending: Mutex<Vec<Job>>,
    updates: Mutex<Vec<StatusUpdate>>,
    fail_frame_writes: AtomicBool,
    fail_job_scans: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent frame-record write fail. Crop writes are
    /// unaffected, which is exactly what the orphaned-crop property
    /// test needs.
    pub fn fail_frame_writes(&self, fail: bool) {
        self.fail_frame_writes.store(fail, Ordering::SeqCst);
    }

    /// Make job scans fail (exercises the poll loop backoff).
    pub fn fail_job_scans(&self, fail: bool) {
        self.fail_job_scans.store(fail, Ordering::SeqCst);
    }

    /// Enqueue a job in pending status.
    pub fn push_pending(&self, job: Job) {
        self.pending.lock().unwrap().push(job);
    }

    pub fn frames(&self) -> Vec<FrameRecord> {
        self.frames.lock().unwrap().clone()
    }

    pub fn crops(&self) -> Vec<CropRecord> {
        self.crops.lock().unwrap().clone()
    }

    pub fn status_updates(&self) -> Vec<StatusUpdate> {
        self.updates.lock().unwrap().clone()
    }

    /// Total writes (frames + crops + status updates) so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn put_frame(&self, record: &FrameRecord) -> Result<(), StoreError> {
        if self.fail_frame_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Metadata("injected frame write failure".into()));
        }
        self.frames.lock().unwrap().push(record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn put_crop(&self, record: &CropRecord) -> Result<(), StoreError> {
        self.crops.lock().unwrap().push(record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn pending_jobs(&self) -> Result<Vec<Job>, StoreError> {
        if self.fail_job_scans.load(Ordering::SeqCst) {
            return Err(StoreError::Query("injected scan failure".into()));
        }
        Ok(self.pending.lock().unwrap().clone())
    }

    async fn update_job_status(
        &self,
        job_id: &str,
        _user_id: &str,
        status: JobStatus,
        message: &str,
    ) -> Result<(), StoreError> {
        if status != JobStatus::Pending {
            self.pending.lock().unwrap().retain(|j| j.job_id != job_id);
        }
        self.updates.lock().unwrap().push(StatusUpdate {
            job_id: job_id.to_string(),
            status,
            message: message.to_string(),
        });
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
