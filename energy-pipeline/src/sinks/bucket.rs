//! Blob storage behind a narrow capability trait, plus the table-level
//! read/write helpers used by both pipelines.

use std::{
    collections::HashMap,
    io,
    path::{Component, Path, PathBuf},
    sync::{Arc, Mutex},
};

use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::errors::ParquetError;

use crate::config::{StorageBackend, StorageConfig};
use crate::sinks::{columnar, gcs};

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("storage authentication failed: {0}")]
    Auth(String),
    #[error("storage object not found: {0}")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("blob {blob} is not a readable table: {source}")]
    Codec { blob: String, source: ParquetError },
    #[error("storage I/O error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Authenticated handle to one bucket.
#[async_trait::async_trait]
pub trait Bucket: Send + Sync {
    fn name(&self) -> &str;

    async fn exists(&self, blob_name: &str) -> Result<bool, StorageError>;

    /// Fails with `NotFound` when the blob is absent.
    async fn read(&self, blob_name: &str) -> Result<Bytes, StorageError>;

    /// Creates or replaces the blob as a whole.
    async fn write(&self, blob_name: &str, data: Bytes) -> Result<(), StorageError>;
}

/// Serialize `table` as Parquet and store it under `blob_name`.
pub async fn write_table(bucket: &dyn Bucket, blob_name: &str, table: &RecordBatch) -> Result<(), StorageError> {
    let data = columnar::encode(table).map_err(|source| StorageError::Codec {
        blob: blob_name.to_string(),
        source,
    })?;
    let len = data.len();

    bucket.write(blob_name, data).await?;

    metrics::counter!("bucket_blobs_written_total").increment(1);
    metrics::counter!("bucket_bytes_written_total").increment(len as u64);
    tracing::info!(
        bucket = bucket.name(),
        blob = blob_name,
        rows = table.num_rows(),
        bytes = len,
        "table written"
    );
    Ok(())
}

/// Load the table stored under `blob_name`, or `None` if it was never written.
pub async fn read_table(bucket: &dyn Bucket, blob_name: &str) -> Result<Option<RecordBatch>, StorageError> {
    if !bucket.exists(blob_name).await? {
        tracing::debug!(bucket = bucket.name(), blob = blob_name, "blob absent");
        return Ok(None);
    }

    let data = bucket.read(blob_name).await?;
    metrics::counter!("bucket_bytes_read_total").increment(data.len() as u64);

    let table = columnar::decode(data).map_err(|source| StorageError::Codec {
        blob: blob_name.to_string(),
        source,
    })?;
    Ok(Some(table))
}

/// Open the bucket selected by configuration.
pub async fn open_bucket(cfg: &StorageConfig) -> Result<Arc<dyn Bucket>, StorageError> {
    let bucket: Arc<dyn Bucket> = match cfg.backend {
        StorageBackend::Gcs => {
            Arc::new(gcs::get_bucket(&cfg.bucket_name, &cfg.project, &cfg.credentials_path).await?)
        }
        StorageBackend::Local => {
            let root = cfg
                .local_root
                .clone()
                .unwrap_or_else(|| PathBuf::from("bucket"));
            Arc::new(LocalBucket::new(&cfg.bucket_name, root))
        }
        StorageBackend::Memory => Arc::new(InMemoryBucket::new(&cfg.bucket_name)),
    };
    Ok(bucket)
}

/// Process-local bucket. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct InMemoryBucket {
    name: String,
    blobs: Mutex<HashMap<String, Bytes>>,
}

impl InMemoryBucket {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            blobs: Mutex::new(HashMap::new()),
        }
    }

    fn blobs(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Bytes>>, StorageError> {
        self.blobs
            .lock()
            .map_err(|_| StorageError::Backend("in-memory bucket lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl Bucket for InMemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, blob_name: &str) -> Result<bool, StorageError> {
        Ok(self.blobs()?.contains_key(blob_name))
    }

    async fn read(&self, blob_name: &str) -> Result<Bytes, StorageError> {
        self.blobs()?
            .get(blob_name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{}/{blob_name}", self.name)))
    }

    async fn write(&self, blob_name: &str, data: Bytes) -> Result<(), StorageError> {
        self.blobs()?.insert(blob_name.to_string(), data);
        Ok(())
    }
}

/// Bucket emulated by a directory; blob names map to relative paths.
#[derive(Debug, Clone)]
pub struct LocalBucket {
    name: String,
    root: PathBuf,
}

impl LocalBucket {
    pub fn new(name: &str, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            root: root.into(),
        }
    }

    fn blob_path(&self, blob_name: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(blob_name);
        if blob_name.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(StorageError::Backend(format!("invalid blob name '{blob_name}'")));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait::async_trait]
impl Bucket for LocalBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, blob_name: &str) -> Result<bool, StorageError> {
        let path = self.blob_path(blob_name)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|source| StorageError::Io { path, source })
    }

    async fn read(&self, blob_name: &str) -> Result<Bytes, StorageError> {
        let path = self.blob_path(blob_name)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.display().to_string()))
            }
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    async fn write(&self, blob_name: &str, data: Bytes) -> Result<(), StorageError> {
        let path = self.blob_path(blob_name)?;
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StorageError::Io { path, source }
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err(parent))?;
        }
        // Readers see either the old blob or the new one, never a prefix.
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, &data).await.map_err(io_err(&tmp))?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err(&path))?;
        Ok(())
    }
}
