use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_types::region::Region;
use pose_capture_common::config::{CaptureBackend, Config, RustfsConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Tracks stored captures for retention ordering.
#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub key: String,
    pub size_bytes: u64,
}

enum Backend {
    /// Files under a local directory; the object key is the relative path.
    Local { root: PathBuf },
    /// S3-compatible RustFS bucket.
    Rustfs {
        client: aws_sdk_s3::Client,
        bucket: String,
    },
}

/// Where captured snapshots are written, with an in-memory index of the
/// captures made by this process for retention.
pub struct CaptureStorage {
    backend: Backend,
    /// Ordered map: (captured_at_ms, frame seq) -> stored object metadata.
    index: Mutex<BTreeMap<(i64, u64), ObjectEntry>>,
}

impl CaptureStorage {
    pub async fn from_config(config: &Config) -> Result<Self, StorageError> {
        match (config.capture.backend, &config.rustfs) {
            (CaptureBackend::Local, _) => Ok(Self::local(&config.capture.dir)),
            (CaptureBackend::Rustfs, Some(rustfs)) => Ok(Self::rustfs(rustfs).await),
            (CaptureBackend::Rustfs, None) => Err(StorageError::Misconfigured(
                "rustfs backend selected without a [rustfs] section".into(),
            )),
        }
    }

    pub fn local(root: &Path) -> Self {
        Self {
            backend: Backend::Local {
                root: root.to_path_buf(),
            },
            index: Mutex::new(BTreeMap::new()),
        }
    }

    pub async fn rustfs(config: &RustfsConfig) -> Self {
        let creds = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "static",
        );

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .credentials_provider(creds)
            .region(Region::new("us-east-1"))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        Self {
            backend: Backend::Rustfs {
                client: aws_sdk_s3::Client::from_conf(s3_config),
                bucket: config.bucket.clone(),
            },
            index: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Local { .. } => "local",
            Backend::Rustfs { .. } => "rustfs",
        }
    }

    /// Create the capture directory or bucket if it does not exist yet.
    pub async fn ensure_ready(&self) -> Result<(), StorageError> {
        match &self.backend {
            Backend::Local { root } => {
                tokio::fs::create_dir_all(root)
                    .await
                    .map_err(|e| StorageError::Io(root.display().to_string(), e))?;
                info!(root = root.display().to_string(), "capture directory ready");
                Ok(())
            }
            Backend::Rustfs { client, bucket } => {
                match client.head_bucket().bucket(bucket).send().await {
                    Ok(_) => {
                        info!(bucket, "bucket exists");
                        Ok(())
                    }
                    Err(_) => {
                        info!(bucket, "creating bucket");
                        client
                            .create_bucket()
                            .bucket(bucket)
                            .send()
                            .await
                            .map_err(|e| StorageError::CreateBucket(e.to_string()))?;
                        info!(bucket, "bucket created");
                        Ok(())
                    }
                }
            }
        }
    }

    /// Store one captured JPEG under `object_key` and index it.
    pub async fn put_capture(
        &self,
        object_key: &str,
        jpeg_data: Vec<u8>,
        captured_at_ms: i64,
        seq: u64,
    ) -> Result<(), StorageError> {
        let size = jpeg_data.len() as u64;

        match &self.backend {
            Backend::Local { root } => {
                let path = root.join(object_key);
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| StorageError::Io(parent.display().to_string(), e))?;
                }
                tokio::fs::write(&path, jpeg_data)
                    .await
                    .map_err(|e| StorageError::Io(path.display().to_string(), e))?;
            }
            Backend::Rustfs { client, bucket } => {
                client
                    .put_object()
                    .bucket(bucket)
                    .key(object_key)
                    .content_type("image/jpeg")
                    .body(ByteStream::from(jpeg_data))
                    .send()
                    .await
                    .map_err(|e| StorageError::PutObject(e.to_string()))?;
            }
        }

        debug!(key = object_key, size, backend = self.backend_name(), "stored capture");

        self.index.lock().await.insert(
            (captured_at_ms, seq),
            ObjectEntry {
                key: object_key.to_string(),
                size_bytes: size,
            },
        );

        Ok(())
    }

    async fn delete_object(&self, object_key: &str) -> Result<(), StorageError> {
        match &self.backend {
            Backend::Local { root } => {
                let path = root.join(object_key);
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| StorageError::Io(path.display().to_string(), e))
            }
            Backend::Rustfs { client, bucket } => {
                client
                    .delete_object()
                    .bucket(bucket)
                    .key(object_key)
                    .send()
                    .await
                    .map_err(|e| StorageError::DeleteObject(e.to_string()))?;
                Ok(())
            }
        }
    }

    /// Delete the oldest indexed captures until at most `retain` remain.
    /// `retain == 0` disables retention. Returns the keys that were removed.
    pub async fn enforce_retention(&self, retain: usize) -> Vec<String> {
        if retain == 0 {
            return Vec::new();
        }

        let victims: Vec<((i64, u64), ObjectEntry)> = {
            let idx = self.index.lock().await;
            let excess = idx.len().saturating_sub(retain);
            idx.iter()
                .take(excess)
                .map(|(k, v)| (*k, v.clone()))
                .collect()
        };

        let mut removed = Vec::with_capacity(victims.len());
        for (slot, entry) in victims {
            match self.delete_object(&entry.key).await {
                Ok(()) => {
                    debug!(key = entry.key, "evicted capture");
                    self.index.lock().await.remove(&slot);
                    removed.push(entry.key);
                }
                Err(e) => {
                    warn!(error = %e, key = entry.key, "failed to evict capture");
                }
            }
        }
        removed
    }

    /// Returns (object_count, total_bytes) from the in-memory index.
    pub async fn stats(&self) -> (usize, u64) {
        let idx = self.index.lock().await;
        let count = idx.len();
        let bytes: u64 = idx.values().map(|e| e.size_bytes).sum();
        (count, bytes)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage misconfigured: {0}")]
    Misconfigured(String),
    #[error("filesystem error on {0}: {1}")]
    Io(String, std::io::Error),
    #[error("failed to create bucket: {0}")]
    CreateBucket(String),
    #[error("failed to put object: {0}")]
    PutObject(String),
    #[error("failed to delete object: {0}")]
    DeleteObject(String),
}
