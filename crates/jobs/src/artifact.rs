//! Model artifact download and caching.
//!
//! Start commands may reference a model as `s3://bucket/key` or as a
//! presigned `https://` URL. Artifacts are cached by file name in a
//! local directory and reused on later starts. Resolution never fails
//! a start: every error degrades to the best cached artifact, then to
//! the built-in default name.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Fallback model file name when nothing was ever downloaded.
pub const DEFAULT_MODEL_FILE: &str = "best.pt";

#[derive(Debug, thiserror::Error)]
enum ArtifactError {
    #[error("artifact store client not configured")]
    NoClient,

    #[error("malformed artifact URL: {0}")]
    BadUrl(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Downloads and caches model artifacts.
pub struct ModelArtifactCache {
    dir: PathBuf,
    s3: Option<aws_sdk_s3::Client>,
    http: reqwest::Client,
    /// Most recently resolved artifact, preferred fallback.
    last: Mutex<Option<PathBuf>>,
}

impl ModelArtifactCache {
    pub fn new(dir: PathBuf, config: &aws_config::SdkConfig) -> Self {
        Self {
            dir,
            s3: Some(aws_sdk_s3::Client::new(config)),
            http: reqwest::Client::new(),
            last: Mutex::new(None),
        }
    }

    /// Cache without an artifact-store client; only presigned URLs and
    /// already-cached files resolve. Used by tests and offline runs.
    pub fn offline(dir: PathBuf) -> Self {
        Self {
            dir,
            s3: None,
            http: reqwest::Client::new(),
            last: Mutex::new(None),
        }
    }

    /// Resolve a model reference to a local path.
    ///
    /// With a URL: download (or reuse the cached copy) and remember it
    /// as the latest artifact. Without one, or on any failure: the most
    /// recently resolved artifact, else a cached `best.pt`, else the
    /// bare default name.
    pub async fn resolve(&self, url: Option<&str>) -> PathBuf {
        match url {
            Some(url) => match self.download(url).await {
                Ok(path) => {
                    *self.last.lock().unwrap() = Some(path.clone());
                    tracing::info!(path = %path.display(), "Model artifact ready");
                    path
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Model download failed, falling back");
                    self.fallback()
                }
            },
            None => self.fallback(),
        }
    }

    fn fallback(&self) -> PathBuf {
        if let Some(last) = self.last.lock().unwrap().clone() {
            if last.exists() {
                tracing::info!(path = %last.display(), "Reusing last downloaded model");
                return last;
            }
        }
        let cached = self.dir.join(DEFAULT_MODEL_FILE);
        if cached.exists() {
            tracing::info!(path = %cached.display(), "Using cached default model");
            return cached;
        }
        tracing::warn!(model = DEFAULT_MODEL_FILE, "No cached model, using built-in default");
        PathBuf::from(DEFAULT_MODEL_FILE)
    }

    async fn download(&self, url: &str) -> Result<PathBuf, ArtifactError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        if url.starts_with("s3://") {
            let rest = &url["s3://".len()..];
            let (bucket, key) = rest
                .split_once('/')
                .ok_or_else(|| ArtifactError::BadUrl(url.to_string()))?;
            let file_name = Path::new(key)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| DEFAULT_MODEL_FILE.to_string());
            let local = self.dir.join(file_name);
            if local.exists() {
                tracing::debug!(path = %local.display(), "Model already cached");
                return Ok(local);
            }

            let s3 = self.s3.as_ref().ok_or(ArtifactError::NoClient)?;
            tracing::info!(bucket, key, "Downloading model from artifact store");
            let object = s3
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| ArtifactError::Download(e.to_string()))?;
            let bytes = object
                .body
                .collect()
                .await
                .map_err(|e| ArtifactError::Download(e.to_string()))?
                .into_bytes();
            tokio::fs::write(&local, &bytes).await?;
            Ok(local)
        } else {
            // Presigned URL: no stable key to name the file after.
            let local = self.dir.join(DEFAULT_MODEL_FILE);
            if local.exists() {
                tracing::debug!(path = %local.display(), "Model already cached");
                return Ok(local);
            }

            tracing::info!("Downloading model from presigned URL");
            let response = self
                .http
                .get(url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| ArtifactError::Download(e.to_string()))?;
            let bytes = response
                .bytes()
                .await
                .map_err(|e| ArtifactError::Download(e.to_string()))?;
            tokio::fs::write(&local, &bytes).await?;
            Ok(local)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_url_and_empty_cache_resolves_to_default_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ModelArtifactCache::offline(dir.path().join("models"));
        assert_eq!(cache.resolve(None).await, PathBuf::from(DEFAULT_MODEL_FILE));
    }

    #[tokio::test]
    async fn cached_default_is_preferred_over_bare_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cached = dir.path().join(DEFAULT_MODEL_FILE);
        std::fs::write(&cached, b"weights").expect("write model");

        let cache = ModelArtifactCache::offline(dir.path().to_path_buf());
        assert_eq!(cache.resolve(None).await, cached);
    }

    #[tokio::test]
    async fn unreachable_store_falls_back_instead_of_failing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ModelArtifactCache::offline(dir.path().to_path_buf());
        // No S3 client configured: the download errors, resolution
        // still yields a usable path.
        let path = cache.resolve(Some("s3://models/run42/best.pt")).await;
        assert_eq!(path, PathBuf::from(DEFAULT_MODEL_FILE));
    }

    #[tokio::test]
    async fn cached_artifact_is_reused_without_a_client() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cached = dir.path().join("run42.pt");
        std::fs::write(&cached, b"weights").expect("write model");

        let cache = ModelArtifactCache::offline(dir.path().to_path_buf());
        // Cache hit happens before the client is needed.
        let path = cache.resolve(Some("s3://models/runs/run42.pt")).await;
        assert_eq!(path, cached);
    }
}
