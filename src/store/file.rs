use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use opentelemetry::KeyValue;

use super::ObjectStore;
use crate::error::{Error, Result};
use crate::telemetry::metrics;

/// Object store backed by a local directory: `{root}/{bucket}/{key}`.
#[derive(Debug, Clone)]
pub struct FileObjectStore {
    root: PathBuf,
}

impl FileObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let relative = Path::new(bucket).join(key);
        // Keys must stay inside the root.
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::Store(format!(
                "object path escapes store root: {bucket}/{key}"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        tracing::debug!(path = %path.display(), "reading object from disk");

        let result = match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        };

        metrics::object_fetches().add(
            1,
            &[
                KeyValue::new("backend", self.backend()),
                KeyValue::new("result", if result.is_ok() { "ok" } else { "error" }),
            ],
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_object_under_bucket_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("apps/folder")).unwrap();
        std::fs::write(dir.path().join("apps/folder/data.json"), b"{}").unwrap();

        let store = FileObjectStore::new(dir.path());
        let bytes = store.get_object("apps", "folder/data.json").await.unwrap();
        assert_eq!(bytes, b"{}");
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileObjectStore::new(dir.path());
        let err = store.get_object("apps", "nope").await.unwrap_err();
        match err {
            Error::NotFound { bucket, key } => {
                assert_eq!(bucket, "apps");
                assert_eq!(key, "nope");
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_parent_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileObjectStore::new(dir.path());
        let err = store.get_object("apps", "../secrets").await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }
}
