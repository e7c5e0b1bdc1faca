//! Read-only access to objects in cloud storage.
//!
//! The service only ever reads two objects at startup: the secrets file
//! and, outside local runs, the database metadata. [`S3ObjectStore`] is the
//! production backend; [`FileObjectStore`] maps buckets onto directories for
//! local development and tests.

mod file;
mod s3;

pub use file::FileObjectStore;
pub use s3::{AwsCredentials, S3ObjectStore};

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name used in logs and metrics.
    fn backend(&self) -> &'static str;

    /// Read the whole object at `bucket/key`.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
}
