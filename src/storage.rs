//! Defines the object-storage seam of the pipeline and its S3
//! implementation.

use crate::error::{Error, Result};
use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectCannedAcl, ObjectIdentifier, StorageClass};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::{debug, instrument};

/// Fallback content type for objects stored without one.
const OCTET_STREAM: &str = "application/octet-stream";

/// The source object as fetched from storage.
#[derive(Debug, Clone)]
pub struct FetchedObject {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Fixed parameters added to every upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadParams {
    pub acl: Option<String>,
    pub cache_control: Option<String>,
    pub storage_class: Option<String>,
}

/// A fully assembled upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub key: String,
    pub content_type: String,
    pub body: Bytes,
    pub params: UploadParams,
}

/// What the storage reports back about an uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub e_tag: Option<String>,
    pub version_id: Option<String>,
}

/// Object storage as seen by the pipeline: sources are fetched from
/// one place and derivatives written to (and deleted from) another.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch a source object. Fails with [`Error::NotFound`] when the
    /// key doesn't exist.
    async fn fetch(&self, key: &str) -> Result<FetchedObject>;

    /// Store a derivative.
    async fn upload(&self, request: UploadRequest) -> Result<StoredObject>;

    /// Delete derivatives.
    async fn delete(&self, keys: &[String]) -> Result<()>;
}

/// Map a failed `get_object` call, telling a missing key apart from
/// every other failure.
fn fetch_error<R>(key: &str, e: SdkError<GetObjectError, R>) -> Error
where
    R: std::fmt::Debug + Send + Sync + 'static,
{
    if matches!(&e, SdkError::ServiceError(ctx) if matches!(ctx.err(), GetObjectError::NoSuchKey(_)))
    {
        Error::NotFound {
            key: String::from(key),
        }
    } else {
        Error::storage("get_object", key, e)
    }
}

/// S3 storage reading from a source bucket and writing to a target
/// bucket, which may be the same.
#[derive(Debug, Clone)]
pub struct S3Storage<'a> {
    client: &'a Client,
    source_bucket: String,
    target_bucket: String,
}

impl<'a> S3Storage<'a> {
    pub fn new(client: &'a Client, source_bucket: String, target_bucket: String) -> Self {
        Self {
            client,
            source_bucket,
            target_bucket,
        }
    }
}

#[async_trait]
impl Storage for S3Storage<'_> {
    #[instrument(skip(self), fields(bucket = %self.source_bucket))]
    async fn fetch(&self, key: &str) -> Result<FetchedObject> {
        let output = self
            .client
            .get_object()
            .bucket(&self.source_bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| fetch_error(key, e))?;
        let content_type = output
            .content_type()
            .unwrap_or(OCTET_STREAM)
            .to_string();
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| Error::storage("get_object", key, e))?
            .into_bytes();
        debug!(bytes = bytes.len(), %content_type, "Fetched source object");
        Ok(FetchedObject {
            bytes,
            content_type,
        })
    }

    #[instrument(skip(self, request), fields(bucket = %self.target_bucket, key = %request.key))]
    async fn upload(&self, request: UploadRequest) -> Result<StoredObject> {
        let UploadRequest {
            key,
            content_type,
            body,
            params,
        } = request;
        let output = self
            .client
            .put_object()
            .bucket(&self.target_bucket)
            .key(&key)
            .content_type(content_type)
            .set_acl(params.acl.as_deref().map(ObjectCannedAcl::from))
            .set_cache_control(params.cache_control)
            .set_storage_class(params.storage_class.as_deref().map(StorageClass::from))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| Error::storage("put_object", key.as_str(), e))?;
        Ok(StoredObject {
            e_tag: output.e_tag().map(String::from),
            version_id: output.version_id().map(String::from),
            key,
        })
    }

    #[instrument(skip(self), fields(bucket = %self.target_bucket))]
    async fn delete(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect();
        let output = self
            .client
            .delete_objects()
            .bucket(&self.target_bucket)
            .delete(Delete::builder().set_objects(Some(objects)).build())
            .send()
            .await
            .map_err(|e| Error::storage("delete_objects", keys.join(", "), e))?;
        let failed = output.errors().unwrap_or_default();
        if let Some(first) = failed.first() {
            return Err(Error::storage(
                "delete_objects",
                first.key().unwrap_or_default(),
                format!(
                    "{} out of {} objects weren't deleted: {}",
                    failed.len(),
                    keys.len(),
                    first.message().unwrap_or("no message")
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::types::error::NoSuchKey;

    #[test]
    fn missing_keys_are_not_found() {
        let e: SdkError<GetObjectError, ()> =
            SdkError::service_error(GetObjectError::NoSuchKey(NoSuchKey::builder().build()), ());
        assert!(matches!(
            fetch_error("uploads/cat.png", e),
            Error::NotFound { ref key } if key == "uploads/cat.png"
        ));
    }

    #[test]
    fn other_fetch_failures_are_storage_errors() {
        let e: SdkError<GetObjectError, ()> = SdkError::construction_failure("no bucket given");
        assert!(matches!(
            fetch_error("uploads/cat.png", e),
            Error::Storage { operation: "get_object", ref key, .. } if key == "uploads/cat.png"
        ));
    }
}
