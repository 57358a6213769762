//! Object storage seam.
//!
//! The session only speaks [`ObjectStore`]; the production implementation is
//! S3 through the official SDK, built per attempt from the temporary
//! credentials the service hands out.

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ServerSideEncryption};
use seqdrop_types::UploadParameters;
use std::sync::Arc;

use crate::config::Config;
use crate::error::StorageError;

/// A part accepted by the store, needed to complete the multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    pub part_number: i32,
    pub etag: String,
}

/// Low-level operations of a multipart-capable object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a small object in a single request.
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StorageError>;

    /// Start a multipart upload and return its upload id.
    async fn create_multipart_upload(&self, bucket: &str, key: &str)
        -> Result<String, StorageError>;

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<UploadedPart, StorageError>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<(), StorageError>;

    /// Discard the parts of an unfinished upload.
    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError>;
}

/// Builds a store scoped to one attempt's temporary credentials.
pub trait StoreConnector: Send + Sync {
    fn connect(&self, params: &UploadParameters) -> Result<Arc<dyn ObjectStore>, StorageError>;
}

#[derive(Clone, Debug)]
pub struct S3Connector {
    region: String,
    endpoint: Option<String>,
}

impl S3Connector {
    pub fn new(region: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            region: region.into(),
            endpoint,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.s3_region.clone(), config.s3_endpoint.clone())
    }
}

impl StoreConnector for S3Connector {
    fn connect(&self, params: &UploadParameters) -> Result<Arc<dyn ObjectStore>, StorageError> {
        let credentials = Credentials::new(
            params.access_key_id.clone(),
            params.secret_access_key.clone(),
            None,
            None,
            "seqdrop-upload",
        );

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &self.endpoint {
            // S3-compatible stores generally want path-style addressing
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Arc::new(S3Store {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
        }))
    }
}

/// S3 store. Every object is written with SSE-S3 (`AES256`) encryption; for
/// multipart uploads the setting is given when the upload is created and
/// applies to each part.
pub struct S3Store {
    client: aws_sdk_s3::Client,
}

fn sdk_error<E: std::error::Error>(err: E) -> StorageError {
    StorageError::Request(DisplayErrorContext(err).to_string())
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .server_side_encryption(ServerSideEncryption::Aes256)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<String, StorageError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .server_side_encryption(ServerSideEncryption::Aes256)
            .send()
            .await
            .map_err(sdk_error)?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or(StorageError::Protocol("upload id"))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<UploadedPart, StorageError> {
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(sdk_error)?;

        let etag = output
            .e_tag()
            .map(str::to_string)
            .ok_or(StorageError::Protocol("part ETag"))?;
        Ok(UploadedPart { part_number, etag })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> Result<(), StorageError> {
        let completed = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(part.etag.clone())
                    .build()
            })
            .collect::<Vec<_>>();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }
}
