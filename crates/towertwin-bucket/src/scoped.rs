//! One-shot uploads with registrar-issued short-lived credentials.
//!
//! The tileset registrar hands back an endpoint, bucket, key prefix and a
//! temporary credential triple scoped to a single asset. Those credentials
//! are used for exactly one PUT and never cached, so the S3 client here is
//! built per call and dropped afterwards.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;

use crate::StorageError;

/// Upload destination issued by the tileset registrar.
#[derive(Debug, Clone)]
pub struct ScopedUploadTarget {
    pub endpoint: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

#[async_trait]
pub trait ScopedUploader: Send + Sync {
    async fn put_object_scoped(
        &self,
        target: &ScopedUploadTarget,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError>;
}

/// Default uploader writing through the AWS SDK against the registrar's
/// endpoint.
#[derive(Debug, Clone, Default)]
pub struct S3ScopedUploader;

#[async_trait]
impl ScopedUploader for S3ScopedUploader {
    async fn put_object_scoped(
        &self,
        target: &ScopedUploadTarget,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        if target.endpoint.is_empty() {
            return Err(StorageError::Configuration(
                "scoped upload target has no endpoint".into(),
            ));
        }

        let credentials = Credentials::new(
            &target.access_key_id,
            &target.secret_access_key,
            Some(target.session_token.clone()),
            None,
            "scoped",
        );
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(SharedCredentialsProvider::new(credentials))
            .load()
            .await;
        let config = aws_sdk_s3::config::Builder::from(&shared_config)
            .endpoint_url(&target.endpoint)
            .build();
        let client = Client::from_conf(config);

        tracing::debug!(bucket = %target.bucket, key, size = bytes.len(), "scoped upload");
        client
            .put_object()
            .bucket(&target.bucket)
            .key(key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(content_type)
            .send()
            .await
            .map_err(|err| StorageError::Transport(DisplayErrorContext(err).to_string()))?;
        Ok(())
    }
}
