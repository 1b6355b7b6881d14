//! S3-compatible object storage for site source files and converted models.
//!
//! Two distinct concerns live here: the durable source store holding the
//! originally uploaded IFC files (the source of truth for retries), and the
//! one-shot upload into a registrar-scoped bucket using short-lived
//! credentials (see [`scoped`]).

pub mod scoped;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Content type recorded on every stored IFC source object.
pub const SOURCE_CONTENT_TYPE: &str = "application/x-step";

/// Connection settings for the source-file store.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: "ifc-files".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
        }
    }
}

impl StorageConfig {
    /// Static credentials when both halves are configured; otherwise the
    /// ambient provider chain applies.
    fn static_credentials(&self) -> Option<Credentials> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(key), Some(secret)) => Some(Credentials::new(
                key.clone(),
                secret.clone(),
                None,
                None,
                "static",
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage configuration error: {0}")]
    Configuration(String),
    #[error("storage transport error: {0}")]
    Transport(String),
    #[error("object not found: {0}")]
    NotFound(String),
}

impl StorageError {
    fn transport(err: impl fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Durable storage for uploaded IFC sources. The pipeline writes a source
/// exactly once at upload time and reads it back for retries; the content
/// type is fixed at [`SOURCE_CONTENT_TYPE`].
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn put_source(&self, key: &str, bytes: Bytes) -> Result<(), StorageError>;
    async fn fetch_source(&self, key: &str) -> Result<Bytes, StorageError>;
}

#[derive(Clone)]
pub struct S3SourceStore {
    client: Client,
    bucket: String,
}

impl S3SourceStore {
    pub async fn connect(config: StorageConfig) -> Result<Self, StorageError> {
        if config.bucket.trim().is_empty() {
            return Err(StorageError::Configuration(
                "bucket name cannot be empty".into(),
            ));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(credentials) = config.static_credentials() {
            loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
        }
        let shared_config = loader.load().await;

        let mut builder = Builder::from(&shared_config).force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
        })
    }
}

#[async_trait]
impl SourceStore for S3SourceStore {
    async fn put_source(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        tracing::debug!(bucket = %self.bucket, key, size = bytes.len(), "storing source object");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(SOURCE_CONTENT_TYPE)
            .send()
            .await
            .map_err(|err| StorageError::transport(DisplayErrorContext(err)))?;
        Ok(())
    }

    async fn fetch_source(&self, key: &str) -> Result<Bytes, StorageError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if let SdkError::ServiceError(service) = &err {
                    if service.err().is_no_such_key() {
                        return StorageError::NotFound(key.to_string());
                    }
                }
                StorageError::transport(DisplayErrorContext(err))
            })?;

        let data = object
            .body
            .collect()
            .await
            .map_err(StorageError::transport)?;
        Ok(Bytes::from(data.into_bytes()))
    }
}
