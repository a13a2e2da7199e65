//! AWS SDK implementation of the object store seam, pointed at any
//! S3-compatible endpoint via a custom URL and path-style addressing.

use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;

use crate::store::{ObjectStore, StoreError};

const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Service endpoint URL.
    pub endpoint_url: String,
    /// Bucket receiving the sync.
    pub bucket: String,
    /// Optional region; S3-compatible stores usually ignore it.
    pub region: Option<String>,
    /// Access key id.
    pub access_key: String,
    /// Secret access key.
    pub secret_key: String,
}

/// [`ObjectStore`] backed by the AWS S3 SDK.
#[derive(Clone)]
pub struct AwsObjectStore {
    client: Client,
    bucket: String,
}

impl AwsObjectStore {
    /// Build a client for the configured endpoint with static credentials.
    #[must_use]
    pub fn new(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "shoal",
        );
        let region = Region::new(
            config
                .region
                .clone()
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
        );
        let sdk_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(region)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket.clone(),
        }
    }
}

fn map_sdk_err<E>(operation: &'static str, err: &SdkError<E>, detail: String) -> StoreError {
    let status = http_status(err);
    if status == 0 {
        StoreError::transport(format!("{operation}: {detail}"))
    } else {
        StoreError::http(status, format!("{operation}: {detail}"))
    }
}

fn http_status<E>(err: &SdkError<E>) -> u16 {
    match err {
        SdkError::ServiceError(context) => context.raw().status().as_u16(),
        SdkError::ResponseError(context) => context.raw().status().as_u16(),
        _ => 0,
    }
}

/// Well-known stat failure strings that S3-compatible stores report for
/// absent objects and buckets; both map to a clean `false`.
const NOT_FOUND_MARKERS: &[&str] = &[
    "NoSuchKey: Object does not exist",
    "NoSuchBucket: Bucket does not exist",
];

#[async_trait]
impl ObjectStore for AwsObjectStore {
    async fn bucket_exists(&self) -> Result<bool, StoreError> {
        match self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if let SdkError::ServiceError(context) = &err {
                    if context.err().is_not_found() {
                        return Ok(false);
                    }
                }
                if http_status(&err) == 404 {
                    return Ok(false);
                }
                let detail = format!("{err}");
                Err(map_sdk_err("head bucket", &err, detail))
            }
        }
    }

    async fn put_object(&self, key: &str, source: &Path) -> Result<(), StoreError> {
        // A fresh stream per call, so every retry starts from byte zero.
        let body = ByteStream::from_path(source).await.map_err(|err| {
            StoreError::transport(format!(
                "failed to open {} for upload: {err}",
                source.display()
            ))
        })?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map(|_| ())
            .map_err(|err| {
                let detail = format!("{err}");
                map_sdk_err("put object", &err, detail)
            })
    }

    async fn put_empty(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from_static(&[]))
            .send()
            .await
            .map(|_| ())
            .map_err(|err| {
                let detail = format!("{err}");
                map_sdk_err("put empty object", &err, detail)
            })
    }

    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map(|_| ())
            .map_err(|err| {
                let detail = format!("{err}");
                map_sdk_err("delete object", &err, detail)
            })
    }

    async fn object_exists(&self, key: &str) -> Result<bool, StoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if let SdkError::ServiceError(context) = &err {
                    if context.err().is_not_found() {
                        return Ok(false);
                    }
                }
                let detail = format!("{err}");
                if NOT_FOUND_MARKERS
                    .iter()
                    .any(|marker| detail.contains(marker))
                {
                    return Ok(false);
                }
                Err(map_sdk_err("stat object", &err, detail))
            }
        }
    }
}
