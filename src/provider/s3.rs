//! S3 bucket backend.
//!
//! Keys are flat. Directories are zero-byte `dir/` marker objects written
//! before any file below them, and listings use the `/` delimiter so nested
//! keys collapse into common prefixes.

use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{CommonPrefix, Object};
use aws_sdk_s3::{primitives::ByteStream, Client};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::vdir::{self, ListedObject};
use super::{guess_content_type, DirListing, ObjectInfo, StorageProvider, UploadMode};
use crate::config::{ParentDirPolicy, S3Config};
use crate::{Error, Result};

const DIRECTORY_CONTENT_TYPE: &str = "application/x-directory";

#[derive(Debug, Clone)]
pub struct S3Provider {
    client: Client,
    bucket: String,
    endpoint: Option<String>,
    parent_dirs: ParentDirPolicy,
}

impl S3Provider {
    /// Builds the client. No request is sent until [`StorageProvider::connect`].
    pub async fn new(config: &S3Config) -> Result<Self> {
        if config.bucket.trim().is_empty() {
            return Err(Error::Config("s3 bucket name is empty".to_string()));
        }
        if config.access_key_id.is_empty() || config.secret_access_key.is_empty() {
            return Err(Error::Config(format!(
                "s3 credentials missing for bucket '{}'",
                config.bucket
            )));
        }

        let region_provider =
            RegionProviderChain::first_try(Region::new(config.region.clone())).or_else("us-east-1");

        let mut config_builder = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(region_provider)
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                &config.access_key_id,
                &config.secret_access_key,
                None,
                None,
                "static",
            ));

        if let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.is_empty()) {
            config_builder = config_builder.endpoint_url(endpoint);
        }

        let sdk_config = config_builder.load().await;
        // Custom endpoints (MinIO, R2, ...) rarely support virtual-host buckets.
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint.is_some())
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            endpoint: config.endpoint.clone(),
            parent_dirs: ParentDirPolicy::default(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn head_bucket(&self, operation: &'static str) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| Error::backend(operation, &self.bucket, aws_sdk_s3::Error::from(e)))?;
        Ok(())
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| s3_error("write", key, e))?;
        Ok(())
    }

    /// Up to `max_keys` keys under `prefix`, without a delimiter.
    async fn peek_prefix(&self, prefix: &str, max_keys: i32) -> Result<Vec<String>> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(max_keys)
            .send()
            .await
            .map_err(|e| s3_error("list", prefix, e))?;
        Ok(response
            .contents()
            .iter()
            .filter_map(|o| o.key().map(str::to_string))
            .collect())
    }

    async fn marker_modified(&self, marker: &str) -> Result<Option<DateTime<Utc>>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(marker)
            .send()
            .await
        {
            Ok(head) => Ok(Some(head.last_modified().map(to_chrono).unwrap_or_default())),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(s3_error("stat", marker, err)),
        }
    }
}

fn is_not_found<E: ProvideErrorMetadata>(err: &SdkError<E, HttpResponse>) -> bool {
    if let Some(code) = err.as_service_error().and_then(|e| e.code()) {
        if matches!(code, "NoSuchKey" | "NotFound") {
            return true;
        }
    }
    err.raw_response()
        .map(|r| r.status().as_u16() == 404)
        .unwrap_or(false)
}

fn s3_error<E>(operation: &'static str, key: &str, err: SdkError<E, HttpResponse>) -> Error
where
    E: ProvideErrorMetadata,
    aws_sdk_s3::Error: From<SdkError<E, HttpResponse>>,
{
    if is_not_found(&err) {
        return Error::NotFound(key.to_string());
    }
    Error::backend(operation, key, aws_sdk_s3::Error::from(err))
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()).unwrap_or_default()
}

fn listed(object: &Object) -> ListedObject<'_> {
    ListedObject {
        key: object.key(),
        size: object.size(),
        last_modified: object.last_modified().map(to_chrono),
        content_type: None,
    }
}

#[async_trait]
impl StorageProvider for S3Provider {
    fn provider_name(&self) -> &str {
        "s3"
    }

    fn upload_mode(&self) -> UploadMode {
        UploadMode::WholeObject
    }

    fn set_parent_dirs(&mut self, policy: ParentDirPolicy) {
        self.parent_dirs = policy;
    }

    async fn connect(&self) -> Result<()> {
        self.head_bucket("connect").await
    }

    async fn health(&self) -> Result<()> {
        self.head_bucket("health").await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn read_object(&self, path: &str) -> Result<Bytes> {
        let key = vdir::object_key(path);
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| s3_error("read", key, e))?;
        let data = response
            .body
            .collect()
            .await
            .map_err(|e| Error::backend("read", key, e))?;
        Ok(data.into_bytes())
    }

    async fn read_range(&self, path: &str, offset: u64, length: u64) -> Result<Bytes> {
        let key = vdir::object_key(path);
        if length == 0 {
            return Ok(Bytes::new());
        }

        let range = format!("bytes={}-{}", offset, offset.saturating_add(length - 1));
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(range)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) if err.as_service_error().and_then(|e| e.code()) == Some("InvalidRange") => {
                return Ok(Bytes::new());
            }
            Err(err) => return Err(s3_error("read_range", key, err)),
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| Error::backend("read_range", key, e))?;
        Ok(data.into_bytes())
    }

    async fn write_object(&self, path: &str, data: Bytes) -> Result<()> {
        let key = vdir::object_key(path);
        if key.is_empty() || vdir::is_dir_path(key) {
            return Err(Error::IsADirectory(path.to_string()));
        }
        vdir::prepare_parent_directories(self, key, self.parent_dirs).await?;
        let size = data.len();
        self.put(key, data, &guess_content_type(key)).await?;
        debug!(bucket = %self.bucket, key = %key, bytes = size, "S3 upload complete");
        Ok(())
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        let marker = vdir::dir_prefix(path);
        if marker.is_empty() {
            return Err(Error::AlreadyExists("/".to_string()));
        }
        if self.marker_modified(&marker).await?.is_some() {
            return Err(Error::AlreadyExists(marker));
        }
        self.put(&marker, Bytes::new(), DIRECTORY_CONTENT_TYPE).await
    }

    async fn stat_object(&self, path: &str) -> Result<ObjectInfo> {
        let key = vdir::object_key(path);
        if key.is_empty() {
            return Ok(ObjectInfo::directory("", DateTime::<Utc>::default()));
        }

        if vdir::is_dir_path(key) {
            if let Some(modified) = self.marker_modified(key).await? {
                return Ok(ObjectInfo::directory(key, modified));
            }
            // No marker, but keys below it still make it a directory.
            if !self.peek_prefix(key, 1).await?.is_empty() {
                return Ok(ObjectInfo::directory(key, DateTime::<Utc>::default()));
            }
            return Err(Error::NotFound(key.to_string()));
        }

        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| s3_error("stat", key, e))?;

        Ok(ObjectInfo::file(
            key,
            head.content_length().unwrap_or(0).max(0) as u64,
            head.content_type().map(str::to_string),
            head.last_modified().map(to_chrono).unwrap_or_default(),
        ))
    }

    async fn delete_object(&self, path: &str) -> Result<()> {
        let key = vdir::object_key(path);
        if key.is_empty() {
            return Err(Error::Unsupported("deleting the bucket root".to_string()));
        }

        if vdir::is_dir_path(key) {
            let keys = self.peek_prefix(key, 2).await?;
            if keys.iter().any(|k| k != key) {
                return Err(Error::DirectoryNotEmpty(key.to_string()));
            }
            if keys.is_empty() {
                return Err(Error::NotFound(key.to_string()));
            }
        } else {
            self.client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| s3_error("delete", key, e))?;
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| s3_error("delete", key, e))?;

        debug!(bucket = %self.bucket, key = %key, "S3 delete complete");
        Ok(())
    }

    async fn copy_object(&self, src: &str, dst: &str) -> Result<()> {
        let src_key = vdir::object_key(src);
        let dst_key = vdir::object_key(dst);
        if src_key == dst_key {
            return Err(Error::SameSourceDestination(src_key.to_string()));
        }

        vdir::prepare_parent_directories(self, dst_key, self.parent_dirs).await?;
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, urlencoding::encode(src_key)))
            .key(dst_key)
            .send()
            .await
            .map_err(|e| s3_error("copy", src_key, e))?;
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = vdir::object_key(prefix);
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| s3_error("list", prefix, e))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|o| o.key())
                    .filter(|k| *k != prefix)
                    .map(str::to_string),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated() == Some(true) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(keys)
    }

    async fn list_dir(&self, prefix: &str) -> Result<DirListing> {
        let prefix = vdir::dir_prefix(prefix);
        let mut objects: Vec<Object> = Vec::new();
        let mut common_prefixes: Vec<CommonPrefix> = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .delimiter("/")
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| s3_error("list", &prefix, e))?;

            objects.extend_from_slice(response.contents());
            common_prefixes.extend_from_slice(response.common_prefixes());

            match response.next_continuation_token() {
                Some(token) if response.is_truncated() == Some(true) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(vdir::partition_listing(
            &prefix,
            objects.iter().map(listed),
            common_prefixes.iter().map(|p| p.prefix()),
        ))
    }
}

impl std::fmt::Display for S3Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.endpoint {
            Some(endpoint) => {
                write!(f, "S3Provider(bucket: {}, endpoint: {})", self.bucket, endpoint)
            }
            None => write!(f, "S3Provider(bucket: {})", self.bucket),
        }
    }
}
