//! Storage providers: one adapter per backend behind [`StorageProvider`].
//!
//! Paths handed to a provider are object keys. A trailing `/` marks a
//! directory; a leading `/` is ignored.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::config::ParentDirPolicy;
use crate::{Error, Result};

pub mod local;
pub mod memory;
pub mod s3;
pub mod vdir;

pub use local::LocalProvider;
pub use memory::MemoryProvider;
pub use s3::S3Provider;

/// How a provider accepts new content for an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// Content replaces the whole object in one call.
    WholeObject,
    /// Objects are created with a size, resized, and filled by byte ranges.
    Ranged,
}

#[async_trait]
pub trait StorageProvider: Send + Sync + std::fmt::Debug + 'static {
    /// Short label used in logs and metrics, e.g. `s3`.
    fn provider_name(&self) -> &str;

    fn upload_mode(&self) -> UploadMode;

    /// Policy applied when a write cannot materialize its parent directories.
    fn set_parent_dirs(&mut self, policy: ParentDirPolicy);

    /// Handshake with the backend. Must be cheap and side-effect free.
    async fn connect(&self) -> Result<()>;
    async fn health(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;

    async fn read_object(&self, path: &str) -> Result<Bytes>;
    /// Reads up to `length` bytes from `offset`; short or empty at the end.
    async fn read_range(&self, path: &str, offset: u64, length: u64) -> Result<Bytes>;
    /// Replaces the whole object, creating parent directories first.
    async fn write_object(&self, path: &str, data: Bytes) -> Result<()>;

    /// Creates (or truncates) a zero-filled object of `size` bytes, creating
    /// parent directories first.
    async fn create_file(&self, path: &str, _size: u64) -> Result<()> {
        Err(Error::Unsupported(format!("create_file on {path}")))
    }

    async fn resize_file(&self, path: &str, _size: u64) -> Result<()> {
        Err(Error::Unsupported(format!("resize_file on {path}")))
    }

    async fn write_range(&self, path: &str, _offset: u64, _data: Bytes) -> Result<()> {
        Err(Error::Unsupported(format!("write_range on {path}")))
    }

    /// Creates one directory level. Fails with [`Error::AlreadyExists`] when
    /// it is already there.
    async fn create_dir(&self, path: &str) -> Result<()>;

    async fn stat_object(&self, path: &str) -> Result<ObjectInfo>;
    async fn delete_object(&self, path: &str) -> Result<()>;
    async fn copy_object(&self, src: &str, dst: &str) -> Result<()>;

    /// Every key under `prefix`, nested ones included. Directory entries end
    /// with `/`.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;
    /// Direct children of `prefix`, nested keys collapsed into directories.
    async fn list_dir(&self, prefix: &str) -> Result<DirListing>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub name: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub is_dir: bool,
}

impl ObjectInfo {
    pub fn file(
        name: impl Into<String>,
        size: u64,
        content_type: Option<String>,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            content_type,
            last_modified,
            is_dir: false,
        }
    }

    pub fn directory(name: impl Into<String>, last_modified: DateTime<Utc>) -> Self {
        let mut name = name.into();
        if !name.is_empty() && !name.ends_with('/') {
            name.push('/');
        }
        Self {
            name,
            size: 0,
            content_type: None,
            last_modified,
            is_dir: true,
        }
    }

    /// Last path component without the directory slash.
    pub fn file_name(&self) -> &str {
        vdir::base_name(&self.name)
    }

    pub fn mode(&self) -> u32 {
        if self.is_dir {
            0o755
        } else {
            0o644
        }
    }
}

impl std::fmt::Display for ObjectInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} bytes, modified: {})", self.name, self.size, self.last_modified)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirListing {
    pub files: Vec<ObjectInfo>,
    /// Sub-directory prefixes, each ending with `/`.
    pub dirs: Vec<String>,
}

impl DirListing {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }
}

/// Content type for a new object, guessed from its extension.
pub(crate) fn guess_content_type(path: &str) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
