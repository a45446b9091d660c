//! Local directory backend.
//!
//! A hierarchical store whose directories must exist before anything can be
//! written into them, which is the same contract a file share gives. Writes
//! use the ranged protocol (create with size, resize, write at offset).

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use super::vdir::{self, ListedObject};
use super::{guess_content_type, DirListing, ObjectInfo, StorageProvider, UploadMode};
use crate::config::ParentDirPolicy;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct LocalProvider {
    root: PathBuf,
    parent_dirs: ParentDirPolicy,
}

impl LocalProvider {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if root.as_os_str().is_empty() {
            return Err(Error::Config("local root path is empty".to_string()));
        }
        Ok(Self {
            root,
            parent_dirs: ParentDirPolicy::default(),
        })
    }

    pub fn with_parent_dirs(mut self, policy: ParentDirPolicy) -> Self {
        self.parent_dirs = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, key: &str) -> PathBuf {
        // Keys never escape the root.
        let mut path = self.root.clone();
        for component in key.split('/').filter(|c| !c.is_empty() && *c != "." && *c != "..") {
            path.push(component);
        }
        path
    }

    async fn ensure_file(&self, operation: &'static str, key: &str) -> Result<std::fs::Metadata> {
        let meta = tokio::fs::metadata(self.full_path(key))
            .await
            .map_err(|e| Error::from_io(operation, key, e))?;
        // A directory is not an object under its file name.
        if meta.is_dir() {
            return Err(Error::NotFound(key.to_string()));
        }
        Ok(meta)
    }

    async fn open_for_write(&self, operation: &'static str, key: &str) -> Result<tokio::fs::File> {
        tokio::fs::OpenOptions::new()
            .write(true)
            .open(self.full_path(key))
            .await
            .map_err(|e| Error::from_io(operation, key, e))
    }
}

fn modified_time(meta: &std::fs::Metadata) -> DateTime<Utc> {
    meta.modified().map(DateTime::<Utc>::from).unwrap_or_default()
}

#[async_trait]
impl StorageProvider for LocalProvider {
    fn provider_name(&self) -> &str {
        "local"
    }

    fn upload_mode(&self) -> UploadMode {
        UploadMode::Ranged
    }

    fn set_parent_dirs(&mut self, policy: ParentDirPolicy) {
        self.parent_dirs = policy;
    }

    async fn connect(&self) -> Result<()> {
        let meta = tokio::fs::metadata(&self.root)
            .await
            .map_err(|e| Error::backend("connect", self.root.display().to_string(), e))?;
        if !meta.is_dir() {
            return Err(Error::NotADirectory(self.root.display().to_string()));
        }
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        self.connect().await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn read_object(&self, path: &str) -> Result<Bytes> {
        let key = vdir::object_key(path);
        self.ensure_file("read", key).await?;
        let data = tokio::fs::read(self.full_path(key))
            .await
            .map_err(|e| Error::from_io("read", key, e))?;
        Ok(Bytes::from(data))
    }

    async fn read_range(&self, path: &str, offset: u64, length: u64) -> Result<Bytes> {
        let key = vdir::object_key(path);
        let mut file = tokio::fs::File::open(self.full_path(key))
            .await
            .map_err(|e| Error::from_io("read_range", key, e))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| Error::from_io("read_range", key, e))?;

        let mut buf = Vec::new();
        file.take(length)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| Error::from_io("read_range", key, e))?;
        Ok(Bytes::from(buf))
    }

    async fn write_object(&self, path: &str, data: Bytes) -> Result<()> {
        let key = vdir::object_key(path);
        if key.is_empty() || vdir::is_dir_path(key) {
            return Err(Error::IsADirectory(path.to_string()));
        }
        vdir::prepare_parent_directories(self, key, self.parent_dirs).await?;
        tokio::fs::write(self.full_path(key), &data)
            .await
            .map_err(|e| Error::from_io("write", key, e))?;
        debug!(key = %key, bytes = data.len(), "local write complete");
        Ok(())
    }

    async fn create_file(&self, path: &str, size: u64) -> Result<()> {
        let key = vdir::object_key(path);
        if key.is_empty() || vdir::is_dir_path(key) {
            return Err(Error::IsADirectory(path.to_string()));
        }
        vdir::prepare_parent_directories(self, key, self.parent_dirs).await?;
        let file = tokio::fs::File::create(self.full_path(key))
            .await
            .map_err(|e| Error::from_io("create_file", key, e))?;
        file.set_len(size)
            .await
            .map_err(|e| Error::from_io("create_file", key, e))
    }

    async fn resize_file(&self, path: &str, size: u64) -> Result<()> {
        let key = vdir::object_key(path);
        let file = self.open_for_write("resize_file", key).await?;
        file.set_len(size)
            .await
            .map_err(|e| Error::from_io("resize_file", key, e))
    }

    async fn write_range(&self, path: &str, offset: u64, data: Bytes) -> Result<()> {
        let key = vdir::object_key(path);
        let mut file = self.open_for_write("write_range", key).await?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| Error::from_io("write_range", key, e))?;
        file.write_all(&data)
            .await
            .map_err(|e| Error::from_io("write_range", key, e))?;
        file.flush()
            .await
            .map_err(|e| Error::from_io("write_range", key, e))
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        let key = vdir::object_key(path).trim_end_matches('/');
        if key.is_empty() {
            return Err(Error::AlreadyExists("/".to_string()));
        }
        tokio::fs::create_dir(self.full_path(key))
            .await
            .map_err(|e| Error::from_io("create_dir", key, e))
    }

    async fn stat_object(&self, path: &str) -> Result<ObjectInfo> {
        let key = vdir::object_key(path);
        if key.is_empty() || vdir::is_dir_path(key) {
            let meta = tokio::fs::metadata(self.full_path(key))
                .await
                .map_err(|e| Error::from_io("stat", key, e))?;
            if !meta.is_dir() {
                return Err(Error::NotFound(key.to_string()));
            }
            return Ok(ObjectInfo::directory(key, modified_time(&meta)));
        }

        let meta = self.ensure_file("stat", key).await?;
        Ok(ObjectInfo::file(
            key,
            meta.len(),
            Some(guess_content_type(key)),
            modified_time(&meta),
        ))
    }

    async fn delete_object(&self, path: &str) -> Result<()> {
        let key = vdir::object_key(path);
        if key.is_empty() {
            return Err(Error::Unsupported("deleting the root directory".to_string()));
        }

        let full = self.full_path(key);
        if vdir::is_dir_path(key) {
            let mut entries = tokio::fs::read_dir(&full)
                .await
                .map_err(|e| Error::from_io("delete", key, e))?;
            let has_children = entries
                .next_entry()
                .await
                .map_err(|e| Error::from_io("delete", key, e))?
                .is_some();
            if has_children {
                return Err(Error::DirectoryNotEmpty(key.to_string()));
            }
            return tokio::fs::remove_dir(&full)
                .await
                .map_err(|e| Error::from_io("delete", key, e));
        }

        self.ensure_file("delete", key).await?;
        tokio::fs::remove_file(&full)
            .await
            .map_err(|e| Error::from_io("delete", key, e))
    }

    async fn copy_object(&self, src: &str, dst: &str) -> Result<()> {
        let src_key = vdir::object_key(src);
        let dst_key = vdir::object_key(dst);
        if src_key == dst_key {
            return Err(Error::SameSourceDestination(src_key.to_string()));
        }
        self.ensure_file("copy", src_key).await?;
        vdir::prepare_parent_directories(self, dst_key, self.parent_dirs).await?;
        tokio::fs::copy(self.full_path(src_key), self.full_path(dst_key))
            .await
            .map_err(|e| Error::from_io("copy", dst_key, e))?;
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = vdir::object_key(prefix);
        let parent = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx + 1],
            None => "",
        };

        let mut keys = Vec::new();
        let start = self.full_path(parent);
        if !tokio::fs::try_exists(&start).await.unwrap_or(false) {
            return Ok(keys);
        }

        let mut stack = vec![(start, parent.to_string())];
        while let Some((dir, dir_key)) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| Error::from_io("list", &dir_key, e))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::from_io("list", &dir_key, e))?
            {
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };

                if file_type.is_dir() {
                    let key = format!("{dir_key}{name}/");
                    if key.starts_with(prefix) || prefix.starts_with(&key) {
                        stack.push((entry.path(), key.clone()));
                    }
                    if key.starts_with(prefix) && key != prefix {
                        keys.push(key);
                    }
                } else {
                    let key = format!("{dir_key}{name}");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn list_dir(&self, prefix: &str) -> Result<DirListing> {
        let prefix = vdir::dir_prefix(prefix);
        let path = self.full_path(&prefix);
        // A prefix naming nothing, or naming a file, lists as empty like on a flat store.
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(DirListing::default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(DirListing::default())
            }
            Err(e) => return Err(Error::from_io("list", &prefix, e)),
        }
        let mut entries = tokio::fs::read_dir(path)
            .await
            .map_err(|e| Error::from_io("list", &prefix, e))?;

        let mut files = Vec::new();
        let mut dirs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::from_io("list", &prefix, e))?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            // Entries that vanish or cannot be inspected are left out.
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if meta.is_dir() {
                dirs.push(format!("{prefix}{name}/"));
            } else {
                files.push((format!("{prefix}{name}"), meta.len(), modified_time(&meta)));
            }
        }

        let content_types: Vec<String> =
            files.iter().map(|(k, _, _)| guess_content_type(k)).collect();
        let objects = files
            .iter()
            .zip(content_types.iter())
            .map(|((key, size, modified), content_type)| ListedObject {
                key: Some(key.as_str()),
                size: Some(*size as i64),
                last_modified: Some(*modified),
                content_type: Some(content_type.as_str()),
            });

        Ok(vdir::partition_listing(
            &prefix,
            objects,
            dirs.iter().map(|d| Some(d.as_str())),
        ))
    }
}
