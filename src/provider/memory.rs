//! In-memory flat object store.
//!
//! Behaves like a bucket: keys are flat, directories are zero-byte `dir/`
//! markers or shared prefixes. Clones share the same store, which lets a test
//! keep a handle for inspection after giving one to a filesystem. Failure
//! injection covers the connection and directory paths.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::vdir::{self, ListedObject};
use super::{guess_content_type, DirListing, ObjectInfo, StorageProvider, UploadMode};
use crate::config::ParentDirPolicy;
use crate::{Error, Result};

const FAIL_FOREVER: usize = usize::MAX;

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Vec<u8>,
    content_type: Option<String>,
    modified: DateTime<Utc>,
}

#[derive(Debug)]
struct MemoryInner {
    objects: RwLock<BTreeMap<String, MemoryObject>>,
    upload_mode: UploadMode,
    parent_dirs: RwLock<ParentDirPolicy>,
    connect_delay: Option<Duration>,
    failing_connects: AtomicUsize,
    fail_create_dir: AtomicBool,
    fail_delete: AtomicBool,
    connect_calls: AtomicUsize,
    resize_calls: AtomicUsize,
    upload_calls: AtomicUsize,
    create_dir_calls: Mutex<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct MemoryProvider {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::build(UploadMode::WholeObject, ParentDirPolicy::BestEffort, None)
    }

    /// A store that takes writes as create/resize/range uploads, like a file
    /// share.
    pub fn ranged() -> Self {
        Self::build(UploadMode::Ranged, ParentDirPolicy::BestEffort, None)
    }

    pub fn with_parent_dirs(mut self, policy: ParentDirPolicy) -> Self {
        self.set_parent_dirs(policy);
        self
    }

    /// Every handshake takes `delay` before answering.
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        Self::build(self.inner.upload_mode, self.parent_dirs(), Some(delay))
    }

    fn build(
        upload_mode: UploadMode,
        parent_dirs: ParentDirPolicy,
        connect_delay: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                objects: RwLock::new(BTreeMap::new()),
                upload_mode,
                parent_dirs: RwLock::new(parent_dirs),
                connect_delay,
                failing_connects: AtomicUsize::new(0),
                fail_create_dir: AtomicBool::new(false),
                fail_delete: AtomicBool::new(false),
                connect_calls: AtomicUsize::new(0),
                resize_calls: AtomicUsize::new(0),
                upload_calls: AtomicUsize::new(0),
                create_dir_calls: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The next `n` handshakes fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.inner.failing_connects.store(n, Ordering::SeqCst);
    }

    pub fn fail_connects_forever(&self) {
        self.inner.failing_connects.store(FAIL_FOREVER, Ordering::SeqCst);
    }

    pub fn fail_create_dir(&self, fail: bool) {
        self.inner.fail_create_dir.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.inner.fail_delete.store(fail, Ordering::SeqCst);
    }

    fn parent_dirs(&self) -> ParentDirPolicy {
        *self.inner.parent_dirs.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connect_calls(&self) -> usize {
        self.inner.connect_calls.load(Ordering::SeqCst)
    }

    pub fn resize_calls(&self) -> usize {
        self.inner.resize_calls.load(Ordering::SeqCst)
    }

    /// Whole-object writes plus range writes.
    pub fn upload_calls(&self) -> usize {
        self.inner.upload_calls.load(Ordering::SeqCst)
    }

    /// Every `create_dir` call so far, including ones that found the
    /// directory already present.
    pub fn create_dir_calls(&self) -> Vec<String> {
        self.inner
            .create_dir_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.read_objects().contains_key(vdir::object_key(path))
    }

    pub fn len(&self) -> usize {
        self.read_objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_objects(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, MemoryObject>> {
        self.inner.objects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_objects(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, MemoryObject>> {
        self.inner.objects.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn has_prefix(&self, prefix: &str) -> bool {
        self.read_objects()
            .range(prefix.to_string()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(prefix))
    }

    fn file_object(path: &str, data: Vec<u8>) -> MemoryObject {
        MemoryObject {
            data,
            content_type: Some(guess_content_type(path)),
            modified: Utc::now(),
        }
    }
}

fn denied(message: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::PermissionDenied, message.to_string())
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    fn provider_name(&self) -> &str {
        "memory"
    }

    fn upload_mode(&self) -> UploadMode {
        self.inner.upload_mode
    }

    fn set_parent_dirs(&mut self, policy: ParentDirPolicy) {
        *self.inner.parent_dirs.write().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    async fn connect(&self) -> Result<()> {
        self.inner.connect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.inner.connect_delay {
            tokio::time::sleep(delay).await;
        }

        let remaining = self.inner.failing_connects.load(Ordering::SeqCst);
        if remaining == 0 {
            return Ok(());
        }
        if remaining != FAIL_FOREVER {
            self.inner.failing_connects.store(remaining - 1, Ordering::SeqCst);
        }
        Err(Error::backend(
            "connect",
            "",
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "memory store unavailable"),
        ))
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn read_object(&self, path: &str) -> Result<Bytes> {
        let key = vdir::object_key(path);
        self.read_objects()
            .get(key)
            .filter(|_| !vdir::is_dir_path(key))
            .map(|o| Bytes::from(o.data.clone()))
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn read_range(&self, path: &str, offset: u64, length: u64) -> Result<Bytes> {
        let key = vdir::object_key(path);
        let objects = self.read_objects();
        let object = objects.get(key).ok_or_else(|| Error::NotFound(key.to_string()))?;
        let len = object.data.len() as u64;
        let start = offset.min(len) as usize;
        let end = offset.saturating_add(length).min(len) as usize;
        Ok(Bytes::copy_from_slice(&object.data[start..end]))
    }

    async fn write_object(&self, path: &str, data: Bytes) -> Result<()> {
        let key = vdir::object_key(path);
        if key.is_empty() || vdir::is_dir_path(key) {
            return Err(Error::IsADirectory(path.to_string()));
        }
        vdir::prepare_parent_directories(self, key, self.parent_dirs()).await?;
        self.inner.upload_calls.fetch_add(1, Ordering::SeqCst);
        self.write_objects()
            .insert(key.to_string(), Self::file_object(key, data.to_vec()));
        Ok(())
    }

    async fn create_file(&self, path: &str, size: u64) -> Result<()> {
        if self.inner.upload_mode != UploadMode::Ranged {
            return Err(Error::Unsupported(format!("create_file on {path}")));
        }
        let key = vdir::object_key(path);
        vdir::prepare_parent_directories(self, key, self.parent_dirs()).await?;
        self.write_objects()
            .insert(key.to_string(), Self::file_object(key, vec![0; size as usize]));
        Ok(())
    }

    async fn resize_file(&self, path: &str, size: u64) -> Result<()> {
        if self.inner.upload_mode != UploadMode::Ranged {
            return Err(Error::Unsupported(format!("resize_file on {path}")));
        }
        let key = vdir::object_key(path);
        self.inner.resize_calls.fetch_add(1, Ordering::SeqCst);
        let mut objects = self.write_objects();
        let object = objects.get_mut(key).ok_or_else(|| Error::NotFound(key.to_string()))?;
        object.data.resize(size as usize, 0);
        object.modified = Utc::now();
        Ok(())
    }

    async fn write_range(&self, path: &str, offset: u64, data: Bytes) -> Result<()> {
        if self.inner.upload_mode != UploadMode::Ranged {
            return Err(Error::Unsupported(format!("write_range on {path}")));
        }
        let key = vdir::object_key(path);
        self.inner.upload_calls.fetch_add(1, Ordering::SeqCst);
        let mut objects = self.write_objects();
        let object = objects.get_mut(key).ok_or_else(|| Error::NotFound(key.to_string()))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > object.data.len() {
            return Err(Error::InvalidOffset(end as i64));
        }
        object.data[start..end].copy_from_slice(&data);
        object.modified = Utc::now();
        Ok(())
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        let prefix = vdir::dir_prefix(path);
        self.inner
            .create_dir_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prefix.trim_end_matches('/').to_string());

        if self.inner.fail_create_dir.load(Ordering::SeqCst) {
            return Err(Error::backend(
                "create_dir",
                prefix,
                denied("directory creation disabled"),
            ));
        }
        if prefix.is_empty() {
            return Err(Error::AlreadyExists("/".to_string()));
        }

        let mut objects = self.write_objects();
        if objects.contains_key(&prefix) {
            return Err(Error::AlreadyExists(prefix));
        }
        objects.insert(
            prefix,
            MemoryObject {
                data: Vec::new(),
                content_type: None,
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn stat_object(&self, path: &str) -> Result<ObjectInfo> {
        let key = vdir::object_key(path);
        if vdir::is_dir_path(key) || key.is_empty() {
            if let Some(marker) = self.read_objects().get(key) {
                return Ok(ObjectInfo::directory(key, marker.modified));
            }
            if key.is_empty() || self.has_prefix(key) {
                return Ok(ObjectInfo::directory(key, DateTime::<Utc>::default()));
            }
            return Err(Error::NotFound(key.to_string()));
        }

        self.read_objects()
            .get(key)
            .map(|o| ObjectInfo::file(key, o.data.len() as u64, o.content_type.clone(), o.modified))
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn delete_object(&self, path: &str) -> Result<()> {
        let key = vdir::object_key(path);
        if self.inner.fail_delete.load(Ordering::SeqCst) {
            return Err(Error::backend("delete", key, denied("deletes disabled")));
        }
        let mut objects = self.write_objects();
        if vdir::is_dir_path(key) {
            let mut under = objects
                .range(key.to_string()..)
                .take_while(|(k, _)| k.starts_with(key));
            let has_children = under.any(|(k, _)| k != key);
            if has_children {
                return Err(Error::DirectoryNotEmpty(key.to_string()));
            }
        }
        objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn copy_object(&self, src: &str, dst: &str) -> Result<()> {
        let src_key = vdir::object_key(src);
        let dst_key = vdir::object_key(dst);
        if src_key == dst_key {
            return Err(Error::SameSourceDestination(src_key.to_string()));
        }
        let object = self
            .read_objects()
            .get(src_key)
            .cloned()
            .ok_or_else(|| Error::NotFound(src_key.to_string()))?;

        vdir::prepare_parent_directories(self, dst_key, self.parent_dirs()).await?;
        self.write_objects().insert(
            dst_key.to_string(),
            MemoryObject {
                modified: Utc::now(),
                ..object
            },
        );
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = vdir::object_key(prefix);
        Ok(self
            .read_objects()
            .keys()
            .filter(|k| k.starts_with(prefix) && k.as_str() != prefix)
            .cloned()
            .collect())
    }

    async fn list_dir(&self, prefix: &str) -> Result<DirListing> {
        let prefix = vdir::dir_prefix(prefix);
        let objects = self.read_objects();

        let mut files = Vec::new();
        let mut common_prefixes = BTreeSet::new();
        for (key, object) in objects.iter().filter(|(k, _)| k.starts_with(&prefix)) {
            let rest = &key[prefix.len()..];
            match rest.find('/') {
                Some(idx) => {
                    common_prefixes.insert(&key[..prefix.len() + idx + 1]);
                }
                None => files.push(ListedObject {
                    key: Some(key.as_str()),
                    size: Some(object.data.len() as i64),
                    last_modified: Some(object.modified),
                    content_type: object.content_type.as_deref(),
                }),
            }
        }

        Ok(vdir::partition_listing(
            &prefix,
            files,
            common_prefixes.into_iter().map(Some),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_creates_markers_for_every_ancestor() {
        let store = MemoryProvider::new();
        store
            .write_object("a/b/c.txt", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        assert!(store.contains("a/"));
        assert!(store.contains("a/b/"));
        assert_eq!(store.read_object("/a/b/c.txt").await.unwrap(), "hello");

        let root = store.list_dir("").await.unwrap();
        assert_eq!(root.dirs, vec!["a/"]);
        assert!(root.files.is_empty());

        let nested = store.list_dir("a/b").await.unwrap();
        assert_eq!(nested.files.len(), 1);
        assert_eq!(nested.files[0].name, "a/b/c.txt");
        assert_eq!(nested.files[0].content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn range_reads_clamp_at_end() {
        let store = MemoryProvider::new();
        store.write_object("f.bin", Bytes::from_static(b"0123456789")).await.unwrap();

        assert_eq!(store.read_range("f.bin", 2, 3).await.unwrap(), "234");
        assert_eq!(store.read_range("f.bin", 8, 10).await.unwrap(), "89");
        assert!(store.read_range("f.bin", 20, 4).await.unwrap().is_empty());
        assert!(store.read_range("missing", 0, 1).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn stat_and_delete_dispatch_on_trailing_slash() {
        let store = MemoryProvider::new();
        store.write_object("d/file.txt", Bytes::from_static(b"x")).await.unwrap();

        assert!(store.stat_object("d/").await.unwrap().is_dir);
        assert!(store.stat_object("d").await.unwrap_err().is_not_found());
        assert!(!store.stat_object("d/file.txt").await.unwrap().is_dir);

        let err = store.delete_object("d/").await.unwrap_err();
        assert!(matches!(err, Error::DirectoryNotEmpty(_)));

        store.delete_object("d/file.txt").await.unwrap();
        store.delete_object("d/").await.unwrap();
        assert!(store.is_empty());
        assert!(store.delete_object("d/").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn copy_to_new_subpath_is_listed() {
        let store = MemoryProvider::new();
        store.write_object("src.txt", Bytes::from_static(b"data")).await.unwrap();
        store.copy_object("src.txt", "archive/2024/src.txt").await.unwrap();

        let listing = store.list_dir("archive/").await.unwrap();
        assert_eq!(listing.dirs, vec!["archive/2024/"]);

        let err = store.copy_object("src.txt", "/src.txt").await.unwrap_err();
        assert!(matches!(err, Error::SameSourceDestination(_)));
    }

    #[tokio::test]
    async fn ranged_store_requires_existing_object_for_resize() {
        let store = MemoryProvider::ranged();
        assert!(store.resize_file("nope", 4).await.unwrap_err().is_not_found());

        store.create_file("dir/f", 2).await.unwrap();
        store.resize_file("dir/f", 4).await.unwrap();
        store.write_range("dir/f", 0, Bytes::from_static(b"abcd")).await.unwrap();
        assert_eq!(store.read_object("dir/f").await.unwrap(), "abcd");
        assert!(store.contains("dir/"));

        let whole = MemoryProvider::new();
        assert!(matches!(
            whole.create_file("f", 1).await,
            Err(Error::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn connect_failures_are_counted_down() {
        let store = MemoryProvider::new();
        store.fail_next_connects(2);
        assert!(store.connect().await.is_err());
        assert!(store.connect().await.is_err());
        store.connect().await.unwrap();
        assert_eq!(store.connect_calls(), 3);
    }
}
