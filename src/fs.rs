//! Hierarchical filesystem over any [`StorageProvider`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::FsConfig;
use crate::connection::{ConnectionManager, ConnectionStatus};
use crate::file::{File, OpenOptions};
use crate::instrument::Instrumentation;
use crate::logging::Logger;
use crate::metrics::{
    Metrics, OPERATION_HISTOGRAM, OPERATION_HISTOGRAM_BUCKETS, OPERATION_HISTOGRAM_DESC,
};
use crate::provider::{vdir, DirListing, ObjectInfo, StorageProvider, UploadMode};
use crate::{Error, Result};

/// Filesystem facade: path resolution against a working directory,
/// connection handling and per-operation instrumentation. Backend specifics
/// stay behind `P`.
pub struct CloudFileSystem<P: StorageProvider> {
    provider: Arc<P>,
    connection: ConnectionManager<P>,
    instrumentation: Arc<Instrumentation>,
    histogram_registered: AtomicBool,
    /// Working directory as a key prefix without slashes, `""` for the root.
    cwd: RwLock<String>,
}

impl<P: StorageProvider> CloudFileSystem<P> {
    /// Wraps `provider`, applying the parent directory policy of `config`.
    pub fn new(mut provider: P, config: FsConfig) -> Result<Self> {
        config.validate()?;
        provider.set_parent_dirs(config.parent_directories);
        let provider = Arc::new(provider);
        let connection = ConnectionManager::new(
            provider.clone(),
            config.connect_timeout(),
            config.retry_interval(),
        );
        let instrumentation =
            Instrumentation::new(provider.provider_name(), config.operation_timeout());

        Ok(Self {
            provider,
            connection,
            instrumentation: Arc::new(instrumentation),
            histogram_registered: AtomicBool::new(false),
            cwd: RwLock::new(String::new()),
        })
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn use_logger(&mut self, logger: Arc<dyn Logger>) {
        self.instrumentation = Arc::new(self.instrumentation.with_logger(logger));
    }

    /// Replaces the metrics sink. A sink installed after the first connect
    /// gets the histogram registered right away.
    pub fn use_metrics(&mut self, metrics: Arc<dyn Metrics>) {
        self.instrumentation = Arc::new(self.instrumentation.with_metrics(metrics));
        if *self.histogram_registered.get_mut() {
            self.register_histogram();
        }
    }

    fn register_histogram(&self) {
        self.instrumentation.metrics.new_histogram(
            OPERATION_HISTOGRAM,
            OPERATION_HISTOGRAM_DESC,
            OPERATION_HISTOGRAM_BUCKETS,
        );
    }

    /// Connects to the backend. A down backend is retried in the background
    /// and this still returns `Ok`; see [`ConnectionManager::connect`].
    pub async fn connect(&self) -> Result<()> {
        if !self.histogram_registered.swap(true, Ordering::SeqCst) {
            self.register_histogram();
        }
        self.connection.connect(self.instrumentation.logger.clone()).await
    }

    pub async fn health(&self) -> Result<()> {
        self.instrumentation
            .observe("HEALTH", "", self.provider.health())
            .await
    }

    /// Stops background retry, waits for it, then closes the provider.
    pub async fn close(&self) -> Result<()> {
        self.connection.shutdown().await;
        self.instrumentation
            .observe("CLOSE", "", self.provider.close())
            .await
    }

    pub fn set_disable_retry(&self, disabled: bool) {
        self.connection.set_disable_retry(disabled);
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    /// Resolves `name` against the working directory into an object key.
    /// `.` and `..` are folded; a trailing `/` is kept.
    fn resolve(&self, name: &str) -> Result<String> {
        if name.is_empty() {
            return Err(Error::EmptyName);
        }

        let base = if name.starts_with('/') {
            String::new()
        } else {
            self.cwd.read().unwrap_or_else(PoisonError::into_inner).clone()
        };

        let mut parts: Vec<&str> = base.split('/').filter(|c| !c.is_empty()).collect();
        for component in name.split('/') {
            match component {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                c => parts.push(c),
            }
        }

        let mut key = parts.join("/");
        if name.ends_with('/') && !key.is_empty() {
            key.push('/');
        }
        Ok(key)
    }

    /// Creates or truncates `name` for writing.
    pub async fn create(&self, name: &str) -> Result<File<P>> {
        self.open_file(name, OpenOptions::new().write(true).create(true).truncate(true))
            .await
    }

    /// Opens `name` read-only.
    pub async fn open(&self, name: &str) -> Result<File<P>> {
        self.open_file(name, OpenOptions::new().read(true)).await
    }

    pub async fn open_file(&self, name: &str, options: OpenOptions) -> Result<File<P>> {
        let key = self.resolve(name)?;
        if key.is_empty() || vdir::is_dir_path(&key) {
            return Err(Error::IsADirectory(name.to_string()));
        }

        let existing = match self.stat_key(&key).await {
            Ok(info) => Some(info),
            Err(Error::NotFound(_)) if options.create || options.create_new => None,
            Err(e) => return Err(e),
        };

        if options.create_new && existing.is_some() {
            return Err(Error::AlreadyExists(key));
        }

        let access = options.access();
        if !access.writable() {
            let info = existing.ok_or_else(|| Error::NotFound(key.clone()))?;
            return Ok(File::reader(self.provider.clone(), self.instrumentation.clone(), info));
        }

        let (remote_size, content) = match existing {
            None => (None, Vec::new()),
            Some(_) if options.truncate => {
                self.truncate(&key).await?;
                (Some(0), Vec::new())
            }
            Some(_) => {
                let data = self
                    .instrumentation
                    .observe("READ", &key, self.provider.read_object(&key))
                    .await?;
                (Some(data.len() as u64), data.to_vec())
            }
        };

        Ok(File::writer(
            self.provider.clone(),
            self.instrumentation.clone(),
            key,
            options,
            remote_size,
            content,
        ))
    }

    async fn truncate(&self, key: &str) -> Result<()> {
        match self.provider.upload_mode() {
            UploadMode::Ranged => {
                self.instrumentation
                    .observe("CREATE", key, self.provider.create_file(key, 0))
                    .await
            }
            UploadMode::WholeObject => {
                self.instrumentation
                    .observe("WRITE", key, self.provider.write_object(key, Bytes::new()))
                    .await
            }
        }
    }

    async fn stat_key(&self, key: &str) -> Result<ObjectInfo> {
        self.instrumentation
            .observe("STAT", key, self.provider.stat_object(key))
            .await
    }

    /// Metadata for `name`. Directories must be named with a trailing `/`.
    pub async fn stat(&self, name: &str) -> Result<ObjectInfo> {
        let key = self.resolve(name)?;
        self.stat_key(&key).await
    }

    /// Creates one directory. Its parent must already exist.
    pub async fn mkdir(&self, name: &str) -> Result<()> {
        let dir = vdir::dir_prefix(&self.resolve(name)?);
        if dir.is_empty() {
            return Err(Error::AlreadyExists("/".to_string()));
        }

        let parent = vdir::get_parent_dir(&dir);
        if !parent.is_empty() {
            let info = self.stat_key(&format!("{parent}/")).await?;
            if !info.is_dir {
                return Err(Error::NotADirectory(parent));
            }
        }

        self.instrumentation
            .observe("MKDIR", &dir, self.provider.create_dir(&dir))
            .await
    }

    /// Creates a directory and every missing ancestor. Existing directories
    /// are fine.
    pub async fn mkdir_all(&self, name: &str) -> Result<()> {
        let key = self.resolve(name)?;
        let leaf = key.trim_end_matches('/').to_string();
        if leaf.is_empty() {
            return Ok(());
        }

        let mut dirs = vdir::ancestor_dirs(&key);
        dirs.push(leaf.clone());

        let provider = self.provider.clone();
        self.instrumentation
            .observe("MKDIR", &leaf, async move {
                for dir in dirs {
                    match provider.create_dir(&dir).await {
                        Ok(()) | Err(Error::AlreadyExists(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(())
            })
            .await
    }

    /// Entries of a directory, sub-directories first, each group sorted by
    /// name.
    pub async fn read_dir(&self, name: &str) -> Result<Vec<ObjectInfo>> {
        let listing = self.list_dir(name).await?;
        let epoch = DateTime::<Utc>::default();

        let mut entries: Vec<ObjectInfo> = listing
            .dirs
            .into_iter()
            .map(|d| ObjectInfo::directory(d, epoch))
            .collect();
        entries.extend(listing.files);
        Ok(entries)
    }

    /// Removes a file, or an empty directory named with a trailing `/`.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let key = self.resolve(name)?;
        self.instrumentation
            .observe("DELETE", &key, self.provider.delete_object(&key))
            .await
    }

    /// Removes `name` and everything below it. Missing paths are not an
    /// error.
    pub async fn remove_all(&self, name: &str) -> Result<()> {
        let key = self.resolve(name)?;
        let dir = vdir::dir_prefix(&key);
        if dir.is_empty() {
            return Err(Error::Unsupported("removing the root directory".to_string()));
        }

        let provider = self.provider.clone();
        let file_key = key.trim_end_matches('/').to_string();
        let location = dir.clone();
        self.instrumentation
            .observe("DELETE_ALL", &location, async move {
                let removed = remove_tree(provider.as_ref(), &dir).await?;
                if !removed {
                    ignore_not_found(provider.delete_object(&file_key).await)?;
                }
                Ok(())
            })
            .await
    }

    /// Renames a file or a directory tree by copying then deleting. Renaming
    /// a path onto itself does nothing; moving a directory below itself is
    /// refused. A failed delete after a successful copy is returned as is;
    /// the copy stays in place.
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let src = self.resolve(from)?;
        let dst = self.resolve(to)?;
        if src == dst {
            return Ok(());
        }
        let into_itself = vdir::is_dir_path(&src) && dst.starts_with(&src);
        if src.is_empty()
            || dst.is_empty()
            || into_itself
            || vdir::is_dir_path(&src) != vdir::is_dir_path(&dst)
        {
            return Err(Error::IncompatibleRename {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        if !vdir::is_dir_path(&src) {
            self.copy_key(&src, &dst).await?;
            return self
                .instrumentation
                .observe("DELETE", &src, self.provider.delete_object(&src))
                .await;
        }

        self.stat_key(&src).await?;
        let provider = self.provider.clone();
        let location = format!("{src} -> {dst}");
        self.instrumentation
            .observe("RENAME", &location, async move {
                rename_tree(provider.as_ref(), &src, &dst).await
            })
            .await
    }

    fn set_cwd(&self, key: String) {
        *self.cwd.write().unwrap_or_else(PoisonError::into_inner) = key;
    }

    /// Changes the working directory. The target must exist.
    pub async fn chdir(&self, name: &str) -> Result<()> {
        let dir = vdir::dir_prefix(&self.resolve(name)?);
        if !dir.is_empty() {
            let info = self.stat_key(&dir).await?;
            if !info.is_dir {
                return Err(Error::NotADirectory(name.to_string()));
            }
        }
        debug!(cwd = %dir, "changed working directory");
        self.set_cwd(dir.trim_end_matches('/').to_string());
        Ok(())
    }

    /// Working directory as an absolute path.
    pub fn getwd(&self) -> String {
        format!("/{}", self.cwd.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub async fn stat_object(&self, path: &str) -> Result<ObjectInfo> {
        self.stat(path).await
    }

    pub async fn delete_object(&self, path: &str) -> Result<()> {
        self.remove(path).await
    }

    pub async fn copy_object(&self, src: &str, dst: &str) -> Result<()> {
        let src = self.resolve(src)?;
        let dst = self.resolve(dst)?;
        self.copy_key(&src, &dst).await
    }

    async fn copy_key(&self, src: &str, dst: &str) -> Result<()> {
        let location = format!("{src} -> {dst}");
        self.instrumentation
            .observe("COPY", &location, self.provider.copy_object(src, dst))
            .await
    }

    pub async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let key = self.resolve(prefix)?;
        self.instrumentation
            .observe("LIST", &key, self.provider.list_objects(&key))
            .await
    }

    pub async fn list_dir(&self, prefix: &str) -> Result<DirListing> {
        let key = vdir::dir_prefix(&self.resolve(prefix)?);
        self.instrumentation
            .observe("LIST", &key, self.provider.list_dir(&key))
            .await
    }
}

impl<P: StorageProvider> std::fmt::Debug for CloudFileSystem<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudFileSystem")
            .field("provider", &self.provider)
            .field("connection", &self.connection)
            .field("cwd", &self.getwd())
            .finish()
    }
}

fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(Error::NotFound(_)) => Ok(()),
        other => other,
    }
}

/// Deletes every key under `dir`, deepest first, then its marker. Returns
/// whether anything was there.
async fn remove_tree<P: StorageProvider + ?Sized>(provider: &P, dir: &str) -> Result<bool> {
    let mut keys = provider.list_objects(dir).await?;
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    let found_children = !keys.is_empty();

    for key in &keys {
        ignore_not_found(provider.delete_object(key).await)?;
    }

    match provider.delete_object(dir).await {
        Ok(()) => Ok(true),
        Err(Error::NotFound(_)) => Ok(found_children),
        Err(e) => Err(e),
    }
}

async fn rename_tree<P>(provider: &P, src: &str, dst: &str) -> Result<()>
where
    P: StorageProvider + ?Sized,
{
    vdir::ensure_parent_directories(provider, dst).await?;
    match provider.create_dir(dst).await {
        Ok(()) | Err(Error::AlreadyExists(_)) => {}
        Err(e) => return Err(e),
    }

    let mut keys = provider.list_objects(src).await?;
    keys.sort();
    for key in &keys {
        let target = format!("{dst}{}", &key[src.len()..]);
        if vdir::is_dir_path(key) {
            match provider.create_dir(&target).await {
                Ok(()) | Err(Error::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }
        } else {
            provider.copy_object(key, &target).await?;
        }
    }

    remove_tree(provider, src).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::testing::RecordingLogger;
    use crate::metrics::testing::RecordingMetrics;
    use crate::config::ParentDirPolicy;
    use crate::provider::MemoryProvider;

    async fn put(provider: &MemoryProvider, path: &str, data: &'static [u8]) {
        provider.write_object(path, Bytes::from_static(data)).await.unwrap();
    }

    #[test]
    fn names_resolve_against_the_working_directory() {
        let fs = CloudFileSystem::new(MemoryProvider::new(), FsConfig::default()).unwrap();
        assert_eq!(fs.resolve("/a/b.txt").unwrap(), "a/b.txt");
        assert_eq!(fs.resolve("a/./b/../c/").unwrap(), "a/c/");
        assert!(matches!(fs.resolve(""), Err(Error::EmptyName)));

        fs.set_cwd("docs/2024".to_string());
        assert_eq!(fs.getwd(), "/docs/2024");
        assert_eq!(fs.resolve("x.txt").unwrap(), "docs/2024/x.txt");
        assert_eq!(fs.resolve("../x.txt").unwrap(), "docs/x.txt");
        assert_eq!(fs.resolve("/x.txt").unwrap(), "x.txt");
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = FsConfig {
            operation_timeout_secs: 0,
            ..FsConfig::default()
        };
        let err = CloudFileSystem::new(MemoryProvider::new(), config).unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn every_call_is_measured_and_logged() {
        let provider = MemoryProvider::new();
        put(&provider, "a.txt", b"a").await;
        let logger = Arc::new(RecordingLogger::default());
        let metrics = Arc::new(RecordingMetrics::default());
        let mut fs = CloudFileSystem::new(provider, FsConfig::default()).unwrap();
        fs.use_logger(logger.clone());
        fs.use_metrics(metrics.clone());

        fs.stat("a.txt").await.unwrap();
        assert!(fs.stat("missing.txt").await.unwrap_err().is_not_found());

        let stats = metrics.samples_for("STAT");
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].label("status"), Some("SUCCESS"));
        assert_eq!(stats[1].label("status"), Some("ERROR"));
        assert_eq!(stats[0].label("provider"), Some("memory"));
        assert_eq!(logger.operations.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn histogram_is_registered_on_first_connect_only() {
        let metrics = Arc::new(RecordingMetrics::default());
        let mut fs = CloudFileSystem::new(MemoryProvider::new(), FsConfig::default()).unwrap();
        fs.use_metrics(metrics.clone());

        fs.connect().await.unwrap();
        fs.connect().await.unwrap();

        assert_eq!(
            *metrics.registered.lock().unwrap(),
            vec![OPERATION_HISTOGRAM.to_string()]
        );
        assert!(fs.is_connected());
        assert_eq!(fs.provider().connect_calls(), 1);
    }

    #[tokio::test]
    async fn sink_swapped_after_connect_gets_the_histogram() {
        let first = Arc::new(RecordingMetrics::default());
        let second = Arc::new(RecordingMetrics::default());
        let mut fs = CloudFileSystem::new(MemoryProvider::new(), FsConfig::default()).unwrap();
        fs.use_metrics(first.clone());
        fs.connect().await.unwrap();

        fs.use_metrics(second.clone());
        fs.connect().await.unwrap();
        put(fs.provider(), "a.txt", b"a").await;
        fs.stat("a.txt").await.unwrap();

        assert_eq!(first.registered.lock().unwrap().len(), 1);
        assert_eq!(
            *second.registered.lock().unwrap(),
            vec![OPERATION_HISTOGRAM.to_string()]
        );
        assert_eq!(second.samples_for("STAT").len(), 1);
    }

    #[tokio::test]
    async fn sink_installed_before_connect_waits_for_it() {
        let metrics = Arc::new(RecordingMetrics::default());
        let mut fs = CloudFileSystem::new(MemoryProvider::new(), FsConfig::default()).unwrap();
        fs.use_metrics(metrics.clone());
        assert!(metrics.registered.lock().unwrap().is_empty());

        fs.connect().await.unwrap();
        assert_eq!(metrics.registered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stat_and_remove_dispatch_on_trailing_slash() {
        let provider = MemoryProvider::new();
        put(&provider, "docs/readme.md", b"hi").await;
        let fs = CloudFileSystem::new(provider.clone(), FsConfig::default()).unwrap();

        assert!(fs.stat("docs/").await.unwrap().is_dir);
        assert!(fs.stat("docs").await.unwrap_err().is_not_found());
        assert!(matches!(
            fs.remove("docs/").await,
            Err(Error::DirectoryNotEmpty(_))
        ));
        fs.remove("docs/readme.md").await.unwrap();
        fs.remove("docs/").await.unwrap();
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn mkdir_requires_parent_and_mkdir_all_does_not() {
        let provider = MemoryProvider::new();
        let fs = CloudFileSystem::new(provider.clone(), FsConfig::default()).unwrap();

        assert!(fs.mkdir("a/b").await.unwrap_err().is_not_found());
        fs.mkdir_all("a/b/c").await.unwrap();
        fs.mkdir_all("a/b/c").await.unwrap();
        assert!(provider.contains("a/"));
        assert!(provider.contains("a/b/c/"));
        assert!(fs.mkdir("a/b").await.unwrap_err().is_already_exists());
        fs.mkdir("a/d").await.unwrap();
    }

    #[tokio::test]
    async fn open_existing_without_truncate_keeps_content() {
        let provider = MemoryProvider::new();
        put(&provider, "log.txt", b"one\n").await;
        let fs = CloudFileSystem::new(provider.clone(), FsConfig::default()).unwrap();

        let mut file = fs
            .open_file("log.txt", OpenOptions::new().append(true))
            .await
            .unwrap();
        file.write(b"two\n").await.unwrap();
        file.close().await.unwrap();
        assert_eq!(provider.read_object("log.txt").await.unwrap(), "one\ntwo\n");

        let file = fs.create("log.txt").await.unwrap();
        assert_eq!(file.size(), 0);
        assert_eq!(provider.read_object("log.txt").await.unwrap(), "");
        drop(file);

        assert!(matches!(
            fs.open_file("log.txt", OpenOptions::new().write(true).create_new(true))
                .await,
            Err(Error::AlreadyExists(_))
        ));
        assert!(fs.open("nope.txt").await.unwrap_err().is_not_found());
        assert!(matches!(fs.open("dir/").await, Err(Error::IsADirectory(_))));
    }

    #[tokio::test]
    async fn directory_rename_moves_the_whole_tree() {
        let provider = MemoryProvider::new();
        put(&provider, "src/a.txt", b"a").await;
        put(&provider, "src/sub/b.txt", b"b").await;
        let fs = CloudFileSystem::new(provider.clone(), FsConfig::default()).unwrap();

        fs.rename("src/", "dst/").await.unwrap();

        assert_eq!(provider.read_object("dst/a.txt").await.unwrap(), "a");
        assert_eq!(provider.read_object("dst/sub/b.txt").await.unwrap(), "b");
        assert!(fs.list_objects("src/").await.unwrap().is_empty());
        assert!(!provider.contains("src/"));
    }

    #[tokio::test]
    async fn directory_cannot_move_below_itself() {
        let provider = MemoryProvider::new();
        put(&provider, "a/x.txt", b"x").await;
        let fs = CloudFileSystem::new(provider.clone(), FsConfig::default()).unwrap();

        let err = fs.rename("a/", "a/b/").await.unwrap_err();
        assert!(matches!(err, Error::IncompatibleRename { .. }));
        assert!(fs.rename("/a/", "a/b/c/").await.is_err());

        assert_eq!(provider.read_object("a/x.txt").await.unwrap(), "x");
        assert!(!provider.contains("a/b/x.txt"));
        assert!(!provider.contains("a/b/"));
    }

    #[tokio::test]
    async fn sibling_with_shared_name_prefix_is_not_below_source() {
        let provider = MemoryProvider::new();
        put(&provider, "a/x.txt", b"x").await;
        let fs = CloudFileSystem::new(provider.clone(), FsConfig::default()).unwrap();

        fs.rename("a/", "ab/").await.unwrap();
        assert_eq!(provider.read_object("ab/x.txt").await.unwrap(), "x");
    }

    #[tokio::test]
    async fn failed_delete_after_copy_keeps_both_objects() {
        let provider = MemoryProvider::new();
        put(&provider, "a.txt", b"a").await;
        let fs = CloudFileSystem::new(provider.clone(), FsConfig::default()).unwrap();
        provider.fail_delete(true);

        let err = fs.rename("a.txt", "b.txt").await.unwrap_err();
        assert!(matches!(err, Error::Backend { operation: "delete", .. }));
        assert_eq!(provider.read_object("a.txt").await.unwrap(), "a");
        assert_eq!(provider.read_object("b.txt").await.unwrap(), "a");
    }

    #[tokio::test]
    async fn strict_parent_policy_aborts_the_write() {
        let provider = MemoryProvider::new();
        let config = FsConfig {
            parent_directories: ParentDirPolicy::Strict,
            ..FsConfig::default()
        };
        let fs = CloudFileSystem::new(provider.clone(), config).unwrap();
        provider.fail_create_dir(true);

        let mut file = fs.create("a/b.txt").await.unwrap();
        file.write(b"data").await.unwrap();
        let err = file.close().await.unwrap_err();

        assert!(matches!(err, Error::Backend { operation: "create_dir", .. }));
        assert!(!provider.contains("a/b.txt"));
    }

    #[tokio::test]
    async fn best_effort_parent_policy_overrides_the_provider() {
        let provider = MemoryProvider::new().with_parent_dirs(ParentDirPolicy::Strict);
        let fs = CloudFileSystem::new(provider.clone(), FsConfig::default()).unwrap();
        provider.fail_create_dir(true);

        let mut file = fs.create("a/b.txt").await.unwrap();
        file.write(b"data").await.unwrap();
        file.close().await.unwrap();

        assert_eq!(provider.read_object("a/b.txt").await.unwrap(), "data");
        assert!(!provider.contains("a/"));
    }

    #[tokio::test]
    async fn remove_all_clears_nested_keys() {
        let provider = MemoryProvider::new();
        put(&provider, "tmp/a/b/c.txt", b"c").await;
        put(&provider, "tmp/d.txt", b"d").await;
        put(&provider, "keep.txt", b"k").await;
        let fs = CloudFileSystem::new(provider.clone(), FsConfig::default()).unwrap();

        fs.remove_all("tmp").await.unwrap();
        fs.remove_all("tmp").await.unwrap();
        fs.remove_all("keep.txt").await.unwrap();

        assert!(provider.is_empty());
        assert!(matches!(fs.remove_all("/").await, Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn chdir_needs_an_existing_directory() {
        let provider = MemoryProvider::new();
        put(&provider, "projects/x/notes.md", b"n").await;
        let fs = CloudFileSystem::new(provider, FsConfig::default()).unwrap();

        assert!(fs.chdir("nowhere").await.unwrap_err().is_not_found());
        fs.chdir("projects/x").await.unwrap();
        assert_eq!(fs.getwd(), "/projects/x");
        assert_eq!(fs.stat("notes.md").await.unwrap().size, 1);
        fs.chdir("..").await.unwrap();
        assert_eq!(fs.getwd(), "/projects");
        fs.chdir("/").await.unwrap();
        assert_eq!(fs.getwd(), "/");
    }
}
