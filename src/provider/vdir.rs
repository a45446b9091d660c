//! Virtual directories over flat or lazily-materialized stores.
//!
//! Writing `a/b/c.txt` has to leave `a/` and `a/b/` enumerable, the way a
//! local filesystem would. Adapters call [`prepare_parent_directories`]
//! before every write or copy and use [`partition_listing`] to turn a
//! delimiter listing into files and sub-directories.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{DirListing, ObjectInfo, StorageProvider};
use crate::config::ParentDirPolicy;
use crate::{Error, Result};

/// Strips the leading `/` so the path can be used as an object key.
pub fn object_key(path: &str) -> &str {
    path.trim_start_matches('/')
}

pub fn is_dir_path(path: &str) -> bool {
    path.ends_with('/')
}

/// Parent directory of `path` without slashes at either end, or `""` when
/// the path sits at the root.
pub fn get_parent_dir(path: &str) -> String {
    let key = object_key(path).trim_end_matches('/');
    match key.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => String::new(),
    }
}

/// Last component of `path`, ignoring a trailing `/`.
pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Every ancestor directory of `path`, shallowest first.
pub fn ancestor_dirs(path: &str) -> Vec<String> {
    let parent = get_parent_dir(path);
    if parent.is_empty() {
        return Vec::new();
    }

    let mut dirs = Vec::new();
    let mut current = String::new();
    for component in parent.split('/').filter(|c| !c.is_empty()) {
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(component);
        dirs.push(current.clone());
    }
    dirs
}

/// Listing prefix for `path`: no leading `/`, a trailing `/` unless it is
/// the root.
pub fn dir_prefix(path: &str) -> String {
    let key = object_key(path);
    if key.is_empty() || key == "." {
        return String::new();
    }
    if key.ends_with('/') {
        key.to_string()
    } else {
        format!("{key}/")
    }
}

/// Creates each missing ancestor of `path`, shallowest first. Directories
/// that already exist are fine; any other failure stops the walk.
pub async fn ensure_parent_directories<P>(provider: &P, path: &str) -> Result<()>
where
    P: StorageProvider + ?Sized,
{
    for dir in ancestor_dirs(path) {
        match provider.create_dir(&dir).await {
            Ok(()) => debug!(dir = %dir, "created parent directory"),
            Err(Error::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// [`ensure_parent_directories`] under a policy. With
/// [`ParentDirPolicy::BestEffort`] a failure is logged and swallowed: the
/// write goes ahead, and the new object stays out of directory listings
/// until its parents are created by a later write.
pub async fn prepare_parent_directories<P>(
    provider: &P,
    path: &str,
    policy: ParentDirPolicy,
) -> Result<()>
where
    P: StorageProvider + ?Sized,
{
    match ensure_parent_directories(provider, path).await {
        Ok(()) => Ok(()),
        Err(e) if policy == ParentDirPolicy::BestEffort => {
            warn!(
                path = %path,
                provider = provider.provider_name(),
                "could not create parent directories, object may be missing from listings: {}",
                e
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// One object as returned by a backend listing. Any field may be missing.
#[derive(Debug, Clone, Default)]
pub struct ListedObject<'a> {
    pub key: Option<&'a str>,
    pub size: Option<i64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<&'a str>,
}

/// Splits a delimiter listing of `prefix` into files and sub-directories.
///
/// The marker object for `prefix` itself is dropped, and so is any entry the
/// backend returned without a key, size or modification time.
pub fn partition_listing<'a, O, D>(prefix: &str, objects: O, prefixes: D) -> DirListing
where
    O: IntoIterator<Item = ListedObject<'a>>,
    D: IntoIterator<Item = Option<&'a str>>,
{
    let mut listing = DirListing::default();

    for object in objects {
        let (Some(key), Some(size), Some(last_modified)) =
            (object.key, object.size, object.last_modified)
        else {
            debug!(prefix = %prefix, "skipping listing entry with missing metadata");
            continue;
        };
        if key == prefix || !key.starts_with(prefix) {
            continue;
        }
        if is_dir_path(key) {
            // Marker of a sub-directory returned as a plain object.
            push_dir(&mut listing.dirs, key);
            continue;
        }
        listing.files.push(ObjectInfo::file(
            key,
            size.max(0) as u64,
            object.content_type.map(str::to_string),
            last_modified,
        ));
    }

    for dir in prefixes.into_iter().flatten() {
        if dir == prefix || dir.is_empty() {
            continue;
        }
        push_dir(&mut listing.dirs, dir);
    }

    listing.files.sort_by(|a, b| a.name.cmp(&b.name));
    listing.dirs.sort();
    listing
}

fn push_dir(dirs: &mut Vec<String>, dir: &str) {
    let normalized = if dir.ends_with('/') {
        dir.to_string()
    } else {
        format!("{dir}/")
    };
    if !dirs.contains(&normalized) {
        dirs.push(normalized);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryProvider;

    #[test]
    fn parent_dir_of_nested_root_and_absolute_paths() {
        assert_eq!(get_parent_dir("dir1/subdir/file.txt"), "dir1/subdir");
        assert_eq!(get_parent_dir("file.txt"), "");
        assert_eq!(get_parent_dir("/dir/file.txt"), "dir");
        assert_eq!(get_parent_dir("dir1/subdir/"), "dir1");
    }

    #[test]
    fn ancestors_are_ordered_shallow_to_deep() {
        assert_eq!(ancestor_dirs("a/b/c/file.txt"), vec!["a", "a/b", "a/b/c"]);
        assert_eq!(ancestor_dirs("/a/file.txt"), vec!["a"]);
        assert!(ancestor_dirs("file.txt").is_empty());
    }

    #[test]
    fn listing_prefix_normalization() {
        assert_eq!(dir_prefix(""), "");
        assert_eq!(dir_prefix("/"), "");
        assert_eq!(dir_prefix("."), "");
        assert_eq!(dir_prefix("/docs"), "docs/");
        assert_eq!(dir_prefix("docs/"), "docs/");
    }

    #[test]
    fn base_name_ignores_trailing_slash() {
        assert_eq!(base_name("a/b/"), "b");
        assert_eq!(base_name("a/b.txt"), "b.txt");
        assert_eq!(base_name("top"), "top");
    }

    #[tokio::test]
    async fn ensure_parents_creates_each_ancestor_once_in_order() {
        let provider = MemoryProvider::new();
        ensure_parent_directories(&provider, "dir1/subdir/file.txt").await.unwrap();
        assert_eq!(provider.create_dir_calls(), vec!["dir1", "dir1/subdir"]);
    }

    #[tokio::test]
    async fn ensure_parents_is_a_noop_at_root() {
        let provider = MemoryProvider::new();
        ensure_parent_directories(&provider, "file.txt").await.unwrap();
        assert!(provider.create_dir_calls().is_empty());
    }

    #[tokio::test]
    async fn existing_ancestors_count_as_success() {
        let provider = MemoryProvider::new();
        provider.create_dir("a").await.unwrap();
        ensure_parent_directories(&provider, "a/b/c.txt").await.unwrap();
        assert_eq!(provider.create_dir_calls(), vec!["a", "a", "a/b"]);
        assert!(provider.stat_object("a/b/").await.unwrap().is_dir);
    }

    #[tokio::test]
    async fn policy_decides_whether_failures_propagate() {
        let provider = MemoryProvider::new();
        provider.fail_create_dir(true);

        let strict =
            prepare_parent_directories(&provider, "x/y.txt", ParentDirPolicy::Strict).await;
        assert!(matches!(strict, Err(Error::Backend { .. })));

        prepare_parent_directories(&provider, "x/y.txt", ParentDirPolicy::BestEffort)
            .await
            .unwrap();
    }

    #[test]
    fn partition_skips_marker_and_incomplete_entries() {
        let now = Utc::now();
        let objects = vec![
            ListedObject {
                key: Some("docs/"),
                size: Some(0),
                last_modified: Some(now),
                content_type: None,
            },
            ListedObject {
                key: Some("docs/b.txt"),
                size: Some(3),
                last_modified: Some(now),
                content_type: Some("text/plain"),
            },
            ListedObject {
                key: Some("docs/a.txt"),
                size: Some(5),
                last_modified: Some(now),
                content_type: None,
            },
            ListedObject {
                key: None,
                size: Some(1),
                last_modified: Some(now),
                content_type: None,
            },
            ListedObject {
                key: Some("docs/broken.bin"),
                size: None,
                last_modified: Some(now),
                content_type: None,
            },
        ];
        let prefixes = vec![Some("docs/img/"), None, Some("docs/raw")];

        let listing = partition_listing("docs/", objects, prefixes);

        let names: Vec<_> = listing.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["docs/a.txt", "docs/b.txt"]);
        assert_eq!(listing.files[1].content_type.as_deref(), Some("text/plain"));
        assert_eq!(listing.dirs, vec!["docs/img/", "docs/raw/"]);
    }
}
