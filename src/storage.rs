use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tokio::fs;
use tokio::io::ErrorKind;
use tracing::warn;

use crate::atomic::is_temp_name;

/// Served root directory plus the path resolution rules that keep every
/// request inside it.
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Creates the root if missing and pins its canonical form for the
    /// process lifetime.
    pub async fn open(root: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&root).await?;
        let root = fs::canonicalize(&root).await?;
        Ok(Self { root })
    }

    #[cfg(test)]
    pub async fn open_temp(parent: &Path) -> Self {
        let root = parent.join("served");
        std::fs::create_dir_all(&root).expect("create served root");
        Self::open(root).await.expect("open storage")
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Resolves an untrusted request path to an absolute path under the root.
    ///
    /// `None` resolves to the root itself. A missing final component is
    /// accepted when `allow_missing_leaf` is set, so the same check covers
    /// upload destinations that do not exist yet. Existence of the leaf is
    /// otherwise the caller's concern, not the resolver's.
    pub async fn resolve(
        &self,
        relative: Option<&str>,
        allow_missing_leaf: bool,
    ) -> Result<PathBuf, StorageError> {
        let target = self.root.join(self.normalize(relative)?);
        self.walk_symlink_free(&target, allow_missing_leaf).await?;
        Ok(target)
    }

    /// Lexically normalizes the request path, rejecting anything that could
    /// denote a location above the root before the filesystem is touched.
    fn normalize(&self, relative: Option<&str>) -> Result<PathBuf, StorageError> {
        let mut normalized = PathBuf::new();

        if let Some(value) = relative {
            if value.contains('\0') {
                warn!(path = ?value, "rejected path with null byte");
                return Err(StorageError::Traversal);
            }
            let trimmed = value.trim_start_matches(['/', '\\']);
            for component in Path::new(trimmed).components() {
                match component {
                    Component::Normal(segment) => normalized.push(segment),
                    Component::CurDir => continue,
                    Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                        warn!(path = ?value, "rejected path traversal");
                        return Err(StorageError::Traversal);
                    }
                }
            }
        }

        Ok(normalized)
    }

    /// Walks each component below the root against the real filesystem.
    /// A symlink anywhere in the chain is rejected even when its target
    /// stays inside the root, which also catches links pointing outside.
    async fn walk_symlink_free(
        &self,
        target: &Path,
        allow_missing_leaf: bool,
    ) -> Result<(), StorageError> {
        let relative = target
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::Traversal)?;
        let mut current = self.root.clone();
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            match fs::symlink_metadata(&current).await {
                Ok(metadata) => {
                    if metadata.file_type().is_symlink() {
                        warn!(path = ?relative, "rejected symlink in request path");
                        return Err(StorageError::Traversal);
                    }
                    if components.peek().is_some() && !metadata.is_dir() {
                        return Err(StorageError::Traversal);
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound && allow_missing_leaf => {
                    return Ok(());
                }
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(())
    }

    /// Lists a directory, directories first then case-insensitive by name.
    /// Re-reads the filesystem on every call; nothing is cached.
    pub async fn list_dir(&self, relative: Option<&str>) -> Result<Vec<FileEntry>, StorageError> {
        let target = self.resolve(relative, false).await?;
        let target_meta = fs::metadata(&target).await?;
        if !target_meta.is_dir() {
            return Err(StorageError::NotADirectory);
        }

        let mut dir = fs::read_dir(&target).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            // One unreadable entry (racing delete, dangling link) must not
            // take out the whole listing.
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            let name = entry.file_name().to_string_lossy().to_string();
            if is_temp_name(&name) {
                continue;
            }
            let relative_path = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|_| StorageError::Traversal)?
                .to_string_lossy()
                .replace(std::path::MAIN_SEPARATOR, "/");
            let modified = metadata
                .modified()
                .ok()
                .and_then(|ts| ts.duration_since(UNIX_EPOCH).ok())
                .map(format_timestamp);

            entries.push(FileEntry {
                name,
                path: relative_path,
                is_dir: metadata.is_dir(),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                modified,
            });
        }

        entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        });

        Ok(entries)
    }
}

fn format_timestamp(duration: Duration) -> String {
    let timestamp = UNIX_EPOCH + duration;
    let datetime: DateTime<Utc> = timestamp.into();
    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug)]
pub enum StorageError {
    Traversal,
    NotADirectory,
    Io(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

#[derive(Serialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{Storage, StorageError};
    use tempfile::tempdir;

    #[tokio::test]
    async fn resolve_rejects_parent_segments() {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::open_temp(temp.path()).await;

        for path in [
            "../secret.txt",
            "a/../../secret.txt",
            "..",
            "/../secret.txt",
        ] {
            let result = storage.resolve(Some(path), true).await;
            assert!(
                matches!(result, Err(StorageError::Traversal)),
                "{path} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn resolve_rejects_null_byte() {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::open_temp(temp.path()).await;
        let result = storage.resolve(Some("evil\0.txt"), true).await;
        assert!(matches!(result, Err(StorageError::Traversal)));
    }

    #[tokio::test]
    async fn resolve_treats_absolute_path_as_relative() {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::open_temp(temp.path()).await;
        std::fs::write(storage.root_path().join("etc"), b"x").expect("write");

        let resolved = storage.resolve(Some("/etc"), false).await.expect("resolve");
        assert_eq!(resolved, storage.root_path().join("etc"));
    }

    #[tokio::test]
    async fn resolve_cannot_reach_sibling_with_matching_prefix() {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::open_temp(temp.path()).await;
        let sibling = temp.path().join("served-other");
        std::fs::create_dir_all(&sibling).expect("create sibling");
        std::fs::write(sibling.join("leak.txt"), b"x").expect("write");

        let result = storage
            .resolve(Some("../served-other/leak.txt"), false)
            .await;
        assert!(matches!(result, Err(StorageError::Traversal)));
    }

    #[tokio::test]
    async fn resolve_allows_missing_leaf_for_uploads() {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::open_temp(temp.path()).await;

        let resolved = storage
            .resolve(Some("new-file.bin"), true)
            .await
            .expect("missing leaf should resolve");
        assert_eq!(resolved, storage.root_path().join("new-file.bin"));

        let result = storage.resolve(Some("new-file.bin"), false).await;
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[tokio::test]
    async fn resolve_is_idempotent_for_existing_descendants() {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::open_temp(temp.path()).await;
        let nested = storage.root_path().join("a/b");
        std::fs::create_dir_all(&nested).expect("create nested");
        std::fs::write(nested.join("file.txt"), b"x").expect("write");

        let resolved = storage
            .resolve(Some("a/b/file.txt"), false)
            .await
            .expect("resolve");
        let canonical = std::fs::canonicalize(&resolved).expect("canonicalize");
        assert_eq!(resolved, canonical);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_rejects_symlink_escape() {
        use std::os::unix::fs::symlink;

        let temp = tempdir().expect("tempdir");
        let storage = Storage::open_temp(temp.path()).await;

        let outside = temp.path().join("outside.txt");
        std::fs::write(&outside, b"secret").expect("write outside file");
        symlink(&outside, storage.root_path().join("link")).expect("symlink");

        let result = storage.resolve(Some("link"), false).await;
        assert!(matches!(result, Err(StorageError::Traversal)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_rejects_symlink_directory_component() {
        use std::os::unix::fs::symlink;

        let temp = tempdir().expect("tempdir");
        let storage = Storage::open_temp(temp.path()).await;

        let outside_dir = temp.path().join("outside");
        std::fs::create_dir_all(&outside_dir).expect("create outside dir");
        std::fs::write(outside_dir.join("leak.txt"), b"secret").expect("write");
        symlink(&outside_dir, storage.root_path().join("door")).expect("symlink");

        let result = storage.resolve(Some("door/leak.txt"), false).await;
        assert!(matches!(result, Err(StorageError::Traversal)));
    }

    #[tokio::test]
    async fn list_dir_orders_directories_first_case_insensitive() {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::open_temp(temp.path()).await;
        let root = storage.root_path();
        std::fs::create_dir(root.join("zeta")).expect("mkdir");
        std::fs::create_dir(root.join("Alpha")).expect("mkdir");
        std::fs::write(root.join("beta.txt"), b"1").expect("write");
        std::fs::write(root.join("ALPHA.txt"), b"22").expect("write");

        let entries = storage.list_dir(None).await.expect("list");
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "zeta", "ALPHA.txt", "beta.txt"]);
        assert!(entries[0].is_dir);
        assert_eq!(entries[0].size, 0);
        assert_eq!(entries[3].size, 1);
    }

    #[tokio::test]
    async fn list_dir_empty_root_returns_empty() {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::open_temp(temp.path()).await;
        let entries = storage.list_dir(None).await.expect("list");
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn list_dir_skips_upload_temp_files() {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::open_temp(temp.path()).await;
        let root = storage.root_path();
        std::fs::write(root.join(".video.mp4.abc123.part"), b"partial").expect("write");
        std::fs::write(root.join("done.mp4"), b"full").expect("write");

        let entries = storage.list_dir(None).await.expect("list");
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["done.mp4"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn list_dir_skips_unreadable_entries() {
        use std::os::unix::fs::symlink;

        let temp = tempdir().expect("tempdir");
        let storage = Storage::open_temp(temp.path()).await;
        let root = storage.root_path();
        std::fs::write(root.join("ok.txt"), b"x").expect("write");
        symlink(temp.path().join("gone"), root.join("dangling")).expect("symlink");

        let entries = storage.list_dir(None).await.expect("list");
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["ok.txt"]);
    }

    #[tokio::test]
    async fn list_dir_on_file_fails() {
        let temp = tempdir().expect("tempdir");
        let storage = Storage::open_temp(temp.path()).await;
        std::fs::write(storage.root_path().join("plain.txt"), b"x").expect("write");

        let result = storage.list_dir(Some("plain.txt")).await;
        assert!(matches!(result, Err(StorageError::NotADirectory)));
    }
}
