//! 数据目录：路径解析与限制、目录列表、删除与上传文件名清洗。

use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;

use crate::config::PLACEHOLDER_EXTENSION;

/// 解析结果越出数据目录，携带越界的绝对路径。
#[derive(Debug, Error)]
#[error("path {} is outside the data root", .0.display())]
pub struct PathDenied(pub PathBuf);

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 将客户端路径拼接到数据目录并检查是否仍在其内。
    ///
    /// 纯词法检查，不访问磁盘；数据目录内的符号链接既不跟随也不拒绝。
    pub fn resolve(&self, logical: &str) -> Result<PathBuf, PathDenied> {
        let joined = self.root.join(logical.trim_start_matches(['/', '\\']));
        let (Ok(root), Ok(candidate)) = (absolutize(&self.root), absolutize(&joined)) else {
            return Err(PathDenied(normalize(&joined)));
        };
        if candidate.starts_with(&root) {
            Ok(candidate)
        } else {
            Err(PathDenied(candidate))
        }
    }

    /// 判断已解析的路径是否就是数据目录本身。
    pub fn is_root(&self, resolved: &Path) -> bool {
        absolutize(&self.root).is_ok_and(|root| root == resolved)
    }

    pub async fn list_dir(&self, target: &Path) -> io::Result<Vec<FileEntry>> {
        let mut dir = fs::read_dir(target).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_dir: metadata.is_dir(),
                size: metadata.len(),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// 删除文件；目录仅在为空时删除。
    pub async fn remove(&self, target: &Path) -> io::Result<()> {
        if fs::symlink_metadata(target).await?.is_dir() {
            fs::remove_dir(target).await
        } else {
            fs::remove_file(target).await
        }
    }
}

fn absolutize(path: &Path) -> io::Result<PathBuf> {
    Ok(normalize(&std::path::absolute(path)?))
}

/// 不访问文件系统，折叠 `.`、`..` 与重复的分隔符。
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => continue,
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(segment) => normalized.push(segment),
        }
    }
    normalized
}

/// 将上传文件名映射为 `[a-z0-9_-]*.[a-z0-9_-]*` 形式。
pub fn sanitize_filename(filename: &str) -> String {
    let (stem, extension) = match filename.rsplit_once('.') {
        Some((stem, extension)) => (stem, Some(extension)),
        None => (filename, None),
    };

    let safe_stem: String = stem
        .to_lowercase()
        .chars()
        .map(|c| if is_safe_char(c) { c } else { '_' })
        .collect();
    let safe_extension: String = match extension {
        Some(extension) => extension
            .to_lowercase()
            .chars()
            .filter(|c| is_safe_char(*c))
            .collect(),
        None => PLACEHOLDER_EXTENSION.to_string(),
    };

    format!("{safe_stem}.{safe_extension}")
}

fn is_safe_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'
}

#[derive(Debug)]
pub struct FileEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn storage() -> (tempfile::TempDir, Storage) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("data");
        std::fs::create_dir_all(&root).expect("create root");
        (temp, Storage::new(root))
    }

    #[test]
    fn resolves_inside_root() {
        let (temp, storage) = storage();
        let root = temp.path().join("data");
        assert_eq!(storage.resolve("").expect("root"), root);
        assert_eq!(
            storage.resolve("docs/./a.txt").expect("nested"),
            root.join("docs/a.txt")
        );
        assert_eq!(
            storage.resolve("/docs//sub/../b.txt").expect("collapsed"),
            root.join("docs/b.txt")
        );
    }

    #[test]
    fn traversal_is_denied_at_any_depth() {
        let (_temp, storage) = storage();
        for depth in 1..8 {
            let path = format!("{}etc/passwd", "../".repeat(depth));
            assert!(storage.resolve(&path).is_err(), "{path} must be denied");
            let nested = format!("docs/{}etc/passwd", "../".repeat(depth + 1));
            assert!(storage.resolve(&nested).is_err(), "{nested} must be denied");
        }
        assert!(storage.resolve("docs/../../data/x").is_ok());
    }

    #[test]
    fn recognizes_root_after_resolution() {
        let (_temp, storage) = storage();
        assert!(storage.is_root(&storage.resolve("").expect("root")));
        assert!(storage.is_root(&storage.resolve("docs/..").expect("root")));
        assert!(!storage.is_root(&storage.resolve("docs").expect("nested")));
    }

    #[test]
    fn sibling_with_shared_prefix_is_denied() {
        let (temp, storage) = storage();
        std::fs::create_dir_all(temp.path().join("data2")).expect("sibling");
        let err = storage.resolve("../data2/secret").expect_err("sibling denied");
        assert_eq!(err.0, temp.path().join("data2/secret"));
    }

    #[test]
    fn relative_root_is_made_absolute() {
        let storage = Storage::new(PathBuf::from("some/relative/root"));
        let resolved = storage.resolve("file.txt").expect("inside");
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("some/relative/root/file.txt"));
        assert!(storage.resolve("../../../../outside").is_err());
    }

    #[test]
    fn sanitizes_filenames() {
        assert_eq!(sanitize_filename("My File!.JPG"), "my_file_.jpg");
        assert_eq!(sanitize_filename("noext"), "noext.nix");
        assert_eq!(sanitize_filename("archive.tar.gz"), "archive_tar.gz");
        assert_eq!(sanitize_filename("../../etc/passwd"), "____.etcpasswd");
        assert_eq!(sanitize_filename("weird.E x!"), "weird.ex");
        assert_eq!(sanitize_filename(""), ".nix");
        assert_eq!(sanitize_filename("Über.txt"), "_ber.txt");
    }

    #[tokio::test]
    async fn lists_entries_sorted_by_name() {
        let (temp, storage) = storage();
        let root = temp.path().join("data");
        std::fs::write(root.join("b.txt"), b"12345").expect("write");
        std::fs::create_dir(root.join("a-dir")).expect("mkdir");
        std::fs::write(root.join("c.bin"), b"").expect("write");

        let entries = storage.list_dir(&root).await.expect("list");
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a-dir", "b.txt", "c.bin"]);
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].size, 5);
    }

    #[tokio::test]
    async fn remove_deletes_files_and_keeps_non_empty_dirs() {
        let (temp, storage) = storage();
        let root = temp.path().join("data");
        std::fs::write(root.join("gone.txt"), b"x").expect("write");
        std::fs::create_dir(root.join("full")).expect("mkdir");
        std::fs::write(root.join("full/keep.txt"), b"x").expect("write");

        storage.remove(&root.join("gone.txt")).await.expect("remove file");
        assert!(!root.join("gone.txt").exists());
        assert!(storage.remove(&root.join("full")).await.is_err());
        assert!(root.join("full/keep.txt").exists());
    }
}
