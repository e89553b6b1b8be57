use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

/// 本地文件：相对于根目录的路径和大小
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// 以 `./` 开头、`/` 分隔的相对路径
    pub relative_path: String,
    pub path: PathBuf,
    pub size: u64,
}

/// 本地文件系统能力接口
#[async_trait]
pub trait LocalFs: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;

    /// 重命名目录，必要时创建目标的父目录
    async fn rename_dir(&self, from: &Path, to: &Path) -> Result<()>;
}

/// 基于操作系统文件系统的实现
#[derive(Debug, Default, Clone)]
pub struct OsFs;

#[async_trait]
impl LocalFs for OsFs {
    async fn exists(&self, path: &Path) -> bool {
        fs::metadata(path).await.is_ok()
    }

    async fn rename_dir(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("创建目录 {} 失败", parent.display()))?;
        }
        fs::rename(from, to).await?;
        Ok(())
    }
}

/// 规范化为清单使用的相对路径（统一使用 /，前缀 ./）
pub fn to_manifest_path(relative: &Path) -> String {
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    format!("./{}", joined)
}

/// 递归列出 `root` 下的普通文件（不跟随符号链接），跳过 `exclude` 中的顶层文件名
pub async fn list_regular_files(root: &Path, exclude: &[String]) -> Result<Vec<LocalFile>> {
    let root = root.to_path_buf();
    let excluded: Vec<String> = exclude.iter().map(|name| format!("./{}", name)).collect();

    // 使用 spawn_blocking 避免阻塞 async runtime
    tokio::task::spawn_blocking(move || -> Result<Vec<LocalFile>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&root).follow_links(false) {
            let entry = entry.with_context(|| format!("遍历 {} 失败", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&root)?;
            let relative_path = to_manifest_path(relative);
            if excluded.contains(&relative_path) {
                continue;
            }
            let metadata = entry.metadata()?;
            files.push(LocalFile {
                relative_path,
                path: entry.path().to_path_buf(),
                size: metadata.len(),
            });
        }
        Ok(files)
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_regular_files_excludes_top_level_manifests() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"aa").unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"bbb").unwrap();
        std::fs::write(dir.path().join("_MANIFEST_LOCAL.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("sub/_MANIFEST_LOCAL.txt"), b"y").unwrap();

        let mut files = list_regular_files(dir.path(), &["_MANIFEST_LOCAL.txt".to_string()])
            .await
            .unwrap();
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        let paths: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["./a.txt", "./sub/_MANIFEST_LOCAL.txt", "./sub/b.txt"]);
        assert_eq!(files[0].size, 2);
    }

    #[tokio::test]
    async fn test_rename_dir_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("runs/RUN1");
        std::fs::create_dir_all(&from).unwrap();
        let to = dir.path().join("runs-INGESTED/RUN1");

        OsFs.rename_dir(&from, &to).await.unwrap();
        assert!(!OsFs.exists(&from).await);
        assert!(OsFs.exists(&to).await);
    }
}
