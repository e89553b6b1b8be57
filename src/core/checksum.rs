//! 本地清单构建 - 遍历文件夹并计算每个文件的摘要

use crate::core::digest::DigestAlgorithm;
use crate::core::error::IngestError;
use crate::core::manifest::{Manifest, ManifestEntry};
use crate::storage::local::{list_regular_files, LocalFile};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// 生成清单头部（hashdeep 格式）
pub fn manifest_header(algorithm: DigestAlgorithm, folder: &Path) -> String {
    format!(
        "%%%% HASHDEEP-1.0\n%%%% size,{},filename\n## Invoked from: {}\n## \n",
        algorithm.name(),
        folder.display()
    )
}

/// 本地清单构建器
#[derive(Debug, Clone)]
pub struct LocalManifestBuilder {
    algorithm: DigestAlgorithm,
    threads: usize,
    /// 清单文件名，两者都不计入清单
    manifest_local: String,
    manifest_remote: String,
}

impl LocalManifestBuilder {
    pub fn new(
        algorithm: DigestAlgorithm,
        threads: usize,
        manifest_local: impl Into<String>,
        manifest_remote: impl Into<String>,
    ) -> Self {
        Self {
            algorithm,
            threads: threads.max(1),
            manifest_local: manifest_local.into(),
            manifest_remote: manifest_remote.into(),
        }
    }

    /// 为 `folder` 计算清单并写入 `folder/<manifest_local>`
    ///
    /// 失败时删除已写入的部分清单文件。
    pub async fn build(&self, folder: &Path) -> Result<(PathBuf, Manifest), IngestError> {
        let out_path = folder.join(&self.manifest_local);
        info!("计算本地清单: {} -> {}", folder.display(), out_path.display());

        let mut file = tokio::fs::File::create(&out_path)
            .await
            .map_err(|e| IngestError::local_build(format!("创建 {} 失败: {}", out_path.display(), e)))?;

        // 出错时删除部分写入的清单
        let guard = scopeguard::guard(out_path.clone(), |path| {
            let _ = std::fs::remove_file(&path);
        });

        file.write_all(manifest_header(self.algorithm, folder).as_bytes())
            .await
            .map_err(IngestError::local_build)?;

        let exclude = [self.manifest_local.clone(), self.manifest_remote.clone()];
        let files = list_regular_files(folder, &exclude)
            .await
            .map_err(|e| IngestError::local_build(format!("{:#}", e)))?;
        debug!("{} 个文件待计算摘要", files.len());

        let manifest = self.hash_all(files).await?;

        file.write_all(manifest.render_lines().as_bytes())
            .await
            .map_err(IngestError::local_build)?;
        file.flush().await.map_err(IngestError::local_build)?;

        let out_path = scopeguard::ScopeGuard::into_inner(guard);
        info!("本地清单完成: {} 个文件", manifest.len());
        Ok((out_path, manifest))
    }

    /// 并发计算摘要，并发数由 `threads` 限制
    async fn hash_all(&self, files: Vec<LocalFile>) -> Result<Manifest, IngestError> {
        let semaphore = Arc::new(Semaphore::new(self.threads));
        let mut handles = Vec::with_capacity(files.len());

        for file in files {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(IngestError::local_build)?;
            let algorithm = self.algorithm;

            let handle = tokio::task::spawn_blocking(move || {
                let result = algorithm
                    .hash_file(&file.path)
                    .map(|digest| ManifestEntry::new(file.relative_path, file.size, digest))
                    .map_err(|e| format!("{}: {}", file.path.display(), e));
                drop(permit);
                result
            });
            handles.push(handle);
        }

        let mut manifest = Manifest::new();
        for handle in handles {
            let entry = handle
                .await
                .map_err(IngestError::local_build)?
                .map_err(IngestError::local_build)?;
            manifest.insert(entry);
        }
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn builder() -> LocalManifestBuilder {
        LocalManifestBuilder::new(
            DigestAlgorithm::Md5,
            2,
            "_MANIFEST_LOCAL.txt",
            "_MANIFEST_IRODS.txt",
        )
    }

    #[tokio::test]
    async fn test_build_writes_sorted_manifest() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Data/Intensities")).unwrap();
        fs::write(dir.path().join("b.txt"), b"hello").unwrap();
        fs::write(dir.path().join("Data/Intensities/a.bin"), b"").unwrap();
        // 上一轮遗留的清单不计入
        fs::write(dir.path().join("_MANIFEST_LOCAL.txt"), b"stale").unwrap();
        fs::write(dir.path().join("_MANIFEST_IRODS.txt"), b"stale").unwrap();

        let (path, manifest) = builder().build(dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join("_MANIFEST_LOCAL.txt"));
        assert_eq!(manifest.len(), 2);
        assert_eq!(
            manifest.get("./b.txt").unwrap().digest,
            "5d41402abc4b2a76b9719d911017c592"
        );

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("%%%% HASHDEEP-1.0\n%%%% size,md5,filename\n"));
        let data: Vec<&str> = text.lines().filter(|l| !l.starts_with(['%', '#'])).collect();
        assert_eq!(
            data,
            vec![
                "0,d41d8cd98f00b204e9800998ecf8427e,./Data/Intensities/a.bin",
                "5,5d41402abc4b2a76b9719d911017c592,./b.txt",
            ]
        );

        // 写出的文件可以被重新解析为同一份清单
        assert_eq!(Manifest::read_from(&path).await.unwrap(), manifest);
    }

    #[tokio::test]
    async fn test_failed_build_removes_partial_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("missing");
        let err = builder().build(&folder).await.unwrap_err();
        assert!(matches!(err, IngestError::ManifestBuild { .. }));
        assert!(!folder.join("_MANIFEST_LOCAL.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_file_cleans_up() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("secret.bin");
        fs::write(&secret, b"data").unwrap();
        fs::set_permissions(&secret, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::File::open(&secret).is_ok() {
            // 以 root 运行时权限不生效
            return;
        }

        let err = builder().build(dir.path()).await.unwrap_err();
        assert!(matches!(err, IngestError::ManifestBuild { .. }));
        assert!(!dir.path().join("_MANIFEST_LOCAL.txt").exists());
    }
}
