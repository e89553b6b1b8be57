//! 远程清单构建 - 查询远程存储的大小和校验和

use crate::core::error::IngestError;
use crate::core::manifest::{parse_line, Manifest, ManifestEntry};
use crate::storage::{QueryScope, RemoteStore, NO_ROWS_SENTINEL};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 远程清单构建器
#[derive(Debug, Clone)]
pub struct RemoteManifestBuilder {
    manifest_local: String,
    manifest_remote: String,
}

impl RemoteManifestBuilder {
    pub fn new(manifest_local: impl Into<String>, manifest_remote: impl Into<String>) -> Self {
        Self {
            manifest_local: manifest_local.into(),
            manifest_remote: manifest_remote.into(),
        }
    }

    /// 查询 `collection` 下所有对象，写入 `folder/<manifest_remote>`
    ///
    /// 文件中的校验和保持原样，返回的清单同样保留原值，比较时再规范化。
    pub async fn build(
        &self,
        store: &dyn RemoteStore,
        collection: &str,
        folder: &Path,
    ) -> Result<(PathBuf, Manifest), IngestError> {
        let out_path = folder.join(&self.manifest_remote);
        info!(
            "查询远程清单: {} ({}) -> {}",
            collection,
            store.name(),
            out_path.display()
        );

        let guard = scopeguard::guard(out_path.clone(), |path| {
            let _ = std::fs::remove_file(&path);
        });

        let manifest = self.query(store, collection).await?;
        tokio::fs::write(&out_path, manifest.render_lines())
            .await
            .map_err(|e| IngestError::remote_build(format!("写入 {} 失败: {}", out_path.display(), e)))?;

        let out_path = scopeguard::ScopeGuard::into_inner(guard);
        info!("远程清单完成: {} 个对象", manifest.len());
        Ok((out_path, manifest))
    }

    /// 查询并规范化为相对路径清单（不写文件）
    pub async fn query(
        &self,
        store: &dyn RemoteStore,
        collection: &str,
    ) -> Result<Manifest, IngestError> {
        let manifests = [self.manifest_local.as_str(), self.manifest_remote.as_str()];
        let prefix = collection.trim_end_matches('/');

        let mut manifest = Manifest::new();
        for scope in [QueryScope::Collection, QueryScope::Subcollections] {
            // 只排除顶层清单，与本地清单一致
            let exclude: &[&str] = match scope {
                QueryScope::Collection => &manifests,
                QueryScope::Subcollections => &[],
            };
            let rows = store
                .query_checksums(collection, scope, exclude)
                .await
                .map_err(|e| IngestError::remote_build(format!("{:#}", e)))?;
            debug!("{:?}: {} 行", scope, rows.len());

            for row in rows {
                if let Some(entry) = normalize_row(&row, prefix)? {
                    manifest.insert(entry);
                }
            }
        }
        Ok(manifest)
    }
}

/// 将一行 `size,checksum,<collection>/<name>` 转为相对路径条目
///
/// 空行和无结果哨兵返回 `None`。
fn normalize_row(row: &str, prefix: &str) -> Result<Option<ManifestEntry>, IngestError> {
    let row = row.trim();
    if row.is_empty() || row.starts_with(NO_ROWS_SENTINEL) {
        return Ok(None);
    }

    let mut entry = parse_line(row).map_err(IngestError::remote_build)?;
    let relative = entry
        .relative_path
        .strip_prefix(prefix)
        .filter(|rest| rest.starts_with('/'))
        .ok_or_else(|| {
            IngestError::remote_build(format!(
                "对象 {} 不在集合 {} 下",
                entry.relative_path, prefix
            ))
        })?;
    entry.relative_path = format!(".{}", relative);
    Ok(Some(entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::digest::DigestAlgorithm;
    use crate::storage::MemoryStore;
    use std::fs;

    fn builder() -> RemoteManifestBuilder {
        RemoteManifestBuilder::new("_MANIFEST_LOCAL.txt", "_MANIFEST_IRODS.txt")
    }

    #[test]
    fn test_normalize_row() {
        let entry = normalize_row("10,abc,/zone/R1/sub/x.txt", "/zone/R1")
            .unwrap()
            .unwrap();
        assert_eq!(entry.relative_path, "./sub/x.txt");
        assert_eq!(entry.size, 10);

        assert!(normalize_row("CAT_NO_ROWS_FOUND: nothing", "/zone/R1")
            .unwrap()
            .is_none());
        assert!(normalize_row("  ", "/zone/R1").unwrap().is_none());
        // 前缀相同但不是子路径
        assert!(normalize_row("1,a,/zone/R10/x", "/zone/R1").is_err());
    }

    #[tokio::test]
    async fn test_build_writes_verbatim_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(DigestAlgorithm::Sha256);
        store.insert_object("/zone/R1/A", 10, Some("sha2:LPJNul+wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ="));
        store.insert_object("/zone/R1/Data/B", 20, Some("d2"));
        store.insert_object("/zone/R1/_MANIFEST_LOCAL.txt", 5, Some("m1"));
        store.insert_object("/zone/R1/_MANIFEST_IRODS.txt", 5, Some("m2"));

        let (path, manifest) = builder()
            .build(&store, "/zone/R1", dir.path())
            .await
            .unwrap();

        assert_eq!(manifest.len(), 2);
        assert_eq!(
            fs::read_to_string(path).unwrap(),
            "10,sha2:LPJNul+wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ=,./A\n20,d2,./Data/B\n"
        );
    }

    #[tokio::test]
    async fn test_nested_manifest_names_are_kept() {
        let store = MemoryStore::new(DigestAlgorithm::Md5);
        store.insert_object("/zone/R1/_MANIFEST_LOCAL.txt", 5, Some("m1"));
        store.insert_object("/zone/R1/sub/_MANIFEST_LOCAL.txt", 5, Some("m2"));
        store.insert_object("/zone/R1/sub/_MANIFEST_IRODS.txt", 6, Some("m3"));

        let manifest = builder().query(&store, "/zone/R1").await.unwrap();
        let paths: Vec<_> = manifest.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["./sub/_MANIFEST_IRODS.txt", "./sub/_MANIFEST_LOCAL.txt"]
        );
    }

    #[tokio::test]
    async fn test_empty_collection_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(DigestAlgorithm::Md5);
        store.create_collection("/zone/R1");

        let (_, manifest) = builder()
            .build(&store, "/zone/R1", dir.path())
            .await
            .unwrap();
        assert!(manifest.is_empty());
    }

    #[tokio::test]
    async fn test_query_failure_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("_MANIFEST_IRODS.txt");
        fs::write(&out, b"partial").unwrap();

        let store = MemoryStore::new(DigestAlgorithm::Md5);
        store.set_fail_queries(true);

        let err = builder()
            .build(&store, "/zone/R1", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::ManifestBuild { .. }));
        assert!(!out.exists());
    }
}
