use super::{QueryScope, RemoteStore, NO_ROWS_SENTINEL};
use crate::core::digest::{DigestAlgorithm, Hasher};
use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// 非 IO 操作超时（秒）- stat, list 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 分段读取对象时的块大小
const READ_CHUNK: u64 = 8 * 1024 * 1024;

/// 集合元数据所在的子目录，每个键一个对象
const META_DIR: &str = ".runsync_meta";

/// 基于 OpenDAL 的对象存储（文件系统或 S3）
///
/// 对象存储没有集合元数据，元数据保存在 `<collection>/.runsync_meta/<key>` 对象中；
/// 校验和在查询时按配置的算法读取对象内容计算。
pub struct ObjectStore {
    operator: Operator,
    algorithm: DigestAlgorithm,
    name: String,
}

impl ObjectStore {
    pub fn fs(root: &str, algorithm: DigestAlgorithm) -> Result<Self> {
        use opendal::services::Fs;

        let builder = Fs::default().root(root);
        let operator = Operator::new(builder)?.finish();
        Ok(Self {
            operator,
            algorithm,
            name: format!("fs://{}", root),
        })
    }

    pub fn s3(
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        endpoint: Option<String>,
        prefix: Option<String>,
        algorithm: DigestAlgorithm,
    ) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default()
            .bucket(bucket)
            .region(region)
            .access_key_id(access_key)
            .secret_access_key(secret_key);

        if let Some(ref ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        if let Some(ref p) = prefix {
            builder = builder.root(p);
        }

        // 添加超时层
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = format!(
            "s3://{}{}",
            bucket,
            prefix
                .as_deref()
                .map(|p| format!("/{}", p))
                .unwrap_or_default()
        );

        Ok(Self {
            operator,
            algorithm,
            name,
        })
    }

    /// 集合路径转换为目录键（以 / 结尾）
    fn dir_key(collection: &str) -> String {
        let trimmed = collection.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("{}/", trimmed)
        }
    }

    fn meta_key(collection: &str, key: &str) -> String {
        format!("{}{}/{}", Self::dir_key(collection), META_DIR, key)
    }

    /// 分段读取对象并计算摘要
    async fn checksum(&self, path: &str, size: u64) -> Result<String> {
        let mut hasher = Hasher::new(self.algorithm);
        let mut offset = 0;
        while offset < size {
            let end = (offset + READ_CHUNK).min(size);
            let data = self.operator.read_with(path).range(offset..end).await?;
            hasher.update(&data.to_vec());
            offset = end;
        }
        Ok(hasher.finalize())
    }
}

#[async_trait]
impl RemoteStore for ObjectStore {
    async fn list_subcollections(&self, collection: &str) -> Result<Vec<String>> {
        let dir = Self::dir_key(collection);
        let mut names = Vec::new();
        let mut lister = self
            .operator
            .lister_with(&dir)
            .metakey(Metakey::Mode)
            .await?;

        while let Some(entry) = lister.try_next().await? {
            if !entry.metadata().is_dir() || entry.path() == dir {
                continue;
            }
            let name = entry.name().trim_end_matches('/');
            if name != META_DIR {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    async fn query_checksums(
        &self,
        collection: &str,
        scope: QueryScope,
        exclude: &[&str],
    ) -> Result<Vec<String>> {
        let dir = Self::dir_key(collection);
        let mut lister = self
            .operator
            .lister_with(&dir)
            .recursive(true)
            .metakey(Metakey::ContentLength | Metakey::Mode)
            .await?;

        let mut rows = Vec::new();
        while let Some(entry) = lister.try_next().await? {
            let meta = entry.metadata();
            if meta.is_dir() {
                continue;
            }
            let Some(relative) = entry.path().strip_prefix(&dir) else {
                continue;
            };
            if relative.split('/').any(|part| part == META_DIR) {
                continue;
            }
            let direct = !relative.contains('/');
            let in_scope = match scope {
                QueryScope::Collection => direct && !exclude.contains(&relative),
                QueryScope::Subcollections => !direct,
            };
            if !in_scope {
                continue;
            }

            let size = meta.content_length();
            let checksum = self.checksum(entry.path(), size).await?;
            rows.push(format!(
                "{},{},{}/{}",
                size,
                checksum,
                collection.trim_end_matches('/'),
                relative
            ));
        }

        if rows.is_empty() {
            rows.push(format!("{}: no objects below {}", NO_ROWS_SENTINEL, collection));
        }
        Ok(rows)
    }

    async fn put_object(&self, local: &Path, remote: &str) -> Result<()> {
        let data = tokio::fs::read(local).await?;
        self.operator
            .write(remote.trim_start_matches('/'), data)
            .await?;
        Ok(())
    }

    async fn register_checksum(&self, remote: &str) -> Result<()> {
        // 校验和在查询时计算，无需登记
        debug!("跳过校验和登记: {}", remote);
        Ok(())
    }

    async fn get_metadata(&self, collection: &str, key: &str) -> Result<Vec<String>> {
        match self.operator.read(&Self::meta_key(collection, key)).await {
            Ok(data) => Ok(String::from_utf8_lossy(&data.to_vec())
                .lines()
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_metadata(&self, collection: &str, key: &str, value: &str) -> Result<()> {
        self.operator
            .write(&Self::meta_key(collection, key), value.as_bytes().to_vec())
            .await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let store = ObjectStore::fs(root, DigestAlgorithm::Md5).unwrap();

        let local = dir.path().join("hello.txt");
        std::fs::write(&local, b"hello").unwrap();
        store.put_object(&local, "/runs/R1/hello.txt").await.unwrap();
        store.put_object(&local, "/runs/R1/sub/nested.txt").await.unwrap();
        store.set_metadata("/runs/R1", "k", "v1").await.unwrap();
        store.set_metadata("/runs/R1", "k", "v2").await.unwrap();

        assert_eq!(store.get_metadata("/runs/R1", "k").await.unwrap(), vec!["v2"]);
        assert!(store.get_metadata("/runs/R1", "missing").await.unwrap().is_empty());
        assert_eq!(
            store.list_subcollections("/runs").await.unwrap(),
            vec!["R1".to_string()]
        );

        let direct = store
            .query_checksums("/runs/R1", QueryScope::Collection, &[])
            .await
            .unwrap();
        assert_eq!(direct, vec!["5,5d41402abc4b2a76b9719d911017c592,/runs/R1/hello.txt"]);

        let nested = store
            .query_checksums("/runs/R1", QueryScope::Subcollections, &[])
            .await
            .unwrap();
        assert_eq!(
            nested,
            vec!["5,5d41402abc4b2a76b9719d911017c592,/runs/R1/sub/nested.txt"]
        );
    }
}
