pub mod irods;
pub mod local;
pub mod memory;
pub mod object;

use crate::core::digest::DigestAlgorithm;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub use irods::IrodsStore;
pub use local::{LocalFs, OsFs};
pub use memory::MemoryStore;
pub use object::ObjectStore;

// ============ 公共常量 ============

/// 查询层在没有结果时返回的哨兵行
pub const NO_ROWS_SENTINEL: &str = "CAT_NO_ROWS_FOUND";

/// 校验和查询范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryScope {
    /// 直接位于集合内的对象
    Collection,
    /// 所有子集合（递归）内的对象
    Subcollections,
}

/// 远程存储抽象接口
///
/// 引擎只通过这几个能力访问远程存储，便于替换为内存实现进行测试。
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 列出集合下的直接子集合名称（不含路径）
    async fn list_subcollections(&self, collection: &str) -> Result<Vec<String>>;

    /// 查询对象的大小和校验和
    ///
    /// 每行格式为 `size,checksum,<collection>/<name>`，校验和保持存储端原样，
    /// 可能包含 [`NO_ROWS_SENTINEL`] 行。`exclude` 中的对象名被跳过。
    async fn query_checksums(
        &self,
        collection: &str,
        scope: QueryScope,
        exclude: &[&str],
    ) -> Result<Vec<String>>;

    /// 上传本地文件（覆盖已存在的对象）
    async fn put_object(&self, local: &Path, remote: &str) -> Result<()>;

    /// 让存储端计算并登记对象校验和
    async fn register_checksum(&self, remote: &str) -> Result<()>;

    /// 读取集合元数据（同一键可能有多个值）
    async fn get_metadata(&self, collection: &str, key: &str) -> Result<Vec<String>>;

    /// 设置集合元数据，替换该键已有的所有值
    async fn set_metadata(&self, collection: &str, key: &str, value: &str) -> Result<()>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 存储类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    #[default]
    Irods,
    Fs,
    S3,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(rename = "type", default)]
    pub typ: StoreType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}

/// 根据配置创建存储实例
pub fn create_store(config: &StoreConfig, algorithm: DigestAlgorithm) -> Result<Arc<dyn RemoteStore>> {
    match config.typ {
        StoreType::Irods => {
            tracing::info!("使用 iRODS 命令行存储");
            Ok(Arc::new(IrodsStore::new()) as Arc<dyn RemoteStore>)
        }
        StoreType::Fs => {
            let root = config
                .root
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("fs store requires root"))?;
            tracing::info!("初始化文件系统对象存储: {}", root);
            Ok(Arc::new(ObjectStore::fs(root, algorithm)?) as Arc<dyn RemoteStore>)
        }
        StoreType::S3 => {
            let bucket = config
                .bucket
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 store requires bucket"))?;
            let region = config
                .region
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 store requires region"))?;
            let access_key = config
                .access_key
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 store requires accessKey"))?;
            let secret_key = config
                .secret_key
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("S3 store requires secretKey"))?;
            tracing::info!("初始化S3存储: bucket={}, region={}", bucket, region);
            Ok(Arc::new(ObjectStore::s3(
                bucket,
                region,
                access_key,
                secret_key,
                config.endpoint.clone(),
                config.root.clone(),
                algorithm,
            )?) as Arc<dyn RemoteStore>)
        }
    }
}
