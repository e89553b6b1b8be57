//! iRODS 存储 - 通过 iCommands 命令行工具访问

use super::{QueryScope, RemoteStore, NO_ROWS_SENTINEL};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// 本存储依赖的外部命令
pub const REQUIRED_EXECUTABLES: [&str; 4] = ["iquest", "iput", "ichksum", "imeta"];

pub struct IrodsStore {
    name: String,
}

impl IrodsStore {
    pub fn new() -> Self {
        Self {
            name: "irods".to_string(),
        }
    }

    /// 执行命令，非零退出码视为错误，返回标准输出
    async fn run(program: &str, args: &[&str]) -> Result<String> {
        debug!("执行: {} {:?}", program, args);
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("无法启动 {}", program))?;

        if !output.status.success() {
            anyhow::bail!(
                "{} 退出码 {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// 执行 iquest 查询，保留所有非空行（包括无结果哨兵）
    async fn iquest(format: &str, query: &str) -> Result<Vec<String>> {
        let stdout = Self::run("iquest", &[format, query]).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

impl Default for IrodsStore {
    fn default() -> Self {
        Self::new()
    }
}

/// GenQuery 字符串字面量转义
fn quote(value: &str) -> String {
    value.replace('\'', "\\'")
}

/// 构建校验和查询语句
pub fn checksum_query(collection: &str, scope: QueryScope, exclude: &[&str]) -> String {
    let mut query = String::from("SELECT DATA_SIZE, DATA_CHECKSUM, COLL_NAME, DATA_NAME WHERE ");
    match scope {
        QueryScope::Collection => query.push_str(&format!("COLL_NAME = '{}'", quote(collection))),
        QueryScope::Subcollections => {
            query.push_str(&format!("COLL_NAME like '{}/%'", quote(collection)))
        }
    }
    for name in exclude {
        query.push_str(&format!(" AND DATA_NAME != '{}'", quote(name)));
    }
    query
}

fn without_sentinel(rows: Vec<String>) -> Vec<String> {
    rows.into_iter()
        .filter(|row| !row.starts_with(NO_ROWS_SENTINEL))
        .collect()
}

#[async_trait]
impl RemoteStore for IrodsStore {
    async fn list_subcollections(&self, collection: &str) -> Result<Vec<String>> {
        let query = format!(
            "SELECT COLL_NAME WHERE COLL_PARENT_NAME = '{}'",
            quote(collection)
        );
        let prefix = format!("{}/", collection.trim_end_matches('/'));
        Ok(without_sentinel(Self::iquest("%s", &query).await?)
            .into_iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    async fn query_checksums(
        &self,
        collection: &str,
        scope: QueryScope,
        exclude: &[&str],
    ) -> Result<Vec<String>> {
        let query = checksum_query(collection, scope, exclude);
        Self::iquest("%d,%s,%s/%s", &query).await
    }

    async fn put_object(&self, local: &Path, remote: &str) -> Result<()> {
        let local = local
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid local path: {:?}", local))?;
        Self::run("iput", &["-f", local, remote]).await?;
        Ok(())
    }

    async fn register_checksum(&self, remote: &str) -> Result<()> {
        Self::run("ichksum", &[remote]).await?;
        Ok(())
    }

    async fn get_metadata(&self, collection: &str, key: &str) -> Result<Vec<String>> {
        let query = format!(
            "SELECT META_COLL_ATTR_VALUE WHERE COLL_NAME = '{}' AND META_COLL_ATTR_NAME = '{}'",
            quote(collection),
            quote(key)
        );
        Ok(without_sentinel(Self::iquest("%s", &query).await?))
    }

    async fn set_metadata(&self, collection: &str, key: &str, value: &str) -> Result<()> {
        Self::run("imeta", &["set", "-C", collection, key, value]).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
