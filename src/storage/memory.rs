//! 内存存储 - 用于测试和演练

use super::{QueryScope, RemoteStore, NO_ROWS_SENTINEL};
use crate::core::digest::{to_sha2_tagged, DigestAlgorithm};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// 内存中的数据对象
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryObject {
    pub size: u64,
    /// 登记前为 None
    pub checksum: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
struct Inner {
    collections: BTreeSet<String>,
    objects: BTreeMap<String, MemoryObject>,
    metadata: HashMap<String, BTreeMap<String, Vec<String>>>,
}

/// 内存存储
pub struct MemoryStore {
    inner: Mutex<Inner>,
    algorithm: DigestAlgorithm,
    /// 以 `sha2:<base64>` 形式报告 SHA-256 校验和
    tagged_sha2: bool,
    fail_queries: AtomicBool,
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

fn name_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, name)| name).unwrap_or(path)
}

impl MemoryStore {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            algorithm,
            tagged_sha2: false,
            fail_queries: AtomicBool::new(false),
        }
    }

    pub fn with_tagged_sha2(mut self) -> Self {
        self.tagged_sha2 = true;
        self
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn checksum_of(&self, data: &[u8]) -> String {
        let digest = self.algorithm.hash_bytes(data);
        if self.tagged_sha2 && self.algorithm == DigestAlgorithm::Sha256 {
            to_sha2_tagged(&digest).unwrap_or(digest)
        } else {
            digest
        }
    }

    /// 创建集合及其所有上级集合
    pub fn create_collection(&self, path: &str) {
        let mut state = self.state();
        let mut current = path.trim_end_matches('/');
        while !current.is_empty() {
            state.collections.insert(current.to_string());
            current = parent_of(current);
        }
    }

    /// 直接放入对象（大小和校验和由调用方给出）
    pub fn insert_object(&self, path: &str, size: u64, checksum: Option<&str>) {
        self.create_collection(parent_of(path));
        self.state().objects.insert(
            path.to_string(),
            MemoryObject {
                size,
                checksum: checksum.map(str::to_string),
                data: Vec::new(),
            },
        );
    }

    pub fn remove_object(&self, path: &str) -> Option<MemoryObject> {
        self.state().objects.remove(path)
    }

    pub fn object(&self, path: &str) -> Option<MemoryObject> {
        self.state().objects.get(path).cloned()
    }

    /// 追加一个元数据值（不替换已有值）
    pub fn add_metadata(&self, collection: &str, key: &str, value: &str) {
        self.state()
            .metadata
            .entry(collection.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
    }

    /// 读取单个元数据值（测试断言用）
    pub fn metadata_value(&self, collection: &str, key: &str) -> Option<String> {
        self.state()
            .metadata
            .get(collection)
            .and_then(|m| m.get(key))
            .and_then(|values| values.last().cloned())
    }

    /// 之后的校验和查询全部失败
    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list_subcollections(&self, collection: &str) -> Result<Vec<String>> {
        let state = self.state();
        Ok(state
            .collections
            .iter()
            .filter(|c| parent_of(c) == collection)
            .map(|c| name_of(c).to_string())
            .collect())
    }

    async fn query_checksums(
        &self,
        collection: &str,
        scope: QueryScope,
        exclude: &[&str],
    ) -> Result<Vec<String>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            anyhow::bail!("query failed for {}", collection);
        }

        let prefix = format!("{}/", collection);
        let state = self.state();
        let rows: Vec<String> = state
            .objects
            .iter()
            .filter(|(path, _)| {
                let parent = parent_of(path);
                let in_scope = match scope {
                    QueryScope::Collection => parent == collection,
                    QueryScope::Subcollections => parent.starts_with(&prefix),
                };
                in_scope && !exclude.contains(&name_of(path))
            })
            .map(|(path, obj)| {
                format!("{},{},{}", obj.size, obj.checksum.as_deref().unwrap_or(""), path)
            })
            .collect();

        if rows.is_empty() {
            return Ok(vec![format!(
                "{}: Nothing was found matching your query",
                NO_ROWS_SENTINEL
            )]);
        }
        Ok(rows)
    }

    async fn put_object(&self, local: &Path, remote: &str) -> Result<()> {
        let data = tokio::fs::read(local).await?;
        self.create_collection(parent_of(remote));
        self.state().objects.insert(
            remote.to_string(),
            MemoryObject {
                size: data.len() as u64,
                checksum: None,
                data,
            },
        );
        Ok(())
    }

    async fn register_checksum(&self, remote: &str) -> Result<()> {
        let mut state = self.state();
        let obj = state
            .objects
            .get_mut(remote)
            .ok_or_else(|| anyhow::anyhow!("object does not exist: {}", remote))?;
        let checksum = self.checksum_of(&obj.data);
        obj.checksum = Some(checksum);
        Ok(())
    }

    async fn get_metadata(&self, collection: &str, key: &str) -> Result<Vec<String>> {
        let state = self.state();
        if !state.collections.contains(collection) {
            anyhow::bail!("collection does not exist: {}", collection);
        }
        Ok(state
            .metadata
            .get(collection)
            .and_then(|m| m.get(key))
            .cloned()
            .unwrap_or_default())
    }

    async fn set_metadata(&self, collection: &str, key: &str, value: &str) -> Result<()> {
        let mut state = self.state();
        if !state.collections.contains(collection) {
            anyhow::bail!("collection does not exist: {}", collection);
        }
        state
            .metadata
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), vec![value.to_string()]);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_scopes() {
        let store = MemoryStore::new(DigestAlgorithm::Md5);
        store.insert_object("/zone/runs/R1/a.txt", 1, Some("d1"));
        store.insert_object("/zone/runs/R1/_MANIFEST_LOCAL.txt", 1, Some("m"));
        store.insert_object("/zone/runs/R1/sub/b.txt", 2, Some("d2"));

        let direct = store
            .query_checksums("/zone/runs/R1", QueryScope::Collection, &["_MANIFEST_LOCAL.txt"])
            .await
            .unwrap();
        assert_eq!(direct, vec!["1,d1,/zone/runs/R1/a.txt"]);

        let nested = store
            .query_checksums("/zone/runs/R1", QueryScope::Subcollections, &[])
            .await
            .unwrap();
        assert_eq!(nested, vec!["2,d2,/zone/runs/R1/sub/b.txt"]);

        let empty = store
            .query_checksums("/zone/runs/R1/sub", QueryScope::Subcollections, &[])
            .await
            .unwrap();
        assert!(empty[0].starts_with(NO_ROWS_SENTINEL));
    }

    #[tokio::test]
    async fn test_set_metadata_replaces_values() {
        let store = MemoryStore::new(DigestAlgorithm::Md5);
        store.create_collection("/zone/runs/R1");
        store.add_metadata("/zone/runs/R1", "k", "a");
        store.add_metadata("/zone/runs/R1", "k", "b");
        store.set_metadata("/zone/runs/R1", "k", "c").await.unwrap();
        assert_eq!(
            store.get_metadata("/zone/runs/R1", "k").await.unwrap(),
            vec!["c".to_string()]
        );
        assert_eq!(
            store.list_subcollections("/zone/runs").await.unwrap(),
            vec!["R1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_register_checksum_tagged() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("hello");
        std::fs::write(&local, b"hello").unwrap();

        let store = MemoryStore::new(DigestAlgorithm::Sha256).with_tagged_sha2();
        store.put_object(&local, "/zone/c/hello").await.unwrap();
        assert_eq!(store.object("/zone/c/hello").unwrap().checksum, None);
        store.register_checksum("/zone/c/hello").await.unwrap();
        let checksum = store.object("/zone/c/hello").unwrap().checksum.unwrap();
        assert!(checksum.starts_with("sha2:"));
    }
}
