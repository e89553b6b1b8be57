//! 清单数据模型与文本格式
//!
//! 数据行格式为 `size,digest,./relative/path`，以 `#` 或 `%` 开头的行为头部注释。

use crate::core::error::IngestError;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use tracing::warn;

/// 清单条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// 以 `./` 开头的相对路径
    pub relative_path: String,
    pub size: u64,
    /// 原样保存的摘要值（比较时再规范化）
    pub digest: String,
}

impl ManifestEntry {
    pub fn new(relative_path: impl Into<String>, size: u64, digest: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            size,
            digest: digest.into(),
        }
    }

    /// 格式化为一行清单数据（不含换行）
    pub fn to_line(&self) -> String {
        format!("{},{},{}", self.size, self.digest, self.relative_path)
    }
}

/// 按相对路径排序的清单
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入条目；路径重复时后者覆盖前者
    pub fn insert(&mut self, entry: ManifestEntry) {
        if let Some(prev) = self.entries.insert(entry.relative_path.clone(), entry) {
            warn!("清单中路径重复，保留最后一条: {}", prev.relative_path);
        }
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按路径字典序遍历
    pub fn iter(&self) -> btree_map::Values<'_, String, ManifestEntry> {
        self.entries.values()
    }

    pub fn paths(&self) -> btree_map::Keys<'_, String, ManifestEntry> {
        self.entries.keys()
    }

    /// 解析清单文本
    pub fn parse(text: &str, source: &Path) -> Result<Self, IngestError> {
        let mut manifest = Manifest::new();
        for (idx, raw) in text.lines().enumerate() {
            if raw.starts_with('#') || raw.starts_with('%') {
                continue;
            }
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            manifest.insert(parse_line(line).map_err(|message| IngestError::ManifestParse {
                path: source.to_path_buf(),
                line: idx + 1,
                message,
            })?);
        }
        Ok(manifest)
    }

    /// 从文件读取清单
    pub async fn read_from(path: &Path) -> Result<Self, IngestError> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::parse(&text, path)
    }

    /// 渲染数据行（按路径排序，每行以换行结尾）
    pub fn render_lines(&self) -> String {
        let mut out = String::new();
        for entry in self.iter() {
            let _ = writeln!(out, "{}", entry.to_line());
        }
        out
    }
}

impl FromIterator<ManifestEntry> for Manifest {
    fn from_iter<I: IntoIterator<Item = ManifestEntry>>(iter: I) -> Self {
        let mut manifest = Manifest::new();
        for entry in iter {
            manifest.insert(entry);
        }
        manifest
    }
}

/// 解析一行 `size,digest,path`；路径本身可以包含逗号
pub fn parse_line(line: &str) -> Result<ManifestEntry, String> {
    let mut parts = line.splitn(3, ',');
    let (size, digest, path) = match (parts.next(), parts.next(), parts.next()) {
        (Some(size), Some(digest), Some(path)) => (size, digest, path),
        _ => return Err(format!("需要 3 列，实际为: {}", line)),
    };
    let size = size
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("无效的文件大小 {:?}: {}", size, e))?;
    Ok(ManifestEntry::new(path, size, digest.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_headers() {
        let text = "%%%% HASHDEEP-1.0\n%%%% size,md5,filename\n## Invoked from: /x\n#\n\
                    10,xyz,./name.txt\n20,abc,./name2.txt\n";
        let manifest = Manifest::parse(text, Path::new("m.txt")).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.get("./name.txt").unwrap().size, 10);
        assert_eq!(manifest.get("./name2.txt").unwrap().digest, "abc");
    }

    #[test]
    fn test_path_with_comma() {
        let entry = parse_line("5,d1,./a,b.txt").unwrap();
        assert_eq!(entry.relative_path, "./a,b.txt");
    }

    #[test]
    fn test_parse_error_reports_line() {
        let err = Manifest::parse("#\nnot-a-size,abc,./x\n", Path::new("m.txt")).unwrap_err();
        match err {
            IngestError::ManifestParse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_render_is_sorted() {
        let manifest: Manifest = vec![
            ManifestEntry::new("./b", 2, "d2"),
            ManifestEntry::new("./a", 1, "d1"),
        ]
        .into_iter()
        .collect();
        assert_eq!(manifest.render_lines(), "1,d1,./a\n2,d2,./b\n");
    }
}
