//! 摘要算法与摘要值规范化

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// 读取文件时的缓冲区大小
const READ_BUF_SIZE: usize = 1024 * 1024;

/// 远程存储返回的 SHA-256 校验和标记前缀（值为 base64）
const SHA2_TAG: &str = "sha2:";

/// 清单使用的摘要算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Md5,
    Sha256,
    Blake3,
}

impl DigestAlgorithm {
    /// 清单头部使用的算法名
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "md5",
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Blake3 => "blake3",
        }
    }

    /// 计算内存数据的摘要（小写十六进制）
    pub fn hash_bytes(&self, data: &[u8]) -> String {
        let mut hasher = Hasher::new(*self);
        hasher.update(data);
        hasher.finalize()
    }

    /// 流式计算文件摘要（阻塞调用）
    pub fn hash_file(&self, path: &Path) -> io::Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = Hasher::new(*self);
        let mut buf = vec![0u8; READ_BUF_SIZE];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "md5" => Ok(DigestAlgorithm::Md5),
            "sha256" | "sha-256" | "sha2" => Ok(DigestAlgorithm::Sha256),
            "blake3" => Ok(DigestAlgorithm::Blake3),
            other => Err(format!("不支持的摘要算法: {}", other)),
        }
    }
}

/// 增量摘要计算器
pub enum Hasher {
    Md5(md5::Context),
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Md5 => Hasher::Md5(md5::Context::new()),
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            DigestAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(ctx) => ctx.consume(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    pub fn finalize(self) -> String {
        match self {
            Hasher::Md5(ctx) => format!("{:x}", ctx.compute()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// 将摘要值规范化为小写十六进制
///
/// `sha2:<base64>` 形式会被解码；其他值只做小写化。
/// 对已规范化的值再次调用结果不变。
pub fn normalize_digest(value: &str) -> String {
    let value = value.trim();
    if let Some(encoded) = value.strip_prefix(SHA2_TAG) {
        if let Ok(raw) = STANDARD.decode(encoded) {
            return hex::encode(raw);
        }
    }
    value.to_lowercase()
}

/// 将十六进制 SHA-256 摘要编码为远程存储的标记形式
pub fn to_sha2_tagged(hex_digest: &str) -> Option<String> {
    let raw = hex::decode(hex_digest).ok()?;
    Some(format!("{}{}", SHA2_TAG, STANDARD.encode(raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";
    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_hash_bytes() {
        assert_eq!(DigestAlgorithm::Md5.hash_bytes(b"hello"), HELLO_MD5);
        assert_eq!(DigestAlgorithm::Sha256.hash_bytes(b"hello"), HELLO_SHA256);
        assert_eq!(
            DigestAlgorithm::Blake3.hash_bytes(b"hello"),
            blake3::hash(b"hello").to_hex().to_string()
        );
    }

    #[test]
    fn test_hash_file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(DigestAlgorithm::Md5.hash_file(&path).unwrap(), HELLO_MD5);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        assert_eq!(normalize_digest(HELLO_MD5), HELLO_MD5);
        assert_eq!(normalize_digest(&normalize_digest(HELLO_MD5)), HELLO_MD5);
        assert_eq!(normalize_digest("5D41402ABC4B2A76B9719D911017C592"), HELLO_MD5);
    }

    #[test]
    fn test_normalize_tagged_sha2() {
        let tagged = to_sha2_tagged(HELLO_SHA256).unwrap();
        assert!(tagged.starts_with("sha2:"));
        assert_eq!(normalize_digest(&tagged), HELLO_SHA256);
        assert_eq!(normalize_digest(&tagged), normalize_digest(HELLO_SHA256));
    }

    #[test]
    fn test_parse_algorithm() {
        assert_eq!("MD5".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Md5);
        assert_eq!("sha256".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha256);
        assert!("crc32".parse::<DigestAlgorithm>().is_err());
    }
}
