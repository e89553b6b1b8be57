use crate::core::digest::normalize_digest;
use crate::core::manifest::Manifest;
use std::fmt;
use tracing::{debug, error};

/// 额外文件日志中最多列出的路径数
const MAX_EXAMPLES: usize = 10;

/// 清单比较结果
///
/// 只报告第一个发现的差异，顺序固定：
/// 共同路径上的大小、摘要（按路径排序，同一路径先比较大小），
/// 然后是本地多出的文件，最后是远程多出的文件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Consistent,
    SizeMismatch {
        path: String,
        local_size: u64,
        remote_size: u64,
    },
    DigestMismatch {
        path: String,
        local_digest: String,
        remote_digest: String,
    },
    /// 本地存在但远程缺失；`count`/`examples` 仅用于诊断
    ExtraLocal {
        path: String,
        count: usize,
        examples: Vec<String>,
    },
    ExtraRemote {
        path: String,
        count: usize,
        examples: Vec<String>,
    },
}

impl Verdict {
    pub fn is_consistent(&self) -> bool {
        matches!(self, Verdict::Consistent)
    }

    /// 差异涉及的路径
    pub fn path(&self) -> Option<&str> {
        match self {
            Verdict::Consistent => None,
            Verdict::SizeMismatch { path, .. }
            | Verdict::DigestMismatch { path, .. }
            | Verdict::ExtraLocal { path, .. }
            | Verdict::ExtraRemote { path, .. } => Some(path),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Consistent => write!(f, "all good"),
            Verdict::SizeMismatch {
                path,
                local_size,
                remote_size,
            } => write!(
                f,
                "file size mismatch {} vs {} for {}",
                local_size, remote_size, path
            ),
            Verdict::DigestMismatch {
                path,
                local_digest,
                remote_digest,
            } => write!(
                f,
                "file checksum mismatch {} vs {} for {}",
                local_digest, remote_digest, path
            ),
            Verdict::ExtraLocal { path, count, .. } => {
                write!(f, "extra file in local: {} ({} total)", path, count)
            }
            Verdict::ExtraRemote { path, count, .. } => {
                write!(f, "extra file in remote: {} ({} total)", path, count)
            }
        }
    }
}

/// 清单比较器（纯函数，无 IO）
pub struct ManifestComparator;

impl ManifestComparator {
    /// 比较本地清单与远程清单
    pub fn compare(local: &Manifest, remote: &Manifest) -> Verdict {
        // 共同路径：BTreeMap 保证按路径排序
        for entry in local.iter() {
            let Some(other) = remote.get(&entry.relative_path) else {
                continue;
            };

            if entry.size != other.size {
                error!(
                    "文件大小不一致 {} vs {}: {}",
                    entry.size, other.size, entry.relative_path
                );
                return Verdict::SizeMismatch {
                    path: entry.relative_path.clone(),
                    local_size: entry.size,
                    remote_size: other.size,
                };
            }

            let local_digest = normalize_digest(&entry.digest);
            let remote_digest = normalize_digest(&other.digest);
            if local_digest != remote_digest {
                error!(
                    "文件校验和不一致 {} vs {}: {}",
                    local_digest, remote_digest, entry.relative_path
                );
                return Verdict::DigestMismatch {
                    path: entry.relative_path.clone(),
                    local_digest,
                    remote_digest,
                };
            }
        }

        let extra_local: Vec<&String> = local.paths().filter(|p| !remote.contains(p)).collect();
        if let Some(first) = extra_local.first() {
            let examples = Self::examples(&extra_local);
            error!(
                "本地有 {} 个文件在远程不存在，最多显示 {} 个:\n  {}",
                extra_local.len(),
                MAX_EXAMPLES,
                examples.join("\n  ")
            );
            return Verdict::ExtraLocal {
                path: (*first).clone(),
                count: extra_local.len(),
                examples,
            };
        }

        let extra_remote: Vec<&String> = remote.paths().filter(|p| !local.contains(p)).collect();
        if let Some(first) = extra_remote.first() {
            let examples = Self::examples(&extra_remote);
            error!(
                "远程有 {} 个文件在本地不存在，最多显示 {} 个:\n  {}",
                extra_remote.len(),
                MAX_EXAMPLES,
                examples.join("\n  ")
            );
            return Verdict::ExtraRemote {
                path: (*first).clone(),
                count: extra_remote.len(),
                examples,
            };
        }

        debug!("清单一致: {} 个文件", local.len());
        Verdict::Consistent
    }

    fn examples(paths: &[&String]) -> Vec<String> {
        paths.iter().take(MAX_EXAMPLES).map(|p| (*p).clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::digest::to_sha2_tagged;
    use crate::core::manifest::ManifestEntry;

    fn manifest(rows: &[(&str, u64, &str)]) -> Manifest {
        rows.iter()
            .map(|(path, size, digest)| ManifestEntry::new(*path, *size, *digest))
            .collect()
    }

    #[test]
    fn test_identical_manifests_are_consistent() {
        let local = manifest(&[("./name.txt", 10, "xyz"), ("./name2.txt", 20, "abc")]);
        let remote = manifest(&[("./name2.txt", 20, "abc"), ("./name.txt", 10, "xyz")]);
        assert_eq!(ManifestComparator::compare(&local, &remote), Verdict::Consistent);
    }

    #[test]
    fn test_empty_manifests_are_consistent() {
        assert!(ManifestComparator::compare(&Manifest::new(), &Manifest::new()).is_consistent());
    }

    #[test]
    fn test_size_mismatch() {
        let local = manifest(&[("./name.txt", 10, "xyz"), ("./name2.txt", 21, "abc")]);
        let remote = manifest(&[("./name.txt", 10, "xyz"), ("./name2.txt", 20, "abc")]);
        assert_eq!(
            ManifestComparator::compare(&local, &remote),
            Verdict::SizeMismatch {
                path: "./name2.txt".into(),
                local_size: 21,
                remote_size: 20,
            }
        );
    }

    #[test]
    fn test_digest_mismatch() {
        let local = manifest(&[("./name.txt", 10, "xyz"), ("./name2.txt", 20, "abd")]);
        let remote = manifest(&[("./name.txt", 10, "xyz"), ("./name2.txt", 20, "abc")]);
        match ManifestComparator::compare(&local, &remote) {
            Verdict::DigestMismatch { path, .. } => assert_eq!(path, "./name2.txt"),
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[test]
    fn test_size_reported_before_digest_on_same_path() {
        let local = manifest(&[("./a", 1, "d1")]);
        let remote = manifest(&[("./a", 2, "d2")]);
        assert!(matches!(
            ManifestComparator::compare(&local, &remote),
            Verdict::SizeMismatch { .. }
        ));
    }

    #[test]
    fn test_first_path_in_sorted_order_wins() {
        let local = manifest(&[("./b", 1, "x"), ("./a", 1, "x")]);
        let remote = manifest(&[("./b", 1, "y"), ("./a", 2, "x")]);
        assert_eq!(
            ManifestComparator::compare(&local, &remote).path(),
            Some("./a")
        );
    }

    #[test]
    fn test_mismatch_outranks_extra_files() {
        let local = manifest(&[("./a", 1, "x"), ("./z", 1, "x")]);
        let remote = manifest(&[("./a", 1, "y")]);
        assert!(matches!(
            ManifestComparator::compare(&local, &remote),
            Verdict::DigestMismatch { .. }
        ));
    }

    #[test]
    fn test_extra_local() {
        let local = manifest(&[("./name.txt", 10, "xyz"), ("./name2.txt", 20, "abc")]);
        let remote = manifest(&[("./name2.txt", 20, "abc")]);
        match ManifestComparator::compare(&local, &remote) {
            Verdict::ExtraLocal { path, count, examples } => {
                assert_eq!(path, "./name.txt");
                assert_eq!(count, 1);
                assert_eq!(examples, vec!["./name.txt".to_string()]);
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[test]
    fn test_extra_local_checked_before_extra_remote() {
        let local = manifest(&[("./a", 1, "x"), ("./local-only", 1, "x")]);
        let remote = manifest(&[("./a", 1, "x"), ("./remote-only", 1, "x")]);
        assert!(matches!(
            ManifestComparator::compare(&local, &remote),
            Verdict::ExtraLocal { .. }
        ));
    }

    #[test]
    fn test_extra_remote() {
        let local = manifest(&[("./name.txt", 10, "xyz")]);
        let remote = manifest(&[("./name2.txt", 20, "abc"), ("./name.txt", 10, "xyz")]);
        match ManifestComparator::compare(&local, &remote) {
            Verdict::ExtraRemote { path, .. } => assert_eq!(path, "./name2.txt"),
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[test]
    fn test_examples_are_capped() {
        let rows: Vec<(String, u64, &str)> =
            (0..25).map(|i| (format!("./f{:02}", i), 1, "x")).collect();
        let local: Manifest = rows
            .iter()
            .map(|(p, s, d)| ManifestEntry::new(p.clone(), *s, *d))
            .collect();
        match ManifestComparator::compare(&local, &Manifest::new()) {
            Verdict::ExtraLocal { path, count, examples } => {
                assert_eq!(path, "./f00");
                assert_eq!(count, 25);
                assert_eq!(examples.len(), MAX_EXAMPLES);
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[test]
    fn test_tagged_remote_digest_is_normalized() {
        let sha = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        let local = manifest(&[("./hello", 5, sha)]);
        let tagged = to_sha2_tagged(sha).unwrap();
        let remote = manifest(&[("./hello", 5, tagged.as_str())]);
        assert!(ManifestComparator::compare(&local, &remote).is_consistent());
    }
}
