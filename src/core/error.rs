//! 引擎错误类型

use crate::core::comparator::Verdict;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// 清单来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestOrigin {
    /// 本地文件夹计算得到的清单
    Local,
    /// 远程存储报告的清单
    Remote,
}

impl fmt::Display for ManifestOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestOrigin::Local => write!(f, "本地"),
            ManifestOrigin::Remote => write!(f, "远程"),
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    /// 哈希计算或远程查询失败，部分写入的清单文件已删除
    #[error("构建{origin}清单失败: {message}")]
    ManifestBuild {
        origin: ManifestOrigin,
        message: String,
    },

    /// 本地与远程清单不一致
    #[error("清单不一致: {0}")]
    Reconciliation(Verdict),

    /// 描述文件存在，但无法归类到已知的仪器类型
    #[error("无法根据描述文件确定仪器类型: {}", descriptor.display())]
    UnknownProducerType { descriptor: PathBuf },

    /// 归档移动失败（不影响完成状态）
    #[error("移动 {} -> {} 失败: {message}", from.display(), to.display())]
    ArchiveMove {
        from: PathBuf,
        to: PathBuf,
        message: String,
    },

    /// 变更事件无法映射到运行文件夹集合
    #[error("无法确定 {} 所属的运行文件夹集合", path.display())]
    UnmappedEvent { path: PathBuf },

    #[error("解析描述文件 {} 失败: {message}", path.display())]
    Descriptor { path: PathBuf, message: String },

    #[error("清单 {}:{line} 格式错误: {message}", path.display())]
    ManifestParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("远程存储操作失败: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub(crate) fn local_build(message: impl fmt::Display) -> Self {
        IngestError::ManifestBuild {
            origin: ManifestOrigin::Local,
            message: message.to_string(),
        }
    }

    pub(crate) fn remote_build(message: impl fmt::Display) -> Self {
        IngestError::ManifestBuild {
            origin: ManifestOrigin::Remote,
            message: message.to_string(),
        }
    }

    /// 该错误是否需要人工介入（不会在下一轮扫描中自行恢复）
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IngestError::Reconciliation(_) | IngestError::UnknownProducerType { .. }
        )
    }
}
