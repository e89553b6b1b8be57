//! 命令处理 - 每个子命令一个模块

pub mod event;
pub mod history;
pub mod status;
pub mod sweep;
pub mod tools;

use crate::config::IngestConfig;
use crate::core::{CompletionDetector, MarkerFileDetector, RunFolderDetector};
use clap::ValueEnum;

/// 源目录中文件夹的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum FolderKind {
    /// 测序仪运行文件夹（RunParameters.xml + 完成标记）
    #[default]
    RunFolder,
    /// 拆分输出文件夹（单个完成标记）
    Demux,
}

/// 按文件夹类型选择完成检测器
pub fn detector_for(kind: FolderKind, config: &IngestConfig) -> Box<dyn CompletionDetector> {
    match kind {
        FolderKind::RunFolder => Box::new(RunFolderDetector::new()),
        FolderKind::Demux => Box::new(MarkerFileDetector::new(config.demux_done_marker.clone())),
    }
}
