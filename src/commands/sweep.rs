//! 扫描命令 - 首次发现 + 完成校验

use super::{detector_for, FolderKind};
use crate::core::{FinalizeOutcome, IngestEngine, SweepReport};
use crate::db::{JournalEntry, SweepJournal};
use crate::AppState;
use anyhow::Result;
use std::path::Path;
use tracing::{info, warn};

/// 运行一轮扫描，返回报告；所有结果写入历史
pub async fn run_sweep(
    state: &AppState,
    engine: &IngestEngine,
    root: &Path,
    target: &str,
    kind: FolderKind,
) -> Result<SweepReport> {
    let marked = engine.mark_first_seen(root, target).await?;
    if marked > 0 {
        info!("{} 个集合首次发现", marked);
    }

    let detector = detector_for(kind, engine.config());
    let report = engine.sweep(root, target, detector.as_ref()).await?;

    let journal = SweepJournal::new(&state.db);
    for entry in &report.entries {
        if let Err(e) = journal.record(&JournalEntry::from_sweep(entry)).await {
            warn!("记录历史失败: {}", e);
        }
    }
    Ok(report)
}

/// 打印报告摘要
pub fn print_report(report: &SweepReport) {
    for entry in &report.entries {
        let line = match &entry.result {
            Ok(FinalizeOutcome::NotDone) => "not done".to_string(),
            Ok(FinalizeOutcome::NotAtRest { age }) => {
                format!("not at rest (last update {}s ago)", age.as_secs())
            }
            Ok(FinalizeOutcome::AlreadyComplete) => "already complete".to_string(),
            Ok(FinalizeOutcome::Skipped { reason }) => format!("skipped: {}", reason),
            Ok(FinalizeOutcome::Completed {
                archived_to,
                archive_error,
            }) => match (archived_to, archive_error) {
                (_, Some(e)) => format!("complete (not moved: {})", e),
                (Some(to), None) => format!("complete, moved to {}", to.display()),
                (None, None) => "complete".to_string(),
            },
            Err(e) => format!("FAILED: {}", e),
        };
        println!("{}\t{}", entry.folder.display(), line);
    }
    println!(
        "{} folders, {} completed, {} failed",
        report.entries.len(),
        report.completed(),
        report.failed()
    );
}
