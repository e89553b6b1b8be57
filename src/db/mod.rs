pub mod models;
pub use models::*;

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
pub use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// 打开（必要时创建）历史数据库并运行迁移
pub async fn open(db_path: &Path) -> Result<SqlitePool> {
    // Windows 路径需要转换反斜杠为正斜杠
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid database path"))?
        .replace('\\', "/");

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&format!("sqlite:{}?mode=rwc", db_path_str))
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

/// 完成校验历史
pub struct SweepJournal<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SweepJournal<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, entry: &JournalEntry) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO sweep_journal
               (id, folder, collection, outcome, message, started_at, finished_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&entry.id)
        .bind(&entry.folder)
        .bind(&entry.collection)
        .bind(entry.outcome.as_str())
        .bind(&entry.message)
        .bind(entry.started_at.timestamp())
        .bind(entry.finished_at.timestamp())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// 最近的记录，新的在前
    pub async fn recent(&self, limit: i64) -> Result<Vec<JournalEntry>> {
        let rows = sqlx::query_as::<_, JournalRow>(
            "SELECT id, folder, collection, outcome, message, started_at, finished_at
             FROM sweep_journal
             ORDER BY started_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(JournalEntry::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FinalizeOutcome, IngestError, SweepEntry, Verdict};
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn sweep_entry(name: &str, secs: i64, result: Result<FinalizeOutcome, IngestError>) -> SweepEntry {
        let at = Utc.timestamp_opt(secs, 0).unwrap();
        SweepEntry {
            folder: PathBuf::from(format!("/data/runs/{}", name)),
            collection: format!("/zone/runs/{}", name),
            started_at: at,
            finished_at: at,
            result,
        }
    }

    #[tokio::test]
    async fn test_record_and_list_recent() {
        let pool = memory_pool().await;
        let journal = SweepJournal::new(&pool);

        let failed = sweep_entry(
            "R1",
            100,
            Err(IngestError::Reconciliation(Verdict::ExtraLocal {
                path: "./B".to_string(),
                count: 1,
                examples: vec!["./B".to_string()],
            })),
        );
        let done = sweep_entry(
            "R2",
            200,
            Ok(FinalizeOutcome::Completed {
                archived_to: Some(PathBuf::from("/data/runs-INGESTED/R2")),
                archive_error: None,
            }),
        );
        journal.record(&JournalEntry::from_sweep(&failed)).await.unwrap();
        journal.record(&JournalEntry::from_sweep(&done)).await.unwrap();

        let recent = journal.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].collection, "/zone/runs/R2");
        assert_eq!(recent[0].outcome, JournalOutcome::Complete);
        assert_eq!(recent[1].outcome, JournalOutcome::Failed);
        assert!(recent[1]
            .message
            .as_deref()
            .unwrap()
            .contains("extra file in local: ./B"));

        assert_eq!(journal.recent(1).await.unwrap().len(), 1);
    }
}
