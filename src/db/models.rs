use crate::core::{FinalizeOutcome, SweepEntry};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

/// 历史记录中的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalOutcome {
    NotDone,
    NotAtRest,
    Complete,
    Failed,
    Skipped,
}

impl JournalOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalOutcome::NotDone => "not_done",
            JournalOutcome::NotAtRest => "not_at_rest",
            JournalOutcome::Complete => "complete",
            JournalOutcome::Failed => "failed",
            JournalOutcome::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "not_done" => Some(JournalOutcome::NotDone),
            "not_at_rest" => Some(JournalOutcome::NotAtRest),
            "complete" => Some(JournalOutcome::Complete),
            "failed" => Some(JournalOutcome::Failed),
            "skipped" => Some(JournalOutcome::Skipped),
            _ => None,
        }
    }
}

/// 一次完成校验尝试的记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    pub id: String,
    pub folder: String,
    pub collection: String,
    pub outcome: JournalOutcome,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JournalEntry {
    /// 由扫描结果生成记录
    pub fn from_sweep(entry: &SweepEntry) -> Self {
        let (outcome, message) = match &entry.result {
            Ok(FinalizeOutcome::NotDone) => (JournalOutcome::NotDone, None),
            Ok(FinalizeOutcome::NotAtRest { age }) => (
                JournalOutcome::NotAtRest,
                Some(format!("last update {}s ago", age.as_secs())),
            ),
            Ok(FinalizeOutcome::AlreadyComplete) => {
                (JournalOutcome::Skipped, Some("already complete".to_string()))
            }
            Ok(FinalizeOutcome::Skipped { reason }) => {
                (JournalOutcome::Skipped, Some(reason.clone()))
            }
            Ok(FinalizeOutcome::Completed {
                archived_to,
                archive_error,
            }) => {
                let message = match (archived_to, archive_error) {
                    (_, Some(e)) => Some(e.clone()),
                    (Some(to), None) => Some(format!("moved to {}", to.display())),
                    (None, None) => None,
                };
                (JournalOutcome::Complete, message)
            }
            Err(e) => (JournalOutcome::Failed, Some(e.to_string())),
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            folder: entry.folder.display().to_string(),
            collection: entry.collection.clone(),
            outcome,
            message,
            started_at: entry.started_at,
            finished_at: entry.finished_at,
        }
    }
}

/// 数据库行
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct JournalRow {
    pub id: String,
    pub folder: String,
    pub collection: String,
    pub outcome: String,
    pub message: Option<String>,
    pub started_at: i64,
    pub finished_at: i64,
}

impl TryFrom<JournalRow> for JournalEntry {
    type Error = anyhow::Error;

    fn try_from(row: JournalRow) -> Result<Self, Self::Error> {
        let outcome = JournalOutcome::parse(&row.outcome)
            .ok_or_else(|| anyhow::anyhow!("未知的结果: {}", row.outcome))?;
        let timestamp = |secs: i64| {
            Utc.timestamp_opt(secs, 0)
                .single()
                .ok_or_else(|| anyhow::anyhow!("无效的时间戳: {}", secs))
        };
        Ok(JournalEntry {
            id: row.id,
            folder: row.folder,
            collection: row.collection,
            outcome,
            message: row.message,
            started_at: timestamp(row.started_at)?,
            finished_at: timestamp(row.finished_at)?,
        })
    }
}
