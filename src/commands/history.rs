//! 历史命令

use crate::db::{JournalEntry, SweepJournal};
use crate::AppState;
use anyhow::Result;

pub async fn show_history(state: &AppState, limit: i64) -> Result<Vec<JournalEntry>> {
    let entries = SweepJournal::new(&state.db).recent(limit.max(1)).await?;
    for entry in &entries {
        println!(
            "{}\t{}\t{}\t{}",
            entry.started_at.to_rfc3339(),
            entry.outcome.as_str(),
            entry.collection,
            entry.message.as_deref().unwrap_or("")
        );
    }
    Ok(entries)
}
