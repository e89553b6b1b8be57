//! 状态命令 - 打印集合上记录的运行文件夹状态

use crate::core::{IngestEngine, RunFolderState};
use anyhow::Result;
use chrono::Utc;

pub async fn show_status(engine: &IngestEngine, collection: &str) -> Result<RunFolderState> {
    let state = engine.read_state(collection).await?;
    println!("{}", render(collection, &state, Utc::now()));
    Ok(state)
}

fn render(collection: &str, state: &RunFolderState, now: chrono::DateTime<Utc>) -> String {
    let or_unset = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
    [
        format!("collection:       {}", collection),
        format!(
            "status:           {}",
            or_unset(state.status.map(|s| s.as_str().to_string()))
        ),
        format!(
            "first_seen:       {}",
            or_unset(state.first_seen.map(|t| t.to_rfc3339()))
        ),
        format!(
            "last_update:      {} ({}s ago)",
            or_unset(state.last_update.map(|t| t.to_rfc3339())),
            state.last_update_age(now).as_secs()
        ),
        format!(
            "manifest_status:  {}",
            or_unset(state.manifest_status.map(|s| s.as_str().to_string()))
        ),
        format!(
            "manifest_message: {}",
            or_unset(state.manifest_message.clone())
        ),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{IngestStatus, ManifestStatus};

    #[test]
    fn test_render() {
        let now = "2024-01-01T00:05:00Z".parse().unwrap();
        let state = RunFolderState {
            status: Some(IngestStatus::Running),
            last_update: Some("2024-01-01T00:00:00Z".parse().unwrap()),
            manifest_status: Some(ManifestStatus::Failed),
            manifest_message: Some("extra file in local: ./B (1 total)".to_string()),
            ..Default::default()
        };
        let text = render("/zone/runs/R1", &state, now);
        assert!(text.contains("status:           running"));
        assert!(text.contains("first_seen:       -"));
        assert!(text.contains("(300s ago)"));
        assert!(text.contains("manifest_status:  failed"));
    }
}
