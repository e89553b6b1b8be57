//! 变更事件命令 - 上传引擎创建或更新数据对象后调用

use crate::core::{ChangeEvent, IngestEngine};
use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

pub async fn handle_event(
    engine: &IngestEngine,
    path: PathBuf,
    root: PathBuf,
    target: String,
) -> Result<String> {
    let event = ChangeEvent { path, root, target };
    let collection = engine.on_change(&event).await?;
    info!("{} 状态已刷新", collection);
    Ok(collection)
}
