use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;

pub mod commands;
pub mod config;
pub mod core;
pub mod db;
pub mod logging;
pub mod storage;

pub use crate::config::IngestConfig;
pub use crate::core::{IngestEngine, IngestError};
pub use crate::storage::StoreConfig;

/// 应用名，用于默认配置目录
pub const APP_NAME: &str = "runsync";

/// 默认配置目录
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join(APP_NAME))
        .unwrap_or_else(|| PathBuf::from(format!(".{}", APP_NAME)))
}

/// 应用状态，在各命令间共享
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub config: IngestConfig,
    pub store_config: StoreConfig,
    pub config_dir: PathBuf,
}

impl AppState {
    pub async fn new(config_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let config_dir = config_dir.unwrap_or_else(default_config_dir);
        std::fs::create_dir_all(&config_dir)?;
        tracing::debug!("配置目录: {:?}", config_dir);

        let config = IngestConfig::load(&config_dir);
        let store_config: StoreConfig = config::load_section(&config_dir, "store");

        let db = db::open(&config_dir.join("runsync.db")).await?;

        Ok(Self {
            db: Arc::new(db),
            config,
            store_config,
            config_dir,
        })
    }

    /// 根据配置创建引擎
    pub fn engine(&self) -> anyhow::Result<IngestEngine> {
        let store = storage::create_store(&self.store_config, self.config.hash_algo)?;
        Ok(IngestEngine::new(
            self.config.clone(),
            store,
            Arc::new(storage::OsFs),
        ))
    }

    /// 清理资源
    pub async fn cleanup(&self) {
        tracing::debug!("关闭数据库连接池...");
        self.db.close().await;
    }
}
