//! 应用配置模块

use crate::core::digest::DigestAlgorithm;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "RUNSYNC_";

/// 视为 true 的布尔环境变量值
const TRUTHY: [&str; 3] = ["1", "true", "yes"];

/// 摄取配置，构造引擎时传入，之后不再变化
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngestConfig {
    /// 最后一次变更后需要静止的时间（秒）
    #[serde(default = "default_delay_until_at_rest_seconds")]
    pub delay_until_at_rest_seconds: u64,
    /// 计算摘要的并发数
    #[serde(default = "default_hash_threads")]
    pub hash_threads: usize,
    #[serde(default)]
    pub hash_algo: DigestAlgorithm,
    /// 完成后是否将源文件夹移动到 `-INGESTED` 目录
    #[serde(default = "default_true")]
    pub move_after_ingest: bool,
    #[serde(default = "default_manifest_local")]
    pub manifest_local: String,
    #[serde(default = "default_manifest_remote")]
    pub manifest_remote: String,
    /// 启动时检查外部命令是否存在
    #[serde(default = "default_true")]
    pub look_for_executables: bool,
    /// 拆分输出完成标记文件
    #[serde(default = "default_demux_done_marker")]
    pub demux_done_marker: String,
}

fn default_delay_until_at_rest_seconds() -> u64 {
    5 * 60
}

fn default_hash_threads() -> usize {
    8
}

fn default_true() -> bool {
    true
}

fn default_manifest_local() -> String {
    "_MANIFEST_LOCAL.txt".to_string()
}

fn default_manifest_remote() -> String {
    "_MANIFEST_IRODS.txt".to_string()
}

fn default_demux_done_marker() -> String {
    "DIGESTIFLOW_DEMUX_DONE.txt".to_string()
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            delay_until_at_rest_seconds: default_delay_until_at_rest_seconds(),
            hash_threads: default_hash_threads(),
            hash_algo: DigestAlgorithm::default(),
            move_after_ingest: true,
            manifest_local: default_manifest_local(),
            manifest_remote: default_manifest_remote(),
            look_for_executables: true,
            demux_done_marker: default_demux_done_marker(),
        }
    }
}

impl IngestConfig {
    /// 从配置文件的 `ingest` 段加载，再用进程环境变量覆盖
    pub fn load(config_dir: &Path) -> Self {
        let mut config: Self = load_section(config_dir, "ingest");
        config.apply_env_vars(std::env::vars());
        config
    }

    /// 用 `RUNSYNC_*` 变量覆盖配置；无法解析的值保留原配置
    pub fn apply_env_vars<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref();
            match name {
                "DELAY_UNTIL_AT_REST_SECONDS" => {
                    parse_into(name, value, &mut self.delay_until_at_rest_seconds)
                }
                "HASH_THREADS" => parse_into(name, value, &mut self.hash_threads),
                "HASH_ALGO" => parse_into(name, value, &mut self.hash_algo),
                "MOVE_AFTER_INGEST" => self.move_after_ingest = is_truthy(value),
                "MANIFEST_LOCAL" => self.manifest_local = value.to_string(),
                "MANIFEST_REMOTE" => self.manifest_remote = value.to_string(),
                "LOOK_FOR_EXECUTABLES" => self.look_for_executables = is_truthy(value),
                "DEMUX_DONE_MARKER" => self.demux_done_marker = value.to_string(),
                _ => {}
            }
        }
    }
}

fn is_truthy(value: &str) -> bool {
    TRUTHY.contains(&value.trim().to_lowercase().as_str())
}

fn parse_into<T>(name: &str, value: &str, slot: &mut T)
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value.trim().parse() {
        Ok(parsed) => *slot = parsed,
        Err(e) => warn!("忽略无效的环境变量 {}{}={:?}: {}", ENV_PREFIX, name, value, e),
    }
}

/// 读取 `config.json` 中的一个配置段，缺失或无效时使用默认值
pub fn load_section<T>(config_dir: &Path, section: &str) -> T
where
    T: DeserializeOwned + Default,
{
    let config_file = config_dir.join("config.json");
    fs::read_to_string(&config_file)
        .ok()
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        .and_then(|config| config.get(section).cloned())
        .and_then(|value| match serde_json::from_value::<T>(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("配置段 {} 无效，使用默认值: {}", section, e);
                None
            }
        })
        .unwrap_or_default()
}
