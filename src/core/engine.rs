//! 摄取引擎 - 运行文件夹的静止检测与完成校验

use crate::config::IngestConfig;
use crate::core::checksum::LocalManifestBuilder;
use crate::core::comparator::{ManifestComparator, Verdict};
use crate::core::detector::CompletionDetector;
use crate::core::error::IngestError;
use crate::core::listing::RemoteManifestBuilder;
use crate::core::paths::{run_collection_for, to_ingested_path};
use crate::storage::{LocalFs, RemoteStore};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

// ============ 元数据键 ============

pub const KEY_FIRST_SEEN: &str = "runsync::ingest::first_seen";
pub const KEY_LAST_UPDATE: &str = "runsync::ingest::last_update";
pub const KEY_STATUS: &str = "runsync::ingest::status";
pub const KEY_MANIFEST_STATUS: &str = "runsync::ingest::manifest_status";
pub const KEY_MANIFEST_MESSAGE: &str = "runsync::ingest::manifest_message";

/// 摄取状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    Running,
    Complete,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStatus::Running => "running",
            IngestStatus::Complete => "complete",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(IngestStatus::Running),
            "complete" => Some(IngestStatus::Complete),
            _ => None,
        }
    }
}

/// 清单校验状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestStatus {
    Success,
    Failed,
}

impl ManifestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManifestStatus::Success => "success",
            ManifestStatus::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(ManifestStatus::Success),
            "failed" => Some(ManifestStatus::Failed),
            _ => None,
        }
    }
}

/// 保存在远程集合元数据中的运行文件夹状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFolderState {
    pub status: Option<IngestStatus>,
    pub first_seen: Option<DateTime<Utc>>,
    /// 多个值时取最大者
    pub last_update: Option<DateTime<Utc>>,
    pub manifest_status: Option<ManifestStatus>,
    pub manifest_message: Option<String>,
}

impl RunFolderState {
    /// 距最后一次变更的时间；没有记录时为 0
    pub fn last_update_age(&self, now: DateTime<Utc>) -> Duration {
        self.last_update
            .and_then(|last| (now - last).to_std().ok())
            .unwrap_or_default()
    }
}

/// 单个文件夹的完成检查结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// 完成标记尚未出现
    NotDone,
    /// 已完成但静止时间不足
    NotAtRest { age: Duration },
    /// 远程状态已是 complete
    AlreadyComplete,
    /// 文件夹不存在或正在被另一个任务处理
    Skipped { reason: String },
    Completed {
        archived_to: Option<PathBuf>,
        /// 归档移动失败的原因（不影响完成状态）
        archive_error: Option<String>,
    },
}

/// 一次扫描中单个文件夹的结果
#[derive(Debug)]
pub struct SweepEntry {
    pub folder: PathBuf,
    pub collection: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result: Result<FinalizeOutcome, IngestError>,
}

/// 扫描报告
#[derive(Debug, Default)]
pub struct SweepReport {
    pub entries: Vec<SweepEntry>,
}

impl SweepReport {
    pub fn completed(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.result, Ok(FinalizeOutcome::Completed { .. })))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.entries.iter().filter(|e| e.result.is_err()).count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }
}

/// 上传引擎报告的数据对象变更
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// 本地文件路径
    pub path: PathBuf,
    /// 本地源根目录
    pub root: PathBuf,
    /// 对应的远程对象路径
    pub target: String,
}

/// 解析元数据中的时间戳（RFC 3339，或不带时区的本地时间）
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// 摄取引擎
pub struct IngestEngine {
    config: IngestConfig,
    store: Arc<dyn RemoteStore>,
    fs: Arc<dyn LocalFs>,
    local_builder: LocalManifestBuilder,
    remote_builder: RemoteManifestBuilder,
    /// 正在完成校验的源文件夹
    in_flight: Mutex<HashSet<PathBuf>>,
}

impl IngestEngine {
    pub fn new(config: IngestConfig, store: Arc<dyn RemoteStore>, fs: Arc<dyn LocalFs>) -> Self {
        let local_builder = LocalManifestBuilder::new(
            config.hash_algo,
            config.hash_threads,
            config.manifest_local.clone(),
            config.manifest_remote.clone(),
        );
        let remote_builder =
            RemoteManifestBuilder::new(config.manifest_local.clone(), config.manifest_remote.clone());
        Self {
            config,
            store,
            fs,
            local_builder,
            remote_builder,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    fn in_flight(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn at_rest_delay(&self) -> Duration {
        Duration::from_secs(self.config.delay_until_at_rest_seconds)
    }

    /// 读取集合上的运行文件夹状态
    pub async fn read_state(&self, collection: &str) -> Result<RunFolderState, IngestError> {
        let status = self.store.get_metadata(collection, KEY_STATUS).await?;
        let first_seen = self.store.get_metadata(collection, KEY_FIRST_SEEN).await?;
        let last_update = self.store.get_metadata(collection, KEY_LAST_UPDATE).await?;
        let manifest_status = self.store.get_metadata(collection, KEY_MANIFEST_STATUS).await?;
        let manifest_message = self.store.get_metadata(collection, KEY_MANIFEST_MESSAGE).await?;

        let parse_all = |values: &[String], key: &str| -> Vec<DateTime<Utc>> {
            values
                .iter()
                .filter_map(|v| {
                    let parsed = parse_timestamp(v);
                    if parsed.is_none() {
                        warn!("{} 的 {} 无法解析: {:?}", collection, key, v);
                    }
                    parsed
                })
                .collect()
        };

        Ok(RunFolderState {
            status: status.last().and_then(|v| IngestStatus::parse(v)),
            first_seen: parse_all(&first_seen, KEY_FIRST_SEEN).into_iter().min(),
            last_update: parse_all(&last_update, KEY_LAST_UPDATE).into_iter().max(),
            manifest_status: manifest_status.last().and_then(|v| ManifestStatus::parse(v)),
            manifest_message: manifest_message.last().cloned(),
        })
    }

    /// 源目录中在远程存在同名子集合的文件夹（按名称排序）
    async fn matched_folders(
        &self,
        src_root: &Path,
        dst_root: &str,
    ) -> Result<Vec<(PathBuf, String)>, IngestError> {
        let collections: BTreeSet<String> = self
            .store
            .list_subcollections(dst_root)
            .await?
            .into_iter()
            .collect();

        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(src_root).await?;
        while let Some(entry) = dir.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        let dst_root = dst_root.trim_end_matches('/');
        let mut matched = Vec::new();
        for name in names {
            if collections.contains(&name) {
                matched.push((src_root.join(&name), format!("{}/{}", dst_root, name)));
            } else {
                info!("跳过 {}: 没有对应的远程集合", name);
            }
        }
        Ok(matched)
    }

    // ============ 首次发现 ============

    pub async fn mark_first_seen(&self, src_root: &Path, dst_root: &str) -> Result<usize, IngestError> {
        self.mark_first_seen_at(src_root, dst_root, Utc::now()).await
    }

    /// 为尚无 `first_seen` 的集合写入当前时间，返回写入的数量
    pub async fn mark_first_seen_at(
        &self,
        src_root: &Path,
        dst_root: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, IngestError> {
        let mut marked = 0;
        for (_, collection) in self.matched_folders(src_root, dst_root).await? {
            if self
                .store
                .get_metadata(&collection, KEY_FIRST_SEEN)
                .await?
                .is_empty()
            {
                self.store
                    .set_metadata(&collection, KEY_FIRST_SEEN, &format_timestamp(now))
                    .await?;
                debug!("首次发现: {}", collection);
                marked += 1;
            }
        }
        Ok(marked)
    }

    // ============ 变更事件 ============

    pub async fn on_change(&self, event: &ChangeEvent) -> Result<String, IngestError> {
        self.on_change_at(event, Utc::now()).await
    }

    /// 刷新 `last_update` 并标记为 running，然后登记对象校验和
    ///
    /// 返回运行文件夹对应的集合路径。
    pub async fn on_change_at(
        &self,
        event: &ChangeEvent,
        now: DateTime<Utc>,
    ) -> Result<String, IngestError> {
        let collection = run_collection_for(&event.path, &event.root, &event.target).ok_or_else(
            || IngestError::UnmappedEvent {
                path: event.path.clone(),
            },
        )?;

        self.store
            .set_metadata(&collection, KEY_LAST_UPDATE, &format_timestamp(now))
            .await?;
        self.store
            .set_metadata(&collection, KEY_STATUS, IngestStatus::Running.as_str())
            .await?;
        self.store.register_checksum(&event.target).await?;

        debug!("已刷新 {} (来自 {})", collection, event.target);
        Ok(collection)
    }

    /// 批量处理变更事件，单个事件失败只记录日志，返回成功数量
    pub async fn handle_changes(&self, events: &[ChangeEvent]) -> usize {
        let now = Utc::now();
        let mut handled = 0;
        for event in events {
            match self.on_change_at(event, now).await {
                Ok(_) => handled += 1,
                Err(e) => warn!("处理变更事件 {} 失败: {}", event.path.display(), e),
            }
        }
        handled
    }

    // ============ 扫描与完成 ============

    pub async fn sweep(
        &self,
        src_root: &Path,
        dst_root: &str,
        detector: &dyn CompletionDetector,
    ) -> Result<SweepReport, IngestError> {
        self.sweep_at(src_root, dst_root, detector, Utc::now()).await
    }

    /// 对所有运行文件夹尝试完成校验；单个文件夹的错误不影响其他文件夹
    pub async fn sweep_at(
        &self,
        src_root: &Path,
        dst_root: &str,
        detector: &dyn CompletionDetector,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, IngestError> {
        info!(
            "开始扫描: {} -> {} (检测器: {})",
            src_root.display(),
            dst_root,
            detector.name()
        );

        let mut report = SweepReport::default();
        for (folder, collection) in self.matched_folders(src_root, dst_root).await? {
            let started_at = Utc::now();
            let result = self
                .finalize_folder_at(&folder, &collection, detector, now)
                .await;
            if let Err(ref e) = result {
                error!("{} 完成校验失败: {}", folder.display(), e);
            }
            report.entries.push(SweepEntry {
                folder,
                collection,
                started_at,
                finished_at: Utc::now(),
                result,
            });
        }

        info!(
            "扫描结束: {} 个文件夹, 完成 {}, 失败 {}",
            report.entries.len(),
            report.completed(),
            report.failed()
        );
        Ok(report)
    }

    pub async fn finalize_folder(
        &self,
        folder: &Path,
        collection: &str,
        detector: &dyn CompletionDetector,
    ) -> Result<FinalizeOutcome, IngestError> {
        self.finalize_folder_at(folder, collection, detector, Utc::now())
            .await
    }

    /// 检查单个运行文件夹，满足条件时校验清单、归档并标记完成
    pub async fn finalize_folder_at(
        &self,
        folder: &Path,
        collection: &str,
        detector: &dyn CompletionDetector,
        now: DateTime<Utc>,
    ) -> Result<FinalizeOutcome, IngestError> {
        if !self.in_flight().insert(folder.to_path_buf()) {
            info!("{} 正在处理中，跳过", folder.display());
            return Ok(FinalizeOutcome::Skipped {
                reason: "already in progress".to_string(),
            });
        }
        let _lock = scopeguard::guard(folder.to_path_buf(), |folder| {
            self.in_flight().remove(&folder);
        });

        if !self.fs.exists(folder).await {
            info!("{} 已不存在，跳过", folder.display());
            return Ok(FinalizeOutcome::Skipped {
                reason: "folder no longer exists".to_string(),
            });
        }

        let state = self.read_state(collection).await?;
        if state.status == Some(IngestStatus::Complete) {
            debug!("{} 已完成，跳过", collection);
            return Ok(FinalizeOutcome::AlreadyComplete);
        }

        if !detector.is_done(folder).await? {
            info!("{} 尚未标记为完成", folder.display());
            return Ok(FinalizeOutcome::NotDone);
        }

        let age = state.last_update_age(now);
        let delay = self.at_rest_delay();
        if age < delay {
            info!(
                "{} 最后更新于 {:?} 前 (< {:?})，暂不完成",
                collection, age, delay
            );
            return Ok(FinalizeOutcome::NotAtRest { age });
        }
        info!(
            "{} 最后更新于 {:?} 前 (>= {:?})，开始校验清单",
            collection, age, delay
        );

        let (local_path, local) = self.local_builder.build(folder).await?;
        let (remote_path, remote) = self
            .remote_builder
            .build(self.store.as_ref(), collection, folder)
            .await?;

        let verdict = ManifestComparator::compare(&local, &remote);
        if !verdict.is_consistent() {
            self.record_manifest(collection, ManifestStatus::Failed, &verdict)
                .await?;
            return Err(IngestError::Reconciliation(verdict));
        }

        for path in [&local_path, &remote_path] {
            self.publish(path, collection).await?;
        }
        self.record_manifest(collection, ManifestStatus::Success, &verdict)
            .await?;

        let (archived_to, archive_error) = if self.config.move_after_ingest {
            self.archive(folder).await
        } else {
            (None, None)
        };

        self.store
            .set_metadata(collection, KEY_STATUS, IngestStatus::Complete.as_str())
            .await?;
        info!("{} 已完成", collection);

        Ok(FinalizeOutcome::Completed {
            archived_to,
            archive_error,
        })
    }

    async fn record_manifest(
        &self,
        collection: &str,
        status: ManifestStatus,
        verdict: &Verdict,
    ) -> Result<(), IngestError> {
        self.store
            .set_metadata(collection, KEY_MANIFEST_STATUS, status.as_str())
            .await?;
        self.store
            .set_metadata(collection, KEY_MANIFEST_MESSAGE, &verdict.to_string())
            .await?;
        Ok(())
    }

    /// 上传清单文件并登记校验和
    async fn publish(&self, path: &Path, collection: &str) -> Result<(), IngestError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let remote = format!("{}/{}", collection.trim_end_matches('/'), name);
        info!("上传清单 {} -> {}", path.display(), remote);
        self.store.put_object(path, &remote).await?;
        self.store.register_checksum(&remote).await?;
        Ok(())
    }

    /// 移动到 `-INGESTED` 目录；失败只记录日志
    async fn archive(&self, folder: &Path) -> (Option<PathBuf>, Option<String>) {
        let Some(target) = to_ingested_path(folder) else {
            let e = IngestError::ArchiveMove {
                from: folder.to_path_buf(),
                to: PathBuf::new(),
                message: "no parent directory".to_string(),
            };
            error!("{}", e);
            return (None, Some(e.to_string()));
        };

        info!("移动 {} -> {}", folder.display(), target.display());
        match self.fs.rename_dir(folder, &target).await {
            Ok(()) => (Some(target), None),
            Err(e) => {
                let e = IngestError::ArchiveMove {
                    from: folder.to_path_buf(),
                    to: target,
                    message: format!("{:#}", e),
                };
                error!("{}", e);
                (None, Some(e.to_string()))
            }
        }
    }
}
