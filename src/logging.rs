//! 日志模块 - 提供文件日志和大小管理功能

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;

/// 日志文件名
pub const LOG_FILE_NAME: &str = "ingest.log";

/// 保留的历史日志数量（ingest.log.1 ... ingest.log.N）
pub const MAX_BACKUPS: usize = 3;

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用日志记录
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 单个日志文件的最大大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5 // 默认 5MB
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// 从配置文件的 `log` 段加载
    pub fn load(config_dir: &Path) -> Self {
        crate::config::load_section(config_dir, "log")
    }

    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 日志目录
pub fn log_dir(config_dir: &Path) -> PathBuf {
    config_dir.join("logs")
}

struct Inner {
    writer: Option<BufWriter<File>>,
    /// 当前文件已写入的字节数
    written: u64,
}

/// 按大小轮转的日志写入器
#[derive(Clone)]
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    inner: Arc<Mutex<Inner>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        Self::with_max_bytes(log_dir, (max_size_mb.max(1) as u64) * 1024 * 1024)
    }

    pub fn with_max_bytes(log_dir: &Path, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let file_path = log_dir.join(LOG_FILE_NAME);

        let written = fs::metadata(&file_path).map(|m| m.len()).unwrap_or(0);
        let mut inner = Inner {
            writer: None,
            written,
        };
        if written > max_size {
            rotate(&file_path)?;
            inner.written = 0;
        }
        inner.writer = Some(open(&file_path)?);

        Ok(Self {
            file_path,
            max_size,
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write_record(&self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.lock();

        if inner.written > 0 && inner.written + buf.len() as u64 > self.max_size {
            if let Some(mut w) = inner.writer.take() {
                let _ = w.flush();
            }
            rotate(&self.file_path)?;
            inner.writer = Some(open(&self.file_path)?);
            inner.written = 0;
        }

        let writer = inner
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "Writer not available"))?;
        writer.write_all(buf)?;
        writer.flush()?;
        inner.written += buf.len() as u64;
        Ok(buf.len())
    }
}

fn open(file_path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(file_path)?;
    Ok(BufWriter::new(file))
}

fn backup_path(file_path: &Path, index: usize) -> PathBuf {
    let mut name = file_path.as_os_str().to_os_string();
    name.push(format!(".{}", index));
    PathBuf::from(name)
}

/// ingest.log -> ingest.log.1 -> ingest.log.2 ...，最旧的被删除
fn rotate(file_path: &Path) -> io::Result<()> {
    let oldest = backup_path(file_path, MAX_BACKUPS);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for index in (1..MAX_BACKUPS).rev() {
        let from = backup_path(file_path, index);
        if from.exists() {
            fs::rename(&from, backup_path(file_path, index + 1))?;
        }
    }
    if file_path.exists() {
        fs::rename(file_path, backup_path(file_path, 1))?;
    }
    Ok(())
}

/// 单条日志的写入句柄
pub struct LogWriter {
    target: SizeRotatingWriter,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.target.write_record(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.target.lock().writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            target: self.clone(),
        }
    }
}
