//! 完成检测 - 判断仪器是否已写完运行文件夹

use crate::core::error::IngestError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 运行参数描述文件名（两种大小写变体）
pub const RUN_PARAMETERS_FILES: [&str; 2] = ["RunParameters.xml", "runParameters.xml"];

/// 完成检测器：每种输出类型一个实现
#[async_trait]
pub trait CompletionDetector: Send + Sync {
    /// 文件夹的写入者是否已完成
    async fn is_done(&self, folder: &Path) -> Result<bool, IngestError>;

    /// 检测器名称（用于日志）
    fn name(&self) -> &str;
}

/// 描述文件中用于分类的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunParameterField {
    Application,
    ApplicationName,
    RunParametersVersion,
}

impl RunParameterField {
    fn tag(&self) -> &'static str {
        match self {
            RunParameterField::Application => "Application",
            RunParameterField::ApplicationName => "ApplicationName",
            RunParameterField::RunParametersVersion => "RunParametersVersion",
        }
    }
}

/// 从 `RunParameters.xml` 中提取的字段
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunParameters {
    pub application: Option<String>,
    pub application_name: Option<String>,
    pub run_parameters_version: Option<String>,
}

impl RunParameters {
    /// 解析描述文件内容；每个字段取文档中第一个同名元素
    pub fn parse(xml: &str) -> Result<Self, roxmltree::Error> {
        let doc = roxmltree::Document::parse(xml)?;
        let find = |field: RunParameterField| {
            doc.descendants()
                .find(|n| n.has_tag_name(field.tag()))
                .and_then(|n| n.text())
                .map(|t| t.trim().to_string())
        };
        Ok(Self {
            application: find(RunParameterField::Application),
            application_name: find(RunParameterField::ApplicationName),
            run_parameters_version: find(RunParameterField::RunParametersVersion),
        })
    }

    pub fn read(path: &Path) -> Result<Self, IngestError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text).map_err(|e| IngestError::Descriptor {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn field(&self, field: RunParameterField) -> Option<&str> {
        match field {
            RunParameterField::Application => self.application.as_deref(),
            RunParameterField::ApplicationName => self.application_name.as_deref(),
            RunParameterField::RunParametersVersion => self.run_parameters_version.as_deref(),
        }
    }
}

/// 已知的测序仪类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentFamily {
    NovaSeq,
    NextSeq,
    HiSeq,
    MiSeq,
    MiniSeq,
}

/// 分类规则：字段包含关键字（不区分大小写）即归为该类型
pub struct FamilyRule {
    pub family: InstrumentFamily,
    pub field: RunParameterField,
    pub needle: &'static str,
    /// 全部存在才算完成
    pub markers: &'static [&'static str],
}

/// 分类表，按顺序匹配，第一个命中的规则生效
pub const FAMILY_RULES: &[FamilyRule] = &[
    FamilyRule {
        family: InstrumentFamily::NovaSeq,
        field: RunParameterField::Application,
        needle: "novaseq",
        markers: &["CopyComplete.txt"],
    },
    FamilyRule {
        family: InstrumentFamily::NextSeq,
        field: RunParameterField::ApplicationName,
        needle: "nextseq",
        markers: &["RTAComplete.txt"],
    },
    FamilyRule {
        family: InstrumentFamily::HiSeq,
        field: RunParameterField::ApplicationName,
        needle: "hiseq",
        markers: &["RTAComplete.txt"],
    },
    FamilyRule {
        family: InstrumentFamily::MiSeq,
        field: RunParameterField::RunParametersVersion,
        needle: "miseq",
        markers: &[
            "Basecalling_Netcopy_complete.txt",
            "ImageAnalysis_Netcopy_complete.txt",
        ],
    },
    FamilyRule {
        family: InstrumentFamily::MiniSeq,
        field: RunParameterField::ApplicationName,
        needle: "miniseq",
        markers: &["RTAComplete.txt"],
    },
];

/// 根据运行参数查找分类规则
pub fn classify(params: &RunParameters) -> Option<&'static FamilyRule> {
    FAMILY_RULES.iter().find(|rule| {
        params
            .field(rule.field)
            .map(|value| value.to_lowercase().contains(rule.needle))
            .unwrap_or(false)
    })
}

/// 测序仪运行文件夹检测器
#[derive(Debug, Default)]
pub struct RunFolderDetector;

impl RunFolderDetector {
    pub fn new() -> Self {
        Self
    }

    fn find_descriptor(folder: &Path) -> Option<PathBuf> {
        RUN_PARAMETERS_FILES
            .iter()
            .map(|name| folder.join(name))
            .find(|path| path.exists())
    }

    /// 同步检测：读取描述文件并检查标记文件
    pub fn check(folder: &Path) -> Result<bool, IngestError> {
        let Some(descriptor) = Self::find_descriptor(folder) else {
            debug!("未找到运行参数文件: {}", folder.display());
            return Ok(false);
        };

        let params = RunParameters::read(&descriptor)?;
        let rule = classify(&params).ok_or_else(|| IngestError::UnknownProducerType {
            descriptor: descriptor.clone(),
        })?;

        let done = rule.markers.iter().all(|m| folder.join(m).exists());
        debug!(
            "{}: 仪器类型 {:?}, 标记文件 {:?}, 完成={}",
            folder.display(),
            rule.family,
            rule.markers,
            done
        );
        Ok(done)
    }
}

/// 在阻塞线程池中执行同步检测
async fn run_blocking<F>(check: F) -> Result<bool, IngestError>
where
    F: FnOnce() -> Result<bool, IngestError> + Send + 'static,
{
    tokio::task::spawn_blocking(check)
        .await
        .map_err(|e| IngestError::Io(std::io::Error::other(e)))?
}

#[async_trait]
impl CompletionDetector for RunFolderDetector {
    async fn is_done(&self, folder: &Path) -> Result<bool, IngestError> {
        let folder = folder.to_path_buf();
        run_blocking(move || Self::check(&folder)).await
    }

    fn name(&self) -> &str {
        "run-folder"
    }
}

/// 通用输出检测器：单个标记文件存在即完成（如拆分输出）
#[derive(Debug, Clone)]
pub struct MarkerFileDetector {
    marker: String,
}

impl MarkerFileDetector {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

#[async_trait]
impl CompletionDetector for MarkerFileDetector {
    async fn is_done(&self, folder: &Path) -> Result<bool, IngestError> {
        let marker = folder.join(&self.marker);
        run_blocking(move || Ok(marker.exists())).await
    }

    fn name(&self) -> &str {
        "marker-file"
    }
}
