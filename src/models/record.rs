//! 结果表中的一行记录

use std::path::PathBuf;

use chrono::Local;
use serde::Serialize;

/// 结果表的列，顺序即为表格中的顺序
pub const COLUMNS: [&str; 8] = [
    "Filename",
    "Format",
    "Width",
    "Height",
    "Subject",
    "Audience",
    "Description",
    "Generated At",
];

/// 描述失败时文本的统一前缀
pub const ERROR_PREFIX: &str = "Error";

/// 单张图片超过总时限时描述文本的前缀
pub const TIMEOUT_PREFIX: &str = "Error generating description: timed out";

/// 时间戳格式
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 描述生成状态
///
/// 只在内存中使用，不写入表格；表格消费者仍然通过 `Description`
/// 的 `Error` 前缀判断失败。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptionStatus {
    Described,
    Failed,
    TimedOut,
}

impl DescriptionStatus {
    /// 从已保存的描述文本推断状态
    pub fn infer(description: &str) -> Self {
        if description.starts_with(TIMEOUT_PREFIX) {
            DescriptionStatus::TimedOut
        } else if description.starts_with(ERROR_PREFIX) {
            DescriptionStatus::Failed
        } else {
            DescriptionStatus::Described
        }
    }

    pub fn is_failure(self) -> bool {
        self != DescriptionStatus::Described
    }
}

/// 图片基本信息（探测结果）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMeta {
    pub format: String,
    pub width: u32,
    pub height: u32,
}

impl ImageMeta {
    /// 文件可读但无法解析时的占位信息
    pub fn unknown() -> Self {
        Self {
            format: "Unknown".to_string(),
            width: 0,
            height: 0,
        }
    }

    /// 文件本身无法读取时的占位信息
    pub fn error() -> Self {
        Self {
            format: "Error".to_string(),
            width: 0,
            height: 0,
        }
    }
}

/// 结果表中的一行
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub filename: String,
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub subject: String,
    pub audience: String,
    pub description: String,
    /// 已格式化的时间戳，原样读写以保证续跑时旧行不变
    pub generated_at: String,
    pub status: DescriptionStatus,
}

impl ImageRecord {
    /// 用当前时间创建记录
    pub fn new(
        filename: impl Into<String>,
        meta: ImageMeta,
        subject: &str,
        audience: &str,
        description: String,
        status: DescriptionStatus,
    ) -> Self {
        Self {
            filename: filename.into(),
            format: meta.format,
            width: meta.width,
            height: meta.height,
            subject: subject.to_string(),
            audience: audience.to_string(),
            description,
            generated_at: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            status,
        }
    }
}

/// 一次 `run` 的结果摘要
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// 本次实际处理的图片数（续跑跳过的不计入）
    pub processed_count: usize,
    /// 其中描述失败的数量
    pub failed_count: usize,
    /// 因已有记录而跳过的数量
    pub skipped_count: usize,
    pub store_path: PathBuf,
}
