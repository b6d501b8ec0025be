//! 作业状态与下载信息

use std::path::PathBuf;

use serde::Serialize;
use uuid::Uuid;

/// 下载时使用的固定文件名
pub const DOWNLOAD_NAME: &str = "image_descriptions.xlsx";

/// 结果表的 MIME 类型
pub const SPREADSHEET_MIME: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// 作业状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    NotFound,
    Processing,
    Completed { excel_file: String },
}

/// 提交作业后的回执
#[derive(Debug, Clone, Serialize)]
pub struct JobReceipt {
    pub success: bool,
    pub job_id: Uuid,
    pub message: String,
    pub total_images: usize,
    pub failed_images: usize,
    pub excel_file: String,
}

/// 可供下载的结果文件
#[derive(Debug, Clone, Serialize)]
pub struct DownloadArtifact {
    pub path: PathBuf,
    pub download_name: &'static str,
    pub mime: &'static str,
}
