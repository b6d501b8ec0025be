//! 图片处理上下文
//!
//! 封装"我正在处理这批图片中的第几张"这一信息

use std::fmt::Display;
use std::path::{Path, PathBuf};

/// 图片处理上下文
#[derive(Debug, Clone)]
pub struct ImageCtx {
    /// 图片路径
    pub path: PathBuf,

    /// 文件名（结果表中的唯一键）
    pub filename: String,

    /// 在本次输入中的序号（从1开始，仅用于日志显示）
    pub index: usize,

    /// 本次输入的图片总数
    pub total: usize,
}

impl ImageCtx {
    /// 创建新的图片上下文
    pub fn new(path: &Path, index: usize, total: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            filename: filename_of(path),
            index,
            total,
        }
    }
}

/// 路径的文件名部分
pub fn filename_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl Display for ImageCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[图片 {}/{} {}]", self.index, self.total, self.filename)
    }
}
