//! 压缩包解包 - 基础设施层
//!
//! 只负责"解开压缩包并列出图片"，不读取图片内容

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::{AppError, AppResult, ArchiveError, FileError};

/// 支持的图片扩展名（不区分大小写）
pub const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "bmp"];

/// 判断文件名是否为支持的图片
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// 判断文件是否为 zip 压缩包（按扩展名）
pub fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

/// 解开压缩包并返回其中所有图片的路径
///
/// # 参数
/// - `archive_path`: 压缩包路径
/// - `destination`: 解压目录（保留原有的子目录结构）
///
/// # 返回
/// 按目录遍历顺序排列的图片路径；同一个未修改的目录总是得到相同的顺序
pub fn unpack(archive_path: &Path, destination: &Path) -> AppResult<Vec<PathBuf>> {
    info!("📦 正在解压: {}", archive_path.display());

    let file = File::open(archive_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::File(FileError::NotFound {
                path: archive_path.display().to_string(),
            })
        } else {
            AppError::file_read_failed(archive_path.display().to_string(), e)
        }
    })?;

    let mut archive = ZipArchive::new(file).map_err(|source| ArchiveError::Invalid {
        path: archive_path.display().to_string(),
        source,
    })?;

    std::fs::create_dir_all(destination)
        .map_err(|e| AppError::create_dir_failed(destination.display().to_string(), e))?;

    archive.extract(destination).map_err(|err| match err {
        ZipError::Io(e) => AppError::file_write_failed(destination.display().to_string(), e),
        source => AppError::Archive(ArchiveError::ExtractFailed {
            path: archive_path.display().to_string(),
            source,
        }),
    })?;

    let images = collect_images(destination)?;
    info!("✓ 压缩包中找到 {} 张图片", images.len());
    Ok(images)
}

/// 递归遍历目录，收集所有支持的图片
pub fn collect_images(root: &Path) -> AppResult<Vec<PathBuf>> {
    let mut images = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry
            .map_err(|e| AppError::file_read_failed(root.display().to_string(), e.into()))?;
        if entry.file_type().is_file() && is_supported_image(entry.path()) {
            debug!("发现图片: {}", entry.path().display());
            images.push(entry.into_path());
        }
    }

    Ok(images)
}
