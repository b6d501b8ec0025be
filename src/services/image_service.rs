//! 图片服务 - 业务能力层
//!
//! 只负责"读图片"能力：探测尺寸/格式、超大图片缩小、编码成可以内嵌到请求里的 data URL

use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result};
use base64::Engine as _;
use image::imageops::FilterType;
use image::{ImageFormat, ImageReader, Limits};
use tracing::debug;

use crate::error::{AppError, AppResult, ImageError};
use crate::models::record::ImageMeta;

/// 探测图片的格式和尺寸（只读文件头）
pub fn probe(path: &Path) -> AppResult<ImageMeta> {
    let reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;

    let format = reader.format();
    let (width, height) = reader
        .into_dimensions()
        .map_err(|source| ImageError::DecodeFailed {
            path: path.display().to_string(),
            source,
        })?;

    Ok(ImageMeta {
        format: format.map(format_name).unwrap_or_else(|| "Unknown".to_string()),
        width,
        height,
    })
}

/// 探测图片；失败时返回占位信息而不是错误
///
/// 文件无法读取记为 `Error`，能读取但无法解析记为 `Unknown`。
pub fn probe_or_placeholder(path: &Path) -> ImageMeta {
    match probe(path) {
        Ok(meta) => meta,
        Err(AppError::File(_)) => ImageMeta::error(),
        Err(_) => ImageMeta::unknown(),
    }
}

/// 与常见表格工具一致的格式名（PNG、JPEG ...）
pub fn format_name(format: ImageFormat) -> String {
    match format {
        ImageFormat::Png => "PNG".to_string(),
        ImageFormat::Jpeg => "JPEG".to_string(),
        ImageFormat::Gif => "GIF".to_string(),
        ImageFormat::Bmp => "BMP".to_string(),
        ImageFormat::WebP => "WEBP".to_string(),
        ImageFormat::Tiff => "TIFF".to_string(),
        other => format!("{:?}", other).to_uppercase(),
    }
}

/// 计算缩小后的尺寸，使像素面积不超过 `max_area`
///
/// 不需要缩小时返回 `None`。宽按 `sqrt(max_area / area)` 缩放，
/// 高按原始宽高比从新宽推出，两者都向下取整。
pub fn fit_within_area(width: u32, height: u32, max_area: u64) -> Option<(u32, u32)> {
    let area = u64::from(width) * u64::from(height);
    if max_area == 0 || area <= max_area {
        return None;
    }

    let scale = (max_area as f64 / area as f64).sqrt();
    let new_width = ((f64::from(width) * scale).floor() as u32).max(1);
    let new_height =
        ((f64::from(new_width) * f64::from(height) / f64::from(width)).floor() as u32).max(1);

    Some((new_width, new_height))
}

/// 准备发送的图片
#[derive(Debug)]
pub struct TransportImage {
    pub mime: String,
    pub bytes: Vec<u8>,
    /// 实际发送的尺寸；原图无法解析时为 `None`
    pub dimensions: Option<(u32, u32)>,
    pub downscaled: bool,
}

impl TransportImage {
    /// 编码为 `data:<mime>;base64,...`
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// 读取图片并准备发送
///
/// 面积超过 `max_area` 的图片会按比例缩小并重新编码为 JPEG；
/// 其余情况原样发送文件字节（包括无法解析的文件）。
pub fn prepare_for_transport(path: &Path, max_area: u64) -> Result<TransportImage> {
    let bytes =
        std::fs::read(path).with_context(|| format!("无法读取图片: {}", path.display()))?;

    let reader = ImageReader::new(Cursor::new(bytes.as_slice())).with_guessed_format()?;
    let format = reader.format();
    let dimensions = reader.into_dimensions().ok();

    if let Some((width, height)) = dimensions {
        if let Some((new_width, new_height)) = fit_within_area(width, height, max_area) {
            debug!(
                "图片 {} 过大 ({}x{})，缩小到 {}x{}",
                path.display(),
                width,
                height,
                new_width,
                new_height
            );

            let mut decoder = ImageReader::new(Cursor::new(bytes.as_slice())).with_guessed_format()?;
            decoder.limits(decode_limits(width, height));
            let decoded = decoder
                .decode()
                .with_context(|| format!("无法解码图片: {}", path.display()))?;
            let resized = decoded
                .resize_exact(new_width, new_height, FilterType::Lanczos3)
                .to_rgb8();

            let mut encoded = Cursor::new(Vec::new());
            resized
                .write_to(&mut encoded, ImageFormat::Jpeg)
                .with_context(|| format!("无法重新编码图片: {}", path.display()))?;

            return Ok(TransportImage {
                mime: "image/jpeg".to_string(),
                bytes: encoded.into_inner(),
                dimensions: Some((new_width, new_height)),
                downscaled: true,
            });
        }
    }

    let mime = format
        .map(|f| f.to_mime_type().to_string())
        .unwrap_or_else(|| mime_from_extension(path).to_string());

    Ok(TransportImage {
        mime,
        bytes,
        dimensions,
        downscaled: false,
    })
}

/// 每像素最多占用的字节数（16 位 RGBA）
const MAX_BYTES_PER_PIXEL: u64 = 8;

/// 按已探测的尺寸设置解码的内存上限，不低于默认的 512 MiB
pub fn decode_limits(width: u32, height: u32) -> Limits {
    let mut limits = Limits::default();
    limits.max_image_width = Some(width);
    limits.max_image_height = Some(height);
    let needed = (u64::from(width) * u64::from(height)).saturating_mul(MAX_BYTES_PER_PIXEL);
    limits.max_alloc = Some(needed.max(limits.max_alloc.unwrap_or(0)));
    limits
}

fn mime_from_extension(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}
