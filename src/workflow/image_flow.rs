//! 单张图片处理流程 - 流程层
//!
//! 流程顺序：
//! 1. 探测尺寸/格式（失败不致命，记为占位信息）
//! 2. 生成描述（重试和超时由 DescriptionService 负责）
//! 3. 组装成一行记录

use tracing::{debug, info, warn};

use crate::models::record::ImageRecord;
use crate::services::image_service;
use crate::services::{DescriptionService, VisionBackend};
use crate::utils::truncate_text;
use crate::workflow::image_ctx::ImageCtx;

/// 单张图片处理流程
///
/// - 编排"探测 → 描述 → 记录"
/// - 不写结果表，不决定是否跳过
/// - 无论成功失败都返回一行记录
pub struct ImageFlow<B> {
    describer: DescriptionService<B>,
    verbose_logging: bool,
}

impl<B: VisionBackend> ImageFlow<B> {
    pub fn new(describer: DescriptionService<B>, verbose_logging: bool) -> Self {
        Self {
            describer,
            verbose_logging,
        }
    }

    pub fn describer(&self) -> &DescriptionService<B> {
        &self.describer
    }

    pub async fn run(&self, ctx: &ImageCtx, subject: &str, audience: &str) -> ImageRecord {
        let meta = image_service::probe_or_placeholder(&ctx.path);
        if meta.width == 0 {
            warn!("{} ⚠️ 无法读取图片信息，仍尝试生成描述", ctx);
        } else {
            debug!("{} {} {}x{}", ctx, meta.format, meta.width, meta.height);
        }

        let outcome = self.describer.describe(&ctx.path, subject, audience).await;
        let (description, status) = outcome.into_parts();

        if status.is_failure() {
            warn!("{} ❌ {}", ctx, truncate_text(&description, 120));
        } else if self.verbose_logging {
            info!("{} 描述: {}", ctx, truncate_text(&description, 80));
        }

        ImageRecord::new(ctx.filename.clone(), meta, subject, audience, description, status)
    }
}
